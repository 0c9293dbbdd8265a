use std::path::PathBuf;

use clap::Args;

/// Runs the JSON-over-HTTP discovery API.
#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Listening port (overrides `server.port` and `PORT`)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bind address (overrides `server.bind`)
    #[arg(long, value_name = "ADDR")]
    pub bind: Option<String>,

    /// Chromium executable; switches the launcher to managed mode
    #[arg(long, value_name = "PATH")]
    pub chrome_path: Option<PathBuf>,
}
