use std::path::PathBuf;

use clap::Args;

/// Runs a single discovery against a page and prints the categorized result.
#[derive(Args, Debug, Clone)]
pub struct ExtractArgs {
    /// Absolute http(s) URL of the page hosting the player
    pub url: String,

    /// Settle delay for this run in milliseconds, capped by
    /// `discovery.max_settle_delay_ms`
    #[arg(long, value_name = "MS")]
    pub wait_ms: Option<u64>,

    /// Chromium executable; switches the launcher to managed mode
    #[arg(long, value_name = "PATH")]
    pub chrome_path: Option<PathBuf>,
}
