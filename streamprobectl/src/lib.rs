use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use streamprobe_core::browser::{BrowserPool, ChromiumBackend, PoolStats, SessionMetrics};
use streamprobe_core::config::{load_engine_config, EngineConfig};
use streamprobe_core::discovery::{
    DiscoveryOutcome, NavigationOutcome, StepStatus, StreamDiscovery,
};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod commands;
pub mod http;

use commands::{ExtractArgs, ServeArgs};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] streamprobe_core::ConfigError),
    #[error("browser error: {0}")]
    Browser(#[from] streamprobe_core::BrowserError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless-browser stream discovery", long_about = None)]
pub struct Cli {
    /// Path to streamprobe.toml; built-in defaults are used when omitted
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the discovery API over HTTP
    Serve(ServeArgs),
    /// Discover streams on a single page
    Extract(ExtractArgs),
}

pub fn run(cli: Cli) -> Result<()> {
    init_tracing(cli.verbose);
    let config = resolve_config(&cli)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match &cli.command {
        Commands::Serve(_) => runtime.block_on(async {
            let discovery = build_discovery(&config);
            let state = http::AppState::new(discovery, config.targets.clone());
            http::serve(
                state,
                &config.server.bind,
                config.server.port,
                config.server.cors_allow_any,
            )
            .await?;
            Ok::<(), AppError>(())
        }),
        Commands::Extract(args) => {
            let target = http::parse_target(&args.url).ok_or_else(|| {
                AppError::InvalidInput(format!("{} is not an absolute http(s) URL", args.url))
            })?;
            let wait = args.wait_ms.map(Duration::from_millis);
            let (outcome, pool) = runtime.block_on(async {
                let discovery = build_discovery(&config);
                let outcome = discovery.discover(target.as_str(), wait).await;
                let pool = discovery.stats().await;
                discovery.shutdown().await;
                outcome.map(|outcome| (outcome, pool))
            })?;
            render(&ExtractReport::from_outcome(outcome, pool), cli.format)
        }
    }
}

/// Loads the config file (or defaults), then layers environment and
/// command-line overrides on top before validating.
pub fn resolve_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => load_engine_config(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env_overrides();

    match &cli.command {
        Commands::Serve(args) => {
            if let Some(port) = args.port {
                config.server.port = port;
            }
            if let Some(bind) = &args.bind {
                config.server.bind = bind.clone();
            }
            if let Some(path) = &args.chrome_path {
                config.chromium.set_executable(path.clone());
            }
        }
        Commands::Extract(args) => {
            if let Some(path) = &args.chrome_path {
                config.chromium.set_executable(path.clone());
            }
        }
    }

    config.validate()?;
    Ok(config)
}

fn build_discovery(config: &EngineConfig) -> StreamDiscovery {
    let backend = Arc::new(ChromiumBackend::new(config.chromium.clone()));
    let pool = BrowserPool::new(backend, config.pool.clone());
    StreamDiscovery::new(pool, &config.discovery)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct ExtractReport {
    pub target: String,
    pub stream: Option<String>,
    pub manifests: Vec<String>,
    pub direct_files: Vec<String>,
    pub subtitles: Vec<String>,
    pub all_urls: Vec<String>,
    pub navigation: NavigationOutcome,
    pub scrape: StepStatus,
    pub metrics: SessionMetrics,
    pub pool: PoolStats,
    pub elapsed_ms: u64,
}

impl ExtractReport {
    fn from_outcome(outcome: DiscoveryOutcome, pool: PoolStats) -> Self {
        let DiscoveryOutcome { result, report } = outcome;
        Self {
            target: report.target,
            stream: result.primary,
            manifests: result.manifests,
            direct_files: result.direct_files,
            subtitles: result.subtitles,
            all_urls: result.all_urls,
            navigation: report.navigation,
            scrape: report.scrape,
            metrics: report.metrics,
            pool,
            elapsed_ms: report.elapsed.as_millis() as u64,
        }
    }
}

fn navigation_label(outcome: &NavigationOutcome) -> String {
    match outcome {
        NavigationOutcome::Completed => "completed".to_string(),
        NavigationOutcome::TimedOut => "timed out".to_string(),
        NavigationOutcome::Failed { reason } => format!("failed ({reason})"),
    }
}

fn scrape_label(status: &StepStatus) -> String {
    match status {
        StepStatus::Completed => "completed".to_string(),
        StepStatus::TimedOut => "timed out".to_string(),
        StepStatus::Failed { reason } => format!("failed ({reason})"),
    }
}

impl DisplayFallback for ExtractReport {
    fn display(&self) -> String {
        let mut lines = vec![
            format!("Target: {}", self.target),
            format!(
                "Stream: {}",
                self.stream.as_deref().unwrap_or("none found")
            ),
        ];
        for (label, urls) in [
            ("Manifests", &self.manifests),
            ("Direct files", &self.direct_files),
            ("Subtitles", &self.subtitles),
        ] {
            if urls.is_empty() {
                continue;
            }
            lines.push(format!("{label}:"));
            for url in urls {
                lines.push(format!("  - {url}"));
            }
        }
        lines.push(format!(
            "Navigation: {} | DOM scrape: {}",
            navigation_label(&self.navigation),
            scrape_label(&self.scrape)
        ));
        lines.push(format!(
            "Observed {} requests, {} responses, {} blocked; {} URLs total in {} ms",
            self.metrics.requests_observed,
            self.metrics.responses_observed,
            self.metrics.requests_blocked,
            self.all_urls.len(),
            self.elapsed_ms
        ));
        lines.push(format!(
            "Browser pool: {} launched, {} reused, {} failed probes",
            self.pool.launches, self.pool.reuses, self.pool.failed_probes
        ));
        lines.join("\n")
    }
}
