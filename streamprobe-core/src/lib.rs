pub mod browser;
pub mod config;
pub mod discovery;
pub mod error;

pub use browser::{
    BrowserBackend, BrowserError, BrowserInstance, BrowserLease, BrowserPool, BrowserResult,
    ChromiumBackend, InterceptPolicy, PageTab, PoolStats, SessionMetrics, TrafficEvent,
};
pub use config::{
    load_engine_config, ChromiumSection, DiscoverySection, EngineConfig, LaunchMode, PoolSection,
    ServerSection, TargetsSection,
};
pub use discovery::{
    categorize, AssetKind, CategorizedResult, DiscoveryOutcome, NavigationOutcome, SessionReport,
    StepStatus, StreamDiscovery,
};
pub use error::{ConfigError, Result};
