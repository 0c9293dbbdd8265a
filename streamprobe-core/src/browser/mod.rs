mod backend;
mod chromium;
mod error;
mod metrics;
mod pool;

pub use backend::{BrowserBackend, BrowserInstance, InterceptPolicy, PageTab, TrafficEvent};
pub use chromium::{ChromiumBackend, ChromiumBrowser, ChromiumTab};
pub use error::{BrowserError, BrowserResult};
pub use metrics::{PoolStats, SessionMetrics};
pub use pool::{BrowserLease, BrowserPool};
