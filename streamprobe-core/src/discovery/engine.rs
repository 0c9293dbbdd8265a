use std::time::Duration;

use tracing::{debug, warn};

use crate::browser::{BrowserError, BrowserPool, BrowserResult, PoolStats};
use crate::config::DiscoverySection;

use super::categorize::{categorize, CategorizedResult};
use super::session::{PageSession, SessionOptions, SessionReport};

/// Result of one discovery request.
#[derive(Debug, Clone)]
pub struct DiscoveryOutcome {
    pub result: CategorizedResult,
    pub report: SessionReport,
}

/// Entry point for discovery requests: leases the pooled browser, runs a
/// [`PageSession`] in a fresh tab and categorizes what it found.
#[derive(Clone)]
pub struct StreamDiscovery {
    pool: BrowserPool,
    options: SessionOptions,
    max_settle_delay: Duration,
}

impl StreamDiscovery {
    pub fn new(pool: BrowserPool, config: &DiscoverySection) -> Self {
        Self {
            pool,
            options: SessionOptions::from_config(config),
            max_settle_delay: Duration::from_millis(config.max_settle_delay_ms),
        }
    }

    pub fn max_settle_delay(&self) -> Duration {
        self.max_settle_delay
    }

    /// Discovers stream URLs on `target`. `wait` overrides the settle delay
    /// for this request and is clamped to the configured maximum.
    ///
    /// Fails only when no browser or tab could be obtained, or the tab
    /// refused its network observers. The session runs on its own task,
    /// which closes the tab on every path even if this future is dropped.
    pub async fn discover(
        &self,
        target: &str,
        wait: Option<Duration>,
    ) -> BrowserResult<DiscoveryOutcome> {
        let options = match wait {
            Some(wait) => self
                .options
                .clone()
                .with_settle_delay(wait.min(self.max_settle_delay)),
            None => self.options.clone(),
        };

        let lease = self.pool.acquire().await?;
        let session = PageSession::new(target, options);
        debug!(
            session = %session.id(),
            browser = %lease.browser_id(),
            target = %target,
            "starting discovery session"
        );

        let target = target.to_string();
        let task = tokio::spawn(async move {
            let tab = lease.open_tab().await?;
            let report = session.run(tab.as_ref()).await;
            if let Err(err) = tab.close().await {
                warn!(target = %target, error = %err, "failed to close discovery tab");
            }
            drop(lease);
            report
        });
        let report = task.await.map_err(|err| {
            BrowserError::Unexpected(format!("discovery session task failed: {err}"))
        })??;

        let result = categorize(&report.discovered);
        Ok(DiscoveryOutcome { result, report })
    }

    /// Lifetime counters of the underlying browser pool.
    pub async fn stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }
}
