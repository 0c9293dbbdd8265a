use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::browser::{BrowserResult, InterceptPolicy, PageTab, SessionMetrics, TrafficEvent};
use crate::config::DiscoverySection;

use super::classifier::{
    classify_content_type, has_media_extension, is_worker_stream, AssetKind,
};
use super::dom::DomScraper;
use super::manifest::{ExpansionOutcome, ExpansionStatus, ManifestExpander};
use super::set::{DiscoveredSet, UrlMetadata};

/// How the navigation step ended. Never fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum NavigationOutcome {
    Completed,
    TimedOut,
    Failed { reason: String },
}

/// How the DOM scrape ended. Never fatal to the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum StepStatus {
    Completed,
    TimedOut,
    Failed { reason: String },
}

/// Per-session tunables, derived from [`DiscoverySection`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub navigation_timeout: Duration,
    pub settle_delay: Duration,
    pub evaluation_timeout: Duration,
    pub manifest_fetch_timeout: Duration,
    pub intercept: InterceptPolicy,
    pub scan_globals: bool,
    pub global_scan_max_bytes: usize,
}

impl SessionOptions {
    pub fn from_config(config: &DiscoverySection) -> Self {
        Self {
            navigation_timeout: Duration::from_millis(config.navigation_timeout_ms),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            evaluation_timeout: Duration::from_millis(config.evaluation_timeout_ms),
            manifest_fetch_timeout: Duration::from_millis(config.manifest_fetch_timeout_ms),
            intercept: InterceptPolicy::from_names(&config.block_resource_types),
            scan_globals: config.scan_globals,
            global_scan_max_bytes: config.global_scan_max_bytes,
        }
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&DiscoverySection::default())
    }
}

/// Everything one session observed, with the outcome of each step.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub target: String,
    pub discovered: DiscoveredSet,
    pub navigation: NavigationOutcome,
    pub scrape: StepStatus,
    pub expansions: Vec<ExpansionOutcome>,
    pub metrics: SessionMetrics,
    pub elapsed: Duration,
}

/// Drives one tab through observe, navigate, settle, scrape and expand.
///
/// The session owns its discovered set; nothing is shared with other
/// sessions running against the same browser.
pub struct PageSession {
    id: Uuid,
    target: String,
    options: SessionOptions,
    discovered: DiscoveredSet,
    metrics: SessionMetrics,
}

impl PageSession {
    pub fn new(target: impl Into<String>, options: SessionOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: target.into(),
            options,
            discovered: DiscoveredSet::new(),
            metrics: SessionMetrics::default(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Runs the session on `tab`. Only observer installation can fail it;
    /// every later step degrades into its outcome instead. The caller owns
    /// the tab and is responsible for closing it.
    pub async fn run(mut self, tab: &dyn PageTab) -> BrowserResult<SessionReport> {
        let started = Instant::now();
        let mut events = tab.observe(&self.options.intercept).await?;

        let navigation = self.navigate(tab).await;
        tokio::time::sleep(self.options.settle_delay).await;
        self.drain(&mut events);

        let scrape = self.scrape(tab).await;
        self.drain(&mut events);

        let manifests = self.discovered.manifest_urls();
        let expander = ManifestExpander::new(self.options.manifest_fetch_timeout);
        let expansions = expander.expand_all(tab, &manifests).await;
        for outcome in &expansions {
            match &outcome.status {
                ExpansionStatus::Expanded { found } => {
                    self.metrics.record_expansion(found.len() as u64);
                    for url in found {
                        self.discovered.insert_bare(url.as_str());
                    }
                }
                ExpansionStatus::Skipped { reason } => {
                    self.metrics.record_manifest_failure();
                    debug!(
                        session = %self.id,
                        manifest = %outcome.manifest,
                        reason = %reason,
                        "manifest skipped"
                    );
                }
            }
        }

        let elapsed = started.elapsed();
        info!(
            session = %self.id,
            target = %self.target,
            discovered = self.discovered.len(),
            manifests = manifests.len(),
            navigation = ?navigation,
            elapsed_ms = elapsed.as_millis() as u64,
            "discovery session finished"
        );

        Ok(SessionReport {
            session_id: self.id,
            target: self.target,
            discovered: self.discovered,
            navigation,
            scrape,
            expansions,
            metrics: self.metrics,
            elapsed,
        })
    }

    async fn navigate(&self, tab: &dyn PageTab) -> NavigationOutcome {
        match timeout(self.options.navigation_timeout, tab.navigate(&self.target)).await {
            Ok(Ok(())) => NavigationOutcome::Completed,
            Ok(Err(err)) => {
                warn!(
                    session = %self.id,
                    target = %self.target,
                    error = %err,
                    "navigation failed; continuing with captured traffic"
                );
                NavigationOutcome::Failed {
                    reason: err.to_string(),
                }
            }
            Err(_) => {
                warn!(
                    session = %self.id,
                    target = %self.target,
                    timeout_ms = self.options.navigation_timeout.as_millis() as u64,
                    "navigation timed out; continuing with captured traffic"
                );
                NavigationOutcome::TimedOut
            }
        }
    }

    async fn scrape(&mut self, tab: &dyn PageTab) -> StepStatus {
        let scraper = DomScraper::new(
            self.options.scan_globals,
            self.options.global_scan_max_bytes,
        );
        match timeout(self.options.evaluation_timeout, scraper.scrape(tab)).await {
            Ok(Ok(findings)) => {
                self.metrics.record_dom_urls(findings.len() as u64);
                for finding in findings {
                    self.discovered.insert(finding.url, finding.metadata);
                }
                StepStatus::Completed
            }
            Ok(Err(err)) => {
                warn!(session = %self.id, error = %err, "DOM scrape failed");
                StepStatus::Failed {
                    reason: err.to_string(),
                }
            }
            Err(_) => {
                warn!(session = %self.id, "DOM scrape timed out");
                StepStatus::TimedOut
            }
        }
    }

    fn drain(&mut self, events: &mut UnboundedReceiver<TrafficEvent>) {
        while let Ok(event) = events.try_recv() {
            self.record(event);
        }
    }

    fn record(&mut self, event: TrafficEvent) {
        match event {
            TrafficEvent::Request { url, resource_type } => {
                self.metrics.record_request();
                if has_media_extension(&url) {
                    self.discovered
                        .insert(url, UrlMetadata::with_content_type(None, resource_type));
                }
            }
            TrafficEvent::Response {
                url,
                content_type,
                resource_type,
            } => {
                self.metrics.record_response();
                let declared = content_type
                    .as_deref()
                    .map_or(AssetKind::Unknown, classify_content_type);
                if has_media_extension(&url)
                    || declared != AssetKind::Unknown
                    || is_worker_stream(&url, resource_type)
                {
                    let metadata = UrlMetadata::with_content_type(content_type, resource_type);
                    self.discovered.insert(url, metadata);
                }
            }
            TrafficEvent::Blocked { url, resource_type } => {
                self.metrics.record_blocked();
                debug!(
                    session = %self.id,
                    url = %url,
                    resource_type = ?resource_type,
                    "request blocked"
                );
            }
        }
    }
}
