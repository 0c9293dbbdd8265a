use serde::{Deserialize, Serialize};

/// Counters for a single discovery session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub requests_observed: u64,
    pub responses_observed: u64,
    pub requests_blocked: u64,
    pub dom_urls: u64,
    pub manifests_expanded: u64,
    pub manifest_failures: u64,
    pub expansion_urls: u64,
}

impl SessionMetrics {
    pub fn record_request(&mut self) {
        self.requests_observed = self.requests_observed.saturating_add(1);
    }

    pub fn record_response(&mut self) {
        self.responses_observed = self.responses_observed.saturating_add(1);
    }

    pub fn record_blocked(&mut self) {
        self.requests_blocked = self.requests_blocked.saturating_add(1);
    }

    pub fn record_dom_urls(&mut self, count: u64) {
        self.dom_urls = self.dom_urls.saturating_add(count);
    }

    pub fn record_expansion(&mut self, found: u64) {
        self.manifests_expanded = self.manifests_expanded.saturating_add(1);
        self.expansion_urls = self.expansion_urls.saturating_add(found);
    }

    pub fn record_manifest_failure(&mut self) {
        self.manifest_failures = self.manifest_failures.saturating_add(1);
    }
}

/// Snapshot of browser pool activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub launches: u64,
    pub reuses: u64,
    pub failed_probes: u64,
    pub idle_teardowns: u64,
    pub active_leases: usize,
    pub browser_running: bool,
}
