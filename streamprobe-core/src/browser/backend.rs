use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::discovery::ResourceKind;

use super::error::{BrowserError, BrowserResult};

/// Network activity reported by a tab's observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrafficEvent {
    Request {
        url: String,
        resource_type: Option<ResourceKind>,
    },
    Response {
        url: String,
        content_type: Option<String>,
        resource_type: Option<ResourceKind>,
    },
    Blocked {
        url: String,
        resource_type: ResourceKind,
    },
}

/// Which request types a tab aborts before they reach the network.
#[derive(Debug, Clone, Default)]
pub struct InterceptPolicy {
    blocked: HashSet<ResourceKind>,
}

impl InterceptPolicy {
    pub fn new(blocked: impl IntoIterator<Item = ResourceKind>) -> Self {
        let blocked = blocked
            .into_iter()
            .filter(|kind| !is_essential(*kind))
            .collect();
        Self { blocked }
    }

    /// Builds a policy from config names; unknown names are skipped.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Self {
        Self::new(
            names
                .iter()
                .filter_map(|name| name.as_ref().parse::<ResourceKind>().ok()),
        )
    }

    pub fn blocks(&self, kind: ResourceKind) -> bool {
        self.blocked.contains(&kind)
    }

    pub fn is_passthrough(&self) -> bool {
        self.blocked.is_empty()
    }
}

/// Requests the page cannot render its player without.
fn is_essential(kind: ResourceKind) -> bool {
    matches!(
        kind,
        ResourceKind::Document
            | ResourceKind::Script
            | ResourceKind::Xhr
            | ResourceKind::Fetch
            | ResourceKind::Media
            | ResourceKind::TextTrack
    )
}

#[async_trait]
pub trait BrowserBackend: Send + Sync {
    async fn launch(&self) -> BrowserResult<Arc<dyn BrowserInstance>>;
}

#[async_trait]
pub trait BrowserInstance: Send + Sync {
    /// Cheap liveness check run before a cached instance is reused.
    async fn probe(&self) -> BrowserResult<()>;
    async fn open_tab(&self) -> BrowserResult<Box<dyn PageTab>>;
    async fn close(&self) -> BrowserResult<()>;
}

/// One isolated browser tab.
#[async_trait]
pub trait PageTab: Send + Sync {
    /// Installs request/response observers. Must be called before
    /// `navigate`; events are delivered on the returned channel until the
    /// tab closes.
    async fn observe(
        &self,
        policy: &InterceptPolicy,
    ) -> BrowserResult<UnboundedReceiver<TrafficEvent>>;

    async fn navigate(&self, url: &str) -> BrowserResult<()>;

    /// Evaluates an expression in the page, awaiting returned promises.
    async fn evaluate(&self, expression: &str) -> BrowserResult<serde_json::Value>;

    /// Fetches `url` from inside the page so the origin sees the page's own
    /// cookies and TLS fingerprint. `None` means a non-success status or a
    /// rejected fetch.
    async fn fetch_text(&self, url: &str) -> BrowserResult<Option<String>> {
        let value = self.evaluate(&in_page_fetch_script(url)?).await?;
        let body: Option<String> = serde_json::from_value(value)
            .map_err(|err| BrowserError::Script(format!("unexpected fetch result: {err}")))?;
        Ok(body)
    }

    async fn close(self: Box<Self>) -> BrowserResult<()>;
}

pub(crate) fn in_page_fetch_script(url: &str) -> BrowserResult<String> {
    let literal = serde_json::to_string(url)
        .map_err(|err| BrowserError::Script(format!("failed to encode url: {err}")))?;
    Ok(format!(
        r#"(async () => {{
    try {{
        const res = await fetch({literal}, {{ method: 'GET', credentials: 'include' }});
        if (!res.ok) return null;
        return await res.text();
    }} catch (_) {{
        return null;
    }}
}})()"#
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_never_blocks_essential_types() {
        let policy = InterceptPolicy::from_names(&["image", "font", "script", "media", "bogus"]);
        assert!(policy.blocks(ResourceKind::Image));
        assert!(policy.blocks(ResourceKind::Font));
        assert!(!policy.blocks(ResourceKind::Script));
        assert!(!policy.blocks(ResourceKind::Media));
        assert!(!policy.blocks(ResourceKind::Document));
    }

    #[test]
    fn fetch_script_quotes_url() {
        let script = in_page_fetch_script("https://a.example/x.m3u8?q=\"'").unwrap();
        assert!(script.contains(r#"fetch("https://a.example/x.m3u8?q=\"'""#));
    }
}
