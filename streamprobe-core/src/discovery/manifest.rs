use std::collections::HashSet;
use std::sync::OnceLock;
use std::time::Duration;

use futures::future::join_all;
use regex::Regex;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::browser::PageTab;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ExpansionStatus {
    Expanded { found: Vec<String> },
    Skipped { reason: String },
}

/// Result of expanding one manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpansionOutcome {
    pub manifest: String,
    #[serde(flatten)]
    pub status: ExpansionStatus,
}

impl ExpansionOutcome {
    fn skipped(manifest: &str, reason: impl Into<String>) -> Self {
        Self {
            manifest: manifest.to_string(),
            status: ExpansionStatus::Skipped {
                reason: reason.into(),
            },
        }
    }
}

/// Fetches manifests through the page and mines them for further subtitle
/// and media references. Expansion is one level deep: references found here
/// are reported but never fetched.
#[derive(Debug, Clone)]
pub struct ManifestExpander {
    fetch_timeout: Duration,
}

impl ManifestExpander {
    pub fn new(fetch_timeout: Duration) -> Self {
        Self { fetch_timeout }
    }

    pub async fn expand(&self, tab: &dyn PageTab, manifest_url: &str) -> ExpansionOutcome {
        let fetch = tokio::time::timeout(self.fetch_timeout, tab.fetch_text(manifest_url));
        let body = match fetch.await {
            Err(_) => return ExpansionOutcome::skipped(manifest_url, "fetch timed out"),
            Ok(Err(err)) => return ExpansionOutcome::skipped(manifest_url, err.to_string()),
            Ok(Ok(None)) => {
                return ExpansionOutcome::skipped(
                    manifest_url,
                    "fetch rejected or non-success status",
                )
            }
            Ok(Ok(Some(body))) => body,
        };
        if body.trim().is_empty() {
            return ExpansionOutcome::skipped(manifest_url, "empty body");
        }
        let found = extract_references(&body, manifest_url);
        debug!(manifest = %manifest_url, found = found.len(), "manifest expanded");
        ExpansionOutcome {
            manifest: manifest_url.to_string(),
            status: ExpansionStatus::Expanded { found },
        }
    }

    /// Expands each distinct manifest once, concurrently. Outcomes follow the
    /// order of first appearance in `manifests`.
    pub async fn expand_all(
        &self,
        tab: &dyn PageTab,
        manifests: &[String],
    ) -> Vec<ExpansionOutcome> {
        let mut seen = HashSet::new();
        let unique = manifests
            .iter()
            .filter(|url| seen.insert(url.as_str()))
            .collect::<Vec<_>>();
        join_all(unique.into_iter().map(|url| self.expand(tab, url))).await
    }
}

struct ReferencePatterns {
    quoted: Regex,
    subtitle_media: Regex,
    absolute: Regex,
}

fn patterns() -> &'static ReferencePatterns {
    static PATTERNS: OnceLock<ReferencePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| ReferencePatterns {
        quoted: Regex::new(r#"(?i)URI="([^"']+\.(?:vtt|srt|m3u8|ttml|dfxp)[^"']*)""#)
            .expect("valid regex"),
        subtitle_media: Regex::new(r#"(?i)#EXT-X-MEDIA:[^\n]*TYPE=SUBTITLES[^\n]*URI="([^"']+)""#)
            .expect("valid regex"),
        absolute: Regex::new(
            r#"(?i)https?://[^\s"']+\.(?:vtt|srt|m3u8|ttml|dfxp|mp4|m4v|webm)(?:\?[^\s"'<>]*)?"#,
        )
        .expect("valid regex"),
    })
}

/// Scans a manifest body for referenced URIs, resolving relative ones
/// against `base`. Results are unique, in pattern-then-position order.
pub fn extract_references(body: &str, base: &str) -> Vec<String> {
    let base = Url::parse(base).ok();
    let resolve = |raw: &str| -> String {
        base.as_ref()
            .and_then(|base| base.join(raw).ok())
            .map(|url| url.to_string())
            .unwrap_or_else(|| raw.to_string())
    };

    let patterns = patterns();
    let mut seen = HashSet::new();
    let mut found = Vec::new();
    let mut push = |url: String| {
        if seen.insert(url.clone()) {
            found.push(url);
        }
    };

    for captures in patterns.quoted.captures_iter(body) {
        push(resolve(&captures[1]));
    }
    for captures in patterns.subtitle_media.captures_iter(body) {
        push(resolve(&captures[1]));
    }
    for matched in patterns.absolute.find_iter(body) {
        push(matched.as_str().to_string());
    }
    found
}
