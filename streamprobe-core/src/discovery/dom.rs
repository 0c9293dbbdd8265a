use serde::Deserialize;

use crate::browser::{BrowserError, BrowserResult, PageTab};

use super::classifier::{has_media_extension, ResourceKind};
use super::set::UrlMetadata;

/// A URL recovered from the rendered document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomFinding {
    pub url: String,
    pub metadata: UrlMetadata,
}

/// One-shot in-page scrape of media elements and the performance timeline.
///
/// Global scanning walks `window`'s own enumerable values and serializes
/// them looking for embedded media URLs. It is off by default; when on,
/// serialization of any single value aborts once it exceeds
/// `global_scan_max_bytes`.
#[derive(Debug, Clone)]
pub struct DomScraper {
    scan_globals: bool,
    global_scan_max_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct ScrapePayload {
    #[serde(default)]
    elements: Vec<ElementSource>,
    #[serde(default)]
    resources: Vec<String>,
    #[serde(default)]
    globals: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ElementSource {
    url: String,
    tag: String,
}

impl DomScraper {
    pub fn new(scan_globals: bool, global_scan_max_bytes: usize) -> Self {
        Self {
            scan_globals,
            global_scan_max_bytes,
        }
    }

    pub async fn scrape(&self, tab: &dyn PageTab) -> BrowserResult<Vec<DomFinding>> {
        let payload = tab.evaluate(&self.script()).await?;
        findings_from_payload(payload)
    }

    fn script(&self) -> String {
        format!(
            r#"(() => {{
    const resolve = (value) => {{
        try {{ return new URL(value, document.baseURI).href; }} catch (_) {{ return value; }}
    }};
    const elements = [];
    const collect = (selector, tag) => {{
        document.querySelectorAll(selector).forEach((el) => {{
            if (el.src) elements.push({{ url: String(el.src), tag }});
            const attr = el.getAttribute ? el.getAttribute('src') : null;
            if (attr) elements.push({{ url: resolve(attr), tag }});
        }});
    }};
    collect('video', 'video');
    collect('video source', 'source');
    collect('track', 'track');

    let resources = [];
    try {{
        resources = performance.getEntriesByType('resource').map((entry) => String(entry.name));
    }} catch (_) {{}}

    const globals = [];
    if ({scan_globals}) {{
        const limit = {limit};
        const pattern = /https?:\/\/[^\s"'\\]+\.(?:m3u8|mp4|m4v|webm|vtt|srt|ttml|dfxp)(?:\?[^\s"'<>\\]*)?/gi;
        const bounded = (value) => {{
            let budget = limit;
            return JSON.stringify(value, (key, inner) => {{
                budget -= key.length + (typeof inner === 'string' ? inner.length : 8);
                if (budget < 0) throw new Error('budget');
                return inner;
            }});
        }};
        for (const key of Object.keys(window)) {{
            let value;
            try {{ value = window[key]; }} catch (_) {{ continue; }}
            if (value === null || value === undefined || value === window) continue;
            if (typeof value === 'function') continue;
            if (typeof Node !== 'undefined' && value instanceof Node) continue;
            let text;
            try {{ text = typeof value === 'string' ? value : bounded(value); }} catch (_) {{ continue; }}
            if (!text || text.length > limit) continue;
            const matches = text.match(pattern);
            if (matches) globals.push(...matches);
        }}
    }}
    return {{ elements, resources, globals }};
}})()"#,
            scan_globals = self.scan_globals,
            limit = self.global_scan_max_bytes,
        )
    }
}

fn findings_from_payload(payload: serde_json::Value) -> BrowserResult<Vec<DomFinding>> {
    let payload: ScrapePayload = serde_json::from_value(payload)
        .map_err(|err| BrowserError::Script(format!("failed to decode DOM payload: {err}")))?;

    let mut findings = Vec::new();
    for element in payload.elements {
        if element.url.trim().is_empty() {
            continue;
        }
        let kind = if element.tag == "track" {
            ResourceKind::TextTrack
        } else {
            ResourceKind::Media
        };
        findings.push(DomFinding {
            url: element.url,
            metadata: UrlMetadata::with_resource_type(kind),
        });
    }
    findings.extend(
        payload
            .resources
            .into_iter()
            .chain(payload.globals)
            .filter(|url| has_media_extension(url))
            .map(|url| DomFinding {
                url,
                metadata: UrlMetadata::default(),
            }),
    );
    Ok(findings)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn tags_track_sources_as_text_tracks() {
        let findings = findings_from_payload(json!({
            "elements": [
                { "url": "https://site.example/player/stream", "tag": "video" },
                { "url": "https://site.example/cc/en", "tag": "track" },
                { "url": "", "tag": "source" }
            ],
            "resources": [],
            "globals": []
        }))
        .unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(
            findings[0].metadata.resource_type,
            Some(ResourceKind::Media)
        );
        assert_eq!(
            findings[1].metadata.resource_type,
            Some(ResourceKind::TextTrack)
        );
    }

    #[test]
    fn performance_entries_are_filtered_by_extension() {
        let findings = findings_from_payload(json!({
            "elements": [],
            "resources": [
                "https://cdn.example/app.js",
                "https://cdn.example/hls/master.m3u8",
                "https://cdn.example/poster.jpg"
            ]
        }))
        .unwrap();
        let urls = findings.iter().map(|f| f.url.as_str()).collect::<Vec<_>>();
        assert_eq!(urls, vec!["https://cdn.example/hls/master.m3u8"]);
    }

    #[test]
    fn malformed_payload_is_an_error() {
        assert!(findings_from_payload(json!("nope")).is_err());
    }

    #[test]
    fn script_embeds_scan_flag_and_limit() {
        let script = DomScraper::new(true, 4096).script();
        assert!(script.contains("if (true)"));
        assert!(script.contains("const limit = 4096;"));
        let script = DomScraper::new(false, 4096).script();
        assert!(script.contains("if (false)"));
    }
}
