use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

const WORKER_DOMAIN: &str = "workers.dev";

/// Stream-asset category of a discovered URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Manifest,
    DirectFile,
    Subtitle,
    Unknown,
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AssetKind::Manifest => "manifest",
            AssetKind::DirectFile => "direct_file",
            AssetKind::Subtitle => "subtitle",
            AssetKind::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// The browser's classification of why a request was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Document,
    Stylesheet,
    Image,
    Media,
    Font,
    Script,
    TextTrack,
    Xhr,
    Fetch,
    Prefetch,
    EventSource,
    WebSocket,
    Manifest,
    SignedExchange,
    Ping,
    CspViolationReport,
    Preflight,
    Other,
}

impl FromStr for ResourceKind {
    type Err = String;

    /// Accepts both protocol spelling (`TextTrack`, `XHR`) and config
    /// spelling (`text_track`, `xhr`).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase().replace(['_', '-'], "");
        let kind = match normalized.as_str() {
            "document" => ResourceKind::Document,
            "stylesheet" => ResourceKind::Stylesheet,
            "image" => ResourceKind::Image,
            "media" => ResourceKind::Media,
            "font" => ResourceKind::Font,
            "script" => ResourceKind::Script,
            "texttrack" => ResourceKind::TextTrack,
            "xhr" => ResourceKind::Xhr,
            "fetch" => ResourceKind::Fetch,
            "prefetch" => ResourceKind::Prefetch,
            "eventsource" => ResourceKind::EventSource,
            "websocket" => ResourceKind::WebSocket,
            "manifest" => ResourceKind::Manifest,
            "signedexchange" => ResourceKind::SignedExchange,
            "ping" => ResourceKind::Ping,
            "cspviolationreport" => ResourceKind::CspViolationReport,
            "preflight" => ResourceKind::Preflight,
            "other" => ResourceKind::Other,
            _ => return Err(format!("unknown resource type: {value}")),
        };
        Ok(kind)
    }
}

fn extension_regex() -> &'static Regex {
    static EXTENSION: OnceLock<Regex> = OnceLock::new();
    EXTENSION.get_or_init(|| {
        Regex::new(r"(?i)\.(m3u8|mp4|m4v|webm|vtt|srt|ttml|dfxp)(?:[?#]|$)").expect("valid regex")
    })
}

/// Category implied by the URL's file extension alone.
pub fn classify_extension(url: &str) -> AssetKind {
    let Some(captures) = extension_regex().captures(url) else {
        return AssetKind::Unknown;
    };
    match captures[1].to_ascii_lowercase().as_str() {
        "m3u8" => AssetKind::Manifest,
        "mp4" | "m4v" | "webm" => AssetKind::DirectFile,
        _ => AssetKind::Subtitle,
    }
}

/// True when the bare URL carries a media or subtitle file extension.
pub fn has_media_extension(url: &str) -> bool {
    extension_regex().is_match(url)
}

/// True for media-typed traffic served from an edge-worker origin. Such
/// proxies stream playlists from extension-less paths with generic types.
pub fn is_worker_stream(url: &str, resource_type: Option<ResourceKind>) -> bool {
    if resource_type != Some(ResourceKind::Media) {
        return false;
    }
    Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(str::to_ascii_lowercase))
        .is_some_and(|host| {
            host == WORKER_DOMAIN || host.ends_with(&format!(".{WORKER_DOMAIN}"))
        })
}

/// Category implied by a declared `Content-Type`.
pub fn classify_content_type(content_type: &str) -> AssetKind {
    let ct = content_type.to_ascii_lowercase();
    if ct.contains("mpegurl") {
        AssetKind::Manifest
    } else if ct.contains("vtt")
        || ct.contains("subrip")
        || ct.contains("ttml")
        || ct.contains("dfxp")
    {
        AssetKind::Subtitle
    } else if ct.contains("mp4") || ct.contains("video/webm") {
        AssetKind::DirectFile
    } else {
        AssetKind::Unknown
    }
}

/// Maps a URL plus optional response/request facts to an asset category.
///
/// Extension rules win; the declared content type is consulted only for
/// URLs without a recognizable extension, and the resource type only when
/// both are silent. An extension-less `Media` load is treated as a stream
/// manifest unless it points at a script.
pub fn classify(
    url: &str,
    content_type: Option<&str>,
    resource_type: Option<ResourceKind>,
) -> AssetKind {
    let by_extension = classify_extension(url);
    if by_extension != AssetKind::Unknown {
        return by_extension;
    }
    if let Some(by_content) = content_type.map(classify_content_type) {
        if by_content != AssetKind::Unknown {
            return by_content;
        }
    }
    match resource_type {
        Some(ResourceKind::TextTrack) => AssetKind::Subtitle,
        Some(ResourceKind::Media) if !url.to_ascii_lowercase().contains(".js") => {
            AssetKind::Manifest
        }
        _ => AssetKind::Unknown,
    }
}
