use serde::Serialize;

use super::classifier::AssetKind;
use super::set::DiscoveredSet;

const INTERNAL_SCHEMES: [&str; 3] = ["blob:", "data:", "mediasource:"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategorizedResult {
    pub manifests: Vec<String>,
    pub direct_files: Vec<String>,
    pub subtitles: Vec<String>,
    /// First manifest, else first direct file.
    pub primary: Option<String>,
    /// Every discovered URL, internal-only references included.
    pub all_urls: Vec<String>,
}

/// True for references that only resolve inside the browser process.
pub fn is_internal_only(url: &str) -> bool {
    let lower = url.trim_start().to_ascii_lowercase();
    INTERNAL_SCHEMES
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

pub fn categorize(set: &DiscoveredSet) -> CategorizedResult {
    let mut result = CategorizedResult {
        all_urls: set.urls().to_vec(),
        ..Default::default()
    };
    for url in set.urls() {
        if is_internal_only(url) {
            continue;
        }
        match set.kind_of(url) {
            AssetKind::Manifest => result.manifests.push(url.clone()),
            AssetKind::DirectFile => result.direct_files.push(url.clone()),
            AssetKind::Subtitle => result.subtitles.push(url.clone()),
            AssetKind::Unknown => {}
        }
    }
    result.primary = result
        .manifests
        .first()
        .or_else(|| result.direct_files.first())
        .cloned();
    result
}
