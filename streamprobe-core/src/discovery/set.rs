use std::collections::HashMap;

use serde::Serialize;

use super::classifier::{classify, AssetKind, ResourceKind};

/// Facts observed about a URL while it was being discovered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UrlMetadata {
    pub content_type: Option<String>,
    pub resource_type: Option<ResourceKind>,
}

impl UrlMetadata {
    pub fn with_content_type(
        content_type: Option<String>,
        resource_type: Option<ResourceKind>,
    ) -> Self {
        Self {
            content_type: content_type.filter(|value| !value.is_empty()),
            resource_type,
        }
    }

    pub fn with_resource_type(resource_type: ResourceKind) -> Self {
        Self {
            content_type: None,
            resource_type: Some(resource_type),
        }
    }

    fn absorb(&mut self, other: UrlMetadata) {
        if self.content_type.is_none() {
            self.content_type = other.content_type;
        }
        if self.resource_type.is_none() {
            self.resource_type = other.resource_type;
        }
    }
}

/// Unique URLs seen by one session, in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct DiscoveredSet {
    order: Vec<String>,
    metadata: HashMap<String, UrlMetadata>,
}

impl DiscoveredSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a URL; returns `false` when it was already present. Metadata
    /// for a known URL only fills fields that were still empty.
    pub fn insert(&mut self, url: impl Into<String>, metadata: UrlMetadata) -> bool {
        let url = url.into();
        let url = url.trim();
        if url.is_empty() {
            return false;
        }
        if let Some(existing) = self.metadata.get_mut(url) {
            existing.absorb(metadata);
            return false;
        }
        self.order.push(url.to_string());
        self.metadata.insert(url.to_string(), metadata);
        true
    }

    pub fn insert_bare(&mut self, url: impl Into<String>) -> bool {
        self.insert(url, UrlMetadata::default())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.metadata.contains_key(url)
    }

    pub fn metadata(&self, url: &str) -> Option<&UrlMetadata> {
        self.metadata.get(url)
    }

    pub fn kind_of(&self, url: &str) -> AssetKind {
        let meta = self.metadata.get(url);
        classify(
            url,
            meta.and_then(|m| m.content_type.as_deref()),
            meta.and_then(|m| m.resource_type),
        )
    }

    pub fn urls(&self) -> &[String] {
        &self.order
    }

    pub fn manifest_urls(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|url| self.kind_of(url) == AssetKind::Manifest)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
