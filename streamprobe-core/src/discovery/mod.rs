mod categorize;
mod classifier;
mod dom;
mod engine;
mod manifest;
mod session;
mod set;

pub use categorize::{categorize, is_internal_only, CategorizedResult};
pub use classifier::{
    classify, classify_content_type, classify_extension, has_media_extension, is_worker_stream,
    AssetKind, ResourceKind,
};
pub use dom::{DomFinding, DomScraper};
pub use engine::{DiscoveryOutcome, StreamDiscovery};
pub use manifest::{extract_references, ExpansionOutcome, ExpansionStatus, ManifestExpander};
pub use session::{NavigationOutcome, PageSession, SessionOptions, SessionReport, StepStatus};
pub use set::{DiscoveredSet, UrlMetadata};
