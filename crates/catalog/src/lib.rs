//! Discovery catalog: the authoritative mapping from a named concept
//! ("infinite magic", "rupee counter") to a target address and byte
//! pattern, with a versioned confidence trail.
//!
//! Records are immutable once stored. Revisions append a new version that
//! references the one it supersedes, so the history of why a target
//! address changed is never lost. Persistence is an append-only JSON Lines
//! log behind a small store trait; the in-memory index is rebuilt from the
//! log on open.

mod builtin;
mod bundle;
mod catalog;
mod discovery;
mod store;

pub use builtin::seed_builtin;
pub use bundle::{BundleStats, ExportBundle, SCHEMA_VERSION};
pub use catalog::{Catalog, DiscoveryChanges, DiscoveryFilter};
pub use discovery::{Category, Confidence, Discovery, DiscoveryDraft, Relation};
pub use store::{CatalogStore, JsonlStore, MemoryStore};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("invalid discovery ({step}): {reason}")]
    Validation { step: &'static str, reason: String },
    #[error("a discovery named {name:?} already exists in category {category}")]
    Duplicate {
        name: String,
        category: Category,
    },
    #[error("no discovery with id {0}")]
    NotFound(u64),
    #[error("store error: {0}")]
    Store(String),
    #[error("unsupported bundle schema version {0} (expected {SCHEMA_VERSION})")]
    SchemaVersion(u32),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
