//! # Dbferry - Database snapshot ferry
//!
//! Replicates the contents of a relational database into a self-describing,
//! paginated flat-file snapshot, and separately rebuilds that snapshot into
//! an indexed local store.
//!
//! Dbferry provides:
//! - Schema introspection (tables, columns, primary keys, secondary indices)
//! - Ordered, backpressure-aware streaming export of newline-delimited records
//! - A manifest describing every exported table
//! - Manifest-driven reconstruction into a key/value store with secondary
//!   indices and transactional page commits
//! - A single event stream reporting progress and exactly one terminal
//!   outcome per run

pub mod config;
pub mod event;
pub mod export;
pub mod import;
pub mod introspect;
pub mod manifest;
pub mod paging;
pub mod progress;
pub mod source;
pub mod store;
pub mod ui;

// Re-exports for convenient access
pub use config::{ExportConfig, ImportConfig};
pub use event::{Event, EventStream};
pub use manifest::{Manifest, TableDescriptor};
pub use source::QueryExecutor;
pub use store::StoreEngine;

/// One record: a flat mapping from column name to value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Result type alias for dbferry operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for dbferry operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Query error: {0}")]
    Query(String),

    #[error("Manifest not found: {0}")]
    ManifestNotFound(String),

    #[error("Store schema error: {0}")]
    StoreSchema(String),

    #[error("Page storage error: {0}")]
    PageStorage(String),

    #[error("Record stream error: {0}")]
    RecordStream(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Coercion error: {0}")]
    Coerce(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl Error {
    /// Reason code carried by a terminal `error` event.
    pub fn reason(&self) -> String {
        match self {
            Error::ManifestNotFound(_) => "manifest_not_found".to_string(),
            Error::StoreSchema(_) => "idb_schema_failed".to_string(),
            Error::PageStorage(_) => "page_storage_failed".to_string(),
            Error::RecordStream(_) => "record_stream_failed".to_string(),
            other => other.to_string(),
        }
    }
}
