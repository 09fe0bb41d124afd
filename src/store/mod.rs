//! Indexed local-store capability.
//!
//! The import side reconstructs each table into a store with optional
//! secondary indices; writes happen in per-page transactions. The engine
//! behind this boundary is replaceable; [`sqlite`] ships the reference
//! implementation.

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteStoreEngine;

use crate::Result;
use async_trait::async_trait;
use serde_json::Value;

/// Secondary index over an ordered column list.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSpec {
    pub name: String,
    pub columns: Vec<String>,
}

/// One store to create.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreSpec {
    pub name: String,
    /// Column whose value keys the store; `None` for stores written with
    /// explicit (synthesized) keys.
    pub key_path: Option<String>,
    pub indices: Vec<IndexSpec>,
}

/// A record heading into a store, with its explicit key when the store has
/// no intrinsic key path.
#[derive(Debug, Clone)]
pub struct PutRecord {
    pub key: Option<String>,
    pub record: Value,
}

#[async_trait]
pub trait StoreEngine: Send + Sync {
    /// Create all stores and indices as one atomic unit: on failure, no
    /// store from `specs` is left addressable for writing.
    async fn create_schema(&self, specs: &[StoreSpec]) -> Result<()>;

    /// Write one page: open a read-write transaction, `put` every record,
    /// and resolve only on successful commit.
    async fn write_page(&self, store: &str, page: &[PutRecord]) -> Result<()>;

    /// Release the engine handle at the end of the run.
    async fn close(&self) {}
}

/// Key fragment for a scalar value, as it appears in store keys.
pub fn key_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}
