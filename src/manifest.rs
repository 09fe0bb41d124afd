//! The manifest: schema-describing document produced by export and
//! consumed by import.

use crate::Result;
use crate::export::sink::RecordSink;
use crate::introspect::Introspection;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the manifest file inside a snapshot directory.
pub const MANIFEST_FILE: &str = "_manifest.json";

/// Extension of per-table record files.
pub const RECORD_FILE_EXT: &str = "ndjson";

/// Describes one exported table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Exact row count at introspection time.
    pub row_count: u64,
    /// Primary-key columns in the database's declared key order; the order
    /// defines composite-key concatenation. Absent from the document when
    /// the table has none.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub primary_keys: Vec<String>,
    /// Secondary-index name to ordered column list.
    #[serde(default)]
    pub indices: BTreeMap<String, Vec<String>>,
    /// Column name to source data-type tag.
    #[serde(default)]
    pub columns: BTreeMap<String, String>,
}

/// Table identifier to descriptor, in stable iteration order.
pub type Manifest = BTreeMap<String, TableDescriptor>;

/// Build descriptors from a completed introspection.
pub fn from_introspection(intro: &Introspection) -> Manifest {
    intro
        .tables
        .iter()
        .map(|table| {
            let descriptor = TableDescriptor {
                row_count: intro.row_counts.get(table).copied().unwrap_or(0),
                primary_keys: intro.primary_keys.get(table).cloned().unwrap_or_default(),
                indices: intro.indices.get(table).cloned().unwrap_or_default(),
                columns: intro.columns.get(table).cloned().unwrap_or_default(),
            };
            (table.clone(), descriptor)
        })
        .collect()
}

/// Record file name for a manifest key.
pub fn record_file_name(table: &str) -> String {
    format!("{}.{}", table, RECORD_FILE_EXT)
}

/// Parse a complete manifest document.
pub fn parse(bytes: &[u8]) -> Result<Manifest> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Streams a manifest document to a sink, one table entry at a time.
///
/// The document is valid JSON only after [`ManifestWriter::close`];
/// intermediate states are intentionally not parseable on their own.
pub struct ManifestWriter<S: RecordSink> {
    sink: S,
    entries: usize,
}

impl<S: RecordSink> ManifestWriter<S> {
    pub async fn open(mut sink: S) -> Result<Self> {
        sink.write(b"{").await?;
        Ok(Self { sink, entries: 0 })
    }

    pub async fn write_table(&mut self, name: &str, descriptor: &TableDescriptor) -> Result<()> {
        let mut entry = Vec::new();
        if self.entries > 0 {
            entry.push(b',');
        }
        entry.push(b'\n');
        entry.extend_from_slice(serde_json::to_string(name)?.as_bytes());
        entry.push(b':');
        entry.extend_from_slice(&serde_json::to_vec(descriptor)?);
        self.sink.write(&entry).await?;
        self.entries += 1;
        Ok(())
    }

    /// Close the document and durably finalize the sink.
    pub async fn close(mut self) -> Result<()> {
        self.sink.write(b"\n}\n").await?;
        self.sink.finish().await
    }
}
