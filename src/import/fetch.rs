//! Snapshot retrieval capability for the import side.

use crate::manifest::{self, Manifest};
use crate::{Error, Result, Row};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

/// Lazily-produced sequence of records from one table's record file.
/// Not seekable; restartable only by opening the stream again.
#[async_trait]
pub trait RecordReader: Send {
    /// Next record, or `None` at end of stream.
    async fn next(&mut self) -> Result<Option<Row>>;
}

/// Where a snapshot (manifest plus record files) is fetched from.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_manifest(&self) -> Result<Manifest>;
    async fn open_records(&self, table: &str) -> Result<Box<dyn RecordReader>>;
}

/// Snapshot directory on the local file system.
pub struct FsSnapshotSource {
    base: PathBuf,
}

impl FsSnapshotSource {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }
}

#[async_trait]
impl SnapshotSource for FsSnapshotSource {
    async fn fetch_manifest(&self) -> Result<Manifest> {
        let path = self.base.join(manifest::MANIFEST_FILE);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| Error::ManifestNotFound(format!("{}: {}", path.display(), e)))?;
        manifest::parse(&bytes).map_err(|e| Error::ManifestNotFound(e.to_string()))
    }

    async fn open_records(&self, table: &str) -> Result<Box<dyn RecordReader>> {
        let path = self.base.join(manifest::record_file_name(table));
        let file = File::open(&path)
            .await
            .map_err(|e| Error::RecordStream(format!("{}: {}", path.display(), e)))?;
        Ok(Box::new(FsRecordReader {
            lines: BufReader::new(file).lines(),
        }))
    }
}

struct FsRecordReader {
    lines: Lines<BufReader<File>>,
}

#[async_trait]
impl RecordReader for FsRecordReader {
    async fn next(&mut self) -> Result<Option<Row>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| Error::RecordStream(e.to_string()))?;
            match line {
                None => return Ok(None),
                Some(l) if l.trim().is_empty() => continue,
                Some(l) => {
                    let value: serde_json::Value = serde_json::from_str(&l)
                        .map_err(|e| Error::RecordStream(e.to_string()))?;
                    match value {
                        serde_json::Value::Object(map) => return Ok(Some(map)),
                        other => {
                            return Err(Error::RecordStream(format!(
                                "expected an object record, got {}",
                                other
                            )));
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::TableDescriptor;

    #[tokio::test]
    async fn test_missing_manifest_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = FsSnapshotSource::new(dir.path());
        assert!(matches!(
            source.fetch_manifest().await,
            Err(Error::ManifestNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_manifest_roundtrip_through_fs() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = Manifest::new();
        manifest.insert(
            "orders".to_string(),
            TableDescriptor {
                row_count: 3,
                primary_keys: vec!["id".to_string()],
                ..Default::default()
            },
        );
        std::fs::write(
            dir.path().join(manifest::MANIFEST_FILE),
            serde_json::to_vec(&manifest).unwrap(),
        )
        .unwrap();

        let source = FsSnapshotSource::new(dir.path());
        let fetched = source.fetch_manifest().await.unwrap();
        assert_eq!(fetched, manifest);
    }

    #[tokio::test]
    async fn test_record_reader_streams_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("orders.ndjson"),
            "{\"id\":1}\n{\"id\":2}\n\n{\"id\":3}\n",
        )
        .unwrap();

        let source = FsSnapshotSource::new(dir.path());
        let mut reader = source.open_records("orders").await.unwrap();
        let mut ids = Vec::new();
        while let Some(record) = reader.next().await.unwrap() {
            ids.push(record["id"].as_i64().unwrap());
        }
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_bad_record_is_stream_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("orders.ndjson"), "{\"id\":1}\nnot json\n").unwrap();

        let source = FsSnapshotSource::new(dir.path());
        let mut reader = source.open_records("orders").await.unwrap();
        assert!(reader.next().await.unwrap().is_some());
        assert!(matches!(
            reader.next().await,
            Err(Error::RecordStream(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_record_file_is_stream_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = FsSnapshotSource::new(dir.path());
        assert!(matches!(
            source.open_records("orders").await.err(),
            Some(Error::RecordStream(_))
        ));
    }
}
