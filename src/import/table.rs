//! Streaming page import for a single table.

use crate::import::coerce::coerce_record;
use crate::import::fetch::SnapshotSource;
use crate::manifest::TableDescriptor;
use crate::paging::{page_count, page_threshold};
use crate::progress::{PageDone, PageSender};
use crate::store::{PutRecord, StoreEngine, key_string};
use crate::{Error, Result, Row};
use serde_json::Value;
use std::sync::Arc;

/// Streams one table's record file into its destination store, committing
/// one write transaction per page.
pub struct TableImporter {
    table: String,
    descriptor: TableDescriptor,
    items_per_page: u64,
    source: Arc<dyn SnapshotSource>,
    engine: Arc<dyn StoreEngine>,
    pages_done: PageSender,
}

impl TableImporter {
    pub fn new(
        table: String,
        descriptor: TableDescriptor,
        items_per_page: u64,
        source: Arc<dyn SnapshotSource>,
        engine: Arc<dyn StoreEngine>,
        pages_done: PageSender,
    ) -> Self {
        Self {
            table,
            descriptor,
            items_per_page,
            source,
            engine,
            pages_done,
        }
    }

    /// Ingest the whole record stream. Returns the table name once every
    /// page has committed.
    pub async fn run(self) -> Result<String> {
        let pages = page_count(self.descriptor.row_count, self.items_per_page);
        let mut reader = self.source.open_records(&self.table).await?;

        let mut page_items: Vec<Row> = Vec::new();
        let mut current_page = 0u64;
        let mut ordinal = 0u64;
        while let Some(record) = reader.next().await? {
            let record = coerce_record(record, &self.descriptor.columns)?;
            page_items.push(record);
            ordinal += 1;

            let threshold = page_threshold(
                current_page,
                pages,
                self.descriptor.row_count,
                self.items_per_page,
            );
            if page_items.len() as u64 >= threshold {
                self.flush_page(&mut page_items, ordinal).await?;
                current_page += 1;
            }
        }
        if !page_items.is_empty() {
            // the stream ended short of the introspected count
            tracing::warn!(
                table = %self.table,
                expected = self.descriptor.row_count,
                read = ordinal,
                "record stream shorter than row_count"
            );
            self.flush_page(&mut page_items, ordinal).await?;
        }
        tracing::debug!(table = %self.table, records = ordinal, "table imported");
        Ok(self.table)
    }

    /// Commit the buffered page in one transaction, then report it.
    async fn flush_page(&self, items: &mut Vec<Row>, ordinal: u64) -> Result<()> {
        let first_ordinal = ordinal - items.len() as u64;
        let page: Vec<PutRecord> = items
            .drain(..)
            .enumerate()
            .map(|(i, record)| self.to_put(record, first_ordinal + i as u64))
            .collect();
        self.engine
            .write_page(&self.table, &page)
            .await
            .map_err(|e| match e {
                e @ Error::PageStorage(_) => e,
                other => Error::PageStorage(other.to_string()),
            })?;
        let _ = self.pages_done.send(PageDone);
        Ok(())
    }

    /// Multi-column primary keys get the underscore-joined composite key;
    /// a single key column resolves inside the store; keyless tables fall
    /// back to the record's ordinal position in the stream.
    fn to_put(&self, record: Row, ordinal: u64) -> PutRecord {
        let pks = &self.descriptor.primary_keys;
        let key = if pks.len() > 1 {
            let joined = pks
                .iter()
                .map(|pk| record.get(pk).map(key_string).unwrap_or_default())
                .collect::<Vec<_>>()
                .join("_");
            Some(joined)
        } else if pks.is_empty() {
            Some(ordinal.to_string())
        } else {
            None
        };
        PutRecord {
            key,
            record: Value::Object(record),
        }
    }
}
