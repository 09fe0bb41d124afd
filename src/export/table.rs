//! Sequential page export for a single table.

use crate::export::sink::RecordSink;
use crate::paging::page_count;
use crate::progress::{PageDone, PageSender};
use crate::source::{QueryExecutor, quote_ident, quote_table};
use crate::Result;
use std::sync::Arc;

/// Streams one table's rows to its record file, page by page.
///
/// Pages of one table are strictly sequential because they append to one
/// growing file; page n+1 is not queried until page n's flush is
/// acknowledged by the sink. Tables run concurrently, each with its own
/// exporter.
pub struct TableExporter<S: RecordSink> {
    table: String,
    row_count: u64,
    primary_keys: Vec<String>,
    results_per_page: u64,
    executor: Arc<dyn QueryExecutor>,
    sink: S,
    pages_done: PageSender,
}

impl<S: RecordSink> TableExporter<S> {
    pub fn new(
        table: String,
        row_count: u64,
        primary_keys: Vec<String>,
        results_per_page: u64,
        executor: Arc<dyn QueryExecutor>,
        sink: S,
        pages_done: PageSender,
    ) -> Self {
        Self {
            table,
            row_count,
            primary_keys,
            results_per_page,
            executor,
            sink,
            pages_done,
        }
    }

    /// Export every page, finalizing the sink on the last one. Returns the
    /// table name once the record file is durably flushed.
    pub async fn run(mut self) -> Result<String> {
        let pages = page_count(self.row_count, self.results_per_page);
        for page in 0..pages {
            let rows = self.executor.query(&self.page_query(page)).await?;
            for row in &rows {
                let mut line = serde_json::to_vec(row)?;
                line.push(b'\n');
                self.sink.write(&line).await?;
            }
            if page + 1 == pages {
                self.sink.finish().await?;
            } else {
                self.sink.flush().await?;
            }
            let _ = self.pages_done.send(PageDone);
        }
        tracing::debug!(table = %self.table, pages, "table exported");
        Ok(self.table)
    }

    /// Rows are ordered by the primary-key columns ascending; without a
    /// primary key pagination is unstable under concurrent source writes,
    /// an accepted limitation.
    fn page_query(&self, page: u64) -> String {
        let order = if self.primary_keys.is_empty() {
            String::new()
        } else {
            let columns: Vec<String> = self
                .primary_keys
                .iter()
                .map(|c| format!("{} ASC", quote_ident(c)))
                .collect();
            format!(" ORDER BY {}", columns.join(", "))
        };
        format!(
            "SELECT * FROM {}{} LIMIT {} OFFSET {}",
            quote_table(&self.table),
            order,
            self.results_per_page,
            page * self.results_per_page
        )
    }
}
