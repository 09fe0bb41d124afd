//! Export orchestration: introspection, manifest write, then concurrent
//! per-table streaming into the snapshot directory.

pub mod sink;
pub mod table;

use crate::config::ExportConfig;
use crate::event::{Event, EventSender, EventStream};
use crate::manifest::{self, Manifest, ManifestWriter};
use crate::paging::page_count;
use crate::progress::{PageReceiver, ProgressTracker, page_channel};
use crate::source::QueryExecutor;
use crate::{Error, Result, introspect};
use sink::FileSink;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use table::TableExporter;
use tokio::sync::oneshot;
use tokio::task::JoinSet;

/// Interval of the timer-driven progress emissions.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Run a full export. Events arrive on the returned stream and end with
/// exactly one terminal `success` or `error`.
pub fn run(config: ExportConfig, executor: Arc<dyn QueryExecutor>) -> EventStream {
    let (events, stream) = EventSender::channel();
    tokio::spawn(async move {
        let outcome = drive(&config, executor.clone(), &events).await;
        executor.close().await;
        match outcome {
            Ok(()) => events.emit(Event::Success),
            Err(e) => {
                tracing::error!("export failed: {}", e);
                events.emit(Event::Error(e.reason()));
            }
        }
    });
    stream
}

async fn drive(
    config: &ExportConfig,
    executor: Arc<dyn QueryExecutor>,
    events: &EventSender,
) -> Result<()> {
    prepare_output_dir(&config.output_path)?;

    let intro = introspect::introspect(executor.clone(), config.schema.as_deref()).await?;
    let manifest = manifest::from_introspection(&intro);
    write_manifest(&config.output_path, &manifest).await?;
    tracing::info!(tables = manifest.len(), "manifest written");

    let total_pages: u64 = manifest
        .values()
        .map(|d| page_count(d.row_count, config.results_per_page))
        .sum();
    let (pages_tx, pages_rx) = page_channel();
    let (done_tx, done_rx) = oneshot::channel();
    let emitter = tokio::spawn(emit_progress(
        ProgressTracker::new(total_pages),
        pages_rx,
        done_rx,
        events.clone(),
    ));

    match export_tables(config, &manifest, executor, pages_tx, events).await {
        Ok(()) => {
            let _ = done_tx.send(());
            let _ = emitter.await;
            Ok(())
        }
        Err(e) => {
            // the terminal error halts further progress emissions
            emitter.abort();
            let _ = emitter.await;
            Err(e)
        }
    }
}

async fn export_tables(
    config: &ExportConfig,
    manifest: &Manifest,
    executor: Arc<dyn QueryExecutor>,
    pages_tx: crate::progress::PageSender,
    events: &EventSender,
) -> Result<()> {
    let mut tables = JoinSet::new();
    for (name, descriptor) in manifest {
        if descriptor.row_count == 0 {
            continue;
        }
        let path = config.output_path.join(manifest::record_file_name(name));
        let sink = match FileSink::create(&path).await {
            Ok(sink) => sink,
            Err(e) => {
                tables.detach_all();
                return Err(e);
            }
        };
        let exporter = TableExporter::new(
            name.clone(),
            descriptor.row_count,
            descriptor.primary_keys.clone(),
            config.results_per_page,
            executor.clone(),
            sink,
            pages_tx.clone(),
        );
        tables.spawn(exporter.run());
    }
    drop(pages_tx);

    join_tables(&mut tables, events).await
}

/// The snapshot directory is cleared and recreated at run start.
fn prepare_output_dir(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }
    std::fs::create_dir_all(path)?;
    Ok(())
}

async fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<()> {
    let sink = FileSink::create(&dir.join(manifest::MANIFEST_FILE)).await?;
    let mut writer = ManifestWriter::open(sink).await?;
    for (name, descriptor) in manifest {
        writer.write_table(name, descriptor).await?;
    }
    writer.close().await
}

async fn join_tables(tables: &mut JoinSet<Result<String>>, events: &EventSender) -> Result<()> {
    while let Some(joined) = tables.join_next().await {
        match joined {
            Ok(Ok(table)) => events.emit(Event::TableFinished(table)),
            Ok(Err(e)) => {
                // in-flight exports settle on their own; results discarded
                tables.detach_all();
                return Err(e);
            }
            Err(e) => {
                tables.detach_all();
                return Err(Error::Query(e.to_string()));
            }
        }
    }
    Ok(())
}

/// Timer-driven progress emitter. Owns the tracker, drains page
/// completions, and stops at the one-shot completion signal after a final
/// emission.
async fn emit_progress(
    mut tracker: ProgressTracker,
    mut pages: PageReceiver,
    mut done: oneshot::Receiver<()>,
    events: EventSender,
) {
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut pages_open = true;
    loop {
        tokio::select! {
            _ = ticker.tick() => events.emit(Event::Progress(tracker.ratio())),
            msg = pages.recv(), if pages_open => match msg {
                Some(_) => tracker.page_done(),
                None => pages_open = false,
            },
            _ = &mut done => break,
        }
    }
    while pages.try_recv().is_ok() {
        tracker.page_done();
    }
    events.emit(Event::Progress(tracker.ratio()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Row;
    use async_trait::async_trait;
    use serde_json::json;

    /// A two-table source: `public.orders` with 7 rows and an empty
    /// `public.archives`.
    struct FakeDb;

    fn rows(values: Vec<serde_json::Value>) -> Vec<Row> {
        values
            .into_iter()
            .map(|v| v.as_object().unwrap().clone())
            .collect()
    }

    fn order_row(id: usize) -> serde_json::Value {
        json!({"id": id, "name": format!("order-{}", id)})
    }

    #[async_trait]
    impl QueryExecutor for FakeDb {
        async fn query(&self, sql: &str) -> Result<Vec<Row>> {
            if sql.contains("information_schema.tables") {
                return Ok(rows(vec![
                    json!({"table_schema": "public", "table_name": "archives"}),
                    json!({"table_schema": "public", "table_name": "orders"}),
                ]));
            }
            if sql.contains("pg_index") {
                return Ok(rows(vec![json!({
                    "table_schema": "public", "table_name": "orders",
                    "index_name": "orders_pkey", "column_name": "id",
                    "is_primary": true
                })]));
            }
            if sql.contains("information_schema.columns") {
                return Ok(rows(vec![
                    json!({"table_schema": "public", "table_name": "orders",
                           "column_name": "id", "data_type": "integer"}),
                    json!({"table_schema": "public", "table_name": "orders",
                           "column_name": "name", "data_type": "text"}),
                ]));
            }
            if sql.starts_with("SELECT COUNT(*)") {
                let count = if sql.contains("\"orders\"") { 7 } else { 0 };
                return Ok(rows(vec![json!({"count": count})]));
            }
            if sql.starts_with("SELECT * FROM") {
                let limit: usize = clause(sql, "LIMIT");
                let offset: usize = clause(sql, "OFFSET");
                return Ok(rows((0..7)
                    .map(order_row)
                    .skip(offset)
                    .take(limit)
                    .collect()));
            }
            Err(Error::Query(format!("unexpected query: {}", sql)))
        }
    }

    fn clause(sql: &str, keyword: &str) -> usize {
        sql.split(keyword)
            .nth(1)
            .and_then(|rest| rest.split_whitespace().next())
            .and_then(|n| n.parse().ok())
            .unwrap()
    }

    async fn collect(mut stream: EventStream) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = stream.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_full_export_run() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("snapshot");
        let config = ExportConfig {
            results_per_page: 3,
            output_path: out.clone(),
            ..Default::default()
        };

        let events = collect(run(config, Arc::new(FakeDb))).await;

        assert_eq!(events.last(), Some(&Event::Success));
        assert!(
            events.contains(&Event::TableFinished("public.orders".to_string())),
            "missing table_finished: {:?}",
            events
        );

        // progress values are monotone and the last one is 1.0
        let progress: Vec<f64> = events
            .iter()
            .filter_map(|e| match e {
                Event::Progress(p) => Some(*p),
                _ => None,
            })
            .collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{:?}", progress);
        assert_eq!(progress.last(), Some(&1.0));

        // manifest parses and covers both tables
        let manifest =
            manifest::parse(&std::fs::read(out.join(manifest::MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest["public.orders"].row_count, 7);
        assert_eq!(manifest["public.orders"].primary_keys, vec!["id"]);
        assert_eq!(manifest["public.archives"].row_count, 0);

        // one record file, 7 lines; the empty table produced none
        let records = std::fs::read_to_string(out.join("public.orders.ndjson")).unwrap();
        assert_eq!(records.lines().count(), 7);
        assert!(!out.join("public.archives.ndjson").exists());
    }

    #[tokio::test]
    async fn test_export_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("snapshot");
        let config = ExportConfig {
            results_per_page: 3,
            output_path: out.clone(),
            ..Default::default()
        };

        collect(run(config.clone(), Arc::new(FakeDb))).await;
        let first =
            manifest::parse(&std::fs::read(out.join(manifest::MANIFEST_FILE)).unwrap()).unwrap();

        collect(run(config, Arc::new(FakeDb))).await;
        let second =
            manifest::parse(&std::fs::read(out.join(manifest::MANIFEST_FILE)).unwrap()).unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_introspection_failure_is_terminal() {
        struct BrokenDb;

        #[async_trait]
        impl QueryExecutor for BrokenDb {
            async fn query(&self, _sql: &str) -> Result<Vec<Row>> {
                Err(Error::Query("connection refused".to_string()))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let config = ExportConfig {
            output_path: dir.path().join("snapshot"),
            ..Default::default()
        };

        let events = collect(run(config, Arc::new(BrokenDb))).await;
        match events.last() {
            Some(Event::Error(reason)) => assert!(reason.contains("connection refused")),
            other => panic!("expected terminal error, got {:?}", other),
        }
        // the terminal error is the only terminal event
        assert!(!events.contains(&Event::Success));
    }
}
