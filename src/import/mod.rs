//! Import orchestration: manifest-driven store reconstruction and
//! concurrent per-table ingestion.

pub mod coerce;
pub mod fetch;
pub mod table;

use crate::config::ImportConfig;
use crate::event::{Event, EventSender, EventStream};
use crate::manifest::Manifest;
use crate::paging::page_count;
use crate::progress::{PageReceiver, ProgressTracker, page_channel};
use crate::store::{IndexSpec, StoreEngine, StoreSpec};
use crate::{Error, Result};
use fetch::SnapshotSource;
use std::sync::Arc;
use table::TableImporter;
use tokio::sync::oneshot;
use tokio::task::JoinSet;

/// Synthetic index registered for composite primary keys.
pub const MULTI_PKEY_INDEX: &str = "idx_multiple_pkeys";

/// Run a full import. Events arrive on the returned stream and end with
/// exactly one terminal `success` or `error`.
pub fn run(
    config: ImportConfig,
    source: Arc<dyn SnapshotSource>,
    engine: Arc<dyn StoreEngine>,
) -> EventStream {
    let (events, stream) = EventSender::channel();
    tokio::spawn(async move {
        let outcome = drive(&config, source, engine.clone(), &events).await;
        engine.close().await;
        match outcome {
            Ok(()) => events.emit(Event::Success),
            Err(e) => {
                tracing::error!("import failed: {}", e);
                events.emit(Event::Error(e.reason()));
            }
        }
    });
    stream
}

async fn drive(
    config: &ImportConfig,
    source: Arc<dyn SnapshotSource>,
    engine: Arc<dyn StoreEngine>,
    events: &EventSender,
) -> Result<()> {
    let manifest = source.fetch_manifest().await?;
    events.emit(Event::Manifest(manifest.clone()));

    let specs = store_specs(&manifest);
    engine
        .create_schema(&specs)
        .await
        .map_err(|e| match e {
            e @ Error::StoreSchema(_) => e,
            other => Error::StoreSchema(other.to_string()),
        })?;
    tracing::info!(stores = specs.len(), "store schema created");

    let total_pages: u64 = manifest
        .values()
        .map(|d| page_count(d.row_count, config.items_per_page))
        .sum();
    let (pages_tx, pages_rx) = page_channel();
    let (done_tx, done_rx) = oneshot::channel();
    let emitter = tokio::spawn(emit_progress(
        ProgressTracker::new(total_pages),
        pages_rx,
        done_rx,
        events.clone(),
    ));

    let mut tables = JoinSet::new();
    for (name, descriptor) in &manifest {
        if descriptor.row_count == 0 {
            continue;
        }
        let importer = TableImporter::new(
            name.clone(),
            descriptor.clone(),
            config.items_per_page,
            source.clone(),
            engine.clone(),
            pages_tx.clone(),
        );
        tables.spawn(importer.run());
    }
    drop(pages_tx);

    match join_tables(&mut tables).await {
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

/// Store and index set for every non-empty manifest table. Tables with
/// `row_count == 0` get no store at all; the manifest entry is the signal
/// readers must special-case.
fn store_specs(manifest: &Manifest) -> Vec<StoreSpec> {
    let mut specs = Vec::new();
    for (name, descriptor) in manifest {
        if descriptor.row_count == 0 {
            continue;
        }
        let mut indices = Vec::new();
        let key_path = match descriptor.primary_keys.len() {
            1 => Some(descriptor.primary_keys[0].clone()),
            n if n > 1 => {
                indices.push(IndexSpec {
                    name: MULTI_PKEY_INDEX.to_string(),
                    columns: descriptor.primary_keys.clone(),
                });
                None
            }
            _ => None,
        };
        for (idx_name, columns) in &descriptor.indices {
            indices.push(IndexSpec {
                name: idx_name.clone(),
                columns: columns.clone(),
            });
        }
        specs.push(StoreSpec {
            name: name.clone(),
            key_path,
            indices,
        });
    }
    specs
}

async fn join_tables(tables: &mut JoinSet<Result<String>>) -> Result<()> {
    while let Some(joined) = tables.join_next().await {
        match joined {
            Ok(Ok(table)) => tracing::debug!(table = %table, "table imported"),
            Ok(Err(e)) => {
                // in-flight page commits settle on their own; results discarded
                tables.detach_all();
                return Err(e);
            }
            Err(e) => {
                tables.detach_all();
                return Err(Error::RecordStream(e.to_string()));
            }
        }
    }
    Ok(())
}

/// Event-driven progress emitter: one emission per committed page, since
/// ingestion pacing is already bounded by transaction commits.
async fn emit_progress(
    mut tracker: ProgressTracker,
    mut pages: PageReceiver,
    mut done: oneshot::Receiver<()>,
    events: EventSender,
) {
    let mut pages_open = true;
    loop {
        tokio::select! {
            msg = pages.recv(), if pages_open => match msg {
                Some(_) => {
                    tracker.page_done();
                    events.emit(Event::Progress(tracker.ratio()));
                }
                None => pages_open = false,
            },
            _ = &mut done => break,
        }
    }
    while pages.try_recv().is_ok() {
        tracker.page_done();
        events.emit(Event::Progress(tracker.ratio()));
    }
    if tracker.pages_written() == 0 {
        // a run with no pages still reports where it ended up
        events.emit(Event::Progress(tracker.ratio()));
    }
}
