//! Backpressure-aware record sinks.

use crate::{Error, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Capacity-aware byte sink for one output file.
///
/// `write` suspends while the sink is at capacity and resumes once capacity
/// is restored. `flush` resolves when everything written so far has been
/// acknowledged by the writer. `finish` makes the file durable and closes
/// it; no further writes are accepted afterwards.
#[async_trait]
pub trait RecordSink: Send {
    async fn write(&mut self, chunk: &[u8]) -> Result<()>;
    async fn flush(&mut self) -> Result<()>;
    async fn finish(&mut self) -> Result<()>;
}

/// Chunks in flight before senders suspend.
const SINK_CAPACITY: usize = 64;

enum SinkCmd {
    Write(Vec<u8>),
    Flush(oneshot::Sender<()>),
}

/// File-backed sink. A dedicated writer task owns the file; a bounded
/// channel carries chunks to it, and the channel bound is the backpressure
/// signal.
pub struct FileSink {
    tx: Option<mpsc::Sender<SinkCmd>>,
    writer: Option<JoinHandle<Result<()>>>,
}

impl FileSink {
    pub async fn create(path: &Path) -> Result<Self> {
        let file = File::create(path).await?;
        let (tx, rx) = mpsc::channel(SINK_CAPACITY);
        let writer = tokio::spawn(run_writer(file, rx));
        Ok(Self {
            tx: Some(tx),
            writer: Some(writer),
        })
    }

    /// Surface the writer task's failure after the channel closed on us.
    async fn writer_error(&mut self) -> Error {
        self.tx = None;
        match self.writer.take() {
            Some(handle) => match handle.await {
                Ok(Ok(())) => Error::Sink("writer closed unexpectedly".to_string()),
                Ok(Err(e)) => e,
                Err(e) => Error::Sink(e.to_string()),
            },
            None => Error::Sink("writer already finished".to_string()),
        }
    }
}

async fn run_writer(file: File, mut rx: mpsc::Receiver<SinkCmd>) -> Result<()> {
    let mut out = BufWriter::new(file);
    while let Some(cmd) = rx.recv().await {
        match cmd {
            SinkCmd::Write(chunk) => out.write_all(&chunk).await?,
            SinkCmd::Flush(ack) => {
                out.flush().await?;
                let _ = ack.send(());
            }
        }
    }
    out.flush().await?;
    out.into_inner().sync_all().await?;
    Ok(())
}

#[async_trait]
impl RecordSink for FileSink {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let tx = self
            .tx
            .clone()
            .ok_or_else(|| Error::Sink("sink is finished".to_string()))?;
        if tx.send(SinkCmd::Write(chunk.to_vec())).await.is_err() {
            return Err(self.writer_error().await);
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let tx = self
            .tx
            .clone()
            .ok_or_else(|| Error::Sink("sink is finished".to_string()))?;
        let (ack, done) = oneshot::channel();
        if tx.send(SinkCmd::Flush(ack)).await.is_err() {
            return Err(self.writer_error().await);
        }
        if done.await.is_err() {
            return Err(self.writer_error().await);
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        // closing the channel lets the writer drain, sync, and exit
        self.tx = None;
        match self.writer.take() {
            Some(handle) => handle.await.map_err(|e| Error::Sink(e.to_string()))?,
            None => Ok(()),
        }
    }
}

/// In-memory sink for tests.
#[cfg(test)]
pub(crate) struct MemorySink {
    data: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
    flushes: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    finished: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
impl MemorySink {
    pub fn new() -> Self {
        Self {
            data: Default::default(),
            flushes: Default::default(),
            finished: Default::default(),
        }
    }

    pub fn contents(&self) -> std::sync::Arc<std::sync::Mutex<Vec<u8>>> {
        self.data.clone()
    }

    pub fn flush_counter(&self) -> std::sync::Arc<std::sync::atomic::AtomicUsize> {
        self.flushes.clone()
    }

    pub fn finished_flag(&self) -> std::sync::Arc<std::sync::atomic::AtomicBool> {
        self.finished.clone()
    }
}

#[cfg(test)]
#[async_trait]
impl RecordSink for MemorySink {
    async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.data.lock().unwrap().extend_from_slice(chunk);
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.flushes
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        self.finished
            .store(true, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }
}
