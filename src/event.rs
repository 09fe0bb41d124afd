//! Run events emitted by the export and import orchestrators.
//!
//! Both pipelines report through an ordered stream of `{message, value}`
//! emissions with exactly one terminal event (`success` or `error`) per run.

use crate::manifest::Manifest;
use serde::Serialize;
use tokio::sync::mpsc;

/// A single emission from a running export or import.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "message", content = "value", rename_all = "snake_case")]
pub enum Event {
    /// The parsed manifest, emitted once at the start of an import.
    Manifest(Manifest),
    /// Fraction of pages completed so far, in `[0, 1]`.
    Progress(f64),
    /// A table's record file is durably flushed.
    TableFinished(String),
    /// Terminal failure with a reason code.
    Error(String),
    /// Terminal success.
    Success,
}

/// Receiving side of a run's event stream.
pub type EventStream = mpsc::UnboundedReceiver<Event>;

/// Sending side held by the orchestrators.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<Event>,
}

impl EventSender {
    pub fn channel() -> (EventSender, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSender { tx }, rx)
    }

    /// Emit an event; a dropped receiver is not an error.
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}
