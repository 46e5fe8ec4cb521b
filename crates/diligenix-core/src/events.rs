//! Worker-to-consumer event stream.

use crate::run::RunPhase;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The language model could not be reached at all.
    ModelUnavailable,
    /// The language model answered with an error (status, auth, bad body).
    Model,
    Other,
}

/// Events emitted by a run, in emission order.
///
/// For query `i`, `QueryDiscovered` precedes its `SourceDiscovered` and
/// `VectorSummarized` events, and every research event precedes every
/// `SectionProduced`. Exactly one of `RunFinished`, `RunFailed` or
/// `RunCancelled` ends the stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    PhaseChanged { phase: RunPhase },
    QueryPlanned { queries: Vec<String> },
    QueryDiscovered { query: String },
    SourceDiscovered { query: String, url: String },
    VectorSummarized { query: String, summary: String },
    SectionProduced { title: String, content: String },
    ProgressUpdated { progress: u8 },
    RunFailed { message: String, kind: FailureKind },
    RunCancelled,
    RunFinished,
}

impl RunEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunEvent::RunFailed { .. } | RunEvent::RunCancelled | RunEvent::RunFinished
        )
    }
}

/// Sending half held by the worker.
///
/// Emission never fails: if the consumer went away the run still completes
/// and its state is returned to whoever awaits it.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<RunEvent>>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that drops everything.
    pub fn discard() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: RunEvent) {
        let Some(tx) = &self.tx else { return };
        if tx.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}
