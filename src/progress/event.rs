//! Progress events and the per-target sink they are written to

use serde::Serialize;
use tokio::sync::mpsc;

/// One progress event of a target's run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// The runner picked the target up.
    Started,
    /// The engine began a unit of work.
    Step { name: String },
    /// A line of output produced by the work.
    Output { stream: OutputStream, line: String },
    /// The runner finished; always the last event of a stream.
    Finished { status: FinalStatus },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Terminal status reported in [`ProgressEvent::Finished`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FinalStatus {
    Succeeded,
    Failed { error: String },
    Canceled { error: String },
}

/// Lifecycle of one target's event stream.
///
/// `Pending -> Running -> (Succeeded | Failed | Canceled) -> Drained`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
    /// Every event of the stream has been written and flushed.
    Drained,
}

impl StreamState {
    /// State reached after observing `event`, if it changes anything.
    pub(crate) fn after(&self, event: &ProgressEvent) -> Option<StreamState> {
        let next = match event {
            ProgressEvent::Finished { status } => match status {
                FinalStatus::Succeeded => StreamState::Succeeded,
                FinalStatus::Failed { .. } => StreamState::Failed,
                FinalStatus::Canceled { .. } => StreamState::Canceled,
            },
            _ if *self == StreamState::Pending => StreamState::Running,
            _ => return None,
        };
        Some(next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamState::Succeeded | StreamState::Failed | StreamState::Canceled
        )
    }
}

/// Write-only handle for one target's progress events.
///
/// Not `Clone`: the runner owns it and lends it to the engine, so nothing can
/// write to the stream once the runner drops it.
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl EventSink {
    /// Create a sink and the receiving end of its stream.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Append an event. Events sent after the reader went away are dropped.
    pub fn send(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }

    pub fn step(&self, name: impl Into<String>) {
        self.send(ProgressEvent::Step { name: name.into() });
    }

    pub fn output(&self, stream: OutputStream, line: impl Into<String>) {
        self.send(ProgressEvent::Output {
            stream,
            line: line.into(),
        });
    }
}
