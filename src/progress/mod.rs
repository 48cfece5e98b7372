//! Progress multiplexer - fans per-target event streams into one output sink
//!
//! ```text
//!   runner lint ─► EventSink ─► forwarder ─┐
//!   runner test ─► EventSink ─► forwarder ─┼─► channel ─► writer thread ─► sink
//!   runner tidy ─► EventSink ─► forwarder ─┘
//! ```
//!
//! The [`Printer`] owns the sink on a dedicated thread. Forwarders render each
//! event into complete lines and hand them over as one message, so lines of
//! different targets never interleave. When a target's [`EventSink`] is
//! dropped its forwarder asks the writer to flush and marks the stream
//! [`StreamState::Drained`] once the flush is acknowledged.

mod event;
mod format;

pub use event::{EventSink, FinalStatus, OutputStream, ProgressEvent, StreamState};
pub use format::ProgressMode;

use crossterm::tty::IsTty;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot, watch};

use crate::context::Context;
use crate::error::DrainError;
use format::Prefix;

enum Message {
    /// One or more complete lines, written with a single call.
    Lines(String),
    /// Flush the sink and report whether every write so far succeeded.
    Flush(oneshot::Sender<bool>),
    Close,
}

struct Shared {
    mode: ProgressMode,
    drains: Mutex<Vec<Drain>>,
    slots: AtomicUsize,
}

/// Root of the multiplexer; owns the output sink.
pub struct Printer {
    tx: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
    finished: oneshot::Receiver<io::Result<()>>,
}

impl Printer {
    /// Start a printer writing to `out`. `Auto` resolves to `Plain`.
    pub fn new<W>(out: W, mode: ProgressMode) -> io::Result<Self>
    where
        W: Write + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let (done_tx, finished) = oneshot::channel();

        thread::Builder::new()
            .name("fanbuild-progress".to_string())
            .spawn(move || {
                let _ = done_tx.send(write_loop(out, rx));
            })?;

        Ok(Self {
            tx,
            shared: Arc::new(Shared {
                mode: mode.resolve(false),
                drains: Mutex::new(Vec::new()),
                slots: AtomicUsize::new(0),
            }),
            finished,
        })
    }

    /// Printer on stdout; `Auto` picks `Tty` when stdout is a terminal.
    pub fn stdout(mode: ProgressMode) -> io::Result<Self> {
        let stdout = io::stdout();
        let mode = mode.resolve(stdout.is_tty());
        Self::new(stdout, mode)
    }

    /// Root view: no prefix, elapsed time measured from now.
    pub fn writer(&self) -> ProgressWriter {
        ProgressWriter {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
            prefix: None,
            epoch: Instant::now(),
        }
    }

    /// Wait until every stream created from this printer is drained, then
    /// close the sink.
    ///
    /// Bounded by `ctx`: if it is done first, returns
    /// [`DrainError::GraceExpired`] without waiting any longer.
    pub async fn wait(self, ctx: &Context) -> Result<(), DrainError> {
        let Printer {
            tx,
            shared,
            finished,
        } = self;
        let drains = std::mem::take(&mut *shared.drains.lock().unwrap());
        log::debug!("waiting for {} progress streams to drain", drains.len());

        let all = async move {
            for drain in &drains {
                drain.wait().await?;
            }
            let _ = tx.send(Message::Close);
            match finished.await {
                Ok(result) => result.map_err(DrainError::from),
                Err(_) => Err(DrainError::Incomplete("progress writer".to_string())),
            }
        };

        tokio::select! {
            biased;
            result = all => result,
            _ = ctx.done() => Err(DrainError::GraceExpired),
        }
    }
}

fn write_loop<W: Write>(mut out: W, mut rx: mpsc::UnboundedReceiver<Message>) -> io::Result<()> {
    let mut failed: Option<io::Error> = None;

    while let Some(message) = rx.blocking_recv() {
        match message {
            Message::Lines(text) => {
                if failed.is_none() {
                    if let Err(e) = out.write_all(text.as_bytes()) {
                        failed = Some(e);
                    }
                }
            }
            Message::Flush(ack) => {
                if failed.is_none() {
                    if let Err(e) = out.flush() {
                        failed = Some(e);
                    }
                }
                let _ = ack.send(failed.is_none());
            }
            Message::Close => break,
        }
    }

    match failed {
        Some(e) => Err(e),
        None => out.flush(),
    }
}

/// A view over the printer's sink: an optional prefix and a time origin.
///
/// Views are cheap to derive and clone; all of them write to the same sink.
#[derive(Clone)]
pub struct ProgressWriter {
    tx: mpsc::UnboundedSender<Message>,
    shared: Arc<Shared>,
    prefix: Option<Prefix>,
    epoch: Instant,
}

impl ProgressWriter {
    /// View whose lines carry `name`. With `visible == false` the prefix is
    /// only used to label the stream (json output, drain errors).
    ///
    /// Prefix colours are assigned in the order views are created.
    pub fn with_prefix(&self, name: impl Into<String>, visible: bool) -> ProgressWriter {
        let slot = self.shared.slots.fetch_add(1, Ordering::Relaxed);
        ProgressWriter {
            prefix: Some(Prefix {
                name: name.into(),
                visible,
                slot,
            }),
            ..self.clone()
        }
    }

    /// View whose elapsed-time column restarts from zero.
    pub fn reset_time(&self) -> ProgressWriter {
        ProgressWriter {
            epoch: Instant::now(),
            ..self.clone()
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_ref().map(|p| p.name.as_str())
    }

    fn label(&self) -> &str {
        self.prefix().unwrap_or("progress")
    }

    fn render(&self, event: &ProgressEvent) -> String {
        format::render(
            self.shared.mode,
            self.prefix.as_ref(),
            self.epoch.elapsed(),
            event,
        )
    }

    /// Open a new event stream on this view.
    ///
    /// The returned [`Drain`] is also registered with the printer, so
    /// [`Printer::wait`] covers it.
    pub fn channel(&self) -> (EventSink, Drain) {
        let (sink, mut events) = EventSink::new();
        let (state_tx, state_rx) = watch::channel(StreamState::Pending);
        let drain = Drain {
            target: self.label().to_string(),
            state: state_rx,
        };
        self.shared.drains.lock().unwrap().push(drain.clone());

        let view = self.clone();
        tokio::spawn(async move {
            let mut state = StreamState::Pending;
            while let Some(event) = events.recv().await {
                if let Some(next) = state.after(&event) {
                    state = next;
                    state_tx.send_replace(next);
                }
                if view.tx.send(Message::Lines(view.render(&event))).is_err() {
                    log::warn!("progress sink closed, dropping output of {}", view.label());
                    return;
                }
            }

            let (ack, flushed) = oneshot::channel();
            if view.tx.send(Message::Flush(ack)).is_ok() && flushed.await == Ok(true) {
                state_tx.send_replace(StreamState::Drained);
            }
        });

        (sink, drain)
    }
}

/// Completion signal of one event stream.
#[derive(Debug, Clone)]
pub struct Drain {
    target: String,
    state: watch::Receiver<StreamState>,
}

impl Drain {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Resolves once everything written to the stream reached the sink.
    pub async fn wait(&self) -> Result<(), DrainError> {
        let mut state = self.state.clone();
        let drained = state
            .wait_for(|s| *s == StreamState::Drained)
            .await
            .map(|_| ());
        drained.map_err(|_| DrainError::Incomplete(self.target.clone()))
    }
}
