//! Signal-bound context and force-quit on repeated signals
//!
//! ## Unix
//! Any of [`Signal`]'s variants can be listened for.
//!
//! ## Windows
//! Only [`Signal::Interrupt`] (Ctrl-C) is observable; other variants are
//! accepted and never fire.

use std::fmt;
use std::io;
use tokio::task::JoinHandle;

use super::{CancelHandle, Context};

/// OS signals a run can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    Interrupt,
    Terminate,
    Quit,
    Hangup,
    User1,
    User2,
}

impl Signal {
    /// The signals a driver listens for unless told otherwise.
    pub const DEFAULT: [Signal; 2] = [Signal::Interrupt, Signal::Terminate];

    pub fn name(&self) -> &'static str {
        match self {
            Signal::Interrupt => "SIGINT",
            Signal::Terminate => "SIGTERM",
            Signal::Quit => "SIGQUIT",
            Signal::Hangup => "SIGHUP",
            Signal::User1 => "SIGUSR1",
            Signal::User2 => "SIGUSR2",
        }
    }

    #[cfg(unix)]
    fn kind(&self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;

        match self {
            Signal::Interrupt => SignalKind::interrupt(),
            Signal::Terminate => SignalKind::terminate(),
            Signal::Quit => SignalKind::quit(),
            Signal::Hangup => SignalKind::hangup(),
            Signal::User1 => SignalKind::user_defined1(),
            Signal::User2 => SignalKind::user_defined2(),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Registered listeners for a set of signals. Dropping it releases them.
#[cfg(unix)]
struct Listener {
    streams: Vec<(Signal, tokio::signal::unix::Signal)>,
}

#[cfg(unix)]
impl Listener {
    fn register(signals: &[Signal]) -> io::Result<Self> {
        let mut streams: Vec<(Signal, tokio::signal::unix::Signal)> =
            Vec::with_capacity(signals.len());
        for &sig in signals {
            if streams.iter().any(|(seen, _)| *seen == sig) {
                continue;
            }
            streams.push((sig, tokio::signal::unix::signal(sig.kind())?));
        }
        Ok(Self { streams })
    }

    /// Waits for the next signal. Never resolves for an empty set.
    async fn recv(&mut self) -> Signal {
        if self.streams.is_empty() {
            return std::future::pending().await;
        }

        let pending = self.streams.iter_mut().map(|(sig, stream)| {
            let sig = *sig;
            Box::pin(async move {
                match stream.recv().await {
                    Some(()) => sig,
                    None => std::future::pending().await,
                }
            })
        });
        let (sig, _, _) = futures::future::select_all(pending).await;
        sig
    }
}

#[cfg(not(unix))]
struct Listener {
    interrupt: bool,
}

#[cfg(not(unix))]
impl Listener {
    fn register(signals: &[Signal]) -> io::Result<Self> {
        Ok(Self {
            interrupt: signals.contains(&Signal::Interrupt),
        })
    }

    async fn recv(&mut self) -> Signal {
        if self.interrupt && tokio::signal::ctrl_c().await.is_ok() {
            return Signal::Interrupt;
        }
        std::future::pending().await
    }
}

/// Derive a child of `parent` that is cancelled on the first of `signals`.
///
/// The child is done when the parent is done, the returned handle is
/// cancelled, or one of `signals` arrives. Listeners are registered before this
/// returns and released as soon as the child is done; a later signal is not
/// observed here (see [`ForceQuit`]). An empty `signals` set is valid.
pub fn bind_signals(parent: &Context, signals: &[Signal]) -> io::Result<(Context, CancelHandle)> {
    let mut listener = Listener::register(signals)?;
    let (child, handle) = parent.with_cancel();

    let watched = child.clone();
    let cancel = handle.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = watched.done() => {}
            sig = listener.recv() => {
                log::warn!("received {}, canceling (repeat to force quit)", sig);
                cancel.cancel();
            }
        }
        drop(listener);
    });

    Ok((child, handle))
}

/// Calls a force-quit action on the second signal received.
///
/// The first signal is left to the cooperative path of [`bind_signals`]; the
/// second means the user is done waiting. Dropping the guard disarms it.
pub struct ForceQuit {
    task: JoinHandle<()>,
}

impl ForceQuit {
    pub fn arm<F>(signals: &[Signal], on_force: F) -> io::Result<Self>
    where
        F: FnOnce(Signal) + Send + 'static,
    {
        let mut listener = Listener::register(signals)?;
        let task = tokio::spawn(async move {
            let first = listener.recv().await;
            log::debug!("force quit armed after {}", first);
            let second = listener.recv().await;
            log::error!("received {} again, forcing exit", second);
            on_force(second);
        });
        Ok(Self { task })
    }
}

impl Drop for ForceQuit {
    fn drop(&mut self) {
        self.task.abort();
    }
}
