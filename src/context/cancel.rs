//! Cancelable context - a cancel token with an optional deadline and values
//!
//! Built on [`CancellationToken`]: deriving a child context derives a child
//! token, so cancellation flows from parent to child and never upwards.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// A cancellation scope handed to every operation of a run.
///
/// Cheap to clone; clones observe the same done-signal.
#[derive(Clone, Debug)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
    values: Arc<BTreeMap<&'static str, String>>,
}

/// Cancels the context it was created with. Calling it again is a no-op.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Signal done on the associated context and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Context {
    /// Root context: never done unless a derived handle cancels a child.
    pub fn background() -> Self {
        Self::from_parts(CancellationToken::new(), None, Arc::default())
    }

    pub(crate) fn from_parts(
        token: CancellationToken,
        deadline: Option<Instant>,
        values: Arc<BTreeMap<&'static str, String>>,
    ) -> Self {
        Self {
            token,
            deadline,
            values,
        }
    }

    /// Derive a child that is done when this context is done or when the
    /// returned handle is cancelled, whichever happens first.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let token = self.token.child_token();
        let child = Self::from_parts(token.clone(), self.deadline, Arc::clone(&self.values));
        (child, CancelHandle::new(token))
    }

    /// Derive a child that is also done once `deadline` passes.
    ///
    /// The child's deadline is the earlier of `deadline` and this context's.
    /// Must be called from within a tokio runtime.
    pub fn with_deadline(&self, deadline: Instant) -> (Context, CancelHandle) {
        let (mut child, handle) = self.with_cancel();
        let effective = match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        };
        child.deadline = Some(effective);

        let token = child.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep_until(effective) => {
                    log::debug!("context deadline exceeded");
                    token.cancel();
                }
            }
        });

        (child, handle)
    }

    /// Shorthand for `with_deadline(now + timeout)`.
    pub fn with_timeout(&self, timeout: Duration) -> (Context, CancelHandle) {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context sharing this one's done-signal, carrying one more value.
    pub fn with_value(&self, key: &'static str, value: impl Into<String>) -> Context {
        let mut values = (*self.values).clone();
        values.insert(key, value.into());
        Self::from_parts(self.token.clone(), self.deadline, Arc::new(values))
    }

    /// Look up a value set on this context or any ancestor.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub(crate) fn values(&self) -> Arc<BTreeMap<&'static str, String>> {
        Arc::clone(&self.values)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check of the done-signal.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the context is done.
    pub fn done(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}
