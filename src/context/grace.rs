//! Grace-period context - outlives its parent's cancellation by a bounded time
//!
//! Used for the output-draining phase: when the run is told to stop, buffered
//! progress may still be printed, but only for `grace` more.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{CancelHandle, Context};

/// Returns a context that stays live until `grace` has elapsed after `parent`
/// became done, or until the returned handle is cancelled, whichever is sooner.
///
/// The timer only starts once the parent is done. Cancelling the handle first
/// ends the child immediately and no timer is ever started.
///
/// The child's deadline is the parent's deadline plus `grace`; a parent without
/// a deadline yields a child without one. Values are inherited from `parent`.
///
/// Must be called from within a tokio runtime.
pub fn with_grace(parent: &Context, grace: Duration) -> (Context, CancelHandle) {
    // Independent token: parent cancellation must not reach the child directly.
    let token = CancellationToken::new();
    let deadline = parent.deadline().and_then(|d| d.checked_add(grace));
    let child = Context::from_parts(token.clone(), deadline, parent.values());

    let parent = parent.clone();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = timer.cancelled() => return,
            _ = parent.done() => {}
        }

        log::debug!("parent done, grace period of {:?} started", grace);
        tokio::select! {
            _ = tokio::time::sleep(grace) => {
                log::debug!("grace period of {:?} elapsed", grace);
                timer.cancel();
            }
            _ = timer.cancelled() => {}
        }
    });

    (child, CancelHandle::new(token))
}
