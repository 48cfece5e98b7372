//! Cancellation contexts - cancel scopes, signal binding, grace periods

mod cancel;
mod grace;
mod signals;

pub use cancel::{CancelHandle, Context};
pub use grace::with_grace;
pub use signals::{bind_signals, ForceQuit, Signal};
