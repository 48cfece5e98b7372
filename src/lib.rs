//! fanbuild - concurrent build-target driver
//!
//! Runs independent build targets side by side against a build engine. One
//! target failing never stops the others; every failure is reported at the
//! end, and each target's progress shows up under its own prefix.
//!
//! The building blocks:
//! - [`context`] - cancellation contexts bound to OS signals, with a grace
//!   period for draining output;
//! - [`core`] - the single-target runner and the fan-out orchestrator;
//! - [`progress`] - the line-atomic progress multiplexer;
//! - [`backend`] - engines that actually execute targets;
//! - [`targets`] and [`config`] - the targets file and command line.

pub mod backend;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod progress;
pub mod targets;

// Re-exports
pub use context::{bind_signals, with_grace, CancelHandle, Context, ForceQuit, Signal};
pub use core::{
    BuildEngine, BuildRequest, BuildResult, DispatchPolicy, GraphCompiler, Orchestrator,
    RunOutcome, TargetDescriptor, TargetRunner,
};
pub use error::{BatchError, CompileError, ConnectError, DrainError, EngineError, RunError};
pub use progress::{Drain, EventSink, Printer, ProgressEvent, ProgressMode, ProgressWriter};

/// Result type alias
pub type Result<T> = anyhow::Result<T>;
