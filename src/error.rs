//! Error types for the build driver core.
//!
//! - [`CompileError`] - the graph compiler could not produce a request.
//! - [`EngineError`] - the build engine rejected or failed a request.
//! - [`RunError`] - why one target's run failed (captured in its outcome).
//! - [`BatchError`] - aggregate over a whole run, naming every failed target.
//! - [`DrainError`] - progress output could not be fully flushed.
//! - [`ConnectError`] - the engine endpoint is unusable.
//!
//! Every enum exposes `as_label()`, a short stable snake_case label for logs.

use std::fmt;
use thiserror::Error;

use crate::core::RunOutcome;

/// The graph compiler could not produce a build request for a target.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// No target with that name is known to the compiler.
    #[error("unknown target {0:?}")]
    UnknownTarget(String),

    /// The target definition exists but could not be turned into a request.
    #[error("invalid definition for target {target:?}: {reason}")]
    Invalid { target: String, reason: String },
}

impl CompileError {
    pub fn as_label(&self) -> &'static str {
        match self {
            CompileError::UnknownTarget(_) => "compile_unknown_target",
            CompileError::Invalid { .. } => "compile_invalid",
        }
    }
}

/// The build engine rejected or failed a submitted request.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The work ran and did not complete successfully.
    #[error("{0}")]
    Failed(String),

    /// The work could not be started at all.
    #[error("failed to start: {0}")]
    Spawn(String),

    /// The engine stopped because its context was cancelled.
    #[error("canceled")]
    Canceled,
}

impl EngineError {
    pub fn as_label(&self) -> &'static str {
        match self {
            EngineError::Failed(_) => "engine_failed",
            EngineError::Spawn(_) => "engine_spawn",
            EngineError::Canceled => "engine_canceled",
        }
    }
}

/// Why a single target's run failed.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    /// No build request could be compiled.
    #[error("compile: {0}")]
    Compile(#[from] CompileError),

    /// The engine reported a failure while the run was still live.
    #[error("{0}")]
    Engine(EngineError),

    /// The run was stopped by cancellation; carries the engine's last word.
    #[error("canceled: {0}")]
    Canceled(String),

    /// The run was never started because the batch was already cancelled.
    #[error("skipped: canceled before dispatch")]
    Skipped,

    /// The runner task panicked.
    #[error("runner panicked: {0}")]
    Panicked(String),
}

impl RunError {
    pub fn as_label(&self) -> &'static str {
        match self {
            RunError::Compile(_) => "run_compile",
            RunError::Engine(_) => "run_engine",
            RunError::Canceled(_) => "run_canceled",
            RunError::Skipped => "run_skipped",
            RunError::Panicked(_) => "run_panicked",
        }
    }

    /// True for failures caused by cancellation rather than by the target itself.
    pub fn is_canceled(&self) -> bool {
        matches!(self, RunError::Canceled(_) | RunError::Skipped)
    }
}

/// Aggregate failure of a run: one or more targets failed.
///
/// Carries every outcome of the run so callers need not track them separately.
#[derive(Debug, Clone)]
pub struct BatchError {
    outcomes: Vec<RunOutcome>,
}

impl BatchError {
    pub(crate) fn new(outcomes: Vec<RunOutcome>) -> Self {
        Self { outcomes }
    }

    /// Names of the failed targets, in target-list order.
    pub fn failed_targets(&self) -> Vec<&str> {
        self.failures().map(|(name, _)| name).collect()
    }

    /// Failed targets with their errors, in target-list order.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &RunError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.error().map(|e| (o.target(), e)))
    }

    /// All outcomes of the run, failed or not.
    pub fn outcomes(&self) -> &[RunOutcome] {
        &self.outcomes
    }
}

impl fmt::Display for BatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed: Vec<_> = self.failures().collect();
        write!(f, "{} of {} targets failed: ", failed.len(), self.outcomes.len())?;
        for (i, (name, err)) in failed.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name} ({err})")?;
        }
        Ok(())
    }
}

impl std::error::Error for BatchError {}

/// Progress output could not be fully written before exit.
#[derive(Error, Debug)]
pub enum DrainError {
    /// Writing to the output sink failed.
    #[error("writing progress output: {0}")]
    Write(#[from] std::io::Error),

    /// A target's stream ended without all of its lines reaching the sink.
    #[error("progress for {0:?} was not fully drained")]
    Incomplete(String),

    /// The grace period ran out before every stream was drained.
    #[error("grace period expired before progress output drained")]
    GraceExpired,
}

impl DrainError {
    pub fn as_label(&self) -> &'static str {
        match self {
            DrainError::Write(_) => "drain_write",
            DrainError::Incomplete(_) => "drain_incomplete",
            DrainError::GraceExpired => "drain_grace_expired",
        }
    }
}

/// The engine endpoint could not be parsed or reached.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("invalid endpoint {0:?}: expected <scheme>://[address]")]
    Malformed(String),

    #[error("unsupported endpoint scheme {0:?} (local, docker, docker+unix, docker+tcp)")]
    UnsupportedScheme(String),

    #[error("engine at {endpoint} is unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },
}

impl ConnectError {
    pub fn as_label(&self) -> &'static str {
        match self {
            ConnectError::Malformed(_) => "connect_malformed",
            ConnectError::UnsupportedScheme(_) => "connect_unsupported_scheme",
            ConnectError::Unreachable { .. } => "connect_unreachable",
        }
    }
}
