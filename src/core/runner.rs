//! Target runner - executes exactly one target and records its outcome

use super::{BuildResult, EngineRef, TargetDescriptor};
use crate::context::Context;
use crate::error::{EngineError, RunError};
use crate::progress::{EventSink, FinalStatus, ProgressEvent};

/// Result of one runner invocation. Never changes after creation.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    target: String,
    result: Result<BuildResult, RunError>,
}

impl RunOutcome {
    pub fn new(target: impl Into<String>, result: Result<BuildResult, RunError>) -> Self {
        Self {
            target: target.into(),
            result,
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn result(&self) -> &Result<BuildResult, RunError> {
        &self.result
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn error(&self) -> Option<&RunError> {
        self.result.as_ref().err()
    }

    pub fn is_canceled(&self) -> bool {
        self.error().map_or(false, RunError::is_canceled)
    }

    /// Status reported as the last event of the target's stream.
    pub fn final_status(&self) -> FinalStatus {
        match &self.result {
            Ok(_) => FinalStatus::Succeeded,
            Err(e) if e.is_canceled() => FinalStatus::Canceled {
                error: e.to_string(),
            },
            Err(e) => FinalStatus::Failed {
                error: e.to_string(),
            },
        }
    }
}

/// Runs single targets against one engine.
pub struct TargetRunner {
    engine: EngineRef,
}

impl TargetRunner {
    pub fn new(engine: EngineRef) -> Self {
        Self { engine }
    }

    /// Compile and build `target`, reporting into `sink`.
    ///
    /// Collaborator errors end up in the outcome; this never fails. The sink
    /// is dropped before returning, which closes the target's stream.
    pub async fn run(&self, ctx: &Context, target: &TargetDescriptor, sink: EventSink) -> RunOutcome {
        sink.send(ProgressEvent::Started);

        let outcome = RunOutcome::new(&target.name, self.execute(ctx, target, &sink).await);
        match outcome.error() {
            None => log::debug!("[{}] succeeded", target.name),
            Some(e) => log::debug!("[{}] {}: {}", target.name, e.as_label(), e),
        }

        sink.send(ProgressEvent::Finished {
            status: outcome.final_status(),
        });
        drop(sink);
        outcome
    }

    async fn execute(
        &self,
        ctx: &Context,
        target: &TargetDescriptor,
        sink: &EventSink,
    ) -> Result<BuildResult, RunError> {
        let request = target.compiler.compile(ctx, &target.name).await?;
        log::debug!(
            "[{}] submitting to {} engine",
            target.name,
            self.engine.name()
        );

        let scoped = ctx.with_value("target", target.name.clone());
        match self.engine.build(&scoped, request, sink).await {
            Ok(result) => Ok(result),
            Err(e @ EngineError::Canceled) => Err(RunError::Canceled(e.to_string())),
            Err(e) if ctx.is_done() => Err(RunError::Canceled(e.to_string())),
            Err(e) => Err(RunError::Engine(e)),
        }
    }
}
