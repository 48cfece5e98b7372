//! Orchestrator - fans out one runner per target and aggregates the outcomes
//!
//! ```text
//!   run_all(ctx, [lint, test, tidy])
//!        │
//!        ├─► spawn runner(lint) ─┐
//!        ├─► spawn runner(test) ─┼─► JoinSet::join_next ... until empty
//!        └─► spawn runner(tidy) ─┘
//!                                    │
//!                                    ▼
//!                 outcomes in list order ─► Ok(outcomes) | Err(BatchError)
//! ```
//!
//! Cancellation of `ctx` is advisory: every spawned runner is joined before
//! `run_all` returns, whatever the runners do with it.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;

use super::{EngineRef, RunOutcome, TargetDescriptor, TargetRunner};
use crate::context::Context;
use crate::error::{BatchError, RunError};
use crate::progress::{EventSink, FinalStatus, ProgressEvent, ProgressWriter};

/// What to do with targets not yet dispatched once the run context is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchPolicy {
    /// Start every runner; each observes the cancelled context itself.
    #[default]
    Always,
    /// Record the target as [`RunError::Skipped`] without starting it.
    SkipWhenCanceled,
}

pub struct Orchestrator {
    runner: Arc<TargetRunner>,
    writer: ProgressWriter,
    policy: DispatchPolicy,
}

impl Orchestrator {
    pub fn new(engine: EngineRef, writer: ProgressWriter) -> Self {
        Self {
            runner: Arc::new(TargetRunner::new(engine)),
            writer,
            policy: DispatchPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run every target concurrently and wait for all of them.
    ///
    /// Outcomes come back in the order of `targets`. If any target failed the
    /// whole list is returned inside a [`BatchError`].
    pub async fn run_all(
        &self,
        ctx: &Context,
        targets: &[TargetDescriptor],
    ) -> Result<Vec<RunOutcome>, BatchError> {
        let mut slots: Vec<Option<RunOutcome>> = vec![None; targets.len()];
        let mut set = JoinSet::new();

        for (idx, target) in targets.iter().enumerate() {
            let (sink, _drain) = self.writer.with_prefix(target.name.clone(), true).channel();

            if let Some(skipped) = self.skip(ctx, target, &sink) {
                slots[idx] = Some(skipped);
                continue;
            }

            let runner = Arc::clone(&self.runner);
            let ctx = ctx.clone();
            let target = target.clone();
            set.spawn(async move {
                let run = AssertUnwindSafe(runner.run(&ctx, &target, sink));
                (idx, run.catch_unwind().await.map_err(panic_message))
            });
        }
        log::debug!("dispatched {} of {} targets", set.len(), targets.len());

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, Ok(outcome))) => slots[idx] = Some(outcome),
                Ok((idx, Err(msg))) => {
                    log::error!("[{}] runner panicked: {}", targets[idx].name, msg);
                    slots[idx] = Some(RunOutcome::new(
                        &targets[idx].name,
                        Err(RunError::Panicked(msg)),
                    ));
                }
                Err(e) => log::error!("runner task did not complete: {}", e),
            }
        }

        let outcomes = slots
            .into_iter()
            .zip(targets)
            .map(|(slot, target)| {
                slot.unwrap_or_else(|| {
                    RunOutcome::new(
                        &target.name,
                        Err(RunError::Panicked("runner task did not complete".into())),
                    )
                })
            })
            .collect();
        aggregate(outcomes)
    }

    /// Run a single target in place, without a prefix and with the elapsed
    /// time restarted.
    ///
    /// Same outcome and error shape as a one-element [`run_all`](Self::run_all).
    pub async fn run_one(
        &self,
        ctx: &Context,
        target: &TargetDescriptor,
    ) -> Result<Vec<RunOutcome>, BatchError> {
        let view = self.writer.reset_time().with_prefix(target.name.clone(), false);
        let (sink, _drain) = view.channel();

        let outcome = match self.skip(ctx, target, &sink) {
            Some(skipped) => skipped,
            None => self.runner.run(ctx, target, sink).await,
        };
        aggregate(vec![outcome])
    }

    fn skip(&self, ctx: &Context, target: &TargetDescriptor, sink: &EventSink) -> Option<RunOutcome> {
        if self.policy != DispatchPolicy::SkipWhenCanceled || !ctx.is_done() {
            return None;
        }
        log::warn!("[{}] not started, run already canceled", target.name);
        sink.send(ProgressEvent::Finished {
            status: FinalStatus::Canceled {
                error: RunError::Skipped.to_string(),
            },
        });
        Some(RunOutcome::new(&target.name, Err(RunError::Skipped)))
    }
}

fn aggregate(outcomes: Vec<RunOutcome>) -> Result<Vec<RunOutcome>, BatchError> {
    if outcomes.iter().all(RunOutcome::is_success) {
        Ok(outcomes)
    } else {
        Err(BatchError::new(outcomes))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
