//! Core driver - targets, engine seam, single-target runner, fan-out orchestrator

mod engine;
mod orchestrator;
mod runner;
mod target;

pub use engine::{BuildEngine, BuildResult, EngineRef};
pub use orchestrator::{DispatchPolicy, Orchestrator};
pub use runner::{RunOutcome, TargetRunner};
pub use target::{BuildRequest, CompileFn, CompilerRef, GraphCompiler, TargetDescriptor};

#[cfg(test)]
pub(crate) mod testing {
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::context::Context;
    use crate::error::EngineError;
    use crate::progress::EventSink;

    #[derive(Debug, Clone)]
    pub enum Plan {
        Succeed(Duration),
        Fail(Duration, &'static str),
        /// Run until the context is done, then report cancellation.
        UntilCanceled,
        /// Run until the context is done, then report a plain failure.
        FailOnCancel(&'static str),
        Panic,
    }

    /// Engine whose behaviour per target is fixed up front.
    #[derive(Default)]
    pub struct ScriptedEngine {
        plans: HashMap<String, Plan>,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedEngine {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn plan(mut self, target: &str, plan: Plan) -> Self {
            self.plans.insert(target.to_string(), plan);
            self
        }

        /// `target` values of every context the engine was called with.
        pub fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BuildEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn build(
            &self,
            ctx: &Context,
            request: BuildRequest,
            sink: &EventSink,
        ) -> Result<BuildResult, EngineError> {
            self.seen
                .lock()
                .unwrap()
                .push(ctx.value("target").unwrap_or("?").to_string());
            sink.step(format!("build {}", request.target));

            let plan = self
                .plans
                .get(&request.target)
                .cloned()
                .unwrap_or(Plan::Succeed(Duration::ZERO));

            if let Plan::FailOnCancel(msg) = plan {
                ctx.done().await;
                return Err(EngineError::Failed(msg.to_string()));
            }

            let work = async {
                match &plan {
                    Plan::Succeed(d) | Plan::Fail(d, _) => tokio::time::sleep(*d).await,
                    Plan::Panic => panic!("engine blew up on {}", request.target),
                    _ => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                biased;
                _ = ctx.done() => return Err(EngineError::Canceled),
                _ = work => {}
            }

            match plan {
                Plan::Fail(_, msg) => Err(EngineError::Failed(msg.to_string())),
                Plan::Succeed(elapsed) => Ok(BuildResult {
                    exit_code: 0,
                    elapsed,
                }),
                _ => unreachable!(),
            }
        }
    }

    /// Compiler that accepts any target name.
    pub fn compiler() -> CompilerRef {
        CompileFn::arc(|_ctx: Context, target: String| async move {
            Ok(BuildRequest {
                target,
                spec: serde_json::Value::Null,
            })
        })
    }

    pub fn targets(names: &[&str]) -> Vec<TargetDescriptor> {
        let compiler = compiler();
        names
            .iter()
            .map(|name| TargetDescriptor::new(*name, compiler.clone()))
            .collect()
    }
}
