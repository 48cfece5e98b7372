//! Targets and the graph compiler that turns them into build requests

use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::context::Context;
use crate::error::CompileError;

/// Engine-specific description of the work for one target.
///
/// The core never looks inside `spec`; only the engine interprets it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildRequest {
    pub target: String,
    pub spec: serde_json::Value,
}

/// Produces a build request for a named target.
#[async_trait]
pub trait GraphCompiler: Send + Sync {
    async fn compile(&self, ctx: &Context, target: &str) -> Result<BuildRequest, CompileError>;
}

pub type CompilerRef = Arc<dyn GraphCompiler>;

/// Closure-backed compiler.
///
/// Each call to `compile` produces a fresh future from the closure.
pub struct CompileFn<F> {
    f: F,
}

impl<F> CompileFn<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }

    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> GraphCompiler for CompileFn<F>
where
    F: Fn(Context, String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<BuildRequest, CompileError>> + Send + 'static,
{
    async fn compile(&self, ctx: &Context, target: &str) -> Result<BuildRequest, CompileError> {
        (self.f)(ctx.clone(), target.to_string()).await
    }
}

/// A named target and the compiler responsible for it.
#[derive(Clone)]
pub struct TargetDescriptor {
    pub name: String,
    pub compiler: CompilerRef,
}

impl TargetDescriptor {
    pub fn new(name: impl Into<String>, compiler: CompilerRef) -> Self {
        Self {
            name: name.into(),
            compiler,
        }
    }
}

impl fmt::Debug for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
