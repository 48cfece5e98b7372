//! Build engine seam

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::BuildRequest;
use crate::context::Context;
use crate::error::EngineError;
use crate::progress::EventSink;

/// What the engine reports for a successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildResult {
    pub exit_code: i32,
    pub elapsed: Duration,
}

/// Executes build requests.
///
/// Called concurrently for different targets. Implementations must stop
/// promptly once `ctx` is done, and may write progress into `sink` for as
/// long as the call lasts.
#[async_trait]
pub trait BuildEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn build(
        &self,
        ctx: &Context,
        request: BuildRequest,
        sink: &EventSink,
    ) -> Result<BuildResult, EngineError>;
}

pub type EngineRef = Arc<dyn BuildEngine>;
