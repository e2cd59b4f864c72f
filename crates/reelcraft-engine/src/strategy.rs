//! The interface both execution engines implement.
//!
//! A task runner holds an `Arc<dyn ExecutionStrategy>` and does not care
//! whether the work is driven by an up-front plan or by a conversation with
//! the reasoning engine.

use async_trait::async_trait;
use reelcraft_core::{
    CancellationToken, ChatMessage, ExecutionPlan, OrchestrationContext, OrchestrationError,
    OrchestrationResult, ProgressHandle, ResourceMap, TaskStatus,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Everything a strategy needs from its surroundings besides the context.
#[derive(Debug, Clone, Default)]
pub struct ExecutionScope {
    pub cancel: CancellationToken,
    pub progress: Option<ProgressHandle>,
}

impl ExecutionScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressHandle) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Error to return once cancellation has been observed.
    pub fn cancelled_error(&self, ctx: &OrchestrationContext) -> OrchestrationError {
        OrchestrationError::Cancelled(ctx.task_id.clone())
    }

    /// Report progress if a handle is attached. Reporting failures are
    /// logged and otherwise ignored.
    pub async fn report(&self, percent: u8, message: impl Into<String>) {
        if let Some(progress) = &self.progress
            && let Err(err) = progress.report(percent, message).await
        {
            warn!(task_id = %progress.task_id(), error = %err, "Failed to report progress");
        }
    }
}

/// How a strategy finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Completed,
    /// The iteration cap ended the run before the reasoning engine did
    Incomplete,
}

impl From<OutcomeStatus> for TaskStatus {
    fn from(status: OutcomeStatus) -> Self {
        match status {
            OutcomeStatus::Completed => TaskStatus::Completed,
            OutcomeStatus::Incomplete => TaskStatus::Incomplete,
        }
    }
}

/// User-facing result of a task.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinalOutput {
    pub title: Option<String>,
    /// Location of the final artifact, if one was produced
    pub artifact: Option<String>,
    pub resources: ResourceMap,
}

impl FinalOutput {
    /// Assemble from a context. The title comes from the `script` state
    /// slot, falling back to a top-level `title` entry.
    pub fn assemble(ctx: &OrchestrationContext) -> Self {
        let title = ctx
            .state("script")
            .and_then(|script| script.get("title"))
            .or_else(|| ctx.state("title"))
            .and_then(|title| title.as_str())
            .map(str::to_string);
        Self {
            title,
            artifact: ctx.final_artifact().map(str::to_string),
            resources: ctx.resources().clone(),
        }
    }
}

/// What a strategy hands back on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub status: OutcomeStatus,
    pub output: FinalOutput,
    pub message: String,
    /// Planning rounds, initial plan first (plan-based engine only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plans: Vec<ExecutionPlan>,
    /// Full message history (conversation loop only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transcript: Vec<ChatMessage>,
}

/// A way of driving a task from request to final artifact.
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// Short name used in logs and configuration.
    fn name(&self) -> &'static str;

    /// Run the task to completion against `ctx`.
    ///
    /// On `Err` the context still holds everything produced before the
    /// failure.
    async fn execute(
        &self,
        ctx: &mut OrchestrationContext,
        scope: &ExecutionScope,
    ) -> OrchestrationResult<TaskOutcome>;
}
