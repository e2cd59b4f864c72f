//! Background execution of tasks.
//!
//! [`TaskRunner::spawn`] registers a task with the progress registry, starts
//! the chosen [`ExecutionStrategy`] on its own Tokio task and hands back a
//! [`TaskHandle`] straight away. Callers poll the registry for status or
//! await the handle for the full [`TaskReport`].

use futures::FutureExt;
use reelcraft_core::{
    CancellationToken, OrchestrationContext, OrchestrationError, OrchestrationResult,
    ProgressHandle, ProgressRegistry, TaskStatus,
};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::strategy::{ExecutionScope, ExecutionStrategy, TaskOutcome};

/// Everything a finished task leaves behind.
#[derive(Debug)]
pub struct TaskReport {
    pub task_id: String,
    pub outcome: OrchestrationResult<TaskOutcome>,
    /// Context as it stood when the strategy returned, including partial
    /// resources after a failure
    pub context: OrchestrationContext,
}

impl TaskReport {
    pub fn status(&self) -> TaskStatus {
        match &self.outcome {
            Ok(outcome) => outcome.status.into(),
            Err(_) => TaskStatus::Failed,
        }
    }
}

/// Handle onto a spawned task.
#[derive(Debug)]
pub struct TaskHandle {
    task_id: String,
    cancel: CancellationToken,
    join: JoinHandle<TaskReport>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Request cancellation. In-flight capability calls are dropped.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the task to finish.
    pub async fn join(self) -> OrchestrationResult<TaskReport> {
        self.join
            .await
            .map_err(|_| OrchestrationError::Cancelled(self.task_id))
    }
}

/// Spawns tasks and tracks the ones still running.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    progress: Arc<ProgressRegistry>,
    shutdown: CancellationToken,
    active: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl TaskRunner {
    pub fn new(progress: Arc<ProgressRegistry>) -> Self {
        Self {
            progress,
            shutdown: CancellationToken::new(),
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn progress(&self) -> &Arc<ProgressRegistry> {
        &self.progress
    }

    /// Start a task under a fresh v4 id.
    pub async fn spawn(
        &self,
        request: impl Into<String>,
        strategy: Arc<dyn ExecutionStrategy>,
    ) -> OrchestrationResult<TaskHandle> {
        self.spawn_with_id(Uuid::new_v4().to_string(), request, strategy)
            .await
    }

    /// Start a task under a caller-chosen id.
    ///
    /// Fails with `TaskAlreadyRunning` while another task holds the same id.
    /// A finished task's id may be reused.
    pub async fn spawn_with_id(
        &self,
        task_id: impl Into<String>,
        request: impl Into<String>,
        strategy: Arc<dyn ExecutionStrategy>,
    ) -> OrchestrationResult<TaskHandle> {
        let task_id = task_id.into();
        let cancel = self.shutdown.child_token();
        {
            let mut active = self.active.write().await;
            if active.contains_key(&task_id) {
                warn!(task_id = %task_id, "Rejecting task with a live duplicate id");
                return Err(OrchestrationError::TaskAlreadyRunning(task_id));
            }
            active.insert(task_id.clone(), cancel.clone());
        }

        let progress = ProgressHandle::new(Arc::clone(&self.progress), task_id.clone());
        self.progress.register(&task_id).await;
        if let Err(err) = progress.report(0, "Task started").await {
            warn!(task_id = %task_id, error = %err, "Failed to mark task processing");
        }

        let scope = ExecutionScope::new()
            .with_cancel(cancel.clone())
            .with_progress(progress.clone());
        let mut context = OrchestrationContext::new(task_id.clone(), request);
        let active = Arc::clone(&self.active);
        let id = task_id.clone();

        info!(task_id = %task_id, strategy = strategy.name(), "Task spawned");

        let join = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = AssertUnwindSafe(strategy.execute(&mut context, &scope))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(OrchestrationError::Internal(format!(
                        "{} strategy panicked",
                        strategy.name()
                    )))
                });

            let (status, message) = match &outcome {
                Ok(outcome) => (TaskStatus::from(outcome.status), outcome.message.clone()),
                Err(err) => (TaskStatus::Failed, err.to_string()),
            };
            if let Err(err) = progress.finish(status, message.clone()).await {
                warn!(task_id = %id, error = %err, "Failed to record final status");
            }
            active.write().await.remove(&id);

            let duration_ms = started.elapsed().as_millis() as u64;
            match &outcome {
                Ok(_) => info!(
                    task_id = %id,
                    status = %status,
                    duration_ms,
                    resources = context.resources().len(),
                    "Task finished"
                ),
                Err(err) => error!(
                    task_id = %id,
                    error_code = err.error_code(),
                    error = %err,
                    duration_ms,
                    "Task failed"
                ),
            }

            TaskReport {
                task_id: id,
                outcome,
                context,
            }
        });

        Ok(TaskHandle {
            task_id,
            cancel,
            join,
        })
    }

    /// Cancel one running task.
    pub async fn cancel(&self, task_id: &str) -> OrchestrationResult<()> {
        let active = self.active.read().await;
        let token = active
            .get(task_id)
            .ok_or_else(|| OrchestrationError::TaskNotFound(task_id.to_string()))?;
        token.cancel();
        info!(task_id = %task_id, "Task cancellation requested");
        Ok(())
    }

    /// Ids of tasks that have not finished yet.
    pub async fn active_tasks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Cancel every running task.
    pub fn shutdown(&self) {
        info!("Shutting down task runner");
        self.shutdown.cancel();
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new(ProgressRegistry::shared())
    }
}
