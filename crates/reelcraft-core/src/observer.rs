//! # Progress Registry
//!
//! Tracks the externally visible status of every task. One registry is
//! created at startup and shared by `Arc` with the task runner, the engines
//! and whatever surface reports progress to users.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{OrchestrationError, OrchestrationResult};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    /// Stopped at the iteration cap without the reasoning engine finishing
    Incomplete,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Incomplete
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Incomplete => "incomplete",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one task's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub task_id: String,
    pub status: TaskStatus,
    /// 0..=100
    pub percent: u8,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Process-wide task progress store.
#[derive(Debug, Default)]
pub struct ProgressRegistry {
    tasks: RwLock<HashMap<String, TaskProgress>>,
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor for the shared form.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Register a task as pending. Re-registering resets its progress.
    pub async fn register(&self, task_id: &str) -> TaskProgress {
        let now = Utc::now();
        let progress = TaskProgress {
            task_id: task_id.to_string(),
            status: TaskStatus::Pending,
            percent: 0,
            message: "Task registered".to_string(),
            created_at: now,
            updated_at: now,
        };
        self.tasks
            .write()
            .await
            .insert(task_id.to_string(), progress.clone());
        debug!(task_id = %task_id, "Task registered");
        progress
    }

    /// Update a task's status. Percent values above 100 are clamped.
    pub async fn update(
        &self,
        task_id: &str,
        status: TaskStatus,
        percent: u8,
        message: impl Into<String>,
    ) -> OrchestrationResult<TaskProgress> {
        let mut tasks = self.tasks.write().await;
        let progress = tasks
            .get_mut(task_id)
            .ok_or_else(|| OrchestrationError::TaskNotFound(task_id.to_string()))?;
        progress.status = status;
        progress.percent = percent.min(100);
        progress.message = message.into();
        progress.updated_at = Utc::now();
        debug!(
            task_id = %task_id,
            status = %status,
            percent = progress.percent,
            "Task progress updated"
        );
        Ok(progress.clone())
    }

    pub async fn get(&self, task_id: &str) -> Option<TaskProgress> {
        self.tasks.read().await.get(task_id).cloned()
    }

    /// Snapshot of all tasks, oldest first.
    pub async fn list(&self) -> Vec<TaskProgress> {
        let mut tasks: Vec<TaskProgress> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        tasks
    }

    pub async fn remove(&self, task_id: &str) -> Option<TaskProgress> {
        self.tasks.write().await.remove(task_id)
    }
}

/// A registry bound to one task id, handed to an executing strategy.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    registry: Arc<ProgressRegistry>,
    task_id: String,
}

impl ProgressHandle {
    pub fn new(registry: Arc<ProgressRegistry>, task_id: impl Into<String>) -> Self {
        Self {
            registry,
            task_id: task_id.into(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Report processing progress.
    pub async fn report(&self, percent: u8, message: impl Into<String>) -> OrchestrationResult<()> {
        self.registry
            .update(&self.task_id, TaskStatus::Processing, percent, message)
            .await
            .map(|_| ())
    }

    pub async fn finish(
        &self,
        status: TaskStatus,
        message: impl Into<String>,
    ) -> OrchestrationResult<()> {
        let percent = if status == TaskStatus::Completed {
            100
        } else {
            self.registry
                .get(&self.task_id)
                .await
                .map_or(0, |progress| progress.percent)
        };
        self.registry
            .update(&self.task_id, status, percent, message)
            .await
            .map(|_| ())
    }
}
