//! # Error Types
//!
//! Errors that cross an engine boundary. Capability-level failures do not
//! appear here: the registry folds them into a failed
//! [`CapabilityResult`](crate::capability::CapabilityResult) carrying a
//! [`FailureReason`](crate::capability::FailureReason) instead.

use thiserror::Error;

/// Errors that can occur while orchestrating a task.
#[derive(Debug, Clone, Error)]
pub enum OrchestrationError {
    /// The requested capability is not registered.
    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    /// Arguments did not match the capability's parameter schema.
    #[error("Invalid arguments for '{capability}': {reason}")]
    InvalidArguments {
        /// Capability the call was addressed to
        capability: String,
        /// What the schema rejected
        reason: String,
    },

    /// A capability call failed; wrapped into `StepFailed` when the step was required.
    #[error("Capability '{capability}' failed: {message}")]
    CapabilityExecution {
        /// Failing capability
        capability: String,
        /// Underlying cause
        message: String,
    },

    /// A required plan step failed and aborted the pass.
    #[error("Step '{step_id}' ({capability}) failed: {cause}")]
    StepFailed {
        /// Id of the failing step
        step_id: String,
        /// Capability the step invoked
        capability: String,
        /// Underlying cause
        cause: String,
    },

    /// The iteration cap was reached without the task completing. The
    /// conversation loop reports it as the message of an `Incomplete` outcome.
    #[error("Plan exhausted after {iterations} iterations")]
    PlanExhausted {
        /// Number of iterations performed
        iterations: usize,
    },

    /// The reasoning engine was unreachable or produced unusable output.
    #[error("Reasoning engine error: {0}")]
    ReasoningEngine(String),

    /// A plan violated the queue invariants.
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// The task was cancelled before it finished.
    #[error("Task cancelled: {0}")]
    Cancelled(String),

    /// No task with the given id is known to the progress registry.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// A task with the given id is still running.
    #[error("Task already running: {0}")]
    TaskAlreadyRunning(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An execution strategy panicked.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl OrchestrationError {
    /// Check if this error is worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestrationError::CapabilityExecution { .. }
                | OrchestrationError::ReasoningEngine(_)
        )
    }

    /// Get the error code suitable for logging or reporting.
    pub fn error_code(&self) -> &'static str {
        match self {
            OrchestrationError::CapabilityNotFound(_) => "CAPABILITY_NOT_FOUND",
            OrchestrationError::InvalidArguments { .. } => "INVALID_ARGUMENTS",
            OrchestrationError::CapabilityExecution { .. } => "CAPABILITY_EXECUTION_ERROR",
            OrchestrationError::StepFailed { .. } => "STEP_FAILED",
            OrchestrationError::PlanExhausted { .. } => "PLAN_EXHAUSTED",
            OrchestrationError::ReasoningEngine(_) => "REASONING_ENGINE_ERROR",
            OrchestrationError::InvalidPlan(_) => "INVALID_PLAN",
            OrchestrationError::Cancelled(_) => "CANCELLED",
            OrchestrationError::TaskNotFound(_) => "TASK_NOT_FOUND",
            OrchestrationError::TaskAlreadyRunning(_) => "TASK_ALREADY_RUNNING",
            OrchestrationError::Serialization(_) => "SERIALIZATION_ERROR",
            OrchestrationError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type for orchestration operations.
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

impl From<serde_json::Error> for OrchestrationError {
    fn from(err: serde_json::Error) -> Self {
        OrchestrationError::Serialization(err.to_string())
    }
}
