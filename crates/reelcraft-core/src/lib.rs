//! # Reelcraft Core
//!
//! Core traits and types for the Reelcraft orchestration engine.
//! This crate provides the building blocks both execution strategies share:
//! capabilities and their registry, the plan model, the per-task context
//! and the progress registry.

pub mod capability;
pub mod condition;
pub mod context;
pub mod error;
pub mod observer;
pub mod plan;
pub mod reasoning;
pub mod registry;
pub mod schema;

pub use capability::{
    Capability, CapabilityDescriptor, CapabilityMetadata, CapabilityResult,
    DEFAULT_REPLAN_THRESHOLD, FailureReason, ReplanTrigger,
};
pub use condition::{Condition, ConditionError};
pub use context::{CompletedCall, OrchestrationContext, ResourceMap};
pub use error::{OrchestrationError, OrchestrationResult};
pub use observer::{ProgressHandle, ProgressRegistry, TaskProgress, TaskStatus};
pub use plan::{ExecutionPlan, PlannedStep, RejectedStep, StepQueue};
pub use reasoning::{
    ChatMessage, Planner, ReasonerTurn, Reasoner, ReplanReason, ReplanRequest, RequestedInvocation,
    Role,
};
pub use registry::{CapabilityRegistry, DEFAULT_CAPABILITY_TIMEOUT, Dispatch};
pub use schema::{ParamType, ParameterSchema, ParameterSpec, Params, SchemaViolation};

// Re-exported so capability authors and engines share one token type.
pub use tokio_util::sync::CancellationToken;
