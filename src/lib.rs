//! # Reelcraft
//!
//! Reasoning-driven orchestration for multi-step media pipelines.
//!
//! This crate bundles the workspace for applications that want a single
//! dependency: [`core`] holds capabilities, plans, contexts and progress
//! tracking, [`engine`] the execution strategies and the task runner.

pub use reelcraft_core as core;
pub use reelcraft_engine as engine;

pub use reelcraft_core::{
    CancellationToken, Capability, CapabilityMetadata, CapabilityRegistry, CapabilityResult,
    ExecutionPlan, FailureReason, OrchestrationContext, OrchestrationError, OrchestrationResult,
    ParameterSchema, ParameterSpec, Params, PlannedStep, ProgressRegistry, TaskStatus,
};
pub use reelcraft_engine::{
    ConversationEngine, ExecutionScope, ExecutionStrategy, PlanEngine, TaskOutcome, TaskRunner,
};
