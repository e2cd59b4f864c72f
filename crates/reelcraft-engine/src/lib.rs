//! # Reelcraft Engine
//!
//! Execution strategies for Reelcraft tasks and the pieces that run them.
//!
//! - [`PlanEngine`] asks a [`Planner`](reelcraft_core::Planner) for an
//!   up-front plan, walks it step by step and replans mid-flight.
//! - [`ConversationEngine`] lets a [`Reasoner`](reelcraft_core::Reasoner)
//!   request capability invocations turn by turn.
//! - [`TaskRunner`] spawns either strategy in the background and reports
//!   into the shared [`ProgressRegistry`](reelcraft_core::ProgressRegistry).
//! - [`OpenAiClient`] implements both reasoning contracts over an
//!   OpenAI-compatible endpoint.
//! - [`CommandCapability`] exposes an external program as a capability.

pub mod command;
pub mod config;
pub mod conversation;
pub mod openai;
pub mod plan_engine;
pub mod prompts;
pub mod runner;
pub mod strategy;

pub use command::CommandCapability;
pub use config::{
    ConfigError, DEFAULT_LLM_BASE_URL, DEFAULT_LLM_MODEL, EngineConfig, EngineConfigBuilder,
    LlmConfig, StrategyKind,
};
pub use conversation::{ConversationConfig, ConversationEngine, DEFAULT_MAX_ITERATIONS};
pub use openai::OpenAiClient;
pub use plan_engine::{DEFAULT_MAX_REPLANS, PlanEngine, PlanEngineConfig, SkipReason};
pub use runner::{TaskHandle, TaskReport, TaskRunner};
pub use strategy::{ExecutionScope, ExecutionStrategy, FinalOutput, OutcomeStatus, TaskOutcome};
