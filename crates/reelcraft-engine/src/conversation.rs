//! Conversation-loop execution.
//!
//! Instead of a plan, the reasoning engine is consulted once per iteration
//! with the full message history. Each turn either requests capability
//! invocations, whose results are fed back as tool messages, or requests
//! nothing, which ends the task. An iteration cap bounds the loop.

use async_trait::async_trait;
use reelcraft_core::{
    CapabilityRegistry, ChatMessage, CompletedCall, FailureReason, OrchestrationContext,
    OrchestrationError, OrchestrationResult, Reasoner, RequestedInvocation,
};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::prompts;
use crate::strategy::{ExecutionScope, ExecutionStrategy, FinalOutput, OutcomeStatus, TaskOutcome};

/// Default iteration cap.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Configuration for [`ConversationEngine`].
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    /// Maximum reasoning turns before the task is reported incomplete
    pub max_iterations: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

/// Executes tasks by letting the reasoning engine call capabilities turn by turn.
pub struct ConversationEngine {
    registry: Arc<CapabilityRegistry>,
    reasoner: Arc<dyn Reasoner>,
    config: ConversationConfig,
}

impl ConversationEngine {
    pub fn new(registry: Arc<CapabilityRegistry>, reasoner: Arc<dyn Reasoner>) -> Self {
        Self {
            registry,
            reasoner,
            config: ConversationConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ConversationConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Run one requested invocation and return the tool message content.
    ///
    /// A bad invocation fails only itself; the error text goes back to the
    /// reasoning engine. Only cancellation is returned as `Err`.
    async fn invoke(
        &self,
        invocation: &RequestedInvocation,
        ctx: &mut OrchestrationContext,
        scope: &ExecutionScope,
    ) -> OrchestrationResult<String> {
        if let Some(reason) = &invocation.argument_error {
            let err = OrchestrationError::InvalidArguments {
                capability: invocation.capability.clone(),
                reason: reason.clone(),
            };
            warn!(
                task_id = %ctx.task_id,
                call_id = %invocation.id,
                capability = %invocation.capability,
                error = %err,
                "Undecodable invocation arguments"
            );
            ctx.record(CompletedCall::rejected(
                &invocation.id,
                &invocation.capability,
                invocation.arguments.clone(),
                1,
                &err,
            ));
            return Ok(format!("Tool execution failed: {}", err));
        }

        let dispatch = match self
            .registry
            .dispatch(
                &invocation.capability,
                invocation.arguments.clone(),
                &scope.cancel,
            )
            .await
        {
            Ok(dispatch) => dispatch,
            Err(err) => {
                warn!(
                    task_id = %ctx.task_id,
                    call_id = %invocation.id,
                    capability = %invocation.capability,
                    error = %err,
                    "Invocation rejected"
                );
                ctx.record(CompletedCall::rejected(
                    &invocation.id,
                    &invocation.capability,
                    invocation.arguments.clone(),
                    1,
                    &err,
                ));
                return Ok(format!("Tool execution failed: {}", err));
            }
        };

        let call = CompletedCall::from_dispatch(&invocation.id, 1, dispatch);
        if !call.success {
            let cancelled = matches!(call.result.failure, Some(FailureReason::Cancelled { .. }));
            let error = call.error.clone().unwrap_or_default();
            ctx.record(call);
            if cancelled || scope.is_cancelled() {
                return Err(scope.cancelled_error(ctx));
            }
            return Ok(format!("Tool execution failed: {}", error));
        }

        let metadata = self.registry.resolve(&call.capability)?.metadata();
        if let Some(slot) = &metadata.slot {
            ctx.fill_slot(slot, &call);
        }
        if let Some(key) = &metadata.final_artifact
            && let Some(location) = call.result.resources.get(key)
        {
            info!(task_id = %ctx.task_id, artifact = %location, "Final artifact captured");
            ctx.set_final_artifact(location.clone());
        }
        info!(
            task_id = %ctx.task_id,
            call_id = %invocation.id,
            capability = %call.capability,
            duration_ms = call.duration_ms,
            "Invocation succeeded"
        );
        let content = Value::Object(call.result.data.clone()).to_string();
        ctx.record(call);
        Ok(content)
    }
}

#[async_trait]
impl ExecutionStrategy for ConversationEngine {
    fn name(&self) -> &'static str {
        "conversation"
    }

    async fn execute(
        &self,
        ctx: &mut OrchestrationContext,
        scope: &ExecutionScope,
    ) -> OrchestrationResult<TaskOutcome> {
        let catalog = self.registry.schema_catalog();
        let max_iterations = self.config.max_iterations;
        let mut messages = vec![
            ChatMessage::system(prompts::conversation_system(&catalog)),
            ChatMessage::user(prompts::conversation_user(&ctx.request)),
        ];
        let mut final_text = None;

        for iteration in 1..=max_iterations {
            if scope.is_cancelled() {
                return Err(scope.cancelled_error(ctx));
            }
            debug!(task_id = %ctx.task_id, iteration, "Consulting reasoning engine");

            let turn = tokio::select! {
                _ = scope.cancel.cancelled() => return Err(scope.cancelled_error(ctx)),
                turn = self.reasoner.converse(&messages, &catalog) => turn?,
            };
            messages.push(ChatMessage::assistant(
                turn.text.clone(),
                turn.invocations.clone(),
            ));

            if turn.invocations.is_empty() {
                info!(task_id = %ctx.task_id, iteration, "Reasoning engine signalled completion");
                final_text = Some(turn.text);
                break;
            }

            for invocation in &turn.invocations {
                let content = self.invoke(invocation, ctx, scope).await?;
                messages.push(ChatMessage::tool(
                    invocation.id.clone(),
                    invocation.capability.clone(),
                    content,
                ));
            }

            let percent = (iteration * 100 / max_iterations).min(99) as u8;
            scope
                .report(percent, format!("Iteration {} of {}", iteration, max_iterations))
                .await;
        }

        let (status, message) = match final_text {
            Some(text) if !text.trim().is_empty() => (OutcomeStatus::Completed, text),
            Some(_) => (OutcomeStatus::Completed, "Task completed".to_string()),
            None => {
                let exhausted = OrchestrationError::PlanExhausted {
                    iterations: max_iterations,
                };
                warn!(
                    task_id = %ctx.task_id,
                    max_iterations,
                    error_code = exhausted.error_code(),
                    "Iteration cap reached before the reasoning engine finished"
                );
                (OutcomeStatus::Incomplete, exhausted.to_string())
            }
        };

        Ok(TaskOutcome {
            status,
            output: FinalOutput::assemble(ctx),
            message,
            plans: Vec::new(),
            transcript: messages,
        })
    }
}
