//! Plan-based execution.
//!
//! The planner produces a whole plan up front. The engine walks the step
//! queue once, front to back. Each step moves through
//!
//! ```text
//! Pending -> ConditionCheck -> {Skipped | Eligible}
//!         -> DependencyCheck -> {Waiting | Ready}
//!         -> Executing -> {Succeeded | Failed}
//! ```
//!
//! A step whose dependencies have not succeeded is dropped for this pass;
//! it is never re-queued. When a successful result asks for more work the
//! planner is consulted again and the new steps are appended to the tail
//! of the queue, so they run after everything already enumerated.

use async_trait::async_trait;
use reelcraft_core::{
    CapabilityDescriptor, CapabilityRegistry, CompletedCall, Condition, ExecutionPlan,
    FailureReason, OrchestrationContext, OrchestrationError, OrchestrationResult, PlannedStep,
    Planner, ReplanReason, ReplanRequest, StepQueue,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::strategy::{ExecutionScope, ExecutionStrategy, FinalOutput, OutcomeStatus, TaskOutcome};

/// Default cap on replanning rounds per task.
pub const DEFAULT_MAX_REPLANS: usize = 5;

/// Why a step did not execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The step's condition evaluated to false
    ConditionFalse,
    /// The condition could not be parsed; treated as false
    ConditionInvalid(String),
    /// Listed dependencies have no successful history entry
    DependencyUnmet(Vec<String>),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ConditionFalse => write!(f, "condition not met"),
            SkipReason::ConditionInvalid(err) => write!(f, "invalid condition: {}", err),
            SkipReason::DependencyUnmet(deps) => {
                write!(f, "dependencies not satisfied: {}", deps.join(", "))
            }
        }
    }
}

/// Configuration for [`PlanEngine`].
#[derive(Debug, Clone)]
pub struct PlanEngineConfig {
    /// Maximum replanning rounds per task
    pub max_replans: usize,
}

impl Default for PlanEngineConfig {
    fn default() -> Self {
        Self {
            max_replans: DEFAULT_MAX_REPLANS,
        }
    }
}

/// Outcome of running one step, including its retries.
enum StepRun {
    Succeeded(CompletedCall),
    Failed { error: OrchestrationError },
}

// ============================================================================
// PlanEngine
// ============================================================================

/// Executes tasks by walking a planner-produced step queue.
pub struct PlanEngine {
    registry: Arc<CapabilityRegistry>,
    planner: Arc<dyn Planner>,
    config: PlanEngineConfig,
}

impl PlanEngine {
    pub fn new(registry: Arc<CapabilityRegistry>, planner: Arc<dyn Planner>) -> Self {
        Self {
            registry,
            planner,
            config: PlanEngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PlanEngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_max_replans(mut self, max_replans: usize) -> Self {
        self.config.max_replans = max_replans;
        self
    }

    /// Decide whether a step is eligible to run now.
    fn skip_reason(&self, step: &PlannedStep, ctx: &OrchestrationContext) -> Option<SkipReason> {
        if let Some(source) = step.condition.as_deref().filter(|c| !c.trim().is_empty()) {
            match Condition::parse(source) {
                Ok(condition) if !condition.evaluate(ctx) => {
                    return Some(SkipReason::ConditionFalse);
                }
                Ok(_) => {}
                Err(err) => {
                    error!(
                        task_id = %ctx.task_id,
                        step_id = %step.id,
                        condition = %source,
                        error = %err,
                        "Unparsable step condition, skipping step"
                    );
                    return Some(SkipReason::ConditionInvalid(err.to_string()));
                }
            }
        }

        let unmet: Vec<String> = step
            .depends_on
            .iter()
            .filter(|dep| !ctx.succeeded(dep))
            .cloned()
            .collect();
        if unmet.is_empty() {
            None
        } else {
            Some(SkipReason::DependencyUnmet(unmet))
        }
    }

    /// Dispatch a step, retrying execution failures within its budget.
    ///
    /// Every attempt is appended to the history. Only cancellation is
    /// returned as `Err`.
    async fn run_step(
        &self,
        step: &PlannedStep,
        ctx: &mut OrchestrationContext,
        scope: &ExecutionScope,
    ) -> OrchestrationResult<StepRun> {
        let max_attempts = step.max_attempts();
        let mut failure = None;

        for attempt in 1..=max_attempts {
            debug!(
                task_id = %ctx.task_id,
                step_id = %step.id,
                capability = %step.capability,
                attempt,
                "Dispatching step"
            );

            let dispatch = match self
                .registry
                .dispatch(&step.capability, step.params.clone(), &scope.cancel)
                .await
            {
                Ok(dispatch) => dispatch,
                Err(err) => {
                    // Unknown capabilities and rejected arguments won't improve on retry.
                    ctx.record(CompletedCall::rejected(
                        &step.id,
                        &step.capability,
                        step.params.clone(),
                        attempt,
                        &err,
                    ));
                    return Ok(StepRun::Failed { error: err });
                }
            };

            let call = CompletedCall::from_dispatch(&step.id, attempt, dispatch);
            if call.success {
                ctx.absorb(&call);
                ctx.record(call.clone());
                info!(
                    task_id = %ctx.task_id,
                    step_id = %step.id,
                    capability = %step.capability,
                    attempt,
                    duration_ms = call.duration_ms,
                    "Step succeeded"
                );
                return Ok(StepRun::Succeeded(call));
            }

            let was_cancelled = matches!(call.result.failure, Some(FailureReason::Cancelled { .. }));
            let message = call.error.clone().unwrap_or_default();
            failure = call.failure();
            ctx.record(call);

            if was_cancelled || scope.is_cancelled() {
                return Err(scope.cancelled_error(ctx));
            }
            if attempt < max_attempts {
                warn!(
                    task_id = %ctx.task_id,
                    step_id = %step.id,
                    capability = %step.capability,
                    attempt,
                    error = %message,
                    "Step attempt failed, retrying"
                );
            }
        }

        Ok(StepRun::Failed {
            error: failure.unwrap_or_else(|| OrchestrationError::CapabilityExecution {
                capability: step.capability.clone(),
                message: "no attempts were made".to_string(),
            }),
        })
    }

    /// Work out whether a successful step asks for replanning.
    fn replan_reason(&self, call: &CompletedCall) -> Option<ReplanReason> {
        if !call.result.suggested_next.is_empty() {
            return Some(ReplanReason::Suggested {
                capabilities: call.result.suggested_next.clone(),
            });
        }
        let trigger = self
            .registry
            .resolve(&call.capability)
            .ok()?
            .metadata()
            .replan_trigger?;
        trigger
            .evaluate(&call.result)
            .map(|score| ReplanReason::BelowThreshold {
                field: trigger.field.clone(),
                score,
                threshold: trigger.threshold,
            })
    }

    fn capture_final_artifact(&self, ctx: &mut OrchestrationContext, call: &CompletedCall) {
        let Ok(capability) = self.registry.resolve(&call.capability) else {
            return;
        };
        if let Some(key) = capability.metadata().final_artifact
            && let Some(location) = call.result.resources.get(&key)
        {
            info!(task_id = %ctx.task_id, artifact = %location, "Final artifact captured");
            ctx.set_final_artifact(location.clone());
        }
    }

    async fn request_replan(
        &self,
        ctx: &OrchestrationContext,
        scope: &ExecutionScope,
        request: &ReplanRequest,
        catalog: &[CapabilityDescriptor],
    ) -> OrchestrationResult<ExecutionPlan> {
        tokio::select! {
            _ = scope.cancel.cancelled() => Err(scope.cancelled_error(ctx)),
            plan = self.planner.replan(ctx, request, catalog) => plan,
        }
    }
}

#[async_trait]
impl ExecutionStrategy for PlanEngine {
    fn name(&self) -> &'static str {
        "plan"
    }

    async fn execute(
        &self,
        ctx: &mut OrchestrationContext,
        scope: &ExecutionScope,
    ) -> OrchestrationResult<TaskOutcome> {
        let catalog = self.registry.schema_catalog();

        info!(task_id = %ctx.task_id, "Generating execution plan");
        let plan = tokio::select! {
            _ = scope.cancel.cancelled() => return Err(scope.cancelled_error(ctx)),
            plan = self.planner.plan(ctx, &catalog) => plan?,
        };
        let (mut queue, dropped) = StepQueue::from_plan(&plan)?;
        for rejected in &dropped {
            info!(
                task_id = %ctx.task_id,
                step_id = %rejected.step_id,
                reason = %rejected.reason,
                "Skipping step with unsatisfiable dependencies"
            );
        }
        info!(
            task_id = %ctx.task_id,
            strategy = %plan.strategy,
            steps = queue.len(),
            dropped = dropped.len(),
            "Execution plan accepted"
        );
        let mut plans = vec![plan];
        let mut replans = 0usize;
        let mut executed = 0usize;
        let mut index = 0usize;

        while let Some(step) = queue.get(index).cloned() {
            index += 1;
            if scope.is_cancelled() {
                return Err(scope.cancelled_error(ctx));
            }

            if let Some(reason) = self.skip_reason(&step, ctx) {
                info!(
                    task_id = %ctx.task_id,
                    step_id = %step.id,
                    reason = %reason,
                    "Skipping step"
                );
                scope
                    .report(percent(index, queue.len()), format!("Skipped step {}", step.id))
                    .await;
                continue;
            }

            let call = match self.run_step(&step, ctx, scope).await? {
                StepRun::Succeeded(call) => call,
                StepRun::Failed { error } if step.optional => {
                    warn!(
                        task_id = %ctx.task_id,
                        step_id = %step.id,
                        capability = %step.capability,
                        error_code = error.error_code(),
                        error = %error,
                        "Optional step failed, continuing"
                    );
                    scope
                        .report(percent(index, queue.len()), format!("Optional step {} failed", step.id))
                        .await;
                    continue;
                }
                StepRun::Failed { error } => {
                    error!(
                        task_id = %ctx.task_id,
                        step_id = %step.id,
                        capability = %step.capability,
                        error_code = error.error_code(),
                        error = %error,
                        "Required step failed, aborting plan"
                    );
                    return Err(OrchestrationError::StepFailed {
                        step_id: step.id.clone(),
                        capability: step.capability.clone(),
                        cause: error.to_string(),
                    });
                }
            };
            executed += 1;
            self.capture_final_artifact(ctx, &call);

            if let Some(reason) = self.replan_reason(&call) {
                if replans >= self.config.max_replans {
                    warn!(
                        task_id = %ctx.task_id,
                        step_id = %step.id,
                        max_replans = self.config.max_replans,
                        "Replanning cap reached, ignoring request"
                    );
                } else {
                    replans += 1;
                    info!(
                        task_id = %ctx.task_id,
                        step_id = %step.id,
                        reason = %reason,
                        round = replans,
                        "Replanning"
                    );
                    let request = ReplanRequest {
                        step: step.clone(),
                        result: call.result.clone(),
                        reason,
                    };
                    match self.request_replan(ctx, scope, &request, &catalog).await {
                        Ok(new_plan) => {
                            let offered = new_plan.steps.len();
                            let rejected = queue.append(new_plan.steps.clone());
                            info!(
                                task_id = %ctx.task_id,
                                appended = offered - rejected.len(),
                                rejected = rejected.len(),
                                "Replanned steps appended"
                            );
                            plans.push(new_plan);
                        }
                        Err(OrchestrationError::Cancelled(task)) => {
                            return Err(OrchestrationError::Cancelled(task));
                        }
                        Err(err) => {
                            warn!(
                                task_id = %ctx.task_id,
                                error = %err,
                                "Replanning failed, continuing with current plan"
                            );
                        }
                    }
                }
            }

            scope
                .report(percent(index, queue.len()), format!("Completed step {}", step.id))
                .await;
        }

        info!(
            task_id = %ctx.task_id,
            executed,
            enumerated = queue.len(),
            "Plan execution finished"
        );
        Ok(TaskOutcome {
            status: OutcomeStatus::Completed,
            output: FinalOutput::assemble(ctx),
            message: format!("Executed {} of {} planned steps", executed, queue.len()),
            plans,
            transcript: Vec::new(),
        })
    }
}

/// Progress through the queue, held below 100 until the runner finishes.
fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done * 100 / total).min(99)) as u8
}
