//! Deterministic stand-ins for the reasoning engine, used with `--offline`
//! or when no API key is configured.

use async_trait::async_trait;
use reelcraft_core::{
    CapabilityDescriptor, ChatMessage, ExecutionPlan, OrchestrationContext, OrchestrationResult,
    Params, PlannedStep, Planner, Reasoner, ReasonerTurn, ReplanRequest, RequestedInvocation,
    Role,
};
use serde_json::{Value, json};
use tracing::debug;

/// The fixed production sequence, with arguments derived from the request.
fn pipeline(request: &str) -> Vec<(&'static str, &'static str, Value)> {
    vec![
        ("analyze", "analyze_content", json!({"user_text": request})),
        (
            "script",
            "generate_script",
            json!({"content_type": "educational", "target_audience": "general"}),
        ),
        ("images", "generate_images", json!({"prompts": [request]})),
        ("voice", "generate_voice", json!({"text": request})),
        ("quality", "check_quality", json!({"content_type": "video"})),
        (
            "render",
            "render_video",
            json!({"script": {"title": request}, "output_format": "mp4"}),
        ),
    ]
}

fn into_params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}

#[derive(Debug, Default)]
pub struct OfflinePlanner;

#[async_trait]
impl Planner for OfflinePlanner {
    async fn plan(
        &self,
        ctx: &OrchestrationContext,
        _catalog: &[CapabilityDescriptor],
    ) -> OrchestrationResult<ExecutionPlan> {
        let mut previous: Option<&str> = None;
        let mut steps = Vec::new();
        for (id, capability, params) in pipeline(&ctx.request) {
            let mut step = PlannedStep::new(id, capability).with_params(into_params(params));
            if let Some(previous) = previous {
                step = step.depends_on(previous);
            }
            match id {
                "voice" => step = step.optional().with_retry(1),
                "quality" => step = step.with_condition("resources.script != null"),
                _ => {}
            }
            // Narration is optional, so later steps hang off the images.
            if id != "voice" {
                previous = Some(id);
            }
            steps.push(step);
        }

        let mut plan = ExecutionPlan::new(steps).with_strategy("offline pipeline");
        plan.analysis = format!("Offline plan for \"{}\"", ctx.request);
        Ok(plan)
    }

    async fn replan(
        &self,
        _ctx: &OrchestrationContext,
        request: &ReplanRequest,
        _catalog: &[CapabilityDescriptor],
    ) -> OrchestrationResult<ExecutionPlan> {
        debug!(step_id = %request.step.id, reason = %request.reason, "Offline planner has no rework steps");
        Ok(ExecutionPlan::default())
    }
}

/// Walks the production sequence one invocation per turn.
#[derive(Debug)]
pub struct OfflineReasoner {
    request: String,
}

impl OfflineReasoner {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
        }
    }
}

#[async_trait]
impl Reasoner for OfflineReasoner {
    async fn converse(
        &self,
        messages: &[ChatMessage],
        _catalog: &[CapabilityDescriptor],
    ) -> OrchestrationResult<ReasonerTurn> {
        let done = messages
            .iter()
            .filter(|message| message.role == Role::Tool)
            .count();

        match pipeline(&self.request).into_iter().nth(done) {
            Some((_, capability, arguments)) => Ok(ReasonerTurn::default().invoke(
                RequestedInvocation::new(
                    format!("call_{}", done + 1),
                    capability,
                    into_params(arguments),
                ),
            )),
            None => Ok(ReasonerTurn::done(format!(
                "Finished producing \"{}\"",
                self.request
            ))),
        }
    }
}
