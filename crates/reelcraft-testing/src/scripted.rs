//! Scripted stand-ins for the reasoning engine.

use async_trait::async_trait;
use reelcraft_core::{
    CapabilityDescriptor, ChatMessage, ExecutionPlan, OrchestrationContext, OrchestrationError,
    OrchestrationResult, Params, PlannedStep, Planner, Reasoner, ReasonerTurn, ReplanReason,
    ReplanRequest, RequestedInvocation,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::mock_capabilities::CallCounter;

/// Build a requested invocation from a JSON object literal.
pub fn invocation(id: &str, capability: &str, arguments: Value) -> RequestedInvocation {
    let arguments = match arguments {
        Value::Object(map) => map,
        _ => Params::new(),
    };
    RequestedInvocation::new(id, capability, arguments)
}

/// Build a plan from steps.
pub fn plan(steps: Vec<PlannedStep>) -> ExecutionPlan {
    ExecutionPlan::new(steps).with_strategy("scripted")
}

#[derive(Debug)]
enum ReplanMode {
    /// Pop prepared plans; empty plan once exhausted
    Scripted,
    /// One fresh step invoking this capability per round
    FreshIds(String),
    Fail,
}

/// A planner that returns prepared plans.
#[derive(Debug)]
pub struct ScriptedPlanner {
    initial: Option<ExecutionPlan>,
    replans: Mutex<VecDeque<ExecutionPlan>>,
    mode: ReplanMode,
    plan_calls: CallCounter,
    replan_calls: CallCounter,
    reasons: Mutex<Vec<ReplanReason>>,
}

impl ScriptedPlanner {
    pub fn new(initial: ExecutionPlan) -> Self {
        Self {
            initial: Some(initial),
            replans: Mutex::new(VecDeque::new()),
            mode: ReplanMode::Scripted,
            plan_calls: CallCounter::default(),
            replan_calls: CallCounter::default(),
            reasons: Mutex::new(Vec::new()),
        }
    }

    /// A planner whose initial planning round fails.
    pub fn unreachable() -> Self {
        let mut planner = Self::new(ExecutionPlan::default());
        planner.initial = None;
        planner
    }

    /// Queue a plan for the next replanning round.
    pub fn then_replan(self, plan: ExecutionPlan) -> Self {
        if let Ok(mut replans) = self.replans.lock() {
            replans.push_back(plan);
        }
        self
    }

    /// Answer every replanning round with one new step for `capability`.
    pub fn replan_with_fresh_ids(mut self, capability: impl Into<String>) -> Self {
        self.mode = ReplanMode::FreshIds(capability.into());
        self
    }

    /// Fail every replanning round.
    pub fn failing_replans(mut self) -> Self {
        self.mode = ReplanMode::Fail;
        self
    }

    pub fn plan_counter(&self) -> CallCounter {
        self.plan_calls.clone()
    }

    pub fn replan_counter(&self) -> CallCounter {
        self.replan_calls.clone()
    }

    /// Reasons passed to each replanning round.
    pub fn replan_reasons(&self) -> Vec<ReplanReason> {
        self.reasons
            .lock()
            .map(|reasons| reasons.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(
        &self,
        _ctx: &OrchestrationContext,
        _catalog: &[CapabilityDescriptor],
    ) -> OrchestrationResult<ExecutionPlan> {
        self.plan_calls.bump();
        self.initial.clone().ok_or_else(|| {
            OrchestrationError::ReasoningEngine("scripted planner unreachable".to_string())
        })
    }

    async fn replan(
        &self,
        _ctx: &OrchestrationContext,
        request: &ReplanRequest,
        _catalog: &[CapabilityDescriptor],
    ) -> OrchestrationResult<ExecutionPlan> {
        let round = self.replan_calls.bump();
        if let Ok(mut reasons) = self.reasons.lock() {
            reasons.push(request.reason.clone());
        }
        match &self.mode {
            ReplanMode::Scripted => Ok(self
                .replans
                .lock()
                .ok()
                .and_then(|mut replans| replans.pop_front())
                .unwrap_or_default()),
            ReplanMode::FreshIds(capability) => Ok(plan(vec![PlannedStep::new(
                format!("replan_{}", round),
                capability.clone(),
            )])),
            ReplanMode::Fail => Err(OrchestrationError::ReasoningEngine(
                "scripted replanning failure".to_string(),
            )),
        }
    }
}

/// A reasoner that plays back prepared turns.
#[derive(Debug)]
pub struct ScriptedReasoner {
    turns: Mutex<VecDeque<ReasonerTurn>>,
    repeat: Option<RequestedInvocation>,
    turn_calls: CallCounter,
    transcripts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedReasoner {
    /// Play `turns` in order; conversing past the end is an error.
    pub fn new(turns: Vec<ReasonerTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            repeat: None,
            turn_calls: CallCounter::default(),
            transcripts: Mutex::new(Vec::new()),
        }
    }

    /// Request the same invocation on every turn, forever.
    pub fn repeating(invocation: RequestedInvocation) -> Self {
        let mut reasoner = Self::new(Vec::new());
        reasoner.repeat = Some(invocation);
        reasoner
    }

    pub fn turn_counter(&self) -> CallCounter {
        self.turn_calls.clone()
    }

    /// Message histories received, one per turn.
    pub fn transcripts(&self) -> Vec<Vec<ChatMessage>> {
        self.transcripts
            .lock()
            .map(|transcripts| transcripts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn converse(
        &self,
        messages: &[ChatMessage],
        _catalog: &[CapabilityDescriptor],
    ) -> OrchestrationResult<ReasonerTurn> {
        let turn = self.turn_calls.bump();
        if let Ok(mut transcripts) = self.transcripts.lock() {
            transcripts.push(messages.to_vec());
        }
        if let Some(template) = &self.repeat {
            let mut invocation = template.clone();
            invocation.id = format!("{}_{}", template.id, turn);
            return Ok(ReasonerTurn::default().invoke(invocation));
        }
        self.turns
            .lock()
            .ok()
            .and_then(|mut turns| turns.pop_front())
            .ok_or_else(|| OrchestrationError::ReasoningEngine("script exhausted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn repeating_reasoner_numbers_call_ids() {
        let reasoner = ScriptedReasoner::repeating(invocation("noop", "analyze_content", json!({})));
        let first = reasoner.converse(&[], &[]).await.unwrap();
        let second = reasoner.converse(&[], &[]).await.unwrap();
        assert_eq!(first.invocations[0].id, "noop_1");
        assert_eq!(second.invocations[0].id, "noop_2");
    }

    #[tokio::test]
    async fn scripted_planner_pops_replans_in_order() {
        let planner = ScriptedPlanner::new(plan(vec![]))
            .then_replan(plan(vec![PlannedStep::new("fix", "generate_images")]));
        let ctx = OrchestrationContext::new("task-1", "video");
        let request = ReplanRequest {
            step: PlannedStep::new("qc", "check_quality"),
            result: reelcraft_core::CapabilityResult::success("checked"),
            reason: ReplanReason::Suggested {
                capabilities: vec!["generate_images".to_string()],
            },
        };
        let first = planner.replan(&ctx, &request, &[]).await.unwrap();
        let second = planner.replan(&ctx, &request, &[]).await.unwrap();
        assert_eq!(first.steps[0].id, "fix");
        assert!(second.steps.is_empty());
        assert_eq!(planner.replan_reasons().len(), 2);
    }
}
