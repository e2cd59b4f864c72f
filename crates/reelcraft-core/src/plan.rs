//! # Execution Plans
//!
//! A plan is the reasoning engine's answer to "how should this request be
//! produced": an ordered list of steps, each naming a capability, its
//! arguments, an optional condition and the steps it depends on.
//!
//! Plans cross the reasoning boundary as JSON (camelCase `dependsOn`). Once
//! accepted they are enumerated into a [`StepQueue`], which only ever grows
//! at its tail when a replanning round adds work.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::warn;

use crate::error::{OrchestrationError, OrchestrationResult};
use crate::schema::Params;

/// One declared step of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStep {
    pub id: String,
    pub capability: String,
    /// Free-text description of what the step is for
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub params: Params,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub optional: bool,
    /// Extra attempts allowed after the first failure
    #[serde(default)]
    pub retry: u32,
}

impl PlannedStep {
    pub fn new(id: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
            action: String::new(),
            params: Params::new(),
            condition: None,
            depends_on: Vec::new(),
            optional: false,
            retry: 0,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    /// Total number of attempts the step may make.
    pub fn max_attempts(&self) -> u32 {
        self.retry.saturating_add(1)
    }
}

/// A full planning round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    #[serde(default)]
    pub analysis: String,
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub steps: Vec<PlannedStep>,
    #[serde(default)]
    pub reasoning: String,
}

impl ExecutionPlan {
    pub fn new(steps: Vec<PlannedStep>) -> Self {
        Self {
            steps,
            ..Default::default()
        }
    }

    pub fn with_strategy(mut self, strategy: impl Into<String>) -> Self {
        self.strategy = strategy.into();
        self
    }

    /// Parse a plan produced by the reasoning engine.
    ///
    /// Accepts bare JSON as well as JSON wrapped in a markdown code fence.
    pub fn from_json(raw: &str) -> OrchestrationResult<Self> {
        serde_json::from_str(strip_code_fence(raw)).map_err(|err| {
            OrchestrationError::ReasoningEngine(format!("malformed plan: {}", err))
        })
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening fence line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// A planned step that could not be queued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedStep {
    pub step_id: String,
    pub reason: String,
}

/// The enumerated, append-only queue of steps for one task.
///
/// Step ids are unique and every dependency names a step that is already in
/// the queue, so the dependency graph is acyclic by construction.
#[derive(Debug, Clone, Default)]
pub struct StepQueue {
    steps: Vec<PlannedStep>,
    ids: HashSet<String>,
}

impl StepQueue {
    /// Enumerate an initial plan.
    ///
    /// An empty or duplicate step id rejects the whole plan. A step whose
    /// dependencies are not earlier steps is dropped and returned, along
    /// with anything that depends on it.
    pub fn from_plan(plan: &ExecutionPlan) -> OrchestrationResult<(Self, Vec<RejectedStep>)> {
        let mut queue = Self::default();
        let mut seen = HashSet::new();
        let mut rejected = Vec::new();
        for step in &plan.steps {
            check_id(step).map_err(OrchestrationError::InvalidPlan)?;
            if !seen.insert(step.id.as_str()) {
                return Err(OrchestrationError::InvalidPlan(format!(
                    "duplicate step id '{}'",
                    step.id
                )));
            }
            match queue.check_dependencies(step) {
                Ok(()) => queue.push(step.clone()),
                Err(reason) => {
                    warn!(step_id = %step.id, reason = %reason, "Dropping planned step");
                    rejected.push(RejectedStep {
                        step_id: step.id.clone(),
                        reason,
                    });
                }
            }
        }
        Ok((queue, rejected))
    }

    /// Append a replanning round to the tail of the queue.
    ///
    /// Offending steps are dropped one by one and returned; the rest are
    /// queued in order.
    pub fn append(&mut self, steps: Vec<PlannedStep>) -> Vec<RejectedStep> {
        let mut rejected = Vec::new();
        for step in steps {
            match self.check(&step) {
                Ok(()) => self.push(step),
                Err(reason) => {
                    warn!(step_id = %step.id, reason = %reason, "Dropping replanned step");
                    rejected.push(RejectedStep {
                        step_id: step.id,
                        reason,
                    });
                }
            }
        }
        rejected
    }

    fn check(&self, step: &PlannedStep) -> Result<(), String> {
        check_id(step)?;
        if self.ids.contains(&step.id) {
            return Err(format!("duplicate step id '{}'", step.id));
        }
        self.check_dependencies(step)
    }

    fn check_dependencies(&self, step: &PlannedStep) -> Result<(), String> {
        if let Some(dep) = step.depends_on.iter().find(|dep| !self.ids.contains(*dep)) {
            return Err(format!(
                "step '{}' depends on '{}', which is not an earlier step",
                step.id, dep
            ));
        }
        Ok(())
    }

    fn push(&mut self, step: PlannedStep) {
        self.ids.insert(step.id.clone());
        self.steps.push(step);
    }

    pub fn get(&self, index: usize) -> Option<&PlannedStep> {
        self.steps.get(index)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.ids.contains(step_id)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedStep> {
        self.steps.iter()
    }
}

fn check_id(step: &PlannedStep) -> Result<(), String> {
    if step.id.trim().is_empty() {
        return Err("step id must not be empty".to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_format() {
        let plan = ExecutionPlan::from_json(
            r#"{
                "analysis": "short explainer",
                "strategy": "script first",
                "steps": [
                    {"id": "s1", "capability": "generate_script", "action": "write", "params": {"content_type": "educational"}},
                    {"id": "s2", "capability": "generate_voice", "dependsOn": ["s1"], "optional": true, "retry": 2}
                ],
                "reasoning": "voice needs the script"
            }"#,
        )
        .unwrap();
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[1].depends_on, vec!["s1".to_string()]);
        assert!(plan.steps[1].optional);
        assert_eq!(plan.steps[1].max_attempts(), 3);
        assert!(!plan.steps[0].optional);
    }

    #[test]
    fn parses_fenced_json() {
        let raw = "```json\n{\"strategy\": \"fast\", \"steps\": []}\n```";
        let plan = ExecutionPlan::from_json(raw).unwrap();
        assert_eq!(plan.strategy, "fast");
    }

    #[test]
    fn malformed_plan_is_reasoning_error() {
        let err = ExecutionPlan::from_json("I think you should render a video").unwrap_err();
        assert_eq!(err.error_code(), "REASONING_ENGINE_ERROR");
    }

    #[test]
    fn serializes_camel_case() {
        let step = PlannedStep::new("s2", "render_video").depends_on("s1");
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["dependsOn"][0], "s1");
    }

    #[test]
    fn queue_rejects_duplicates() {
        let plan = ExecutionPlan::new(vec![
            PlannedStep::new("a", "x"),
            PlannedStep::new("a", "y"),
        ]);
        let err = StepQueue::from_plan(&plan).unwrap_err();
        assert!(matches!(err, OrchestrationError::InvalidPlan(_)));
    }

    #[test]
    fn queue_rejects_empty_ids() {
        let plan = ExecutionPlan::new(vec![PlannedStep::new("  ", "x")]);
        assert!(matches!(
            StepQueue::from_plan(&plan),
            Err(OrchestrationError::InvalidPlan(_))
        ));
    }

    #[test]
    fn queue_drops_forward_and_unknown_references() {
        let plan = ExecutionPlan::new(vec![
            PlannedStep::new("a", "x").depends_on("b"),
            PlannedStep::new("b", "y"),
            PlannedStep::new("c", "z").depends_on("ghost"),
            PlannedStep::new("d", "w").depends_on("c"),
            PlannedStep::new("e", "v").depends_on("b"),
        ]);
        let (queue, rejected) = StepQueue::from_plan(&plan).unwrap();

        let ids: Vec<&str> = queue.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "e"]);
        let dropped: Vec<&str> = rejected.iter().map(|r| r.step_id.as_str()).collect();
        assert_eq!(dropped, vec!["a", "c", "d"]);
        assert!(rejected[1].reason.contains("ghost"));
    }

    #[test]
    fn append_drops_offending_steps_only() {
        let plan = ExecutionPlan::new(vec![PlannedStep::new("a", "x")]);
        let (mut queue, _) = StepQueue::from_plan(&plan).unwrap();

        let rejected = queue.append(vec![
            PlannedStep::new("b", "y").depends_on("a"),
            PlannedStep::new("a", "dup"),
            PlannedStep::new("c", "z").depends_on("ghost"),
            PlannedStep::new("d", "w").depends_on("b"),
        ]);

        let ids: Vec<&str> = queue.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "d"]);
        let dropped: Vec<&str> = rejected.iter().map(|r| r.step_id.as_str()).collect();
        assert_eq!(dropped, vec!["a", "c"]);
    }
}
