//! Contracts between the engines and the external reasoning engine.
//!
//! The plan-based engine talks to a [`Planner`], which answers with whole
//! [`ExecutionPlan`]s. The conversation loop talks to a [`Reasoner`], which
//! answers each turn with text and zero or more requested invocations.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capability::{CapabilityDescriptor, CapabilityResult};
use crate::context::OrchestrationContext;
use crate::error::OrchestrationResult;
use crate::plan::{ExecutionPlan, PlannedStep};
use crate::schema::Params;

/// Why the plan engine is asking for more steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplanReason {
    /// The step's result named capabilities to run next
    Suggested { capabilities: Vec<String> },
    /// A declared replan trigger fired
    BelowThreshold {
        field: String,
        score: f64,
        threshold: f64,
    },
}

impl std::fmt::Display for ReplanReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplanReason::Suggested { capabilities } => {
                write!(f, "result suggested next steps: {}", capabilities.join(", "))
            }
            ReplanReason::BelowThreshold {
                field,
                score,
                threshold,
            } => write!(f, "{} {:.2} is below threshold {:.2}", field, score, threshold),
        }
    }
}

/// Input to a replanning round.
#[derive(Debug, Clone)]
pub struct ReplanRequest {
    /// Step whose result prompted the round
    pub step: PlannedStep,
    pub result: CapabilityResult,
    pub reason: ReplanReason,
}

/// Produces plans for the plan-based engine.
#[async_trait]
pub trait Planner: Send + Sync {
    /// Produce the initial plan for a task.
    async fn plan(
        &self,
        ctx: &OrchestrationContext,
        catalog: &[CapabilityDescriptor],
    ) -> OrchestrationResult<ExecutionPlan>;

    /// Produce additional steps after a result asked for them.
    async fn replan(
        &self,
        ctx: &OrchestrationContext,
        request: &ReplanRequest,
        catalog: &[CapabilityDescriptor],
    ) -> OrchestrationResult<ExecutionPlan>;
}

/// Role of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A capability call requested by the reasoning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestedInvocation {
    /// Call id echoed back on the tool message
    pub id: String,
    pub capability: String,
    #[serde(default)]
    pub arguments: Params,
    /// Set when the engine's argument payload could not be decoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument_error: Option<String>,
}

impl RequestedInvocation {
    pub fn new(id: impl Into<String>, capability: impl Into<String>, arguments: Params) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
            arguments,
            argument_error: None,
        }
    }

    /// An invocation whose raw arguments were not a JSON object.
    pub fn malformed(
        id: impl Into<String>,
        capability: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            capability: capability.into(),
            arguments: Params::new(),
            argument_error: Some(error.into()),
        }
    }
}

/// One entry of the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invocations: Vec<RequestedInvocation>,
    /// Invocation id a tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Capability name a tool message answers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            invocations: Vec::new(),
            call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, invocations: Vec<RequestedInvocation>) -> Self {
        Self {
            invocations,
            ..Self::plain(Role::Assistant, content)
        }
    }

    pub fn tool(
        call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            call_id: Some(call_id.into()),
            name: Some(name.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// One answer from the reasoning engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasonerTurn {
    pub text: String,
    #[serde(default)]
    pub invocations: Vec<RequestedInvocation>,
}

impl ReasonerTurn {
    /// A final turn with no further invocations.
    pub fn done(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            invocations: Vec::new(),
        }
    }

    pub fn invoke(mut self, invocation: RequestedInvocation) -> Self {
        self.invocations.push(invocation);
        self
    }
}

/// Drives the conversation-loop engine one turn at a time.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn converse(
        &self,
        messages: &[ChatMessage],
        catalog: &[CapabilityDescriptor],
    ) -> OrchestrationResult<ReasonerTurn>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_message_carries_call_id_and_name() {
        let message = ChatMessage::tool("call_1", "generate_script", "{\"title\":\"Tides\"}");
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.call_id.as_deref(), Some("call_1"));
        assert_eq!(message.name.as_deref(), Some("generate_script"));
    }

    #[test]
    fn replan_reason_display() {
        let reason = ReplanReason::BelowThreshold {
            field: "quality_score".to_string(),
            score: 0.5,
            threshold: 0.7,
        };
        assert_eq!(reason.to_string(), "quality_score 0.50 is below threshold 0.70");
    }

    #[test]
    fn role_serializes_lowercase() {
        let value = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert_eq!(value["role"], "user");
        assert!(value.get("invocations").is_none());
    }
}
