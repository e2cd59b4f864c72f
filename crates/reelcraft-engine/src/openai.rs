//! OpenAI-compatible reasoning engine client
//!
//! [`OpenAiClient`] talks to any endpoint that implements the
//! `/chat/completions` API. It serves both engines:
//!
//! - As a [`Planner`] it asks for a JSON execution plan and parses it with
//!   [`ExecutionPlan::from_json`].
//! - As a [`Reasoner`] it advertises the capability catalog as function tools
//!   and turns the returned `tool_calls` into [`RequestedInvocation`]s.
//!
//! Transport failures, non-success statuses and undecodable bodies all map to
//! [`OrchestrationError::ReasoningEngine`]. Requests are not retried.

use async_trait::async_trait;
use reelcraft_core::{
    CapabilityDescriptor, ChatMessage, ExecutionPlan, OrchestrationContext, OrchestrationError,
    OrchestrationResult, Params, Planner, Reasoner, ReasonerTurn, ReplanRequest,
    RequestedInvocation, Role,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::prompts;

const PLANNING_TEMPERATURE: f32 = 0.2;
const CONVERSATION_TEMPERATURE: f32 = 0.7;

/// Client for an OpenAI-compatible chat completions endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    config: LlmConfig,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("has_api_key", &self.config.api_key.is_some())
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(config: LlmConfig) -> OrchestrationResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("reelcraft/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                OrchestrationError::ReasoningEngine(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self { http, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn complete(&self, request: &CompletionRequest) -> OrchestrationResult<WireMessage> {
        let url = self.endpoint();
        debug!(
            url = %url,
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Requesting completion"
        );

        let mut builder = self.http.post(&url).json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            OrchestrationError::ReasoningEngine(format!("Failed to reach {}: {}", url, e))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Reasoning engine returned an error status");
            return Err(OrchestrationError::ReasoningEngine(format!(
                "HTTP {}: {}",
                status,
                body.trim()
            )));
        }

        let completion: CompletionResponse = response.json().await.map_err(|e| {
            OrchestrationError::ReasoningEngine(format!("Failed to decode completion: {}", e))
        })?;

        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| OrchestrationError::ReasoningEngine("no choices".to_string()))
    }

    async fn request_plan(&self, system: String, user: String) -> OrchestrationResult<ExecutionPlan> {
        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                WireMessage::text("system", system),
                WireMessage::text("user", user),
            ],
            tools: Vec::new(),
            tool_choice: None,
            response_format: Some(ResponseFormat {
                kind: "json_object".to_string(),
            }),
            temperature: PLANNING_TEMPERATURE,
        };

        let message = self.complete(&request).await?;
        let content = message.content.unwrap_or_default();
        let plan = ExecutionPlan::from_json(&content)?;
        info!(steps = plan.steps.len(), strategy = %plan.strategy, "Received execution plan");
        Ok(plan)
    }
}

#[async_trait]
impl Planner for OpenAiClient {
    async fn plan(
        &self,
        ctx: &OrchestrationContext,
        catalog: &[CapabilityDescriptor],
    ) -> OrchestrationResult<ExecutionPlan> {
        self.request_plan(prompts::planning_system(catalog), prompts::planning_user(ctx))
            .await
    }

    async fn replan(
        &self,
        ctx: &OrchestrationContext,
        request: &ReplanRequest,
        catalog: &[CapabilityDescriptor],
    ) -> OrchestrationResult<ExecutionPlan> {
        self.request_plan(
            prompts::planning_system(catalog),
            prompts::replanning_user(ctx, request),
        )
        .await
    }
}

#[async_trait]
impl Reasoner for OpenAiClient {
    async fn converse(
        &self,
        messages: &[ChatMessage],
        catalog: &[CapabilityDescriptor],
    ) -> OrchestrationResult<ReasonerTurn> {
        let tools: Vec<WireTool> = catalog.iter().map(WireTool::from).collect();
        let request = CompletionRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(WireMessage::from).collect(),
            tool_choice: (!tools.is_empty()).then(|| "auto".to_string()),
            tools,
            response_format: None,
            temperature: CONVERSATION_TEMPERATURE,
        };

        let message = self.complete(&request).await?;
        let invocations = message
            .tool_calls
            .into_iter()
            .map(WireToolCall::into_invocation)
            .collect();

        Ok(ReasonerTurn {
            text: message.content.unwrap_or_default(),
            invocations,
        })
    }
}

// ============================================================================
// Wire format
// ============================================================================

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty", deserialize_with = "null_as_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl WireMessage {
    fn text(role: &str, content: String) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        let tool_calls: Vec<WireToolCall> = message
            .invocations
            .iter()
            .map(WireToolCall::from)
            .collect();
        // Assistant turns that only call tools carry a null content.
        let content = if message.content.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(message.content.clone())
        };
        Self {
            role: role.to_string(),
            content,
            tool_calls,
            tool_call_id: message.call_id.clone(),
            name: message.name.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded argument object
    #[serde(default)]
    arguments: String,
}

impl WireToolCall {
    fn into_invocation(self) -> RequestedInvocation {
        let raw = self.function.arguments.trim();
        if raw.is_empty() {
            return RequestedInvocation::new(self.id, self.function.name, Params::new());
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(arguments)) => {
                RequestedInvocation::new(self.id, self.function.name, arguments)
            }
            Ok(other) => RequestedInvocation::malformed(
                self.id,
                self.function.name,
                format!("arguments must be a JSON object, got {}", other),
            ),
            Err(e) => RequestedInvocation::malformed(
                self.id,
                self.function.name,
                format!("arguments are not valid JSON: {}", e),
            ),
        }
    }
}

impl From<&RequestedInvocation> for WireToolCall {
    fn from(invocation: &RequestedInvocation) -> Self {
        Self {
            id: invocation.id.clone(),
            kind: function_kind(),
            function: WireFunctionCall {
                name: invocation.capability.clone(),
                arguments: Value::Object(invocation.arguments.clone()).to_string(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

impl From<&CapabilityDescriptor> for WireTool {
    fn from(descriptor: &CapabilityDescriptor) -> Self {
        Self {
            kind: function_kind(),
            function: WireFunction {
                name: descriptor.name.clone(),
                description: descriptor.description.clone(),
                parameters: descriptor.parameters.clone(),
            },
        }
    }
}

fn function_kind() -> String {
    "function".to_string()
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<WireToolCall>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<WireToolCall>>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OpenAiClient {
        OpenAiClient::new(LlmConfig {
            base_url: format!("{}/v1", server.uri()),
            model: "test-model".to_string(),
            api_key: Some("sk-test".to_string()),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn completion(message: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": message, "finish_reason": "stop"}]
        }))
    }

    fn catalog() -> Vec<CapabilityDescriptor> {
        vec![CapabilityDescriptor {
            name: "generate_script".to_string(),
            description: "Write a script".to_string(),
            parameters: json!({"type": "object", "properties": {}}),
        }]
    }

    #[tokio::test]
    async fn plan_parses_fenced_json_content() {
        let server = MockServer::start().await;
        let content = "```json\n{\"analysis\":\"a\",\"strategy\":\"s\",\"steps\":[{\"id\":\"s1\",\"capability\":\"generate_script\"}],\"reasoning\":\"r\"}\n```";
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "test-model",
                "response_format": {"type": "json_object"}
            })))
            .respond_with(completion(json!({"role": "assistant", "content": content})))
            .expect(1)
            .mount(&server)
            .await;

        let ctx = OrchestrationContext::new("task-1", "a short video about tides");
        let plan = client_for(&server).plan(&ctx, &catalog()).await.unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].capability, "generate_script");
    }

    #[tokio::test]
    async fn converse_advertises_tools_and_parses_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({
                "tool_choice": "auto",
                "tools": [{"type": "function", "function": {"name": "generate_script"}}]
            })))
            .respond_with(completion(json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "generate_script", "arguments": "{\"topic\":\"tides\"}"}},
                    {"id": "call_2", "type": "function", "function": {"name": "generate_script", "arguments": "[1,2]"}},
                    {"id": "call_3", "type": "function", "function": {"name": "generate_script", "arguments": "{not json"}}
                ]
            })))
            .mount(&server)
            .await;

        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("make a video")];
        let turn = client_for(&server)
            .converse(&messages, &catalog())
            .await
            .unwrap();

        assert!(turn.text.is_empty());
        assert_eq!(turn.invocations.len(), 3);
        assert_eq!(turn.invocations[0].arguments["topic"], "tides");
        assert!(turn.invocations[0].argument_error.is_none());
        assert!(turn.invocations[1].argument_error.is_some());
        assert!(
            turn.invocations[2]
                .argument_error
                .as_deref()
                .unwrap()
                .contains("not valid JSON")
        );
    }

    #[tokio::test]
    async fn error_status_maps_to_reasoning_engine_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("rate limited"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .converse(&[ChatMessage::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::ReasoningEngine(_)));
        let message = err.to_string();
        assert!(message.contains("429"));
        assert!(message.contains("rate limited"));
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .converse(&[ChatMessage::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }

    #[tokio::test]
    async fn malformed_plan_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(completion(json!({"role": "assistant", "content": "sure, here is a plan"})))
            .mount(&server)
            .await;

        let ctx = OrchestrationContext::new("task-1", "video");
        let err = client_for(&server).plan(&ctx, &[]).await.unwrap_err();
        assert!(err.to_string().contains("malformed plan"));
    }

    #[test]
    fn assistant_message_with_calls_serializes_null_content() {
        let invocation = RequestedInvocation::new("call_1", "render_video", Params::new());
        let wire = WireMessage::from(&ChatMessage::assistant("", vec![invocation]));
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value["content"], Value::Null);
        assert_eq!(value["tool_calls"][0]["function"]["arguments"], "{}");

        let tool = WireMessage::from(&ChatMessage::tool("call_1", "render_video", "{}"));
        let value = serde_json::to_value(&tool).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["tool_call_id"], "call_1");
    }

    #[test]
    fn debug_hides_api_key() {
        let client = OpenAiClient::new(LlmConfig {
            api_key: Some("sk-secret".to_string()),
            ..LlmConfig::default()
        })
        .unwrap();
        assert!(!format!("{:?}", client).contains("sk-secret"));
    }
}
