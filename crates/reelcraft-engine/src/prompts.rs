//! Prompt text sent to the reasoning engine.

use reelcraft_core::{CapabilityDescriptor, OrchestrationContext, ReplanRequest};

/// Render the catalog as a bulleted list with parameter schemas.
pub fn describe_catalog(catalog: &[CapabilityDescriptor]) -> String {
    catalog
        .iter()
        .map(|descriptor| {
            format!(
                "- {}: {}\n  Parameters: {}",
                descriptor.name, descriptor.description, descriptor.parameters
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// System prompt for a planning round.
pub fn planning_system(catalog: &[CapabilityDescriptor]) -> String {
    format!(
        r#"You are a video production orchestrator. Analyze the user's request and produce an execution plan that uses only the capabilities listed below.

AVAILABLE CAPABILITIES:
{}

Respond with a single JSON object of this shape:
{{"analysis": "...", "strategy": "...", "steps": [{{"id": "step_1", "capability": "...", "action": "...", "params": {{}}, "condition": null, "dependsOn": [], "optional": false, "retry": 0}}], "reasoning": "..."}}

Rules:
- Step ids must be unique; dependsOn may only name earlier steps.
- Conditions may reference resources.<key>, state.<key> and history.<step_id>.
- Mark steps optional when the video can be produced without them."#,
        describe_catalog(catalog)
    )
}

/// User prompt for the initial planning round.
pub fn planning_user(ctx: &OrchestrationContext) -> String {
    let resources: Vec<&str> = ctx.resources().keys().collect();
    format!(
        "Task analysis request:\n- Request: \"{}\"\n- Available resources: {:?}\n- Previous steps: {}\n\nCreate the execution plan.",
        ctx.request,
        resources,
        ctx.history().len()
    )
}

/// User prompt for a replanning round.
pub fn replanning_user(ctx: &OrchestrationContext, request: &ReplanRequest) -> String {
    let resources: Vec<&str> = ctx.resources().keys().collect();
    let data = serde_json::Value::Object(request.result.data.clone());
    let executed: Vec<&str> = ctx
        .history()
        .iter()
        .map(|call| call.step_id.as_str())
        .collect();
    format!(
        "The plan for \"{}\" needs adjusting.\n- Step '{}' ({}) finished: {}\n- Reason: {}\n- Result data: {}\n- Available resources: {:?}\n- Executed step ids (do not reuse): {:?}\n\nReturn only the additional steps to run next, in the same JSON plan format.",
        ctx.request,
        request.step.id,
        request.step.capability,
        request.result.message,
        request.reason,
        data,
        resources,
        executed
    )
}

/// System prompt for the conversation loop.
pub fn conversation_system(catalog: &[CapabilityDescriptor]) -> String {
    format!(
        r#"You are a video production orchestrator. Your job is to help users create videos by calling the available tools step by step.

AVAILABLE TOOLS:
{}

INSTRUCTIONS:
1. Start by analyzing the request to understand what kind of video is wanted.
2. Use the tools to produce the script, images, narration and the final video.
3. Check quality before finalizing.
4. Only stop calling tools once a video file has been rendered.

You must use tools to accomplish the task. Do not write content directly."#,
        describe_catalog(catalog)
    )
}

/// Opening user message of the conversation loop.
pub fn conversation_user(request: &str) -> String {
    format!(
        "Please help me create a video based on this request: \"{}\"",
        request
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> Vec<CapabilityDescriptor> {
        vec![CapabilityDescriptor {
            name: "generate_script".to_string(),
            description: "Write a script".to_string(),
            parameters: json!({"type": "object", "properties": {}, "required": []}),
        }]
    }

    #[test]
    fn system_prompts_list_capabilities() {
        assert!(planning_system(&catalog()).contains("- generate_script: Write a script"));
        assert!(conversation_system(&catalog()).contains("generate_script"));
    }

    #[test]
    fn conversation_user_quotes_request() {
        assert_eq!(
            conversation_user("ocean facts"),
            "Please help me create a video based on this request: \"ocean facts\""
        );
    }
}
