//! End-to-end orchestration scenarios
//!
//! These tests drive both execution strategies against mock capabilities
//! and scripted reasoning engines, checking the behaviour a task owner
//! observes: history, resources, final status and error propagation.

use reelcraft::{
    CancellationToken, CapabilityRegistry, CapabilityResult, ConversationEngine, ExecutionScope,
    ExecutionStrategy, FailureReason, OrchestrationContext, OrchestrationError, Params,
    PlanEngine, PlannedStep, ProgressRegistry, TaskRunner, TaskStatus,
};
use reelcraft_core::ReplanReason;
use reelcraft_engine::OutcomeStatus;
use reelcraft_testing::{MockCapability, ScriptedPlanner, ScriptedReasoner, invocation, plan};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn registry(capabilities: Vec<MockCapability>) -> Arc<CapabilityRegistry> {
    Arc::new(
        capabilities
            .into_iter()
            .fold(CapabilityRegistry::new(), |registry, capability| {
                registry.with(Arc::new(capability))
            }),
    )
}

fn producing(name: &str, resource: &str) -> MockCapability {
    MockCapability::succeeding(name).with_result(
        CapabilityResult::success(format!("{} done", name))
            .with_data(format!("{}_done", name), true)
            .with_resource(resource, format!("/uploads/{}", resource)),
    )
}

// ============================================================================
// Plan-based engine
// ============================================================================

#[tokio::test]
async fn linear_chain_collects_resources_in_order() {
    let registry = registry(vec![
        producing("cap_a", "a_out"),
        producing("cap_b", "b_out"),
        producing("cap_c", "c_out"),
    ]);
    let planner = ScriptedPlanner::new(plan(vec![
        PlannedStep::new("A", "cap_a"),
        PlannedStep::new("B", "cap_b").depends_on("A"),
        PlannedStep::new("C", "cap_c").depends_on("B"),
    ]));
    let engine = PlanEngine::new(registry, Arc::new(planner));
    let mut ctx = OrchestrationContext::new("task-chain", "three step video");

    let outcome = engine
        .execute(&mut ctx, &ExecutionScope::new())
        .await
        .expect("chain should complete");

    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert_eq!(
        ctx.resources().keys().collect::<Vec<_>>(),
        vec!["a_out", "b_out", "c_out"]
    );
    assert_eq!(ctx.history().len(), 3);
    assert!(ctx.history().iter().all(|call| call.success));
    assert_eq!(ctx.state("cap_b_done"), Some(&json!(true)));
}

#[tokio::test]
async fn optional_failure_does_not_stop_required_step() {
    let registry = registry(vec![
        MockCapability::failing("generate_voice", "tts backend down"),
        producing("render_video", "final_video"),
    ]);
    let planner = ScriptedPlanner::new(plan(vec![
        PlannedStep::new("X", "generate_voice").optional(),
        PlannedStep::new("Y", "render_video"),
    ]));
    let engine = PlanEngine::new(registry, Arc::new(planner));
    let mut ctx = OrchestrationContext::new("task-optional", "video");

    let outcome = engine.execute(&mut ctx, &ExecutionScope::new()).await;

    assert!(outcome.is_ok());
    let history = ctx.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].step_id, "X");
    assert!(!history[0].success);
    assert!(history[0].error.as_deref().unwrap().contains("tts backend down"));
    assert_eq!(history[1].step_id, "Y");
    assert!(history[1].success);
}

#[tokio::test]
async fn required_failure_aborts_and_keeps_partial_resources() {
    let render = MockCapability::succeeding("render_video");
    let render_calls = render.call_counter();
    let registry = registry(vec![
        producing("generate_script", "script"),
        MockCapability::failing("generate_images", "quota exceeded"),
        render,
    ]);
    let planner = ScriptedPlanner::new(plan(vec![
        PlannedStep::new("script", "generate_script"),
        PlannedStep::new("images", "generate_images"),
        PlannedStep::new("render", "render_video"),
    ]));
    let engine = PlanEngine::new(registry, Arc::new(planner));
    let mut ctx = OrchestrationContext::new("task-abort", "video");

    let err = engine
        .execute(&mut ctx, &ExecutionScope::new())
        .await
        .unwrap_err();

    match err {
        OrchestrationError::StepFailed {
            step_id,
            capability,
            cause,
        } => {
            assert_eq!(step_id, "images");
            assert_eq!(capability, "generate_images");
            assert!(cause.contains("quota exceeded"));
        }
        other => panic!("expected StepFailed, got {other:?}"),
    }
    assert_eq!(render_calls.get(), 0);
    assert_eq!(ctx.resource("script"), Some("/uploads/script"));
}

#[tokio::test]
async fn unmet_dependency_skips_without_failing() {
    let images = MockCapability::succeeding("generate_images");
    let image_calls = images.call_counter();
    let registry = registry(vec![
        MockCapability::failing("generate_script", "llm refused"),
        images,
        producing("generate_voice", "audio"),
    ]);
    let planner = ScriptedPlanner::new(plan(vec![
        PlannedStep::new("script", "generate_script").optional(),
        PlannedStep::new("images", "generate_images").depends_on("script"),
        PlannedStep::new("voice", "generate_voice"),
    ]));
    let engine = PlanEngine::new(registry, Arc::new(planner));
    let mut ctx = OrchestrationContext::new("task-deps", "video");

    engine
        .execute(&mut ctx, &ExecutionScope::new())
        .await
        .expect("skipped steps are not errors");

    assert_eq!(image_calls.get(), 0);
    let ids: Vec<&str> = ctx.history().iter().map(|c| c.step_id.as_str()).collect();
    assert_eq!(ids, vec!["script", "voice"]);
}

#[tokio::test]
async fn low_quality_score_appends_rework_steps() {
    let quality = MockCapability::succeeding("check_quality")
        .with_result(CapabilityResult::success("checked").with_data("quality_score", 0.5))
        .replan_below("quality_score", 0.7);
    let registry = registry(vec![
        quality,
        producing("render_video", "final_video"),
        producing("generate_images", "image_2"),
    ]);
    let planner = Arc::new(
        ScriptedPlanner::new(plan(vec![
            PlannedStep::new("qc", "check_quality"),
            PlannedStep::new("render", "render_video"),
        ]))
        .then_replan(plan(vec![PlannedStep::new("rework", "generate_images")])),
    );
    let engine = PlanEngine::new(registry, planner.clone());
    let mut ctx = OrchestrationContext::new("task-replan", "video");

    let outcome = engine
        .execute(&mut ctx, &ExecutionScope::new())
        .await
        .unwrap();

    let ids: Vec<&str> = ctx.history().iter().map(|c| c.step_id.as_str()).collect();
    assert_eq!(ids, vec!["qc", "render", "rework"]);
    assert_eq!(outcome.plans.len(), 2);
    assert_eq!(ctx.resource("image_2"), Some("/uploads/image_2"));

    let reasons = planner.replan_reasons();
    assert_eq!(reasons.len(), 1);
    match &reasons[0] {
        ReplanReason::BelowThreshold { field, score, .. } => {
            assert_eq!(field, "quality_score");
            assert_eq!(*score, 0.5);
        }
        other => panic!("unexpected reason {other:?}"),
    }
}

#[tokio::test]
async fn planning_failure_aborts_before_any_step() {
    let script = MockCapability::succeeding("generate_script");
    let calls = script.call_counter();
    let engine = PlanEngine::new(
        registry(vec![script]),
        Arc::new(ScriptedPlanner::unreachable()),
    );
    let mut ctx = OrchestrationContext::new("task-noplan", "video");

    let err = engine
        .execute(&mut ctx, &ExecutionScope::new())
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "REASONING_ENGINE_ERROR");
    assert_eq!(calls.get(), 0);
    assert!(ctx.history().is_empty());
}

// ============================================================================
// Conversation loop
// ============================================================================

#[tokio::test]
async fn conversation_loop_stops_after_iteration_cap() {
    let registry = registry(vec![MockCapability::succeeding("noop")]);
    let reasoner = Arc::new(ScriptedReasoner::repeating(invocation(
        "call",
        "noop",
        json!({}),
    )));
    let engine = ConversationEngine::new(registry, reasoner.clone()).with_max_iterations(3);
    let mut ctx = OrchestrationContext::new("task-loop", "video");

    let outcome = engine
        .execute(&mut ctx, &ExecutionScope::new())
        .await
        .expect("the cap is not a fatal failure");

    assert_eq!(outcome.status, OutcomeStatus::Incomplete);
    assert_eq!(TaskStatus::from(outcome.status), TaskStatus::Incomplete);
    assert_eq!(reasoner.turn_counter().get(), 3);
    assert_eq!(ctx.history().len(), 3);
}

#[tokio::test]
async fn conversation_invalid_invocation_fails_only_itself() {
    let script = MockCapability::succeeding("generate_script")
        .slot("script")
        .with_parameters(
            reelcraft::ParameterSchema::new()
                .required("topic", reelcraft::ParameterSpec::string("Topic")),
        )
        .with_result(CapabilityResult::success("ok").with_data("title", "Tides"));
    let reasoner = Arc::new(ScriptedReasoner::new(vec![
        reelcraft_core::ReasonerTurn::default()
            .invoke(invocation("bad", "generate_script", json!({})))
            .invoke(invocation("good", "generate_script", json!({"topic": "tides"}))),
        reelcraft_core::ReasonerTurn::done("all set"),
    ]));
    let engine = ConversationEngine::new(registry(vec![script]), reasoner);
    let mut ctx = OrchestrationContext::new("task-args", "video");

    let outcome = engine
        .execute(&mut ctx, &ExecutionScope::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, OutcomeStatus::Completed);
    assert_eq!(outcome.output.title.as_deref(), Some("Tides"));
    let history = ctx.history();
    assert_eq!(history.len(), 2);
    assert!(!history[0].success);
    assert!(history[1].success);
}

// ============================================================================
// Registry normalization
// ============================================================================

#[tokio::test(start_paused = true)]
async fn errors_panics_and_timeouts_become_failed_results() {
    let registry = registry(vec![
        MockCapability::failing("flaky", "backend exploded"),
        MockCapability::panicking("crashy"),
        MockCapability::succeeding("slow")
            .with_delay(Duration::from_secs(30))
            .with_timeout(Duration::from_secs(1)),
    ]);
    let cancel = CancellationToken::new();

    for name in ["flaky", "crashy", "slow"] {
        let dispatch = registry
            .dispatch(name, Params::new(), &cancel)
            .await
            .expect("dispatch never raises for capability faults");
        assert!(!dispatch.result.success, "{name} should fail");
        assert!(dispatch.result.failure.is_some(), "{name} needs a reason");
    }

    let slow = registry.dispatch("slow", Params::new(), &cancel).await.unwrap();
    assert!(matches!(
        slow.result.failure,
        Some(FailureReason::Timeout { timeout_ms: 1000, .. })
    ));
}

// ============================================================================
// Task runner
// ============================================================================

#[tokio::test]
async fn runner_reports_failure_and_keeps_artifacts() {
    let progress = ProgressRegistry::shared();
    let runner = TaskRunner::new(progress.clone());
    let strategy: Arc<dyn ExecutionStrategy> = Arc::new(PlanEngine::new(
        registry(vec![
            producing("generate_script", "script"),
            MockCapability::failing("render_video", "encoder crashed"),
        ]),
        Arc::new(ScriptedPlanner::new(plan(vec![
            PlannedStep::new("script", "generate_script"),
            PlannedStep::new("render", "render_video").depends_on("script"),
        ]))),
    ));

    let report = runner
        .spawn_with_id("task-runner", "video", strategy)
        .await
        .unwrap()
        .join()
        .await
        .unwrap();

    assert_eq!(report.status(), TaskStatus::Failed);
    assert_eq!(report.context.resource("script"), Some("/uploads/script"));

    let status = progress.get("task-runner").await.unwrap();
    assert_eq!(status.status, TaskStatus::Failed);
    assert!(status.message.contains("render"));
    assert_eq!(progress.list().await.len(), 1);
}
