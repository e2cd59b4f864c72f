//! Property-Based Tests for Plan Execution Invariants
//!
//! These tests use property-based testing to verify invariants of the
//! execution engines that should hold regardless of plan shape: bounded
//! retries and iterations, dependency skipping and replanning order.

use proptest::prelude::*;
use reelcraft::{
    CapabilityRegistry, CapabilityResult, ConversationEngine, ExecutionScope, ExecutionStrategy,
    OrchestrationContext, PlanEngine, PlannedStep,
};
use reelcraft_core::{Condition, ResourceMap};
use reelcraft_testing::{MockCapability, ScriptedPlanner, ScriptedReasoner, invocation, plan};
use serde_json::json;
use std::sync::Arc;

// Strategy for generating resource keys
fn resource_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z_]{1,12}").unwrap()
}

proptest! {
    /// Property: Condition parsing never panics, whatever the input
    #[test]
    fn prop_condition_parse_is_total(source in ".{0,64}") {
        let _ = Condition::parse(&source);
    }

    /// Property: Resource map keeps first-insertion order, overwrites in place
    #[test]
    fn prop_resource_map_preserves_first_insertion_order(
        entries in prop::collection::vec((resource_key_strategy(), "[a-z/]{1,16}"), 0..20)
    ) {
        let mut map = ResourceMap::new();
        let mut expected_order: Vec<String> = Vec::new();
        for (key, location) in &entries {
            if !expected_order.contains(key) {
                expected_order.push(key.clone());
            }
            map.insert(key.clone(), location.clone());
        }

        let keys: Vec<String> = map.keys().map(str::to_string).collect();
        prop_assert_eq!(keys, expected_order);
        for (key, _) in &entries {
            let last = entries.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.as_str());
            prop_assert_eq!(map.get(key), last);
        }
    }

    /// Property: A failing step is attempted exactly retry + 1 times
    #[test]
    fn prop_retries_never_exceed_budget(retry in 0u32..5) {
        tokio_test::block_on(async {
            let flaky = MockCapability::failing("generate_voice", "tts down");
            let calls = flaky.call_counter();
            let registry = Arc::new(CapabilityRegistry::new().with(Arc::new(flaky)));
            let planner = ScriptedPlanner::new(plan(vec![
                PlannedStep::new("voice", "generate_voice").optional().with_retry(retry),
            ]));
            let engine = PlanEngine::new(registry, Arc::new(planner));
            let mut ctx = OrchestrationContext::new("task", "video");

            let outcome = engine.execute(&mut ctx, &ExecutionScope::new()).await;

            prop_assert!(outcome.is_ok());
            prop_assert_eq!(calls.get(), retry as usize + 1);
            prop_assert_eq!(ctx.history().len(), retry as usize + 1);
            Ok(())
        })?;
    }

    /// Property: The conversation loop ends after at most N turns
    #[test]
    fn prop_conversation_loop_is_bounded(max_iterations in 1usize..12) {
        tokio_test::block_on(async {
            let registry = Arc::new(
                CapabilityRegistry::new().with(Arc::new(MockCapability::succeeding("noop"))),
            );
            let reasoner = Arc::new(ScriptedReasoner::repeating(invocation("call", "noop", json!({}))));
            let engine = ConversationEngine::new(registry, reasoner.clone())
                .with_max_iterations(max_iterations);
            let mut ctx = OrchestrationContext::new("task", "video");

            let outcome = engine.execute(&mut ctx, &ExecutionScope::new()).await;

            prop_assert!(outcome.is_ok());
            prop_assert_eq!(reasoner.turn_counter().get(), max_iterations);
            prop_assert_eq!(ctx.history().len(), max_iterations);
            Ok(())
        })?;
    }

    /// Property: Steps whose dependencies failed are skipped, never fatal
    #[test]
    fn prop_unmet_dependencies_are_skipped(failing in prop::collection::vec(any::<bool>(), 1..8)) {
        tokio_test::block_on(async {
            let mut registry = CapabilityRegistry::new();
            let mut steps = Vec::new();
            for (index, fails) in failing.iter().enumerate() {
                let name = format!("cap_{}", index);
                let capability = if *fails {
                    MockCapability::failing(name.clone(), "boom")
                } else {
                    MockCapability::succeeding(name.clone())
                };
                registry.register(Arc::new(capability));

                let mut step = PlannedStep::new(format!("s{}", index), name).optional();
                if index > 0 {
                    step = step.depends_on(format!("s{}", index - 1));
                }
                steps.push(step);
            }
            let engine = PlanEngine::new(
                Arc::new(registry),
                Arc::new(ScriptedPlanner::new(plan(steps))),
            );
            let mut ctx = OrchestrationContext::new("task", "video");

            let outcome = engine.execute(&mut ctx, &ExecutionScope::new()).await;
            prop_assert!(outcome.is_ok());

            // The chain runs up to and including the first failure.
            let expected = failing
                .iter()
                .position(|fails| *fails)
                .map_or(failing.len(), |first| first + 1);
            prop_assert_eq!(ctx.history().len(), expected);
            Ok(())
        })?;
    }

    /// Property: Replanned steps run after every previously queued step
    #[test]
    fn prop_replanned_steps_run_last(initial in 1usize..6, added in 1usize..4) {
        tokio_test::block_on(async {
            let trigger = MockCapability::succeeding("check_quality")
                .with_result(CapabilityResult::success("checked").suggest("generate_images"));
            let registry = Arc::new(
                CapabilityRegistry::new()
                    .with(Arc::new(trigger))
                    .with(Arc::new(MockCapability::succeeding("generate_images"))),
            );

            let mut steps = vec![PlannedStep::new("qc", "check_quality")];
            steps.extend((1..initial).map(|i| PlannedStep::new(format!("base_{}", i), "generate_images")));
            let rework: Vec<PlannedStep> = (0..added)
                .map(|i| PlannedStep::new(format!("rework_{}", i), "generate_images"))
                .collect();
            let planner = ScriptedPlanner::new(plan(steps)).then_replan(plan(rework));
            let engine = PlanEngine::new(registry, Arc::new(planner));
            let mut ctx = OrchestrationContext::new("task", "video");

            engine.execute(&mut ctx, &ExecutionScope::new()).await.unwrap();

            let ids: Vec<&str> = ctx.history().iter().map(|c| c.step_id.as_str()).collect();
            prop_assert_eq!(ids.len(), initial + added);
            for (position, id) in ids.iter().enumerate() {
                prop_assert_eq!(id.starts_with("rework_"), position >= initial);
            }
            Ok(())
        })?;
    }
}
