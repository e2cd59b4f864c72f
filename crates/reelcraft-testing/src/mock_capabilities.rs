//! # Mock Capabilities for Testing
//!
//! Capability implementations with scripted behaviour, so engine tests can
//! exercise success, failure, retries, timeouts and replanning without a
//! real media backend.

use async_trait::async_trait;
use reelcraft_core::{
    Capability, CapabilityMetadata, CapabilityResult, FailureReason, ParameterSchema, Params,
    ReplanTrigger,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Shared call counter that stays readable after the mock is registered.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Increment and return the new value.
    pub fn bump(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// A capability that returns a predefined result.
#[derive(Debug, Clone)]
pub struct MockCapability {
    name: String,
    description: String,
    parameters: ParameterSchema,
    metadata: CapabilityMetadata,
    result: CapabilityResult,
    fail_first: usize,
    delay: Option<Duration>,
    panics: bool,
    calls: CallCounter,
    call_history: Arc<Mutex<Vec<Params>>>,
}

impl MockCapability {
    /// Create a mock that always succeeds with an empty data object.
    pub fn succeeding(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            description: format!("Mock {}", name),
            result: CapabilityResult::success(format!("{} completed", name)),
            name,
            parameters: ParameterSchema::new(),
            metadata: CapabilityMetadata::new(),
            fail_first: 0,
            delay: None,
            panics: false,
            calls: CallCounter::default(),
            call_history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Create a mock that always fails with an internal error.
    pub fn failing(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self::succeeding(name).with_result(CapabilityResult::failed(FailureReason::internal(error)))
    }

    /// Create a mock that panics when invoked.
    pub fn panicking(name: impl Into<String>) -> Self {
        let mut mock = Self::succeeding(name);
        mock.panics = true;
        mock
    }

    /// Set the result returned on every (non-failing) call.
    pub fn with_result(mut self, result: CapabilityResult) -> Self {
        self.result = result;
        self
    }

    /// Fail the first `n` calls before returning the configured result.
    pub fn fail_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_parameters(mut self, parameters: ParameterSchema) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_metadata(mut self, metadata: CapabilityMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Declare the conversation-loop state slot.
    pub fn slot(mut self, slot: impl Into<String>) -> Self {
        self.metadata.slot = Some(slot.into());
        self
    }

    /// Declare the resource key holding the final artifact.
    pub fn final_artifact(mut self, resource_key: impl Into<String>) -> Self {
        self.metadata.final_artifact = Some(resource_key.into());
        self
    }

    /// Declare a replan trigger on a numeric data field.
    pub fn replan_below(mut self, field: impl Into<String>, threshold: f64) -> Self {
        self.metadata.replan_trigger = Some(ReplanTrigger::below(field, threshold));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.metadata.timeout = Some(timeout);
        self
    }

    /// Handle onto the call count.
    pub fn call_counter(&self) -> CallCounter {
        self.calls.clone()
    }

    /// Number of times the capability was invoked
    pub fn call_count(&self) -> usize {
        self.calls.get()
    }

    /// Arguments of every invocation, in order
    pub fn call_history(&self) -> Vec<Params> {
        self.call_history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Capability for MockCapability {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> ParameterSchema {
        self.parameters.clone()
    }

    fn metadata(&self) -> CapabilityMetadata {
        self.metadata.clone()
    }

    async fn invoke(&self, params: Params) -> Result<CapabilityResult, FailureReason> {
        let call = self.calls.bump();
        if let Ok(mut history) = self.call_history.lock() {
            history.push(params);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panics {
            panic!("mock capability '{}' panicked", self.name);
        }
        if call <= self.fail_first {
            return Err(FailureReason::internal(format!(
                "transient failure {} of {}",
                call, self.fail_first
            )));
        }
        Ok(self.result.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fail_first_then_succeed() {
        let mock = MockCapability::succeeding("generate_voice").fail_first(1);
        assert!(mock.invoke(Params::new()).await.is_err());
        assert!(mock.invoke(Params::new()).await.unwrap().success);
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.call_history().len(), 2);
    }

    #[tokio::test]
    async fn counter_survives_registration() {
        let mock = MockCapability::succeeding("render_video");
        let counter = mock.call_counter();
        let shared: Arc<dyn Capability> = Arc::new(mock);
        shared.invoke(Params::new()).await.unwrap();
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn metadata_builders() {
        let mock = MockCapability::succeeding("check_quality")
            .slot("quality_check")
            .replan_below("quality_score", 0.7);
        let metadata = mock.metadata();
        assert_eq!(metadata.slot.as_deref(), Some("quality_check"));
        assert_eq!(metadata.replan_trigger.unwrap().threshold, 0.7);
    }
}
