//! # Capability Registry
//!
//! The registry maps capability names to implementations and is the single
//! dispatch point for both execution engines. Every call goes through
//! [`CapabilityRegistry::dispatch`], which validates arguments, enforces the
//! per-call timeout, observes cancellation and converts whatever the
//! capability does (error, timeout, panic) into a [`CapabilityResult`].

use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::capability::{Capability, CapabilityDescriptor, CapabilityResult, FailureReason};
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::schema::Params;

/// Timeout applied to capabilities that do not declare their own.
pub const DEFAULT_CAPABILITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Record of one dispatched call.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// Capability that handled the call
    pub capability: String,
    /// Arguments after validation and default filling
    pub params: Params,
    /// Normalized result; never an `Err`
    pub result: CapabilityResult,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

/// Name-keyed collection of capabilities.
///
/// Built once at startup and then shared read-only (usually behind an
/// `Arc`) by every running task.
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
    default_timeout: Duration,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: HashMap::new(),
            default_timeout: DEFAULT_CAPABILITY_TIMEOUT,
        }
    }

    /// Set the timeout for capabilities without their own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Register a capability. The last registration for a name wins; the
    /// replaced capability is returned.
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Option<Arc<dyn Capability>> {
        let name = capability.name().to_string();
        let replaced = self.capabilities.insert(name.clone(), capability);
        if replaced.is_some() {
            warn!(capability = %name, "Capability re-registered, previous registration replaced");
        } else {
            debug!(capability = %name, "Capability registered");
        }
        replaced
    }

    /// Builder-style registration.
    pub fn with(mut self, capability: Arc<dyn Capability>) -> Self {
        self.register(capability);
        self
    }

    /// Look up a capability by name.
    pub fn resolve(&self, name: &str) -> OrchestrationResult<Arc<dyn Capability>> {
        self.capabilities
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestrationError::CapabilityNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Describe every capability for the reasoning engine, sorted by name.
    pub fn schema_catalog(&self) -> Vec<CapabilityDescriptor> {
        let mut catalog: Vec<CapabilityDescriptor> = self
            .capabilities
            .values()
            .map(|capability| capability.descriptor())
            .collect();
        catalog.sort_by(|a, b| a.name.cmp(&b.name));
        catalog
    }

    /// Validate and invoke a capability.
    ///
    /// Returns `Err` only when the name does not resolve or the arguments
    /// violate the capability's schema. Everything that goes wrong after the
    /// capability starts is reported as a failed result inside the
    /// [`Dispatch`].
    pub async fn dispatch(
        &self,
        name: &str,
        params: Params,
        cancel: &CancellationToken,
    ) -> OrchestrationResult<Dispatch> {
        let capability = self.resolve(name)?;
        let params = capability.parameters().validate(&params).map_err(|violation| {
            OrchestrationError::InvalidArguments {
                capability: name.to_string(),
                reason: violation.to_string(),
            }
        })?;
        let timeout = capability.metadata().timeout.unwrap_or(self.default_timeout);

        let started_at = Utc::now();
        let clock = tokio::time::Instant::now();
        let call = AssertUnwindSafe(capability.invoke(params.clone())).catch_unwind();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => CapabilityResult::failed(FailureReason::Cancelled {
                operation: name.to_string(),
            }),
            outcome = tokio::time::timeout(timeout, call) => match outcome {
                Err(_) => CapabilityResult::failed(FailureReason::Timeout {
                    operation: name.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
                Ok(Err(panic)) => CapabilityResult::failed(FailureReason::Panicked {
                    message: panic_message(panic.as_ref()),
                }),
                Ok(Ok(Err(reason))) => CapabilityResult::failed(reason),
                Ok(Ok(Ok(result))) => normalize(result),
            },
        };
        let duration = clock.elapsed();

        if let Some(error) = result.error_message() {
            warn!(
                capability = %name,
                duration_ms = duration.as_millis() as u64,
                error = %error,
                "Capability call failed"
            );
        } else {
            debug!(
                capability = %name,
                duration_ms = duration.as_millis() as u64,
                "Capability call succeeded"
            );
        }

        Ok(Dispatch {
            capability: name.to_string(),
            params,
            result,
            started_at,
            duration,
        })
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("capabilities", &self.names())
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

/// A failed result without a reason still gets one.
fn normalize(mut result: CapabilityResult) -> CapabilityResult {
    if !result.success && result.failure.is_none() {
        let message = if result.message.is_empty() {
            "capability reported failure".to_string()
        } else {
            result.message.clone()
        };
        result.failure = Some(FailureReason::internal(message));
    }
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "capability panicked".to_string()
    }
}
