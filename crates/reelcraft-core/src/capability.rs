//! # Capabilities
//!
//! A capability is a named unit of work the engines can invoke: generating
//! a script, synthesizing a voice track, rendering a video. Capabilities
//! are selected by registry lookup on their name, never by type inspection.
//!
//! Besides its parameters, a capability declares [`CapabilityMetadata`]
//! that the engines act on generically: which context slot its output
//! fills, whether it produces the task's final artifact, and whether a
//! numeric output should trigger replanning.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::schema::{ParameterSchema, Params};

/// Quality threshold below which a declared replan trigger fires.
pub const DEFAULT_REPLAN_THRESHOLD: f64 = 0.7;

/// Categorized failure reasons for capability execution.
///
/// This enum provides structured error information instead of plain strings,
/// making it easier to handle different failure types programmatically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureReason {
    /// Arguments were rejected by the capability itself
    InvalidInput { message: String },
    /// The capability name did not resolve
    NotFound { resource: String },
    /// Local I/O failed
    IoError { message: String },
    /// A remote backend could not be reached or answered badly
    NetworkError { message: String },
    /// A spawned process failed or produced unusable output
    SubprocessError { message: String },
    /// The per-call timeout expired
    Timeout { operation: String, timeout_ms: u64 },
    /// The surrounding task was cancelled mid-call
    Cancelled { operation: String },
    /// The capability panicked; the registry contained it
    Panicked { message: String },
    /// Internal capability error or unexpected state
    InternalError { message: String },
    /// Capability-specific failure
    Custom { category: String, message: String },
}

impl FailureReason {
    /// Get a human-readable error message
    pub fn message(&self) -> String {
        match self {
            FailureReason::InvalidInput { message } => format!("Invalid input: {}", message),
            FailureReason::NotFound { resource } => format!("Not found: {}", resource),
            FailureReason::IoError { message } => format!("I/O error: {}", message),
            FailureReason::NetworkError { message } => format!("Network error: {}", message),
            FailureReason::SubprocessError { message } => {
                format!("Subprocess error: {}", message)
            }
            FailureReason::Timeout {
                operation,
                timeout_ms,
            } => format!("Timeout: {} exceeded {} ms", operation, timeout_ms),
            FailureReason::Cancelled { operation } => format!("Cancelled: {}", operation),
            FailureReason::Panicked { message } => format!("Panicked: {}", message),
            FailureReason::InternalError { message } => format!("Internal error: {}", message),
            FailureReason::Custom { category, message } => format!("{}: {}", category, message),
        }
    }

    /// Shorthand for an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        FailureReason::InternalError {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for FailureReason {}

/// The outcome of one capability invocation.
///
/// Successful results carry a JSON `data` payload, named resources
/// (artifact paths or URLs) and optionally suggest which capabilities
/// should run next. Failed results carry a [`FailureReason`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CapabilityResult {
    pub success: bool,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
    #[serde(default, alias = "next_steps", skip_serializing_if = "Vec::is_empty")]
    pub suggested_next: Vec<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReason>,
}

impl CapabilityResult {
    /// Create a successful result with a human-readable message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Default::default()
        }
    }

    /// Create a failed result from a structured reason.
    pub fn failed(reason: FailureReason) -> Self {
        Self {
            success: false,
            message: reason.message(),
            failure: Some(reason),
            ..Default::default()
        }
    }

    /// Add a data field.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Add a produced resource.
    pub fn with_resource(mut self, key: impl Into<String>, location: impl Into<String>) -> Self {
        self.resources.insert(key.into(), location.into());
        self
    }

    /// Suggest a capability to run next.
    pub fn suggest(mut self, capability: impl Into<String>) -> Self {
        self.suggested_next.push(capability.into());
        self
    }

    /// Read a numeric data field.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(Value::as_f64)
    }

    /// Get the error message if the invocation failed.
    pub fn error_message(&self) -> Option<String> {
        if self.success {
            return None;
        }
        Some(
            self.failure
                .as_ref()
                .map(FailureReason::message)
                .unwrap_or_else(|| self.message.clone()),
        )
    }
}

/// Replanning predicate declared by a capability.
///
/// Fires when the named numeric field of a successful result is below the
/// threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplanTrigger {
    pub field: String,
    pub threshold: f64,
}

impl ReplanTrigger {
    /// Trigger when `field` falls below [`DEFAULT_REPLAN_THRESHOLD`].
    pub fn below_default(field: impl Into<String>) -> Self {
        Self::below(field, DEFAULT_REPLAN_THRESHOLD)
    }

    pub fn below(field: impl Into<String>, threshold: f64) -> Self {
        Self {
            field: field.into(),
            threshold,
        }
    }

    /// Return the offending score if the trigger fires for this result.
    pub fn evaluate(&self, result: &CapabilityResult) -> Option<f64> {
        if !result.success {
            return None;
        }
        result
            .number(&self.field)
            .filter(|score| *score < self.threshold)
    }
}

/// Behavioural metadata the engines evaluate instead of matching on names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilityMetadata {
    /// Fixed context state key the conversation loop writes `data` into.
    pub slot: Option<String>,
    /// Resource key holding the task's final artifact.
    pub final_artifact: Option<String>,
    /// Numeric output that requests replanning when it is too low.
    pub replan_trigger: Option<ReplanTrigger>,
    /// Per-call timeout overriding the registry default.
    pub timeout: Option<Duration>,
}

impl CapabilityMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        self.slot = Some(slot.into());
        self
    }

    pub fn with_final_artifact(mut self, resource_key: impl Into<String>) -> Self {
        self.final_artifact = Some(resource_key.into());
        self
    }

    pub fn with_replan_trigger(mut self, trigger: ReplanTrigger) -> Self {
        self.replan_trigger = Some(trigger);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Catalog entry describing a capability to the reasoning engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema of the accepted arguments
    pub parameters: Value,
}

/// Trait defining a unit of work the engines can invoke.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use reelcraft_core::capability::{Capability, CapabilityResult, FailureReason};
/// use reelcraft_core::schema::{ParameterSchema, ParameterSpec, Params};
///
/// struct Subtitles;
///
/// #[async_trait]
/// impl Capability for Subtitles {
///     fn name(&self) -> &str {
///         "generate_subtitles"
///     }
///
///     fn parameters(&self) -> ParameterSchema {
///         ParameterSchema::new().required("text", ParameterSpec::string("Narration"))
///     }
///
///     async fn invoke(&self, params: Params) -> Result<CapabilityResult, FailureReason> {
///         let text = params["text"].as_str().unwrap_or_default();
///         Ok(CapabilityResult::success("subtitles ready")
///             .with_data("lines", text.lines().count()))
///     }
/// }
/// ```
#[async_trait]
pub trait Capability: Send + Sync {
    /// Unique name the registry routes calls by.
    fn name(&self) -> &str;

    /// Human-readable description shown to the reasoning engine.
    fn description(&self) -> &str {
        ""
    }

    /// Declared parameters; calls are validated against this before
    /// `invoke` runs.
    fn parameters(&self) -> ParameterSchema {
        ParameterSchema::default()
    }

    /// Metadata the engines evaluate generically.
    fn metadata(&self) -> CapabilityMetadata {
        CapabilityMetadata::default()
    }

    /// Perform the work.
    ///
    /// `params` has already been validated and has defaults filled in.
    /// Returning `Err` and returning `Ok` with `success = false` are both
    /// treated as a failed call.
    async fn invoke(&self, params: Params) -> Result<CapabilityResult, FailureReason>;

    /// Build the catalog entry for this capability.
    fn descriptor(&self) -> CapabilityDescriptor {
        CapabilityDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters().to_json_schema(),
        }
    }
}
