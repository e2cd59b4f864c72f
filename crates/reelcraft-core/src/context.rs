//! # Orchestration Context
//!
//! Per-task working memory: named resources produced so far, free-form
//! state, and the append-only history of every call made. A context is
//! owned by exactly one running task and has no internal locking.
//!
//! Only successful calls change resources or state. Failed calls are
//! recorded in history and nowhere else.

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;

use crate::capability::{CapabilityResult, FailureReason};
use crate::error::OrchestrationError;
use crate::registry::Dispatch;
use crate::schema::Params;

/// Resource names to locations, kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceMap {
    entries: Vec<(String, String)>,
}

impl ResourceMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite. An overwritten key keeps its original position.
    pub fn insert(&mut self, key: impl Into<String>, location: impl Into<String>) -> Option<String> {
        let key = key.into();
        let location = location.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => Some(std::mem::replace(existing, location)),
            None => {
                self.entries.push((key, location));
                None
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ResourceMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, location) in &self.entries {
            map.serialize_entry(key, location)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ResourceMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ResourceMapVisitor;

        impl<'de> Visitor<'de> for ResourceMapVisitor {
            type Value = ResourceMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of resource names to locations")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut resources = ResourceMap::new();
                while let Some((key, location)) = access.next_entry::<String, String>()? {
                    resources.insert(key, location);
                }
                Ok(resources)
            }
        }

        deserializer.deserialize_map(ResourceMapVisitor)
    }
}

/// One entry of the context history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedCall {
    /// Plan step id, or the invocation id in the conversation loop
    pub step_id: String,
    pub capability: String,
    pub params: Params,
    pub result: CapabilityResult,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 1-based attempt number
    pub attempt: u32,
}

impl CompletedCall {
    pub fn from_dispatch(step_id: impl Into<String>, attempt: u32, dispatch: Dispatch) -> Self {
        let error = dispatch.result.error_message();
        Self {
            step_id: step_id.into(),
            capability: dispatch.capability,
            params: dispatch.params,
            success: dispatch.result.success,
            result: dispatch.result,
            started_at: dispatch.started_at,
            duration_ms: dispatch.duration.as_millis() as u64,
            error,
            attempt,
        }
    }

    /// A call the registry refused before the capability ran.
    pub fn rejected(
        step_id: impl Into<String>,
        capability: impl Into<String>,
        params: Params,
        attempt: u32,
        error: &OrchestrationError,
    ) -> Self {
        let reason = match error {
            OrchestrationError::CapabilityNotFound(name) => FailureReason::NotFound {
                resource: name.clone(),
            },
            other => FailureReason::InvalidInput {
                message: other.to_string(),
            },
        };
        Self {
            step_id: step_id.into(),
            capability: capability.into(),
            params,
            result: CapabilityResult::failed(reason),
            started_at: Utc::now(),
            duration_ms: 0,
            success: false,
            error: Some(error.to_string()),
            attempt,
        }
    }

    /// The failure of this call as an orchestration error, if it failed.
    pub fn failure(&self) -> Option<OrchestrationError> {
        if self.success {
            return None;
        }
        Some(OrchestrationError::CapabilityExecution {
            capability: self.capability.clone(),
            message: self
                .error
                .clone()
                .unwrap_or_else(|| "capability reported failure".to_string()),
        })
    }
}

/// Working memory of a single task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestrationContext {
    pub task_id: String,
    /// The user's original request text
    pub request: String,
    resources: ResourceMap,
    state: Map<String, Value>,
    history: Vec<CompletedCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    final_artifact: Option<String>,
}

impl OrchestrationContext {
    pub fn new(task_id: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            request: request.into(),
            ..Default::default()
        }
    }

    pub fn resource(&self, key: &str) -> Option<&str> {
        self.resources.get(key)
    }

    pub fn set_resource(&mut self, key: impl Into<String>, location: impl Into<String>) {
        self.resources.insert(key, location);
    }

    pub fn resources(&self) -> &ResourceMap {
        &self.resources
    }

    pub fn state(&self, key: &str) -> Option<&Value> {
        self.state.get(key)
    }

    pub fn set_state(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.state.insert(key.into(), value.into());
    }

    pub fn state_map(&self) -> &Map<String, Value> {
        &self.state
    }

    pub fn history(&self) -> &[CompletedCall] {
        &self.history
    }

    /// Append a call to the history.
    pub fn record(&mut self, call: CompletedCall) {
        self.history.push(call);
    }

    /// Merge a successful call's resources and data into the context.
    ///
    /// Returns `false` without touching anything when the call failed.
    pub fn absorb(&mut self, call: &CompletedCall) -> bool {
        if !call.success {
            return false;
        }
        self.merge_resources(&call.result);
        for (key, value) in &call.result.data {
            self.state.insert(key.clone(), value.clone());
        }
        true
    }

    /// Store a successful call's data object under a fixed state key.
    ///
    /// Resources are merged as with [`absorb`](Self::absorb). Failed calls
    /// leave the slot untouched.
    pub fn fill_slot(&mut self, slot: &str, call: &CompletedCall) -> bool {
        if !call.success {
            return false;
        }
        self.merge_resources(&call.result);
        self.state
            .insert(slot.to_string(), Value::Object(call.result.data.clone()));
        true
    }

    fn merge_resources(&mut self, result: &CapabilityResult) {
        for (key, location) in &result.resources {
            self.resources.insert(key.clone(), location.clone());
        }
    }

    /// Whether a history entry with this id succeeded.
    pub fn succeeded(&self, step_id: &str) -> bool {
        self.history
            .iter()
            .any(|call| call.step_id == step_id && call.success)
    }

    pub fn final_artifact(&self) -> Option<&str> {
        self.final_artifact.as_deref()
    }

    pub fn set_final_artifact(&mut self, location: impl Into<String>) {
        self.final_artifact = Some(location.into());
    }
}
