//! # Parameter Schemas
//!
//! Every capability declares the arguments it accepts. The registry
//! validates each call against that declaration before dispatch, so a
//! capability body never has to guard against missing or mistyped fields.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use thiserror::Error;

/// Argument map passed to a capability.
pub type Params = Map<String, Value>;

/// JSON type of a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// Name used in JSON Schema.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    /// Check whether a JSON value has this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamType::String => value.is_string(),
            ParamType::Number => value.is_number(),
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array => value.is_array(),
            ParamType::Object => value.is_object(),
        }
    }
}

impl std::fmt::Display for ParamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Declaration of a single parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParameterSpec {
    /// Create a parameter of the given type.
    pub fn new(kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            enum_values: None,
            default: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::new(ParamType::String, description)
    }

    pub fn number(description: impl Into<String>) -> Self {
        Self::new(ParamType::Number, description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::new(ParamType::Integer, description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::new(ParamType::Boolean, description)
    }

    pub fn array(description: impl Into<String>) -> Self {
        Self::new(ParamType::Array, description)
    }

    pub fn object(description: impl Into<String>) -> Self {
        Self::new(ParamType::Object, description)
    }

    /// Restrict a string parameter to a fixed set of values.
    pub fn with_enum<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Value filled in when the caller omits the parameter.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    fn check(&self, name: &str, value: &Value) -> Result<(), SchemaViolation> {
        if !self.kind.accepts(value) {
            return Err(SchemaViolation::WrongType {
                name: name.to_string(),
                expected: self.kind,
                found: json_type_name(value),
            });
        }
        if let Some(allowed) = &self.enum_values {
            let matches = value
                .as_str()
                .is_some_and(|s| allowed.iter().any(|a| a == s));
            if !matches {
                return Err(SchemaViolation::NotInEnum {
                    name: name.to_string(),
                    value: value.to_string(),
                    allowed: allowed.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Reasons a call's arguments were rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaViolation {
    #[error("missing required parameter '{0}'")]
    MissingRequired(String),

    #[error("parameter '{name}' must be of type {expected}, got {found}")]
    WrongType {
        name: String,
        expected: ParamType,
        found: &'static str,
    },

    #[error("parameter '{name}' has value {value}, expected one of {allowed:?}")]
    NotInEnum {
        name: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("unknown parameter '{0}'")]
    Unknown(String),
}

/// Typed description of the arguments a capability accepts.
///
/// # Example
///
/// ```rust
/// use reelcraft_core::schema::{ParameterSchema, ParameterSpec};
/// use serde_json::json;
///
/// let schema = ParameterSchema::new()
///     .required("text", ParameterSpec::string("Narration text"))
///     .optional(
///         "voice_type",
///         ParameterSpec::string("Voice").with_enum(["male", "female", "neutral"]).with_default("neutral"),
///     );
///
/// let params = json!({"text": "Hello"}).as_object().cloned().unwrap();
/// let validated = schema.validate(&params).unwrap();
/// assert_eq!(validated["voice_type"], "neutral");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub properties: BTreeMap<String, ParameterSpec>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl ParameterSchema {
    /// Create an empty schema (a capability that takes no arguments).
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a required parameter.
    pub fn required(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        let name = name.into();
        if !self.required.contains(&name) {
            self.required.push(name.clone());
        }
        self.properties.insert(name, spec);
        self
    }

    /// Declare an optional parameter.
    pub fn optional(mut self, name: impl Into<String>, spec: ParameterSpec) -> Self {
        self.properties.insert(name.into(), spec);
        self
    }

    /// Validate arguments and return them with defaults filled in.
    ///
    /// Fails closed: unknown keys are rejected rather than passed through.
    pub fn validate(&self, params: &Params) -> Result<Params, SchemaViolation> {
        for key in params.keys() {
            if !self.properties.contains_key(key) {
                return Err(SchemaViolation::Unknown(key.clone()));
            }
        }

        let mut validated = Params::new();
        for (name, spec) in &self.properties {
            match params.get(name) {
                Some(Value::Null) | None => {
                    if self.required.contains(name) {
                        return Err(SchemaViolation::MissingRequired(name.clone()));
                    }
                    if let Some(default) = &spec.default {
                        validated.insert(name.clone(), default.clone());
                    }
                }
                Some(value) => {
                    spec.check(name, value)?;
                    validated.insert(name.clone(), value.clone());
                }
            }
        }
        Ok(validated)
    }

    /// Export as a JSON Schema object for the reasoning engine.
    pub fn to_json_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .properties
            .iter()
            .map(|(name, spec)| {
                let value = serde_json::to_value(spec).unwrap_or(Value::Null);
                (name.clone(), value)
            })
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": self.required,
        })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
