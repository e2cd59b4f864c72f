//! # Environment-Based Configuration
//!
//! Engine settings can be supplied through environment variables so a
//! deployment can be tuned without a rebuild.
//!
//! ## Environment Variables
//!
//! ### Execution
//! - `REELCRAFT_STRATEGY` - `plan` or `conversation` (default: plan)
//! - `REELCRAFT_MAX_ITERATIONS` - Conversation-loop iteration cap, 1-100 (default: 10)
//! - `REELCRAFT_MAX_REPLANS` - Replanning rounds per task (default: 5)
//! - `REELCRAFT_CAPABILITY_TIMEOUT_SECS` - Default per-call timeout (default: 300)
//!
//! ### Reasoning Engine
//! - `REELCRAFT_LLM_BASE_URL` - OpenAI-compatible API root (default: https://api.openai.com/v1)
//! - `REELCRAFT_LLM_MODEL` - Model name (default: gpt-4o)
//! - `REELCRAFT_LLM_TIMEOUT_SECS` - HTTP timeout (default: 60)
//! - `OPENAI_API_KEY` - Bearer token for the reasoning engine

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::{env, time::Duration};

use crate::conversation::{ConversationConfig, DEFAULT_MAX_ITERATIONS};
use crate::plan_engine::{DEFAULT_MAX_REPLANS, PlanEngineConfig};

/// Default OpenAI-compatible API root.
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.openai.com/v1";
/// Default model name.
pub const DEFAULT_LLM_MODEL: &str = "gpt-4o";

const MAX_ITERATIONS_LIMIT: usize = 100;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid environment variable '{key}': {message}")]
    InvalidEnvVar { key: String, message: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Which execution engine drives a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    #[default]
    Plan,
    Conversation,
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "plan" => Ok(StrategyKind::Plan),
            "conversation" => Ok(StrategyKind::Conversation),
            other => Err(format!(
                "unknown strategy '{}', expected 'plan' or 'conversation'",
                other
            )),
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyKind::Plan => write!(f, "plan"),
            StrategyKind::Conversation => write!(f, "conversation"),
        }
    }
}

/// Connection settings for the reasoning engine.
#[derive(Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("has_api_key", &self.api_key.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Validated engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub strategy: StrategyKind,
    pub max_iterations: usize,
    pub max_replans: usize,
    pub capability_timeout: Duration,
    pub llm: LlmConfig,
}

impl EngineConfig {
    pub fn conversation(&self) -> ConversationConfig {
        ConversationConfig {
            max_iterations: self.max_iterations,
        }
    }

    pub fn plan_engine(&self) -> PlanEngineConfig {
        PlanEngineConfig {
            max_replans: self.max_replans,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        // Defaults always validate.
        let builder = EngineConfigBuilder::default();
        EngineConfig {
            strategy: builder.strategy,
            max_iterations: builder.max_iterations,
            max_replans: builder.max_replans,
            capability_timeout: Duration::from_secs(builder.capability_timeout_secs),
            llm: builder.llm,
        }
    }
}

/// Builder for `EngineConfig` with environment variable support
#[derive(Debug, Clone)]
pub struct EngineConfigBuilder {
    strategy: StrategyKind,
    max_iterations: usize,
    max_replans: usize,
    capability_timeout_secs: u64,
    llm: LlmConfig,
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Plan,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_replans: DEFAULT_MAX_REPLANS,
            capability_timeout_secs: 300,
            llm: LlmConfig::default(),
        }
    }
}

impl EngineConfigBuilder {
    /// Create a new builder with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any environment variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::default();

        if let Some(strategy) = get_env_string("REELCRAFT_STRATEGY") {
            let kind = strategy
                .parse::<StrategyKind>()
                .map_err(|message| ConfigError::InvalidEnvVar {
                    key: "REELCRAFT_STRATEGY".to_string(),
                    message,
                })?;
            builder = builder.strategy(kind);
        }
        if let Some(iterations) = get_env_usize("REELCRAFT_MAX_ITERATIONS")? {
            builder = builder.max_iterations(iterations);
        }
        if let Some(replans) = get_env_usize("REELCRAFT_MAX_REPLANS")? {
            builder = builder.max_replans(replans);
        }
        if let Some(timeout) = get_env_u64("REELCRAFT_CAPABILITY_TIMEOUT_SECS")? {
            builder = builder.capability_timeout_secs(timeout);
        }

        // Reasoning engine
        if let Some(url) = get_env_string("REELCRAFT_LLM_BASE_URL") {
            builder = builder.llm_base_url(url);
        }
        if let Some(model) = get_env_string("REELCRAFT_LLM_MODEL") {
            builder = builder.llm_model(model);
        }
        if let Some(timeout) = get_env_u64("REELCRAFT_LLM_TIMEOUT_SECS")? {
            builder = builder.llm_timeout_secs(timeout);
        }
        if let Some(key) = get_env_string("OPENAI_API_KEY").filter(|k| !k.trim().is_empty()) {
            builder = builder.api_key(key);
        }

        Ok(builder)
    }

    /// Select the execution strategy
    #[must_use]
    pub fn strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the conversation-loop iteration cap
    #[must_use]
    pub fn max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    /// Set the replanning round cap
    #[must_use]
    pub fn max_replans(mut self, replans: usize) -> Self {
        self.max_replans = replans;
        self
    }

    /// Set the default per-call capability timeout in seconds
    #[must_use]
    pub fn capability_timeout_secs(mut self, secs: u64) -> Self {
        self.capability_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn llm_base_url(mut self, url: impl Into<String>) -> Self {
        self.llm.base_url = url.into();
        self
    }

    #[must_use]
    pub fn llm_model(mut self, model: impl Into<String>) -> Self {
        self.llm.model = model.into();
        self
    }

    #[must_use]
    pub fn llm_timeout_secs(mut self, secs: u64) -> Self {
        self.llm.timeout = Duration::from_secs(secs);
        self
    }

    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.llm.api_key = Some(key.into());
        self
    }

    /// Validate configuration and build `EngineConfig`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the configuration is invalid.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        self.validate()?;

        Ok(EngineConfig {
            strategy: self.strategy,
            max_iterations: self.max_iterations,
            max_replans: self.max_replans,
            capability_timeout: Duration::from_secs(self.capability_timeout_secs),
            llm: self.llm,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "max_iterations must be greater than 0".to_string(),
            ));
        }
        if self.max_iterations > MAX_ITERATIONS_LIMIT {
            return Err(ConfigError::ValidationError(format!(
                "max_iterations must be <= {}",
                MAX_ITERATIONS_LIMIT
            )));
        }
        if self.capability_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "capability_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.llm.timeout.is_zero() {
            return Err(ConfigError::ValidationError(
                "llm timeout must be greater than 0".to_string(),
            ));
        }
        if !(self.llm.base_url.starts_with("http://") || self.llm.base_url.starts_with("https://"))
        {
            return Err(ConfigError::ValidationError(format!(
                "llm base url '{}' must start with http:// or https://",
                self.llm.base_url
            )));
        }
        if self.llm.model.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "llm model cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

// Environment variable helper functions

fn get_env_string(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn get_env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid u64 value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}

fn get_env_usize(key: &str) -> Result<Option<usize>, ConfigError> {
    match env::var(key) {
        Ok(val) => val
            .parse::<usize>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnvVar {
                key: key.to_string(),
                message: format!("invalid usize value '{val}': {e}"),
            }),
        Err(_) => Ok(None),
    }
}
