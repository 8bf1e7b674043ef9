//! Typed configuration records for pipelines and the manager.
//!
//! These are plain `serde` records; reading them from a file is left to the
//! host application.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use super::duration::serde_millis;
use super::StageOptions;
use crate::core::Response;
use crate::errors::ConfigError;
use crate::middleware::{handler_fn, Handler};

/// One stage entry: `{name, type, enabled, priority, config}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique name within the pipeline.
    pub name: String,
    /// Factory key, e.g. `resilience` or `logging`.
    #[serde(rename = "type")]
    pub stage_type: String,
    /// Whether the stage starts enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Ordering priority; higher runs first.
    #[serde(default)]
    pub priority: i32,
    /// Stage specific options.
    #[serde(default)]
    pub config: StageOptions,
}

impl StageConfig {
    /// Creates an enabled stage entry with no options.
    pub fn new(name: impl Into<String>, stage_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage_type: stage_type.into(),
            enabled: true,
            priority: 0,
            config: StageOptions::default(),
        }
    }

    /// Sets the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Replaces the options.
    #[must_use]
    pub fn with_config(mut self, config: StageOptions) -> Self {
        self.config = config;
        self
    }

    /// Checks required fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::MissingField("name".to_string()));
        }
        if self.stage_type.trim().is_empty() {
            return Err(ConfigError::MissingField(format!("{}.type", self.name)));
        }
        Ok(())
    }

    /// The options handed to the factory, with `enabled` and `priority`
    /// folded in.
    #[must_use]
    pub fn effective_options(&self) -> StageOptions {
        self.config
            .clone()
            .with("enabled", self.enabled)
            .with("priority", self.priority)
    }
}

/// The terminal handler of a configured pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandlerConfig {
    /// Answers 200 with the request body and headers.
    Echo,
    /// Answers a fixed status with `{"message": ...}`.
    Status {
        /// Status code to answer.
        #[serde(default = "default_status_code")]
        status_code: u16,
        /// Message placed in the body.
        #[serde(default = "default_message")]
        message: String,
    },
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self::Status {
            status_code: default_status_code(),
            message: default_message(),
        }
    }
}

impl HandlerConfig {
    /// Builds the handler.
    #[must_use]
    pub fn build(&self) -> Handler {
        match self.clone() {
            Self::Echo => handler_fn(|_ctx, req| async move {
                let mut resp = Response::ok(&req).with_body(req.body.clone());
                for (name, value) in &req.headers {
                    resp = resp.with_header(name.clone(), value.clone());
                }
                Ok(resp)
            }),
            Self::Status {
                status_code,
                message,
            } => handler_fn(move |_ctx, req| {
                let body = json!({ "message": message });
                async move { Ok(Response::new(&req, status_code).with_body(body)) }
            }),
        }
    }
}

/// A synchronous, priority-ordered chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Pipeline name.
    pub name: String,
    /// Stages, ordered by priority once added.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    /// Terminal handler.
    #[serde(default)]
    pub handler: HandlerConfig,
}

/// A bounded-concurrency chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncChainConfig {
    /// Pipeline name.
    pub name: String,
    /// Maximum simultaneous executions.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Per-execution timeout.
    #[serde(default = "default_async_timeout", with = "serde_millis")]
    pub timeout: Duration,
    /// Stages, ordered by priority once added.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    /// Terminal handler.
    #[serde(default)]
    pub handler: HandlerConfig,
}

impl AsyncChainConfig {
    /// Checks the concurrency settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::invalid(
                format!("{}.max_concurrency", self.name),
                "must be at least 1",
            ));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::invalid(
                format!("{}.timeout", self.name),
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// When a dependency-ordered stage applies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionKind {
    /// Every request.
    #[default]
    Always,
    /// Requests whose path matches one of `path_patterns`.
    Path,
}

/// A stage in a dependency-ordered chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyStageConfig {
    /// The stage itself.
    #[serde(flatten)]
    pub stage: StageConfig,
    /// Stages that must run first.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Tolerate missing dependencies.
    #[serde(default)]
    pub optional: bool,
    /// Applicability rule.
    #[serde(default)]
    pub condition: ConditionKind,
    /// Patterns for [`ConditionKind::Path`].
    #[serde(default)]
    pub path_patterns: Vec<String>,
}

impl DependencyStageConfig {
    /// Checks the stage and its condition.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.stage.validate()?;
        if self.condition == ConditionKind::Path && self.path_patterns.is_empty() {
            return Err(ConfigError::invalid(
                format!("{}.path_patterns", self.stage.name),
                "path condition needs at least one pattern",
            ));
        }
        Ok(())
    }
}

/// A dependency-ordered chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyChainConfig {
    /// Pipeline name.
    pub name: String,
    /// Stages with their dependencies.
    #[serde(default)]
    pub stages: Vec<DependencyStageConfig>,
    /// Terminal handler.
    #[serde(default)]
    pub handler: HandlerConfig,
}

/// Everything the manager can be configured with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Synchronous chains.
    pub chains: Vec<ChainConfig>,
    /// Bounded-concurrency chains.
    pub async_chains: Vec<AsyncChainConfig>,
    /// Dependency-ordered chains.
    pub dependency_chains: Vec<DependencyChainConfig>,
    /// Group size used by batch processors.
    pub batch_size: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            chains: Vec::new(),
            async_chains: Vec::new(),
            dependency_chains: Vec::new(),
            batch_size: default_batch_size(),
        }
    }
}

impl ManagerConfig {
    /// Parses a JSON document.
    pub fn from_json(value: Value) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(value)?)
    }
}

const fn default_true() -> bool {
    true
}

const fn default_status_code() -> u16 {
    200
}

fn default_message() -> String {
    "OK".to_string()
}

const fn default_max_concurrency() -> usize {
    10
}

const fn default_async_timeout() -> Duration {
    Duration::from_secs(30)
}

pub(crate) const fn default_batch_size() -> usize {
    10
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CallContext;
    use crate::core::Request;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stage_config_defaults() {
        let stage: StageConfig =
            serde_json::from_value(json!({"name": "retry", "type": "resilience"})).unwrap();
        assert!(stage.enabled);
        assert_eq!(stage.priority, 0);
        assert!(stage.config.is_empty());

        let opts = stage.effective_options();
        assert_eq!(opts.get_bool("enabled").unwrap(), Some(true));
    }

    #[test]
    fn test_manager_config_from_json() {
        let config = ManagerConfig::from_json(json!({
            "async_chains": [{"name": "bg", "max_concurrency": 4, "timeout": "2s"}],
            "dependency_chains": [{
                "name": "api",
                "stages": [
                    {"name": "auth", "type": "logging"},
                    {"name": "admin", "type": "logging", "dependencies": ["auth"],
                     "condition": "path", "path_patterns": ["/admin/*"]}
                ],
                "handler": {"type": "echo"}
            }]
        }))
        .unwrap();

        assert_eq!(config.batch_size, 10);
        assert_eq!(config.async_chains[0].max_concurrency, 4);
        assert_eq!(config.async_chains[0].timeout, Duration::from_secs(2));
        let admin = &config.dependency_chains[0].stages[1];
        assert_eq!(admin.stage.name, "admin");
        assert_eq!(admin.condition, ConditionKind::Path);
        assert_eq!(config.dependency_chains[0].handler, HandlerConfig::Echo);
    }

    #[test]
    fn test_async_defaults_and_validation() {
        let config: AsyncChainConfig = serde_json::from_value(json!({"name": "bg"})).unwrap();
        assert_eq!(config.max_concurrency, 10);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());

        let bad = AsyncChainConfig {
            max_concurrency: 0,
            ..config
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_path_condition_requires_patterns() {
        let stage = DependencyStageConfig {
            stage: StageConfig::new("admin", "logging"),
            dependencies: vec![],
            optional: false,
            condition: ConditionKind::Path,
            path_patterns: vec![],
        };
        assert!(stage.validate().is_err());
    }

    #[test]
    fn test_unknown_handler_type_is_rejected() {
        let result = serde_json::from_value::<HandlerConfig>(json!({"type": "proxy"}));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_status_handler() {
        let handler = HandlerConfig::default().build();
        let resp = handler(CallContext::background(), Request::get("/")).await.unwrap();
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.body, json!({"message": "OK"}));
    }

    #[tokio::test]
    async fn test_echo_handler() {
        let handler = HandlerConfig::Echo.build();
        let req = Request::new("POST", "/echo")
            .with_header("x-trace", "abc")
            .with_body(json!({"n": 1}));
        let resp = handler(CallContext::background(), req).await.unwrap();
        assert_eq!(resp.body, json!({"n": 1}));
        assert_eq!(resp.headers.get("x-trace").map(String::as_str), Some("abc"));
    }
}
