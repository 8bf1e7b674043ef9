//! Maps configured stage types to constructors.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{ResilienceConfig, StageConfig, StageOptions};
use crate::errors::ConfigError;
use crate::middleware::Middleware;
use crate::resilience::ResilienceMiddleware;
use crate::stages::{LoggingMiddleware, MetricsMiddleware, RequestIdMiddleware};

/// Builds a stage from its configuration record.
pub trait StageFactory: Send + Sync {
    /// Creates a configured stage.
    fn create(&self, config: &StageConfig) -> Result<Arc<dyn Middleware>, ConfigError>;
}

impl<F> StageFactory for F
where
    F: Fn(&StageConfig) -> Result<Arc<dyn Middleware>, ConfigError> + Send + Sync,
{
    fn create(&self, config: &StageConfig) -> Result<Arc<dyn Middleware>, ConfigError> {
        self(config)
    }
}

/// A registry of stage factories keyed by `type`.
#[derive(Default)]
pub struct FactoryRegistry {
    factories: RwLock<HashMap<String, Arc<dyn StageFactory>>>,
}

impl FactoryRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in stage types: `resilience`,
    /// `logging`, `metrics` and `request_id`.
    #[must_use]
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register("resilience", create_resilience);
        registry.register("logging", |config: &StageConfig| {
            configured(LoggingMiddleware::new(config.name.clone()), config)
        });
        registry.register("metrics", |config: &StageConfig| {
            configured(MetricsMiddleware::new(config.name.clone()), config)
        });
        registry.register("request_id", |config: &StageConfig| {
            configured(RequestIdMiddleware::new(config.name.clone()), config)
        });
        registry
    }

    /// Registers or replaces a factory.
    pub fn register(&self, stage_type: impl Into<String>, factory: impl StageFactory + 'static) {
        self.factories.write().insert(stage_type.into(), Arc::new(factory));
    }

    /// Removes a factory.
    pub fn unregister(&self, stage_type: &str) -> Result<(), ConfigError> {
        self.factories
            .write()
            .remove(stage_type)
            .map(|_| ())
            .ok_or_else(|| ConfigError::UnknownType(stage_type.to_string()))
    }

    /// Returns true if `stage_type` has a factory.
    #[must_use]
    pub fn contains(&self, stage_type: &str) -> bool {
        self.factories.read().contains_key(stage_type)
    }

    /// Registered types, sorted.
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().keys().cloned().collect();
        types.sort();
        types
    }

    /// Validates a record and builds its stage.
    pub fn create(&self, config: &StageConfig) -> Result<Arc<dyn Middleware>, ConfigError> {
        config.validate()?;
        let factory = self
            .factories
            .read()
            .get(&config.stage_type)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownType(config.stage_type.clone()))?;
        factory.create(config)
    }
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry").field("types", &self.types()).finish()
    }
}

fn configured<M>(stage: M, config: &StageConfig) -> Result<Arc<dyn Middleware>, ConfigError>
where
    M: Middleware + 'static,
{
    stage.configure(&config.effective_options())?;
    Ok(Arc::new(stage))
}

fn create_resilience(config: &StageConfig) -> Result<Arc<dyn Middleware>, ConfigError> {
    let typed: ResilienceConfig = config.config.deserialize()?;
    let stage = ResilienceMiddleware::new(config.name.clone(), typed)?;
    stage.configure(
        &StageOptions::new()
            .with("enabled", config.enabled)
            .with("priority", config.priority),
    )?;
    Ok(Arc::new(stage))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_builtin_types() {
        let registry = FactoryRegistry::with_builtins();
        assert_eq!(
            registry.types(),
            vec!["logging", "metrics", "request_id", "resilience"]
        );
    }

    #[test]
    fn test_create_applies_options() {
        let registry = FactoryRegistry::with_builtins();
        let config = StageConfig::new("log", "logging").with_priority(42);
        let stage = registry.create(&config).unwrap();
        assert_eq!(stage.name(), "log");
        assert_eq!(stage.priority(), 42);
    }

    #[test]
    fn test_create_resilience_from_typed_config() {
        let registry = FactoryRegistry::with_builtins();
        let options = StageOptions::from_value(json!({
            "retry": {"max_attempts": 5, "initial_delay": "10ms"},
            "rate_limit": {"tokens_per_second": 10.0, "bucket_size": 5}
        }))
        .unwrap();
        let config = StageConfig::new("guard", "resilience").with_config(options);
        let stage = registry.create(&config).unwrap();

        let stats = stage.resilience_stats().unwrap();
        assert_eq!(stats.retry.max_attempts, 5);
        assert!(stats.rate_limited);
    }

    #[test]
    fn test_unknown_type() {
        let registry = FactoryRegistry::with_builtins();
        let err = registry.create(&StageConfig::new("x", "jwt_auth")).err().unwrap();
        assert_eq!(err, ConfigError::UnknownType("jwt_auth".to_string()));
        assert!(registry.unregister("jwt_auth").is_err());
        assert!(registry.unregister("metrics").is_ok());
        assert!(!registry.contains("metrics"));
    }

    #[test]
    fn test_custom_factory_and_validation() {
        let registry = FactoryRegistry::new();
        registry.register("noop", |config: &StageConfig| {
            Ok::<_, ConfigError>(Arc::new(crate::middleware::FnMiddleware::passthrough(
                config.name.clone(),
            )) as Arc<dyn Middleware>)
        });
        assert!(registry.create(&StageConfig::new("a", "noop")).is_ok());
        assert_eq!(
            registry.create(&StageConfig::new("", "noop")).err(),
            Some(ConfigError::MissingField("name".to_string()))
        );
    }
}
