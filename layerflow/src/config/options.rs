//! Untyped stage options, converted to typed values at the boundary.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use super::duration::duration_from_value;
use crate::errors::ConfigError;

/// A JSON object of stage options as handed over by a configuration loader.
///
/// Getters return `Ok(None)` for absent keys and an error for keys that are
/// present with the wrong type, so a typo'd value never silently falls back
/// to a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageOptions(Map<String, Value>);

impl StageOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds options from a JSON value, which must be an object (or null).
    pub fn from_value(value: Value) -> Result<Self, ConfigError> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(ConfigError::Malformed(format!(
                "stage options must be an object, got {other}"
            ))),
        }
    }

    /// Adds an entry, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Returns the raw value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns true when no options are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reads a boolean.
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.typed(key, "a boolean", Value::as_bool)
    }

    /// Reads a signed integer.
    pub fn get_i64(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        self.typed(key, "an integer", Value::as_i64)
    }

    /// Reads a `u32`.
    pub fn get_u32(&self, key: &str) -> Result<Option<u32>, ConfigError> {
        self.typed(key, "a non-negative integer", |v| {
            v.as_u64().and_then(|n| u32::try_from(n).ok())
        })
    }

    /// Reads a float; integers are accepted.
    pub fn get_f64(&self, key: &str) -> Result<Option<f64>, ConfigError> {
        self.typed(key, "a number", Value::as_f64)
    }

    /// Reads a string.
    pub fn get_str(&self, key: &str) -> Result<Option<&str>, ConfigError> {
        self.typed(key, "a string", Value::as_str)
    }

    /// Reads a duration (milliseconds or a suffixed string).
    pub fn get_duration(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        self.0
            .get(key)
            .map(|v| {
                duration_from_value(v).map_err(|e| match e {
                    ConfigError::InvalidField { reason, .. } => ConfigError::invalid(key, reason),
                    other => other,
                })
            })
            .transpose()
    }

    /// Reads a nested options section.
    pub fn section(&self, key: &str) -> Result<Option<Self>, ConfigError> {
        match self.0.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(Self(map.clone()))),
            Some(other) => Err(ConfigError::invalid(key, format!("expected an object, got {other}"))),
        }
    }

    /// Deserializes the whole options object into a typed record.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        Ok(serde_json::from_value(Value::Object(self.0.clone()))?)
    }

    fn typed<'a, T>(
        &'a self,
        key: &str,
        expected: &str,
        convert: impl FnOnce(&'a Value) -> Option<T>,
    ) -> Result<Option<T>, ConfigError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(value) => convert(value)
                .map(Some)
                .ok_or_else(|| ConfigError::invalid(key, format!("expected {expected}, got {value}"))),
        }
    }
}

impl From<Map<String, Value>> for StageOptions {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> StageOptions {
        StageOptions::from_value(json!({
            "enabled": false,
            "priority": 42,
            "retry": {"max_attempts": 5, "initial_delay": "50ms"},
            "name": "edge",
        }))
        .unwrap()
    }

    #[test]
    fn test_typed_getters() {
        let opts = options();
        assert_eq!(opts.get_bool("enabled").unwrap(), Some(false));
        assert_eq!(opts.get_i64("priority").unwrap(), Some(42));
        assert_eq!(opts.get_str("name").unwrap(), Some("edge"));
        assert_eq!(opts.get_bool("missing").unwrap(), None);
    }

    #[test]
    fn test_wrong_type_is_error() {
        let opts = options();
        let err = opts.get_bool("priority").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidField { ref field, .. } if field == "priority"));
    }

    #[test]
    fn test_section_and_duration() {
        let retry = options().section("retry").unwrap().unwrap();
        assert_eq!(retry.get_u32("max_attempts").unwrap(), Some(5));
        assert_eq!(
            retry.get_duration("initial_delay").unwrap(),
            Some(Duration::from_millis(50))
        );
        assert!(options().section("name").is_err());
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        assert!(StageOptions::from_value(json!([1, 2])).is_err());
        assert!(StageOptions::from_value(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_builder() {
        let opts = StageOptions::new().with("enabled", true).with("priority", 7);
        assert_eq!(opts.get_bool("enabled").unwrap(), Some(true));
        assert_eq!(opts.get_i64("priority").unwrap(), Some(7));
    }
}
