//! Duration parsing for configuration values.
//!
//! A duration is either a number of milliseconds or a string with one of
//! the suffixes `ms`, `s`, `m` or `h` (`"250ms"`, `"1.5s"`, `"2m"`). A bare
//! numeric string is read as milliseconds.

use serde::de::{self, Deserializer, Visitor};
use serde::Serializer;
use std::fmt;
use std::time::Duration;

use crate::errors::ConfigError;

/// Parses a duration string.
pub fn parse_duration(input: &str) -> Result<Duration, ConfigError> {
    let trimmed = input.trim();
    let (number, scale_ms) = if let Some(n) = trimmed.strip_suffix("ms") {
        (n, 1.0)
    } else if let Some(n) = trimmed.strip_suffix('s') {
        (n, 1_000.0)
    } else if let Some(n) = trimmed.strip_suffix('m') {
        (n, 60_000.0)
    } else if let Some(n) = trimmed.strip_suffix('h') {
        (n, 3_600_000.0)
    } else {
        (trimmed, 1.0)
    };

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| ConfigError::invalid("duration", format!("cannot parse {input:?}")))?;
    millis_to_duration(value * scale_ms)
        .ok_or_else(|| ConfigError::invalid("duration", format!("{input:?} is negative or too large")))
}

/// Reads a duration from a JSON value.
pub fn duration_from_value(value: &serde_json::Value) -> Result<Duration, ConfigError> {
    match value {
        serde_json::Value::Number(n) => n
            .as_f64()
            .and_then(millis_to_duration)
            .ok_or_else(|| ConfigError::invalid("duration", format!("{n} is not a valid millisecond count"))),
        serde_json::Value::String(s) => parse_duration(s),
        other => Err(ConfigError::invalid(
            "duration",
            format!("expected number or string, got {other}"),
        )),
    }
}

fn millis_to_duration(ms: f64) -> Option<Duration> {
    if ms.is_finite() && ms >= 0.0 {
        Duration::try_from_secs_f64(ms / 1_000.0).ok()
    } else {
        None
    }
}

/// Serde adapter for `Duration` fields: accepts milliseconds or suffixed
/// strings, writes milliseconds.
pub mod serde_millis {
    use super::{de, fmt, millis_to_duration, parse_duration, Deserializer, Duration, Serializer, Visitor};

    /// Serializes a duration as whole milliseconds.
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserializes a duration from milliseconds or a suffixed string.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl Visitor<'_> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("milliseconds or a duration string such as \"500ms\" or \"2s\"")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
            Ok(Duration::from_millis(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
            u64::try_from(v)
                .map(Duration::from_millis)
                .map_err(|_| E::custom("duration must not be negative"))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Duration, E> {
            millis_to_duration(v).ok_or_else(|| E::custom("duration must be a finite, non-negative number"))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
            parse_duration(v).map_err(E::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1_500));
        assert_eq!(parse_duration("3m").unwrap(), Duration::from_secs(180));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3_600));
        assert_eq!(parse_duration("40").unwrap(), Duration::from_millis(40));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("-5s").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn test_from_value() {
        assert_eq!(duration_from_value(&json!(100)).unwrap(), Duration::from_millis(100));
        assert_eq!(duration_from_value(&json!("1s")).unwrap(), Duration::from_secs(1));
        assert!(duration_from_value(&json!(true)).is_err());
    }

    #[test]
    fn test_serde_millis_field() {
        #[derive(serde::Deserialize, serde::Serialize)]
        struct Holder {
            #[serde(with = "serde_millis")]
            timeout: Duration,
        }

        let h: Holder = serde_json::from_value(json!({"timeout": "2s"})).unwrap();
        assert_eq!(h.timeout, Duration::from_secs(2));
        let h: Holder = serde_json::from_value(json!({"timeout": 75})).unwrap();
        assert_eq!(h.timeout, Duration::from_millis(75));
        assert_eq!(serde_json::to_value(&h).unwrap(), json!({"timeout": 75}));
    }
}
