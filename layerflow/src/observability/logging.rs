//! Subscriber setup for layerflow's `tracing` output.
//!
//! Stages and chains only emit `tracing` events; installing a subscriber is
//! the host's choice. [`init_logging`] is a convenience for hosts that do
//! not configure one themselves.

use thiserror::Error;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Why logging could not be installed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoggingError {
    /// The filter directive did not parse.
    #[error("invalid log filter {filter}: {reason}")]
    InvalidFilter {
        /// The rejected directive.
        filter: String,
        /// Parser message.
        reason: String,
    },

    /// A global subscriber is already installed.
    #[error("logging already initialised: {0}")]
    AlreadyInitialised(String),
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Whether to install anything at all.
    pub enabled: bool,
    /// Filter directive, e.g. `info` or `layerflow=debug,warn`.
    pub filter: String,
    /// JSON lines instead of human-readable output.
    pub json: bool,
    /// Log span open/close events.
    pub span_events: bool,
    /// Include file and line.
    pub file_line_info: bool,
    /// Include the module path.
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Human-readable output at debug level.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            filter: "debug".to_string(),
            json: false,
            span_events: true,
            file_line_info: true,
            include_target: true,
        }
    }

    /// JSON output at info level.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            filter: "info".to_string(),
            json: true,
            span_events: false,
            file_line_info: false,
            include_target: true,
        }
    }

    /// Replaces the filter directive.
    #[must_use]
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = filter.into();
        self
    }
}

/// Builds the filter for a config.
pub fn env_filter(config: &LogConfig) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(&config.filter).map_err(|e| LoggingError::InvalidFilter {
        filter: config.filter.clone(),
        reason: e.to_string(),
    })
}

/// Installs a global subscriber.
///
/// Calling it a second time returns [`LoggingError::AlreadyInitialised`].
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    if !config.enabled {
        return Ok(());
    }
    let filter = env_filter(config)?;
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_span_events(span_events)
            .with_file(config.file_line_info)
            .with_line_number(config.file_line_info)
            .with_target(config.include_target)
            .with_filter(filter)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialised(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let dev = LogConfig::development();
        assert!(!dev.json);
        assert_eq!(dev.filter, "debug");

        let prod = LogConfig::default();
        assert!(prod.json);
        assert_eq!(prod.filter, "info");
    }

    #[test]
    fn test_invalid_filter_is_rejected() {
        let config = LogConfig::production().with_filter("layerflow=notalevel");
        assert!(matches!(
            init_logging(&config),
            Err(LoggingError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_disabled_is_a_no_op() {
        let config = LogConfig {
            enabled: false,
            ..LogConfig::production()
        };
        assert!(init_logging(&config).is_ok());
    }

    #[test]
    fn test_second_init_is_an_error() {
        let config = LogConfig::production().with_filter("warn");
        // Another test binary thread may have won the first install.
        let _ = init_logging(&config);
        assert!(matches!(
            init_logging(&config),
            Err(LoggingError::AlreadyInitialised(_))
        ));
    }
}
