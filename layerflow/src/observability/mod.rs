//! Observability utilities.

pub mod logging;
mod tracing;

pub use self::tracing::SpanTimer;
pub use logging::{init_logging, LogConfig, LoggingError};
