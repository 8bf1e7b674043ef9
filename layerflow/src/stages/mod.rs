//! Built-in stages.
//!
//! Each stage understands `enabled` and `priority` in its options, plus the
//! keys documented on the stage itself.

mod logging;
mod metrics;
mod request_id;

pub use logging::{sanitize_headers, LoggingMiddleware};
pub use metrics::{MetricsMiddleware, MetricsSnapshot};
pub use request_id::{RequestIdMiddleware, REQUEST_ID_HEADER};

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use crate::config::StageOptions;
use crate::errors::ConfigError;

/// The enable flag and priority shared by every built-in stage.
#[derive(Debug)]
struct Controls {
    enabled: AtomicBool,
    priority: AtomicI32,
}

impl Controls {
    fn new(priority: i32) -> Self {
        Self {
            enabled: AtomicBool::new(true),
            priority: AtomicI32::new(priority),
        }
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn priority(&self) -> i32 {
        self.priority.load(Ordering::SeqCst)
    }

    fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::SeqCst);
    }

    fn apply(&self, options: &StageOptions) -> Result<(), ConfigError> {
        if let Some(enabled) = options.get_bool("enabled")? {
            self.set_enabled(enabled);
        }
        if let Some(priority) = options.get_i64("priority")? {
            let priority = i32::try_from(priority)
                .map_err(|_| ConfigError::invalid("priority", "out of range"))?;
            self.set_priority(priority);
        }
        Ok(())
    }
}
