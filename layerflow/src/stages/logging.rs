//! Request/response logging through `tracing`.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::{debug, error, info};

use super::Controls;
use crate::config::StageOptions;
use crate::context::CallContext;
use crate::core::{Request, Response};
use crate::errors::{ConfigError, LayerflowError};
use crate::middleware::{Middleware, Next};
use crate::observability::SpanTimer;

const HEALTH_PATHS: [&str; 5] = ["/health", "/healthz", "/ping", "/ready", "/live"];
const SENSITIVE_HEADERS: [&str; 6] = [
    "authorization",
    "cookie",
    "set-cookie",
    "x-api-key",
    "x-auth-token",
    "proxy-authorization",
];

/// Logs a summary line when a request starts and when it completes.
///
/// Options: `skip_paths` (array of exact paths not logged) and
/// `skip_health_check` (skip the usual health probe paths, default on).
/// Sensitive headers are redacted in debug output.
#[derive(Debug)]
pub struct LoggingMiddleware {
    name: String,
    controls: Controls,
    skip_paths: RwLock<HashSet<String>>,
}

impl Default for LoggingMiddleware {
    fn default() -> Self {
        Self::new("logging")
    }
}

impl LoggingMiddleware {
    /// Creates a logging stage with priority 10 that skips health probes.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            controls: Controls::new(10),
            skip_paths: RwLock::new(HEALTH_PATHS.iter().map(ToString::to_string).collect()),
        }
    }

    /// Returns true if requests to `path` are not logged.
    #[must_use]
    pub fn skips(&self, path: &str) -> bool {
        self.skip_paths.read().contains(path)
    }

    /// Enables or disables the stage.
    pub fn set_enabled(&self, enabled: bool) {
        self.controls.set_enabled(enabled);
    }
}

/// Copies headers, replacing credentials with `[REDACTED]`.
#[must_use]
pub fn sanitize_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
    headers
        .iter()
        .map(|(k, v)| {
            let value = if SENSITIVE_HEADERS.contains(&k.to_ascii_lowercase().as_str()) {
                "[REDACTED]".to_string()
            } else {
                v.clone()
            };
            (k.clone(), value)
        })
        .collect()
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        ctx: &CallContext,
        req: Request,
        next: Next,
    ) -> Result<Response, LayerflowError> {
        if self.skips(&req.path) {
            return next.run(ctx, req).await;
        }

        let request_id = req.id.clone();
        let method = req.method.clone();
        let path = req.path.clone();
        info!(request_id = %request_id, method = %method, path = %path, "Request started");
        debug!(request_id = %request_id, headers = ?sanitize_headers(&req.headers), "Request headers");

        let timer = SpanTimer::start(format!("{} {}", method, path));
        let outcome = next.run(ctx, req).await;
        let duration_ms = timer.finish().as_secs_f64() * 1000.0;

        match &outcome {
            Ok(resp) => info!(
                request_id = %request_id,
                method = %method,
                path = %path,
                status_code = resp.status_code,
                duration_ms,
                "Request completed"
            ),
            Err(err) => error!(
                request_id = %request_id,
                method = %method,
                path = %path,
                error = %err,
                duration_ms,
                "Request failed"
            ),
        }
        outcome
    }

    fn configure(&self, options: &StageOptions) -> Result<(), ConfigError> {
        self.controls.apply(options)?;
        let skip_health = options.get_bool("skip_health_check")?.unwrap_or(true);
        let extra: Option<Vec<String>> = match options.get("skip_paths") {
            Some(value) => Some(
                serde_json::from_value(value.clone())
                    .map_err(|_| ConfigError::invalid("skip_paths", "expected an array of strings"))?,
            ),
            None => None,
        };

        let mut skip = self.skip_paths.write();
        if let Some(paths) = extra {
            skip.clear();
            skip.extend(paths);
        }
        for path in HEALTH_PATHS {
            if skip_health {
                skip.insert(path.to_string());
            } else {
                skip.remove(path);
            }
        }
        Ok(())
    }

    fn enabled(&self) -> bool {
        self.controls.enabled()
    }

    fn priority(&self) -> i32 {
        self.controls.priority()
    }
}
