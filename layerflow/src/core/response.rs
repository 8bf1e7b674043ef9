//! The response produced by a handler or a short-circuiting stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::Request;

/// A response to a [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Mirrors the originating request identifier.
    pub id: String,
    /// Status code.
    pub status_code: u16,
    /// Header mapping.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Opaque body payload.
    #[serde(default)]
    pub body: serde_json::Value,
    /// Error description when the response reports a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Free-form annotations.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// When the response was produced.
    pub timestamp: DateTime<Utc>,
    /// Measured processing time.
    #[serde(default)]
    pub duration: Duration,
}

impl Response {
    /// Creates a response for a request with the given status.
    #[must_use]
    pub fn new(req: &Request, status_code: u16) -> Self {
        Self {
            id: req.id.clone(),
            status_code,
            headers: HashMap::new(),
            body: serde_json::Value::Null,
            error: None,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
            duration: Duration::ZERO,
        }
    }

    /// Creates a 200 response.
    #[must_use]
    pub fn ok(req: &Request) -> Self {
        Self::new(req, 200)
    }

    /// Creates a failure response carrying an error description.
    #[must_use]
    pub fn error(req: &Request, status_code: u16, error: impl Into<String>) -> Self {
        let mut resp = Self::new(req, status_code);
        resp.error = Some(error.into());
        resp
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns true for a 2xx status without an error.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code) && self.error.is_none()
    }
}
