//! The request payload threaded through a pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::utils::generate_uuid;

/// A request flowing through a pipeline.
///
/// Stages may annotate `headers` and `metadata` before delegating onward;
/// the `id` is fixed at creation and mirrored into the [`Response`].
///
/// [`Response`]: super::Response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Request identifier.
    pub id: String,
    /// Method or verb.
    pub method: String,
    /// Request path, used by path conditions.
    pub path: String,
    /// Header mapping.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Opaque body payload.
    #[serde(default)]
    pub body: serde_json::Value,
    /// Free-form annotations added by stages.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
}

impl Request {
    /// Creates a new request with a random identifier.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: generate_uuid().to_string(),
            method: method.into(),
            path: path.into(),
            headers: HashMap::new(),
            body: serde_json::Value::Null,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Creates a `GET` request for a path.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    /// Sets the identifier.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Returns a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::get("/")
    }
}
