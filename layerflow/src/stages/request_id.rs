//! Request id assignment.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::Controls;
use crate::config::StageOptions;
use crate::context::CallContext;
use crate::core::{Request, Response};
use crate::errors::{ConfigError, LayerflowError};
use crate::middleware::{Middleware, Next};
use crate::utils::generate_uuid_v7;

/// Default header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Ensures every request carries a request id header.
///
/// An existing non-empty header is kept; otherwise a time-ordered UUIDv7 is
/// assigned. The id is copied into request metadata under `request_id` and
/// echoed on the response. Option: `header_name`.
#[derive(Debug)]
pub struct RequestIdMiddleware {
    name: String,
    controls: Controls,
    header: RwLock<String>,
}

impl Default for RequestIdMiddleware {
    fn default() -> Self {
        Self::new("request_id")
    }
}

impl RequestIdMiddleware {
    /// Creates the stage with priority 1000 so it runs first.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            controls: Controls::new(1000),
            header: RwLock::new(REQUEST_ID_HEADER.to_string()),
        }
    }

    /// The header in use.
    #[must_use]
    pub fn header_name(&self) -> String {
        self.header.read().clone()
    }
}

#[async_trait]
impl Middleware for RequestIdMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(
        &self,
        ctx: &CallContext,
        mut req: Request,
        next: Next,
    ) -> Result<Response, LayerflowError> {
        let header = self.header_name();
        let existing = req
            .header(&header)
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let id = match existing {
            Some(id) => id,
            None => {
                let id = generate_uuid_v7().to_string();
                req.headers.insert(header.clone(), id.clone());
                id
            }
        };
        req.metadata.insert("request_id".to_string(), Value::String(id.clone()));

        let resp = next.run(ctx, req).await?;
        Ok(resp.with_header(header, id))
    }

    fn configure(&self, options: &StageOptions) -> Result<(), ConfigError> {
        self.controls.apply(options)?;
        if let Some(name) = options.get_str("header_name")? {
            if name.trim().is_empty() {
                return Err(ConfigError::invalid("header_name", "must not be empty"));
            }
            *self.header.write() = name.to_ascii_lowercase();
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler_fn;

    fn echo_id() -> Next {
        Next::handler(handler_fn(|_ctx, req| async move {
            let seen = req.metadata.get("request_id").cloned().unwrap_or(Value::Null);
            Ok(Response::ok(&req).with_body(seen))
        }))
    }

    #[tokio::test]
    async fn test_assigns_v7_id() {
        let stage = RequestIdMiddleware::default();
        let resp = stage
            .process(&CallContext::background(), Request::get("/"), echo_id())
            .await
            .unwrap();

        let id = resp.headers.get(REQUEST_ID_HEADER).cloned().unwrap();
        assert_eq!(resp.body, Value::String(id.clone()));
        let parsed = uuid::Uuid::parse_str(&id).unwrap();
        assert_eq!(parsed.get_version_num(), 7);
    }

    #[tokio::test]
    async fn test_keeps_existing_id() {
        let stage = RequestIdMiddleware::default();
        let req = Request::get("/").with_header(REQUEST_ID_HEADER, "given");
        let resp = stage
            .process(&CallContext::background(), req, echo_id())
            .await
            .unwrap();
        assert_eq!(resp.headers[REQUEST_ID_HEADER], "given");
        assert_eq!(resp.body, Value::String("given".to_string()));
    }

    #[test]
    fn test_configure_header_name() {
        let stage = RequestIdMiddleware::default();
        stage
            .configure(&StageOptions::new().with("header_name", "X-Correlation-ID"))
            .unwrap();
        assert_eq!(stage.header_name(), "x-correlation-id");
        assert!(stage.configure(&StageOptions::new().with("header_name", " ")).is_err());
        assert_eq!(stage.priority(), 1000);
    }
}
