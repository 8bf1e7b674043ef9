//! Testing utilities for layerflow pipelines.
//!
//! This module provides:
//! - Mock and recording stages
//! - Handler fixtures with call counting
//! - Assertions for pipeline outcomes

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_error_code, assert_runs_before, assert_status, assert_success};
pub use fixtures::{
    counting_handler, failing_handler, flaky_handler, ok_handler, slow_handler, CallCounter,
};
pub use mocks::{FailingMiddleware, MockMiddleware, RecordingMiddleware, SharedLog};
