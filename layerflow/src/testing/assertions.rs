//! Assertion helpers for pipeline outcomes.

use crate::core::Response;
use crate::errors::LayerflowError;

/// Asserts that the outcome is a response with `expected` status.
pub fn assert_status(outcome: &Result<Response, LayerflowError>, expected: u16) {
    match outcome {
        Ok(resp) => assert_eq!(
            resp.status_code, expected,
            "Expected status {expected}, got {} (error: {:?})",
            resp.status_code, resp.error
        ),
        Err(err) => panic!("Expected status {expected}, got error: {err}"),
    }
}

/// Asserts that the outcome is a successful response.
pub fn assert_success(outcome: &Result<Response, LayerflowError>) {
    match outcome {
        Ok(resp) => assert!(
            resp.is_success(),
            "Expected success, got status {} (error: {:?})",
            resp.status_code,
            resp.error
        ),
        Err(err) => panic!("Expected success, got error: {err}"),
    }
}

/// Asserts that the outcome is an error with the given code.
pub fn assert_error_code(outcome: &Result<Response, LayerflowError>, code: &str) {
    match outcome {
        Ok(resp) => panic!("Expected error {code}, got status {}", resp.status_code),
        Err(err) => assert_eq!(err.code(), code, "Expected error code {code}, got {err}"),
    }
}

/// Asserts that `earlier` appears before `later` in `order`.
pub fn assert_runs_before(order: &[String], earlier: &str, later: &str) {
    let position = |name: &str| {
        order
            .iter()
            .position(|n| n == name)
            .unwrap_or_else(|| panic!("Stage {name} missing from {order:?}"))
    };
    assert!(
        position(earlier) < position(later),
        "Expected {earlier} before {later} in {order:?}"
    );
}
