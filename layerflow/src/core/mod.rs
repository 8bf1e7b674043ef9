//! Core request/response model shared by every stage.
//!
//! There is one canonical [`Request`] and one canonical [`Response`]; hosts
//! that speak other wire shapes convert at their own boundary.

mod request;
mod response;

pub use request::Request;
pub use response::Response;
