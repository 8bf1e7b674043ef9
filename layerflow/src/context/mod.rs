//! Per-call context carrying cancellation and deadlines.

mod call;

pub use call::CallContext;
