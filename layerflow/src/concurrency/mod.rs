//! Off-thread execution: bounded-concurrency chains, batches and pools.
//!
//! An [`AsyncChain`] runs each submission on its own task behind a counting
//! semaphore and hands the caller a [`CompletionSlot`] that resolves exactly
//! once. [`BatchProcessor`] drives groups of submissions and keeps results
//! in input order.

mod batch;
mod chain;
mod completion;
mod pool;

pub use batch::{BatchProcessor, BatchResult, ExecutionRecord};
pub use chain::{AsyncChain, AsyncStats};
pub use completion::{completion_slot, CompletionSender, CompletionSlot};
pub use pool::{AsyncStage, AsyncStagePool, PoolStats, StageBuilder};
