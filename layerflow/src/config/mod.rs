//! Configuration: typed records, stage options and duration parsing.

pub mod duration;
mod options;
mod records;

pub use crate::resilience::ResilienceConfig;
pub use duration::parse_duration;
pub use options::StageOptions;
pub(crate) use records::default_batch_size;
pub use records::{
    AsyncChainConfig, ChainConfig, ConditionKind, DependencyChainConfig, DependencyStageConfig,
    HandlerConfig, ManagerConfig, StageConfig,
};
