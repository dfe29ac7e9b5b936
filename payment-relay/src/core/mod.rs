//! 核心模块 - 配置、错误、后台任务

pub mod config;
pub mod error;
pub mod tasks;

pub use config::{BrokerConfig, OffsetReset, RelayConfig, RetryPolicy};
pub use error::{BootstrapError, RelayError, RelayResult};
pub use tasks::PendingTasks;
