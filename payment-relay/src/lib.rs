//! Payment Relay - 订单状态事件中继
//!
//! # 架构概述
//!
//! Consumes `order-status` events from the broker, drops the ones it
//! published itself, and moves orders from `awaiting_payment` to `pending`
//! once the payment confirmation wait has passed.
//!
//! # 模块结构
//!
//! ```text
//! payment-relay/src/
//! ├── core/          # 配置、错误、延迟任务
//! ├── broker/        # broker 抽象、bootstrap 重试、memory / kafka 实现
//! ├── message/       # publisher、consumer loop、dispatcher、processor
//! ├── relay.rs       # bootstrap → serve → release
//! └── utils/         # 日志
//! ```

pub mod broker;
pub mod core;
pub mod message;
pub mod relay;
pub mod utils;

// Re-export 公共类型
pub use broker::{BrokerConnector, BrokerError, BrokerHandles, MemoryBroker};
#[cfg(feature = "kafka")]
pub use broker::KafkaConnector;
pub use crate::core::{RelayConfig, RelayError, RelayResult};
pub use message::{Dispatcher, LoopExit, Publisher, RelayStats};
pub use relay::{PaymentRelay, RelaySummary};
pub use utils::logger::{init_logger_from_env, init_logger_with_file};
