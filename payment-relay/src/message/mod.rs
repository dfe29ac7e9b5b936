//! Message layer
//!
//! ```text
//!  broker ──► ConsumerLoop ──decode / drop own──► Dispatcher ──topic──► MessageProcessor
//!                                                                          │
//!  broker ◄──────────────────────── Publisher ◄──── PendingTasks (payment gate)
//! ```

pub mod consumer;
pub mod handler;
pub mod processor;
pub mod publisher;

pub use consumer::{ConsumerLoop, LoopExit, LoopState, RelayStats};
pub use handler::Dispatcher;
pub use processor::{MessageProcessor, PaymentGateProcessor, ProcessResult, next_status};
pub use publisher::{PublishReport, Publisher};
pub use shared::message::{AgentId, MessageEnvelope, Topic};
