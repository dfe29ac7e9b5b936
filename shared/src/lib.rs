//! Shared types for the order bus
//!
//! Wire-level types used by every process attached to the broker:
//! the message envelope, topic names and order payloads.

pub mod error;
pub mod message;

// Re-exports
pub use error::{CodecError, CodecResult, UnknownTopic};
pub use message::{AgentId, MessageEnvelope, Topic};
pub use message::{CreateOrderPayload, OrderStatus, OrderStatusEvent};
