//! 消息总线消息类型定义
//!
//! Every record on the broker is a JSON [`MessageEnvelope`]:
//!
//! ```text
//! {"timestamp": 1718000000.25, "sender": "api", "message": {"order_id": 7, "status": "awaiting_payment"}}
//! ```
//!
//! `sender` identifies the producing process so that subscribers of a topic
//! they also publish to can drop their own output.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{CodecError, CodecResult, UnknownTopic};

pub mod payload;
pub use payload::*;

// ==================== Agent Identity ====================

/// Identity of the process that produced a message (e.g. `payment_service`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AgentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl PartialEq<str> for AgentId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for AgentId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

// ==================== Topics ====================

/// 主题 - the fixed set of topics known to this bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// 订单状态变更 (subscribe + publish)
    OrderStatus,
    /// 新订单 (API 端发布)
    CreateOrder,
}

impl Topic {
    pub const ALL: [Topic; 2] = [Topic::OrderStatus, Topic::CreateOrder];

    /// Broker-side topic name
    pub const fn as_str(&self) -> &'static str {
        match self {
            Topic::OrderStatus => "order-status",
            Topic::CreateOrder => "create-order",
        }
    }

    /// Topics that only the API side publishes to
    pub const fn is_publish_only(&self) -> bool {
        matches!(self, Topic::CreateOrder)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Topic {
    type Err = UnknownTopic;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Topic::ALL
            .into_iter()
            .find(|topic| topic.as_str() == s)
            .ok_or_else(|| UnknownTopic(s.to_string()))
    }
}

// ==================== Envelope ====================

/// 消息信封 - metadata wrapped around every published payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope<T = Value> {
    /// Epoch seconds at publish time
    pub timestamp: f64,
    pub sender: AgentId,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Stamp `message` with `sender` and the current time
    pub fn new(sender: AgentId, message: T) -> Self {
        Self {
            timestamp: now_epoch_secs(),
            sender,
            message,
        }
    }

    /// Whether this envelope was produced by `agent`
    pub fn is_from(&self, agent: &AgentId) -> bool {
        &self.sender == agent
    }
}

impl<T: Serialize> MessageEnvelope<T> {
    pub fn to_bytes(&self) -> CodecResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(CodecError::Encode)
    }
}

impl<T: DeserializeOwned> MessageEnvelope<T> {
    pub fn from_bytes(bytes: &[u8]) -> CodecResult<Self> {
        serde_json::from_slice(bytes).map_err(CodecError::Decode)
    }
}

impl MessageEnvelope<Value> {
    /// 解析载荷为指定类型
    pub fn parse_message<T: DeserializeOwned>(&self) -> CodecResult<T> {
        T::deserialize(&self.message).map_err(CodecError::Payload)
    }
}

/// Wrap `message` in a fresh envelope and serialize it
pub fn encode<T: Serialize>(sender: &AgentId, message: &T) -> CodecResult<Vec<u8>> {
    MessageEnvelope::new(sender.clone(), message).to_bytes()
}

/// Parse raw broker bytes into an envelope with an untyped message
pub fn decode(bytes: &[u8]) -> CodecResult<MessageEnvelope> {
    MessageEnvelope::from_bytes(bytes)
}

fn now_epoch_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
