//! Broker abstraction
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  BrokerConnector::connect    │ ◄── bootstrap (retry)
//! └──────────────┬───────────────┘
//!                ▼
//!        ┌───────────────┐
//!        │ BrokerHandles │  owns both handles, released exactly once
//!        └───┬───────┬───┘
//!            ▼       ▼
//!   BrokerProducer  BrokerConsumer
//!   (Publisher)     (ConsumerLoop)
//! ```
//!
//! Implementations: [`memory::MemoryBroker`] (in-process) and, with the
//! `kafka` feature, [`kafka::KafkaConnector`].

use async_trait::async_trait;
use futures::future::BoxFuture;
use shared::Topic;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::core::BrokerConfig;

pub mod bootstrap;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

pub use bootstrap::{RetryExhausted, connect, retry_fixed};
#[cfg(feature = "kafka")]
pub use kafka::KafkaConnector;
pub use memory::MemoryBroker;

// ========== Errors ==========

/// Conditions reported by the broker client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// No more messages currently available on a partition
    #[error("Reached end of partition {partition}")]
    PartitionEof { partition: i32 },

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Broker transport error: {0}")]
    Transport(String),

    #[error("Broker connection closed")]
    Disconnected,
}

impl BrokerError {
    /// Benign conditions keep the consumer polling; everything else stops it
    pub fn is_benign(&self) -> bool {
        matches!(self, BrokerError::PartitionEof { .. })
    }
}

// ========== Records ==========

/// A record read from the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

/// Broker acknowledgment of a produced record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Resolves once the broker acknowledges or rejects a record
pub type DeliveryFuture = BoxFuture<'static, Result<Delivery, BrokerError>>;

// ========== Handles ==========

#[async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Queue a record for asynchronous delivery
    ///
    /// An `Err` means the record was never queued.
    fn send(&self, topic: &str, payload: Vec<u8>) -> Result<DeliveryFuture, BrokerError>;

    /// Wait until queued records are delivered or `timeout` elapses
    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait BrokerConsumer: Send {
    fn subscribe(&mut self, topics: &[Topic]) -> Result<(), BrokerError>;

    /// Wait at most `timeout` for the next record
    ///
    /// `None` when nothing arrived in time.
    async fn poll(&mut self, timeout: Duration) -> Option<Result<InboundRecord, BrokerError>>;

    /// Record that `record` has been handled, so it is not redelivered
    fn mark_processed(&mut self, _record: &InboundRecord) -> Result<(), BrokerError> {
        Ok(())
    }

    /// Leave the consumer group
    fn close(&mut self);
}

#[async_trait]
pub trait BrokerConnector: Send + Sync {
    /// Build a fresh producer/consumer pair
    async fn connect(&self, config: &BrokerConfig) -> Result<BrokerHandles, BrokerError>;
}

/// Producer and consumer for the lifetime of a relay
///
/// Release happens through [`BrokerHandles::release`]; if the handles are
/// dropped on some other path, `Drop` closes the consumer instead.
pub struct BrokerHandles {
    producer: Arc<dyn BrokerProducer>,
    consumer: Box<dyn BrokerConsumer>,
    released: bool,
}

impl BrokerHandles {
    pub fn new(producer: Arc<dyn BrokerProducer>, consumer: Box<dyn BrokerConsumer>) -> Self {
        Self {
            producer,
            consumer,
            released: false,
        }
    }

    pub fn producer(&self) -> Arc<dyn BrokerProducer> {
        self.producer.clone()
    }

    pub fn consumer_mut(&mut self) -> &mut dyn BrokerConsumer {
        self.consumer.as_mut()
    }

    /// Flush pending deliveries and close the consumer
    pub async fn release(mut self, flush_timeout: Duration) {
        if let Err(e) = self.producer.flush(flush_timeout).await {
            tracing::warn!("Producer flush on release failed: {}", e);
        }
        self.consumer.close();
        self.released = true;
        tracing::info!("Broker handles released");
    }
}

impl std::fmt::Debug for BrokerHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerHandles")
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl Drop for BrokerHandles {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!("Broker handles dropped without release, closing consumer");
            self.consumer.close();
            self.released = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_classification() {
        assert!(BrokerError::PartitionEof { partition: 0 }.is_benign());
        assert!(!BrokerError::Transport("broker down".into()).is_benign());
        assert!(!BrokerError::Disconnected.is_benign());
        assert!(!BrokerError::Connection("refused".into()).is_benign());
    }

    #[tokio::test]
    async fn test_release_closes_consumer_once() {
        let broker = MemoryBroker::new();
        let handles = broker
            .connect(&BrokerConfig::new(vec!["memory".into()], "group"))
            .await
            .unwrap();

        assert_eq!(broker.open_consumers(), 1);
        handles.release(Duration::from_millis(10)).await;
        assert_eq!(broker.open_consumers(), 0);
        assert_eq!(broker.closed_consumers(), 1);
    }

    #[tokio::test]
    async fn test_drop_closes_unreleased_consumer() {
        let broker = MemoryBroker::new();
        let handles = broker
            .connect(&BrokerConfig::new(vec!["memory".into()], "group"))
            .await
            .unwrap();

        drop(handles);
        assert_eq!(broker.open_consumers(), 0);
        assert_eq!(broker.closed_consumers(), 1);
    }
}
