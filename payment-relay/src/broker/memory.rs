//! In-process broker
//!
//! Uses a tokio broadcast channel internally; every consumer sees every
//! record published after it was created, filtered by its subscription.
//! Failure modes (connect failures, rejected deliveries, injected broker
//! errors) can be switched on to exercise the relay's error paths.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use shared::Topic;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::{
    BrokerConnector, BrokerConsumer, BrokerError, BrokerHandles, BrokerProducer, Delivery,
    DeliveryFuture, InboundRecord,
};
use crate::core::BrokerConfig;

#[derive(Debug, Clone)]
enum BusEvent {
    Record(InboundRecord),
    Error(BrokerError),
}

struct Inner {
    tx: broadcast::Sender<BusEvent>,
    log: Mutex<Vec<InboundRecord>>,
    next_offset: AtomicI64,
    connect_attempts: AtomicU32,
    failing_connects: AtomicU32,
    fail_deliveries: AtomicBool,
    created_consumers: AtomicU32,
    closed_consumers: AtomicU32,
}

/// In-process broker, cheap to clone
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Capacity of the broadcast channel
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                tx,
                log: Mutex::new(Vec::new()),
                next_offset: AtomicI64::new(0),
                connect_attempts: AtomicU32::new(0),
                failing_connects: AtomicU32::new(0),
                fail_deliveries: AtomicBool::new(false),
                created_consumers: AtomicU32::new(0),
                closed_consumers: AtomicU32::new(0),
            }),
        }
    }

    /// Make the next `count` connect attempts fail
    pub fn fail_next_connects(&self, count: u32) {
        self.inner.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Reject every delivery until switched off
    pub fn set_fail_deliveries(&self, fail: bool) {
        self.inner.fail_deliveries.store(fail, Ordering::SeqCst);
    }

    /// Report `error` to every live consumer
    pub fn inject_error(&self, error: BrokerError) {
        let _ = self.inner.tx.send(BusEvent::Error(error));
    }

    /// Every record accepted so far, in publish order
    pub fn records(&self) -> Vec<InboundRecord> {
        self.inner.log.lock().clone()
    }

    pub fn records_on(&self, topic: Topic) -> Vec<InboundRecord> {
        self.inner
            .log
            .lock()
            .iter()
            .filter(|record| record.topic == topic.as_str())
            .cloned()
            .collect()
    }

    pub fn open_consumers(&self) -> u32 {
        self.inner.created_consumers.load(Ordering::SeqCst) - self.closed_consumers()
    }

    pub fn closed_consumers(&self) -> u32 {
        self.inner.closed_consumers.load(Ordering::SeqCst)
    }

    pub fn producer(&self) -> MemoryProducer {
        MemoryProducer {
            broker: self.clone(),
        }
    }

    pub fn consumer(&self) -> MemoryConsumer {
        self.inner.created_consumers.fetch_add(1, Ordering::SeqCst);
        MemoryConsumer {
            broker: self.clone(),
            rx: self.inner.tx.subscribe(),
            topics: Vec::new(),
            closed: false,
        }
    }

    fn append(&self, topic: &str, payload: Vec<u8>) -> InboundRecord {
        let record = InboundRecord {
            topic: topic.to_string(),
            partition: 0,
            offset: self.inner.next_offset.fetch_add(1, Ordering::SeqCst),
            payload,
        };
        self.inner.log.lock().push(record.clone());
        // No live consumer is not an error
        let _ = self.inner.tx.send(BusEvent::Record(record.clone()));
        record
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerConnector for MemoryBroker {
    async fn connect(&self, _config: &BrokerConfig) -> Result<BrokerHandles, BrokerError> {
        self.inner.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .inner
            .failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(BrokerError::Connection("memory broker refused connection".into()));
        }

        Ok(BrokerHandles::new(
            Arc::new(self.producer()),
            Box::new(self.consumer()),
        ))
    }
}

// ========== Producer ==========

pub struct MemoryProducer {
    broker: MemoryBroker,
}

#[async_trait]
impl BrokerProducer for MemoryProducer {
    fn send(&self, topic: &str, payload: Vec<u8>) -> Result<DeliveryFuture, BrokerError> {
        if self.broker.inner.fail_deliveries.load(Ordering::SeqCst) {
            let error = BrokerError::Delivery(format!("memory broker rejected record for {topic}"));
            return Ok(futures::future::ready(Err(error)).boxed());
        }

        let record = self.broker.append(topic, payload);
        let delivery = Delivery {
            topic: record.topic,
            partition: record.partition,
            offset: record.offset,
        };
        Ok(futures::future::ready(Ok(delivery)).boxed())
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), BrokerError> {
        Ok(())
    }
}

// ========== Consumer ==========

pub struct MemoryConsumer {
    broker: MemoryBroker,
    rx: broadcast::Receiver<BusEvent>,
    topics: Vec<&'static str>,
    closed: bool,
}

#[async_trait]
impl BrokerConsumer for MemoryConsumer {
    fn subscribe(&mut self, topics: &[Topic]) -> Result<(), BrokerError> {
        if self.closed {
            return Err(BrokerError::Subscribe("consumer is closed".into()));
        }
        self.topics = topics.iter().map(Topic::as_str).collect();
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Option<Result<InboundRecord, BrokerError>> {
        if self.closed {
            return Some(Err(BrokerError::Disconnected));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                Err(_) => return None,
                Ok(Ok(BusEvent::Record(record))) => {
                    if self.topics.iter().any(|topic| *topic == record.topic) {
                        return Some(Ok(record));
                    }
                }
                Ok(Ok(BusEvent::Error(error))) => return Some(Err(error)),
                Ok(Err(RecvError::Lagged(skipped))) => {
                    tracing::warn!("Memory consumer lagged, skipped {} records", skipped);
                }
                Ok(Err(RecvError::Closed)) => return Some(Err(BrokerError::Disconnected)),
            }
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.topics.clear();
            self.broker
                .inner
                .closed_consumers
                .fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_consumer_sees_only_subscribed_topics() {
        let broker = MemoryBroker::new();
        let producer = broker.producer();
        let mut consumer = broker.consumer();
        consumer.subscribe(&[Topic::OrderStatus]).unwrap();

        producer.send("create-order", b"{}".to_vec()).unwrap().await.unwrap();
        let delivery = producer
            .send("order-status", b"{\"a\":1}".to_vec())
            .unwrap()
            .await
            .unwrap();
        assert_eq!(delivery.offset, 1);

        let record = consumer.poll(Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(record.topic, "order-status");
        assert_eq!(record.payload, b"{\"a\":1}");
        assert!(consumer.poll(Duration::from_millis(20)).await.is_none());
        assert_eq!(broker.records().len(), 2);
        assert_eq!(broker.records_on(Topic::CreateOrder).len(), 1);
    }

    #[tokio::test]
    async fn test_poll_times_out_when_idle() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.consumer();
        consumer.subscribe(&[Topic::OrderStatus]).unwrap();

        let started = tokio::time::Instant::now();
        assert!(consumer.poll(Duration::from_millis(30)).await.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_injected_error_reaches_consumer() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.consumer();
        consumer.subscribe(&[Topic::OrderStatus]).unwrap();

        broker.inject_error(BrokerError::PartitionEof { partition: 3 });
        let polled = consumer.poll(Duration::from_millis(50)).await.unwrap();
        assert_eq!(polled, Err(BrokerError::PartitionEof { partition: 3 }));
    }

    #[tokio::test]
    async fn test_failed_deliveries_are_not_recorded() {
        let broker = MemoryBroker::new();
        broker.set_fail_deliveries(true);

        let result = broker
            .producer()
            .send("order-status", b"{}".to_vec())
            .unwrap()
            .await;
        assert!(matches!(result, Err(BrokerError::Delivery(_))));
        assert!(broker.records().is_empty());
    }

    #[tokio::test]
    async fn test_connect_failures_are_counted() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects(2);
        let config = BrokerConfig::new(vec!["memory".into()], "group");

        assert!(broker.connect(&config).await.is_err());
        assert!(broker.connect(&config).await.is_err());
        assert!(broker.connect(&config).await.is_ok());
        assert_eq!(broker.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_closed_consumer_reports_disconnect() {
        let broker = MemoryBroker::new();
        let mut consumer = broker.consumer();
        consumer.close();
        consumer.close();

        assert_eq!(broker.closed_consumers(), 1);
        assert_eq!(
            consumer.poll(Duration::from_millis(10)).await,
            Some(Err(BrokerError::Disconnected))
        );
    }
}
