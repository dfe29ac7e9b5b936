//! Kafka backend (librdkafka)
//!
//! Offsets are stored explicitly after each record is handled
//! (`enable.auto.offset.store=false`) and committed by the client's
//! auto-commit, which gives at-least-once processing.

use async_trait::async_trait;
use futures::FutureExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use shared::Topic;
use std::sync::Arc;
use std::time::Duration;

use super::{
    BrokerConnector, BrokerConsumer, BrokerError, BrokerHandles, BrokerProducer, Delivery,
    DeliveryFuture, InboundRecord,
};
use crate::core::BrokerConfig;

/// Connects to a Kafka cluster
#[derive(Debug, Clone, Copy, Default)]
pub struct KafkaConnector;

impl KafkaConnector {
    fn build(config: &BrokerConfig) -> Result<BrokerHandles, BrokerError> {
        let servers = config.servers_list();
        let timeout_ms = config.delivery_timeout.as_millis().to_string();

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &servers)
            .set("message.timeout.ms", &timeout_ms)
            .create()
            .map_err(|e| BrokerError::Connection(format!("producer: {e}")))?;

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &servers)
            .set("group.id", &config.consumer_group_id)
            .set("auto.offset.reset", config.auto_offset_reset.as_str())
            .set("enable.partition.eof", "true")
            .set("enable.auto.commit", "true")
            .set("enable.auto.offset.store", "false")
            .create()
            .map_err(|e| BrokerError::Connection(format!("consumer: {e}")))?;

        // Client creation is lazy; ask for cluster metadata so an unreachable
        // broker fails this attempt instead of the first poll
        consumer
            .fetch_metadata(None, Timeout::After(config.delivery_timeout))
            .map_err(|e| BrokerError::Connection(format!("metadata: {e}")))?;

        Ok(BrokerHandles::new(
            Arc::new(KafkaProducer { producer }),
            Box::new(KafkaConsumer { consumer }),
        ))
    }
}

#[async_trait]
impl BrokerConnector for KafkaConnector {
    async fn connect(&self, config: &BrokerConfig) -> Result<BrokerHandles, BrokerError> {
        let config = config.clone();
        tokio::task::spawn_blocking(move || Self::build(&config))
            .await
            .map_err(|e| BrokerError::Connection(format!("bootstrap task failed: {e}")))?
    }
}

// ========== Producer ==========

pub struct KafkaProducer {
    producer: FutureProducer,
}

#[async_trait]
impl BrokerProducer for KafkaProducer {
    fn send(&self, topic: &str, payload: Vec<u8>) -> Result<DeliveryFuture, BrokerError> {
        let record = FutureRecord::<(), Vec<u8>>::to(topic).payload(&payload);
        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| BrokerError::Delivery(e.to_string()))?;

        let topic = topic.to_string();
        Ok(async move {
            match delivery.await {
                Ok(Ok((partition, offset))) => Ok(Delivery {
                    topic,
                    partition,
                    offset,
                }),
                Ok(Err((e, _))) => Err(BrokerError::Delivery(e.to_string())),
                Err(_) => Err(BrokerError::Delivery("delivery report dropped".into())),
            }
        }
        .boxed())
    }

    async fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
            .await
            .map_err(|e| BrokerError::Transport(format!("flush task failed: {e}")))?
            .map_err(|e| BrokerError::Transport(format!("flush: {e}")))
    }
}

// ========== Consumer ==========

pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

#[async_trait]
impl BrokerConsumer for KafkaConsumer {
    fn subscribe(&mut self, topics: &[Topic]) -> Result<(), BrokerError> {
        let names: Vec<&str> = topics.iter().map(Topic::as_str).collect();
        self.consumer
            .subscribe(&names)
            .map_err(|e| BrokerError::Subscribe(e.to_string()))
    }

    async fn poll(&mut self, timeout: Duration) -> Option<Result<InboundRecord, BrokerError>> {
        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => None,
            Ok(Ok(message)) => Some(Ok(InboundRecord {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            })),
            Ok(Err(KafkaError::PartitionEOF(partition))) => {
                Some(Err(BrokerError::PartitionEof { partition }))
            }
            Ok(Err(e)) => Some(Err(BrokerError::Transport(e.to_string()))),
        }
    }

    fn mark_processed(&mut self, record: &InboundRecord) -> Result<(), BrokerError> {
        // Stored offset is the next one to read
        self.consumer
            .store_offset(&record.topic, record.partition, record.offset + 1)
            .map_err(|e| BrokerError::Transport(format!("store offset: {e}")))
    }

    fn close(&mut self) {
        self.consumer.unsubscribe();
    }
}
