use futures::future::join_all;
use serde::Serialize;
use shared::message::encode;
use shared::{AgentId, CodecResult, Topic};
use std::sync::Arc;

use crate::broker::{BrokerError, BrokerProducer, Delivery};

/// Outcome counts of one [`Publisher::publish`] call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Wraps payloads in envelopes stamped with this process's identity
///
/// Cheap to clone; clones share the producer handle.
#[derive(Clone)]
pub struct Publisher {
    agent: AgentId,
    producer: Arc<dyn BrokerProducer>,
}

impl Publisher {
    pub fn new(agent: AgentId, producer: Arc<dyn BrokerProducer>) -> Self {
        Self { agent, producer }
    }

    /// Publish every `(topic, payload)` pair and wait for all deliveries
    ///
    /// All payloads are encoded before anything is sent, so an encoding
    /// error publishes nothing. Delivery failures are logged and counted,
    /// never retried.
    pub async fn publish<T, I>(&self, messages: I) -> CodecResult<PublishReport>
    where
        T: Serialize,
        I: IntoIterator<Item = (Topic, T)>,
    {
        let encoded = messages
            .into_iter()
            .map(|(topic, message)| encode(&self.agent, &message).map(|bytes| (topic, bytes)))
            .collect::<CodecResult<Vec<_>>>()?;

        let mut report = PublishReport::default();
        let mut pending = Vec::with_capacity(encoded.len());
        for (topic, bytes) in encoded {
            match self.producer.send(topic.as_str(), bytes) {
                Ok(delivery) => pending.push(delivery),
                Err(e) => {
                    delivery_report(Err(&e));
                    report.failed += 1;
                }
            }
        }

        // Flush barrier: every queued record is acknowledged or rejected
        for result in join_all(pending).await {
            delivery_report(result.as_ref());
            match result {
                Ok(_) => report.delivered += 1,
                Err(_) => report.failed += 1,
            }
        }

        Ok(report)
    }

    pub async fn publish_one<T: Serialize>(
        &self,
        topic: Topic,
        message: T,
    ) -> CodecResult<PublishReport> {
        self.publish([(topic, message)]).await
    }
}

fn delivery_report(result: Result<&Delivery, &BrokerError>) {
    match result {
        Ok(delivery) => tracing::info!(
            offset = delivery.offset,
            "Message delivered to {} [{}]",
            delivery.topic,
            delivery.partition
        ),
        Err(e) => tracing::error!("Message delivery failed: {}", e),
    }
}
