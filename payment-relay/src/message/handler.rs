//! Topic dispatch
//!
//! Routes each decoded envelope to the processor registered for its topic.
//! Unknown topics and processor errors are logged and absorbed here; nothing
//! raised by a single message reaches the consumer loop.

use shared::{MessageEnvelope, Topic};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::PendingTasks;
use crate::message::processor::{MessageProcessor, PaymentGateProcessor, ProcessResult};
use crate::message::Publisher;

#[derive(Default)]
pub struct Dispatcher {
    processors: HashMap<Topic, Arc<dyn MessageProcessor>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a processor for its topic, replacing any previous one
    pub fn register_processor(mut self, processor: Arc<dyn MessageProcessor>) -> Self {
        let topic = processor.topic();
        self.processors.insert(topic, processor);
        self
    }

    /// Dispatcher with the payment gate on `order-status`
    pub fn with_default_processors(
        publisher: Publisher,
        tasks: Arc<PendingTasks>,
        payment_wait: Duration,
    ) -> Self {
        Self::new().register_processor(Arc::new(PaymentGateProcessor::new(
            publisher,
            tasks,
            payment_wait,
        )))
    }

    /// Topics that have a processor
    pub fn topics(&self) -> Vec<Topic> {
        Topic::ALL
            .into_iter()
            .filter(|topic| self.processors.contains_key(topic))
            .collect()
    }

    pub async fn dispatch(&self, topic: &str, envelope: &MessageEnvelope) -> ProcessResult {
        let topic = match topic.parse::<Topic>() {
            Ok(topic) => topic,
            Err(e) => {
                tracing::error!(sender = %envelope.sender, "{}", e);
                return ProcessResult::Skipped {
                    reason: e.to_string(),
                };
            }
        };

        if topic.is_publish_only() {
            tracing::debug!(topic = %topic, "Ignoring message on publish-only topic");
            return ProcessResult::Skipped {
                reason: format!("{topic} is publish-only"),
            };
        }

        let Some(processor) = self.processors.get(&topic) else {
            tracing::warn!(topic = %topic, "No processor registered for topic");
            return ProcessResult::Skipped {
                reason: format!("no processor for {topic}"),
            };
        };

        match processor.process(envelope).await {
            Ok(result) => {
                match &result {
                    ProcessResult::Success { message } => {
                        tracing::debug!(topic = %topic, "{}", message);
                    }
                    ProcessResult::Skipped { reason } => {
                        tracing::debug!(topic = %topic, reason = %reason, "Message skipped");
                    }
                    ProcessResult::Failed { reason } => {
                        tracing::error!(topic = %topic, reason = %reason, "Message processing failed");
                    }
                }
                result
            }
            Err(e) => {
                tracing::error!(topic = %topic, sender = %envelope.sender, "Failed to process message: {}", e);
                ProcessResult::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RelayError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use crate::broker::MemoryBroker;
    use shared::AgentId;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<serde_json::Value>>,
    }

    #[async_trait]
    impl MessageProcessor for Recording {
        fn topic(&self) -> Topic {
            Topic::OrderStatus
        }

        async fn process(&self, envelope: &MessageEnvelope) -> Result<ProcessResult, RelayError> {
            self.seen.lock().push(envelope.message.clone());
            Ok(ProcessResult::Success {
                message: "recorded".into(),
            })
        }
    }

    struct Broken;

    #[async_trait]
    impl MessageProcessor for Broken {
        fn topic(&self) -> Topic {
            Topic::OrderStatus
        }

        async fn process(&self, envelope: &MessageEnvelope) -> Result<ProcessResult, RelayError> {
            let _: i64 = envelope.parse_message()?;
            unreachable!("payload is never an integer in these tests")
        }
    }

    fn envelope() -> MessageEnvelope {
        MessageEnvelope::new(
            AgentId::from("api"),
            serde_json::json!({"order_id": 1, "status": "pending"}),
        )
    }

    #[tokio::test]
    async fn test_routes_by_topic_name() {
        let recording = Arc::new(Recording::default());
        let dispatcher = Dispatcher::new().register_processor(recording.clone());

        let result = dispatcher.dispatch("order-status", &envelope()).await;
        assert!(result.is_success());
        assert_eq!(recording.seen.lock().len(), 1);
        assert_eq!(dispatcher.topics(), vec![Topic::OrderStatus]);
    }

    #[tokio::test]
    async fn test_unknown_topic_is_skipped() {
        let recording = Arc::new(Recording::default());
        let dispatcher = Dispatcher::new().register_processor(recording.clone());

        let result = dispatcher.dispatch("inventory", &envelope()).await;
        assert!(result.is_skipped());
        // exact match only
        assert!(dispatcher.dispatch("Order-Status", &envelope()).await.is_skipped());
        assert!(recording.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_topic_never_publishes() {
        let broker = MemoryBroker::new();
        let tasks = Arc::new(PendingTasks::new(CancellationToken::new()));
        let publisher = Publisher::new(AgentId::from("payment_service"), Arc::new(broker.producer()));
        let dispatcher =
            Dispatcher::with_default_processors(publisher, tasks.clone(), Duration::from_millis(1));
        let awaiting = MessageEnvelope::new(
            AgentId::from("api"),
            serde_json::json!({"order_id": 7, "status": "awaiting_payment"}),
        );

        for topic in ["inventory", "order_status", "create-order"] {
            assert!(dispatcher.dispatch(topic, &awaiting).await.is_skipped(), "{topic}");
        }

        assert!(tasks.is_empty());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(broker.records().is_empty());
    }

    #[tokio::test]
    async fn test_publish_only_topic_is_skipped() {
        let recording = Arc::new(Recording::default());
        let dispatcher = Dispatcher::new().register_processor(recording.clone());

        let result = dispatcher.dispatch("create-order", &envelope()).await;
        assert_eq!(
            result,
            ProcessResult::Skipped {
                reason: "create-order is publish-only".into()
            }
        );
        assert!(recording.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_topic_without_processor_is_skipped() {
        let dispatcher = Dispatcher::new();
        assert!(dispatcher.dispatch("order-status", &envelope()).await.is_skipped());
        assert!(dispatcher.topics().is_empty());
    }

    #[tokio::test]
    async fn test_processor_error_becomes_failed() {
        let dispatcher = Dispatcher::new().register_processor(Arc::new(Broken));
        let result = dispatcher.dispatch("order-status", &envelope()).await;
        assert!(matches!(result, ProcessResult::Failed { .. }));
    }
}
