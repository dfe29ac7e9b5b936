//! Message Processor Trait
//!
//! One processor per topic; the [`Dispatcher`](super::Dispatcher) routes each
//! decoded envelope to the processor registered for its topic.

use async_trait::async_trait;
use shared::{MessageEnvelope, OrderStatus, OrderStatusEvent, Topic};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{PendingTasks, RelayError};
use crate::message::Publisher;

/// Result of message processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    /// Message handled (work may still be pending, e.g. a scheduled gate)
    Success { message: String },
    /// Message processing failed, not retried
    Failed { reason: String },
    /// Nothing to do for this message
    Skipped { reason: String },
}

impl ProcessResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessResult::Success { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ProcessResult::Skipped { .. })
    }
}

#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Topic this processor handles
    fn topic(&self) -> Topic;

    /// Handle one envelope received on [`Self::topic`]
    ///
    /// Must not block on long waits; deferred work belongs on
    /// [`PendingTasks`].
    async fn process(&self, envelope: &MessageEnvelope) -> Result<ProcessResult, RelayError>;
}

/// 支付网关状态转换
///
/// Only `awaiting_payment` moves forward here; every other status is owned
/// by another service.
pub fn next_status(status: OrderStatus) -> Option<OrderStatus> {
    match status {
        OrderStatus::AwaitingPayment => Some(OrderStatus::Pending),
        _ => None,
    }
}

/// Payment gate on `order-status`
///
/// An `awaiting_payment` event schedules a deferred task that waits for the
/// payment confirmation, then publishes the same order as `pending`. The
/// wait runs on [`PendingTasks`], so the consumer keeps polling meanwhile.
pub struct PaymentGateProcessor {
    publisher: Publisher,
    tasks: Arc<PendingTasks>,
    payment_wait: Duration,
}

impl PaymentGateProcessor {
    pub fn new(publisher: Publisher, tasks: Arc<PendingTasks>, payment_wait: Duration) -> Self {
        Self {
            publisher,
            tasks,
            payment_wait,
        }
    }

    fn schedule(&self, event: OrderStatusEvent, next: OrderStatus) {
        let publisher = self.publisher.clone();
        let token = self.tasks.shutdown_token();
        let wait = self.payment_wait;

        self.tasks.spawn("payment_gate", async move {
            tracing::info!(order_id = event.order_id, "Waiting for payment");

            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!(
                        order_id = event.order_id,
                        "Payment wait cancelled, shutdown grace elapsed"
                    );
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            tracing::info!(order_id = event.order_id, "Payment received");
            let update = event.with_status(next);
            match publisher.publish_one(Topic::OrderStatus, &update).await {
                Ok(report) if report.failed == 0 => {
                    tracing::info!(
                        order_id = update.order_id,
                        status = %update.status,
                        "Order status published"
                    );
                }
                Ok(_) => {
                    tracing::warn!(order_id = update.order_id, "Order status was not delivered");
                }
                Err(e) => {
                    tracing::error!(order_id = update.order_id, "Failed to encode order status: {}", e);
                }
            }
        });
    }
}

#[async_trait]
impl MessageProcessor for PaymentGateProcessor {
    fn topic(&self) -> Topic {
        Topic::OrderStatus
    }

    async fn process(&self, envelope: &MessageEnvelope) -> Result<ProcessResult, RelayError> {
        // Statuses this relay does not know belong to other services
        let event: OrderStatusEvent = match envelope.parse_message() {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(
                    sender = %envelope.sender,
                    message = %envelope.message,
                    "Unrecognised order status event, passing through: {}",
                    e
                );
                return Ok(ProcessResult::Skipped {
                    reason: format!("unrecognised order status event: {e}"),
                });
            }
        };

        let Some(next) = next_status(event.status) else {
            tracing::debug!(
                order_id = event.order_id,
                status = %event.status,
                "No transition for status"
            );
            return Ok(ProcessResult::Skipped {
                reason: format!("no transition from {}", event.status),
            });
        };

        let order_id = event.order_id;
        self.schedule(event, next);

        Ok(ProcessResult::Success {
            message: format!("payment gate scheduled for order {order_id}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use shared::AgentId;
    use tokio_util::sync::CancellationToken;

    fn setup(broker: &MemoryBroker, wait: Duration) -> (PaymentGateProcessor, Arc<PendingTasks>) {
        let tasks = Arc::new(PendingTasks::new(CancellationToken::new()));
        let publisher = Publisher::new(AgentId::from("payment_service"), Arc::new(broker.producer()));
        (
            PaymentGateProcessor::new(publisher, tasks.clone(), wait),
            tasks,
        )
    }

    fn envelope(event: OrderStatusEvent) -> MessageEnvelope {
        MessageEnvelope::new(AgentId::from("api"), serde_json::to_value(event).unwrap())
    }

    #[test]
    fn test_next_status_only_gates_awaiting_payment() {
        assert_eq!(
            next_status(OrderStatus::AwaitingPayment),
            Some(OrderStatus::Pending)
        );
        for status in [
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::ReadyToGet,
            OrderStatus::Finished,
            OrderStatus::Delivered,
            OrderStatus::Canceled,
        ] {
            assert_eq!(next_status(status), None, "{status}");
        }
    }

    #[tokio::test]
    async fn test_awaiting_payment_publishes_pending_after_wait() {
        let broker = MemoryBroker::new();
        let (processor, tasks) = setup(&broker, Duration::from_millis(30));

        let result = processor
            .process(&envelope(OrderStatusEvent::new(42, OrderStatus::AwaitingPayment)))
            .await
            .unwrap();
        assert!(result.is_success());
        // deferred, nothing published yet
        assert!(broker.records().is_empty());
        assert_eq!(tasks.len(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;

        let records = broker.records_on(Topic::OrderStatus);
        assert_eq!(records.len(), 1);
        let published: MessageEnvelope<OrderStatusEvent> =
            MessageEnvelope::from_bytes(&records[0].payload).unwrap();
        assert_eq!(published.sender, "payment_service");
        assert_eq!(published.message, OrderStatusEvent::new(42, OrderStatus::Pending));
    }

    #[tokio::test]
    async fn test_other_statuses_pass_through() {
        let broker = MemoryBroker::new();
        let (processor, tasks) = setup(&broker, Duration::from_millis(1));

        let result = processor
            .process(&envelope(OrderStatusEvent::new(3, OrderStatus::Processing)))
            .await
            .unwrap();

        assert!(result.is_skipped());
        assert!(tasks.is_empty());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(broker.records().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognised_events_pass_through() {
        let broker = MemoryBroker::new();
        let (processor, tasks) = setup(&broker, Duration::from_millis(1));

        for message in [
            serde_json::json!({"order_id": 7, "status": "refunded"}),
            serde_json::json!({"order_id": "seven", "status": "awaiting_payment"}),
        ] {
            let result = processor
                .process(&MessageEnvelope::new(AgentId::from("api"), message))
                .await
                .unwrap();
            assert!(result.is_skipped());
        }

        assert!(tasks.is_empty());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(broker.records().is_empty());
    }

    #[tokio::test]
    async fn test_drain_publishes_gate_within_grace() {
        let broker = MemoryBroker::new();
        let (processor, tasks) = setup(&broker, Duration::from_millis(50));

        processor
            .process(&envelope(OrderStatusEvent::new(5, OrderStatus::AwaitingPayment)))
            .await
            .unwrap();
        tasks.drain(Duration::from_secs(1)).await;

        assert_eq!(broker.records_on(Topic::OrderStatus).len(), 1);
    }

    #[tokio::test]
    async fn test_gate_past_grace_is_cancelled() {
        let broker = MemoryBroker::new();
        let (processor, tasks) = setup(&broker, Duration::from_secs(30));

        processor
            .process(&envelope(OrderStatusEvent::new(5, OrderStatus::AwaitingPayment)))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), tasks.drain(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(broker.records().is_empty());
    }
}
