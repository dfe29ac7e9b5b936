use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ==================== Order Status ====================

/// 订单状态
///
/// Terminal states: `finished`, `delivered` and `canceled` are all accepted,
/// since different producers on the bus use different terminal names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// 等待支付
    AwaitingPayment,
    /// 已支付，等待处理
    Pending,
    /// 处理中
    Processing,
    /// 可取货
    ReadyToGet,
    /// 已完成
    Finished,
    /// 已送达
    Delivered,
    /// 已取消
    Canceled,
}

impl OrderStatus {
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Finished | OrderStatus::Delivered | OrderStatus::Canceled
        )
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::AwaitingPayment => "awaiting_payment",
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::ReadyToGet => "ready_to_get",
            OrderStatus::Finished => "finished",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ==================== Payloads ====================

/// Payload of the `order-status` topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusEvent {
    pub order_id: i64,
    pub status: OrderStatus,
}

impl OrderStatusEvent {
    pub fn new(order_id: i64, status: OrderStatus) -> Self {
        Self { order_id, status }
    }

    /// Same order, new status
    pub fn with_status(self, status: OrderStatus) -> Self {
        Self { status, ..self }
    }
}

/// Payload of the `create-order` topic, published by the API when an order is placed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderPayload {
    pub id: Option<i64>,
    pub user: String,
    /// Line items are forwarded as-is
    pub order_items: Vec<Value>,
    pub total_price: f64,
    pub payment_method: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_wire_names() {
        for status in [
            OrderStatus::AwaitingPayment,
            OrderStatus::Pending,
            OrderStatus::Processing,
            OrderStatus::ReadyToGet,
            OrderStatus::Finished,
            OrderStatus::Delivered,
            OrderStatus::Canceled,
        ] {
            let encoded = serde_json::to_value(status).unwrap();
            assert_eq!(encoded, json!(status.as_str()));
        }
    }

    #[test]
    fn test_terminal_set() {
        assert!(OrderStatus::Finished.is_terminal());
        assert!(OrderStatus::Delivered.is_terminal());
        assert!(OrderStatus::Canceled.is_terminal());
        assert!(!OrderStatus::AwaitingPayment.is_terminal());
        assert!(!OrderStatus::ReadyToGet.is_terminal());
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let parsed = serde_json::from_value::<OrderStatusEvent>(json!({
            "order_id": 1,
            "status": "lost_in_transit"
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_with_status_keeps_order_id() {
        let event = OrderStatusEvent::new(42, OrderStatus::AwaitingPayment);
        let next = event.with_status(OrderStatus::Pending);
        assert_eq!(next.order_id, 42);
        assert_eq!(next.status, OrderStatus::Pending);
    }

    #[test]
    fn test_create_order_payload() {
        let payload: CreateOrderPayload = serde_json::from_value(json!({
            "id": null,
            "user": "alice",
            "order_items": [{"product": "cola", "amount": 2}],
            "total_price": 7.5,
            "payment_method": "pix"
        }))
        .unwrap();

        assert_eq!(payload.id, None);
        assert_eq!(payload.order_items.len(), 1);
        assert_eq!(payload.total_price, 7.5);
    }
}
