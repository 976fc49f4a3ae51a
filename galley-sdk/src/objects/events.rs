//! Sequenced event envelopes delivered over the subscription stream.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{OrderResponse, OrderStatus, PaymentResponse};

/// Type tag carried by every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "order.created")]
    OrderCreated,
    #[serde(rename = "order.updated")]
    OrderUpdated,
    #[serde(rename = "order.status_changed")]
    OrderStatusChanged,
    #[serde(rename = "payment.updated")]
    PaymentUpdated,
}

impl EventType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "order.created",
            EventType::OrderUpdated => "order.updated",
            EventType::OrderStatusChanged => "order.status_changed",
            EventType::PaymentUpdated => "payment.updated",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event body. Every variant carries a full snapshot so a client never
/// needs a follow-up fetch to render the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Order {
        order: OrderResponse,
    },
    StatusChanged {
        from: OrderStatus,
        to: OrderStatus,
        actor: String,
        order: OrderResponse,
    },
    Payment {
        payment: PaymentResponse,
    },
}

/// A tenant-scoped, sequenced event.
///
/// `sequence` is strictly increasing per tenant and gapless unless the
/// server had to evict buffered events, which clients detect by comparing
/// against the last sequence they saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub tenant_id: Uuid,
    pub sequence: u64,
    pub event_type: EventType,
    /// Unix timestamp in milliseconds.
    pub timestamp_ms: i64,
    pub payload: EventPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_tags() {
        let json = serde_json::to_string(&EventType::OrderStatusChanged).unwrap();
        assert_eq!(json, "\"order.status_changed\"");
        let parsed: EventType = serde_json::from_str("\"payment.updated\"").unwrap();
        assert_eq!(parsed, EventType::PaymentUpdated);
        assert_eq!(EventType::OrderCreated.to_string(), "order.created");
    }
}
