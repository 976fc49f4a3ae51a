//! Order request and response types.
//!
//! Money values are never accepted from callers except the optional tip.
//! Any `subtotal`, `tax` or `total` field a caller adds to a request body is
//! ignored by deserialization.

use compact_str::CompactString;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use uuid::Uuid;

use super::OrderStatus;

/// Request body for `POST /orders`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<LineItemRequest>,
    #[serde(default)]
    pub customer: CustomerContact,
    #[serde(default)]
    pub tip: Option<Decimal>,
    /// Unix timestamp (seconds) at which a scheduled order is sent to the kitchen.
    #[serde(default)]
    pub fire_at: Option<i64>,
}

/// A single requested line: what and how many, never how much.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemRequest {
    pub menu_item_id: CompactString,
    pub quantity: u32,
    #[serde(default)]
    pub add_ons: SmallVec<[CompactString; 4]>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerContact {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Request body for `POST /orders/{order_id}/status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
    pub expected_version: i64,
}

/// Request body for `POST /orders/{order_id}/cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    pub expected_version: i64,
}

/// Request body for `POST /orders/{order_id}/tip`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateTipRequest {
    pub tip: Decimal,
    pub expected_version: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOnResponse {
    pub add_on_id: CompactString,
    pub name: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemResponse {
    pub menu_item_id: CompactString,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub add_ons: Vec<AddOnResponse>,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntryResponse {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub actor: String,
    /// Unix timestamp in milliseconds.
    pub at: i64,
}

/// Full order state as returned by the API and carried in order events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub order_id: Uuid,
    pub tenant_id: Uuid,
    pub status: OrderStatus,
    pub items: Vec<LineItemResponse>,
    pub customer: CustomerContact,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub tip: Decimal,
    pub total: Decimal,
    pub version: i64,
    pub created_at: i64,
    pub fire_at: Option<i64>,
    pub audit_log: Vec<AuditEntryResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_totals_are_not_part_of_request() {
        let json = r#"{
            "items": [{"menu_item_id": "burger", "quantity": 2}],
            "subtotal": "0.01",
            "tax": "0",
            "total": "0.01"
        }"#;
        let request: CreateOrderRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.items.len(), 1);
        assert!(request.items[0].add_ons.is_empty());
        assert_eq!(request.tip, None);

        let echoed = serde_json::to_value(&request).unwrap();
        assert!(echoed.get("total").is_none());
        assert!(echoed.get("subtotal").is_none());
    }
}
