//! Request, response and event types exchanged over the Galley API.

pub mod events;
pub mod order;
pub mod payment;
pub mod ws;

pub use events::{EventEnvelope, EventPayload, EventType};
pub use order::{
    AddOnResponse, AuditEntryResponse, CancelOrderRequest, CreateOrderRequest, CustomerContact,
    LineItemRequest, LineItemResponse, OrderResponse, UpdateStatusRequest, UpdateTipRequest,
};
pub use payment::{
    FailureKind, PaymentFailureBody, PaymentMethod, PaymentResponse, PaymentState,
    StartPaymentRequest,
};

use serde::{Deserialize, Serialize};

/// Order status as seen by API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Pending,
    Confirmed,
    Preparing,
    Ready,
    PickedUp,
    Completed,
    Cancelled,
}

/// JSON body returned with every non-2xx response.
///
/// `error` is a stable machine-readable code; the optional fields carry the
/// recovery hint for the specific failure (for example the states an order
/// can still move to after an invalid transition).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_status: Option<OrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_next_states: Option<Vec<OrderStatus>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<PaymentState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Set when a gateway failure left a payment attempt behind that can be retried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<uuid::Uuid>,
}

impl ApiErrorBody {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            ..Default::default()
        }
    }
}
