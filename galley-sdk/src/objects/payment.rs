//! Payment request and response types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How the guest pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Card details tokenized by the client, authorized and captured online.
    Card,
    /// Card-present payment on a gateway-managed terminal.
    Terminal,
    /// Cash handed to staff and confirmed manually.
    Cash,
}

/// Payment processing state as seen by API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Idle,
    InitializingGateway,
    GatewayReady,
    Tokenizing,
    Tokenized,
    Authorizing,
    Authorized,
    Capturing,
    AwaitingExternalDevice,
    DeviceReading,
    DeviceProcessing,
    AwaitingCash,
    Captured,
    Failed,
    Cancelling,
    Cancelled,
}

/// Classification of a payment failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Network,
    RateLimited,
    Unavailable,
    Declined,
    InvalidRequest,
    Rejected,
}

/// Request body for `POST /orders/{order_id}/payments`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartPaymentRequest {
    pub method: PaymentMethod,
    /// Card token produced by the client-side tokenizer (card payments).
    #[serde(default)]
    pub source_token: Option<String>,
    /// Terminal identifier (terminal payments).
    #[serde(default)]
    pub device_id: Option<String>,
    /// Caller-chosen idempotency key. Generated server-side when absent.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailureBody {
    pub kind: FailureKind,
    pub retryable: bool,
    pub message: String,
}

/// Payment attempt state returned by the API and carried in `payment.updated` events.
///
/// The guard flags let clients enable or disable actions without knowing
/// the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentResponse {
    pub payment_id: Uuid,
    pub order_id: Uuid,
    pub method: PaymentMethod,
    pub state: PaymentState,
    pub amount: Decimal,
    pub idempotency_key: String,
    pub attempt_count: u32,
    pub last_error: Option<PaymentFailureBody>,
    pub gateway_reference: Option<String>,
    pub can_retry: bool,
    pub can_cancel: bool,
    pub is_terminal: bool,
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}
