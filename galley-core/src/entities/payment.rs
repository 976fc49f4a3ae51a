use std::collections::VecDeque;

use galley_sdk::objects as wire;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use time::OffsetDateTime;

use super::{OrderId, PaymentId, TenantId, unix_millis};
use crate::fsm::payment::TransitionRecord;
use crate::framework::DatabaseProcessor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    Terminal,
    Cash,
}

impl PaymentMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Terminal => "terminal",
            PaymentMethod::Cash => "cash",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<wire::PaymentMethod> for PaymentMethod {
    fn from(value: wire::PaymentMethod) -> Self {
        match value {
            wire::PaymentMethod::Card => PaymentMethod::Card,
            wire::PaymentMethod::Terminal => PaymentMethod::Terminal,
            wire::PaymentMethod::Cash => PaymentMethod::Cash,
        }
    }
}

impl From<PaymentMethod> for wire::PaymentMethod {
    fn from(value: PaymentMethod) -> Self {
        match value {
            PaymentMethod::Card => wire::PaymentMethod::Card,
            PaymentMethod::Terminal => wire::PaymentMethod::Terminal,
            PaymentMethod::Cash => wire::PaymentMethod::Cash,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_state", rename_all = "snake_case")]
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

impl PaymentState {
    pub const ALL: [PaymentState; 16] = [
        PaymentState::Idle,
        PaymentState::InitializingGateway,
        PaymentState::GatewayReady,
        PaymentState::Tokenizing,
        PaymentState::Tokenized,
        PaymentState::Authorizing,
        PaymentState::Authorized,
        PaymentState::Capturing,
        PaymentState::AwaitingExternalDevice,
        PaymentState::DeviceReading,
        PaymentState::DeviceProcessing,
        PaymentState::AwaitingCash,
        PaymentState::Captured,
        PaymentState::Failed,
        PaymentState::Cancelling,
        PaymentState::Cancelled,
    ];

    /// States in which a gateway or device round trip is outstanding.
    pub const fn is_in_flight(self) -> bool {
        matches!(
            self,
            PaymentState::InitializingGateway
                | PaymentState::Tokenizing
                | PaymentState::Authorizing
                | PaymentState::Capturing
                | PaymentState::AwaitingExternalDevice
                | PaymentState::DeviceReading
                | PaymentState::DeviceProcessing
        )
    }

    /// States owned by the terminal device monitor.
    pub const fn is_device_state(self) -> bool {
        matches!(
            self,
            PaymentState::AwaitingExternalDevice
                | PaymentState::DeviceReading
                | PaymentState::DeviceProcessing
        )
    }

    /// Terminal given the failure recorded alongside the state.
    pub fn is_terminal_with(self, failure: Option<&PaymentFailure>) -> bool {
        match self {
            PaymentState::Captured | PaymentState::Cancelled => true,
            PaymentState::Failed => !failure.is_some_and(|f| f.retryable),
            _ => false,
        }
    }

    pub fn can_retry_with(self, failure: Option<&PaymentFailure>) -> bool {
        self == PaymentState::Failed && failure.is_some_and(|f| f.retryable)
    }

    pub fn can_cancel_with(self, failure: Option<&PaymentFailure>) -> bool {
        self != PaymentState::Cancelling && !self.is_terminal_with(failure)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            PaymentState::Idle => "idle",
            PaymentState::InitializingGateway => "initializing_gateway",
            PaymentState::GatewayReady => "gateway_ready",
            PaymentState::Tokenizing => "tokenizing",
            PaymentState::Tokenized => "tokenized",
            PaymentState::Authorizing => "authorizing",
            PaymentState::Authorized => "authorized",
            PaymentState::Capturing => "capturing",
            PaymentState::AwaitingExternalDevice => "awaiting_external_device",
            PaymentState::DeviceReading => "device_reading",
            PaymentState::DeviceProcessing => "device_processing",
            PaymentState::AwaitingCash => "awaiting_cash",
            PaymentState::Captured => "captured",
            PaymentState::Failed => "failed",
            PaymentState::Cancelling => "cancelling",
            PaymentState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<PaymentState> for wire::PaymentState {
    fn from(value: PaymentState) -> Self {
        match value {
            PaymentState::Idle => wire::PaymentState::Idle,
            PaymentState::InitializingGateway => wire::PaymentState::InitializingGateway,
            PaymentState::GatewayReady => wire::PaymentState::GatewayReady,
            PaymentState::Tokenizing => wire::PaymentState::Tokenizing,
            PaymentState::Tokenized => wire::PaymentState::Tokenized,
            PaymentState::Authorizing => wire::PaymentState::Authorizing,
            PaymentState::Authorized => wire::PaymentState::Authorized,
            PaymentState::Capturing => wire::PaymentState::Capturing,
            PaymentState::AwaitingExternalDevice => wire::PaymentState::AwaitingExternalDevice,
            PaymentState::DeviceReading => wire::PaymentState::DeviceReading,
            PaymentState::DeviceProcessing => wire::PaymentState::DeviceProcessing,
            PaymentState::AwaitingCash => wire::PaymentState::AwaitingCash,
            PaymentState::Captured => wire::PaymentState::Captured,
            PaymentState::Failed => wire::PaymentState::Failed,
            PaymentState::Cancelling => wire::PaymentState::Cancelling,
            PaymentState::Cancelled => wire::PaymentState::Cancelled,
        }
    }
}

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

impl FailureKind {
    /// Transient failures can be retried with the same idempotency key.
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::Timeout
                | FailureKind::Network
                | FailureKind::RateLimited
                | FailureKind::Unavailable
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Network => "network",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Unavailable => "unavailable",
            FailureKind::Declined => "declined",
            FailureKind::InvalidRequest => "invalid_request",
            FailureKind::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<FailureKind> for wire::FailureKind {
    fn from(value: FailureKind) -> Self {
        match value {
            FailureKind::Timeout => wire::FailureKind::Timeout,
            FailureKind::Network => wire::FailureKind::Network,
            FailureKind::RateLimited => wire::FailureKind::RateLimited,
            FailureKind::Unavailable => wire::FailureKind::Unavailable,
            FailureKind::Declined => wire::FailureKind::Declined,
            FailureKind::InvalidRequest => wire::FailureKind::InvalidRequest,
            FailureKind::Rejected => wire::FailureKind::Rejected,
        }
    }
}

/// The gateway round trip a timeout or failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayOperation {
    Authorize,
    Capture,
    Cancel,
    DeviceCheckout,
    DeviceStatus,
}

impl GatewayOperation {
    pub const fn as_str(self) -> &'static str {
        match self {
            GatewayOperation::Authorize => "authorize",
            GatewayOperation::Capture => "capture",
            GatewayOperation::Cancel => "cancel",
            GatewayOperation::DeviceCheckout => "device_checkout",
            GatewayOperation::DeviceStatus => "device_status",
        }
    }
}

impl std::fmt::Display for GatewayOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailure {
    pub kind: FailureKind,
    pub retryable: bool,
    pub message: String,
}

impl PaymentFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: kind.is_retryable(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentAttempt {
    pub id: PaymentId,
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub state: PaymentState,
    /// Stable across retries of the same attempt; forwarded to the gateway.
    pub idempotency_key: String,
    pub attempt_count: u32,
    pub last_error: Option<PaymentFailure>,
    pub gateway_reference: Option<String>,
    pub source_token: Option<String>,
    pub device_id: Option<String>,
    pub history: VecDeque<TransitionRecord>,
    pub version: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl PaymentAttempt {
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal_with(self.last_error.as_ref())
    }

    pub fn can_retry(&self) -> bool {
        self.state.can_retry_with(self.last_error.as_ref())
    }

    pub fn can_cancel(&self) -> bool {
        self.state.can_cancel_with(self.last_error.as_ref())
    }

    pub fn to_response(&self) -> wire::PaymentResponse {
        wire::PaymentResponse {
            payment_id: self.id.0,
            order_id: self.order_id.0,
            method: self.method.into(),
            state: self.state.into(),
            amount: self.amount,
            idempotency_key: self.idempotency_key.clone(),
            attempt_count: self.attempt_count,
            last_error: self.last_error.as_ref().map(|f| wire::PaymentFailureBody {
                kind: f.kind.into(),
                retryable: f.retryable,
                message: f.message.clone(),
            }),
            gateway_reference: self.gateway_reference.clone(),
            can_retry: self.can_retry(),
            can_cancel: self.can_cancel(),
            is_terminal: self.is_terminal(),
            version: self.version,
            created_at: unix_millis(self.created_at),
            updated_at: unix_millis(self.updated_at),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PaymentAttemptRow {
    pub id: PaymentId,
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub method: PaymentMethod,
    pub amount: Decimal,
    pub state: PaymentState,
    pub idempotency_key: String,
    pub attempt_count: i32,
    pub last_error: Option<Json<PaymentFailure>>,
    pub gateway_reference: Option<String>,
    pub source_token: Option<String>,
    pub device_id: Option<String>,
    pub history: Json<VecDeque<TransitionRecord>>,
    pub version: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<PaymentAttemptRow> for PaymentAttempt {
    fn from(row: PaymentAttemptRow) -> Self {
        PaymentAttempt {
            id: row.id,
            tenant_id: row.tenant_id,
            order_id: row.order_id,
            method: row.method,
            amount: row.amount,
            state: row.state,
            idempotency_key: row.idempotency_key,
            attempt_count: u32::try_from(row.attempt_count).unwrap_or_default(),
            last_error: row.last_error.map(|j| j.0),
            gateway_reference: row.gateway_reference,
            source_token: row.source_token,
            device_id: row.device_id,
            history: row.history.0,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const PAYMENT_COLUMNS: &str = "id, tenant_id, order_id, method, amount, state, idempotency_key, \
     attempt_count, last_error, gateway_reference, source_token, device_id, history, version, \
     created_at, updated_at";

#[derive(Debug, Clone, Copy)]
pub struct GetPayment {
    pub tenant_id: TenantId,
    pub payment_id: PaymentId,
}

impl Processor<GetPayment> for DatabaseProcessor {
    type Output = Option<PaymentAttempt>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPayment")]
    async fn process(&self, query: GetPayment) -> Result<Option<PaymentAttempt>, sqlx::Error> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_attempts WHERE id = $1 AND tenant_id = $2"
        );
        let row = sqlx::query_as::<_, PaymentAttemptRow>(&sql)
            .bind(query.payment_id)
            .bind(query.tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(PaymentAttempt::from))
    }
}

#[derive(Debug, Clone)]
pub struct GetPaymentByKey {
    pub tenant_id: TenantId,
    pub idempotency_key: String,
}

impl Processor<GetPaymentByKey> for DatabaseProcessor {
    type Output = Option<PaymentAttempt>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPaymentByKey")]
    async fn process(&self, query: GetPaymentByKey) -> Result<Option<PaymentAttempt>, sqlx::Error> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_attempts \
             WHERE tenant_id = $1 AND idempotency_key = $2"
        );
        let row = sqlx::query_as::<_, PaymentAttemptRow>(&sql)
            .bind(query.tenant_id)
            .bind(&query.idempotency_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(PaymentAttempt::from))
    }
}

/// The captured attempt of an order, if it has been paid.
#[derive(Debug, Clone, Copy)]
pub struct GetCapturedPayment {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
}

impl Processor<GetCapturedPayment> for DatabaseProcessor {
    type Output = Option<PaymentAttempt>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetCapturedPayment")]
    async fn process(
        &self,
        query: GetCapturedPayment,
    ) -> Result<Option<PaymentAttempt>, sqlx::Error> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_attempts \
             WHERE order_id = $1 AND tenant_id = $2 AND state = 'captured' LIMIT 1"
        );
        let row = sqlx::query_as::<_, PaymentAttemptRow>(&sql)
            .bind(query.order_id)
            .bind(query.tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(PaymentAttempt::from))
    }
}

/// The attempt of an order that is not yet terminal, if any.
#[derive(Debug, Clone, Copy)]
pub struct GetActivePayment {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
}

impl Processor<GetActivePayment> for DatabaseProcessor {
    type Output = Option<PaymentAttempt>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetActivePayment")]
    async fn process(&self, query: GetActivePayment) -> Result<Option<PaymentAttempt>, sqlx::Error> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payment_attempts \
             WHERE order_id = $1 AND tenant_id = $2 AND active"
        );
        let row = sqlx::query_as::<_, PaymentAttemptRow>(&sql)
            .bind(query.order_id)
            .bind(query.tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(PaymentAttempt::from))
    }
}

/// Inserts unless the order already has a captured attempt. Returns whether
/// a row was written.
#[derive(Debug, Clone)]
pub struct InsertPayment {
    pub attempt: PaymentAttempt,
}

impl Processor<InsertPayment> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertPayment")]
    async fn process(&self, query: InsertPayment) -> Result<bool, sqlx::Error> {
        let a = &query.attempt;
        let result = sqlx::query(
            "INSERT INTO payment_attempts (id, tenant_id, order_id, method, amount, state, \
             idempotency_key, attempt_count, last_error, gateway_reference, source_token, \
             device_id, history, version, created_at, updated_at, active) \
             SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17 \
             WHERE NOT EXISTS (SELECT 1 FROM payment_attempts \
                 WHERE order_id = $3 AND state = 'captured')",
        )
        .bind(a.id)
        .bind(a.tenant_id)
        .bind(a.order_id)
        .bind(a.method)
        .bind(a.amount)
        .bind(a.state)
        .bind(&a.idempotency_key)
        .bind(i32::try_from(a.attempt_count).unwrap_or(i32::MAX))
        .bind(a.last_error.as_ref().map(Json))
        .bind(&a.gateway_reference)
        .bind(&a.source_token)
        .bind(&a.device_id)
        .bind(Json(&a.history))
        .bind(a.version)
        .bind(a.created_at)
        .bind(a.updated_at)
        .bind(!a.is_terminal())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

/// Compare-and-swap update of an attempt. Returns whether a row was written.
#[derive(Debug, Clone)]
pub struct ReplacePayment {
    pub attempt: PaymentAttempt,
    pub expected_version: i64,
}

impl Processor<ReplacePayment> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ReplacePayment")]
    async fn process(&self, query: ReplacePayment) -> Result<bool, sqlx::Error> {
        let a = &query.attempt;
        let result = sqlx::query(
            "UPDATE payment_attempts SET state = $1, attempt_count = $2, last_error = $3, \
             gateway_reference = $4, history = $5, version = $6, updated_at = $7, active = $8 \
             WHERE id = $9 AND tenant_id = $10 AND version = $11",
        )
        .bind(a.state)
        .bind(i32::try_from(a.attempt_count).unwrap_or(i32::MAX))
        .bind(a.last_error.as_ref().map(Json))
        .bind(&a.gateway_reference)
        .bind(Json(&a.history))
        .bind(a.version)
        .bind(a.updated_at)
        .bind(!a.is_terminal())
        .bind(a.id)
        .bind(a.tenant_id)
        .bind(query.expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GetPaymentVersion {
    pub tenant_id: TenantId,
    pub payment_id: PaymentId,
}

impl Processor<GetPaymentVersion> for DatabaseProcessor {
    type Output = Option<i64>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPaymentVersion")]
    async fn process(&self, query: GetPaymentVersion) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT version FROM payment_attempts WHERE id = $1 AND tenant_id = $2",
        )
        .bind(query.payment_id)
        .bind(query.tenant_id)
        .fetch_optional(&self.pool)
        .await
    }
}
