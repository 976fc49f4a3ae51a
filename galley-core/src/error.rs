use smallvec::SmallVec;
use thiserror::Error;

use crate::entities::order::OrderStatus;
use crate::entities::payment::PaymentState;
use crate::entities::{PaymentId, TenantId};
use crate::fsm::payment::PaymentEventKind;
use crate::payments::gateway::GatewayError;
use crate::store::StoreError;

/// A requested order status change that the transition table forbids.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("order cannot move from {current} to {target} (valid next states: {valid_next:?})")]
pub struct InvalidTransition {
    pub current: OrderStatus,
    pub target: OrderStatus,
    pub valid_next: SmallVec<[OrderStatus; 4]>,
}

/// A payment event that is not accepted in the attempt's current state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("payment event {event} is not accepted in state {state}")]
pub struct PaymentTransitionRejected {
    pub state: PaymentState,
    pub event: PaymentEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("no authenticated identity")]
    Anonymous,
    #[error("identity belongs to tenant {actual}, not {expected}")]
    TenantMismatch { expected: TenantId, actual: TenantId },
    #[error("tenant {0} is not configured")]
    UnknownTenant(TenantId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Order,
    Payment,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Order => f.write_str("order"),
            ResourceKind::Payment => f.write_str("payment"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error(transparent)]
    PaymentRejected(#[from] PaymentTransitionRejected),
    #[error("stale version {expected}, current version is {current}")]
    Conflict { expected: i64, current: i64 },
    #[error("order already has an active payment attempt")]
    PaymentInProgress { payment_id: Option<PaymentId> },
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("payment gateway failure: {error}")]
    ExternalGateway {
        payment_id: Option<PaymentId>,
        #[source]
        error: GatewayError,
    },
    #[error("{0} not found")]
    NotFound(ResourceKind),
    #[error("storage error: {0}")]
    Storage(#[source] StoreError),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }

    /// Map a store failure on a resource of the given kind.
    ///
    /// `expected` is the version the caller wrote against.
    pub(crate) fn from_store(error: StoreError, kind: ResourceKind, expected: i64) -> Self {
        match error {
            StoreError::Conflict { current } => EngineError::Conflict { expected, current },
            StoreError::NotFound => EngineError::NotFound(kind),
            StoreError::ActivePaymentExists { existing } => {
                EngineError::PaymentInProgress { payment_id: existing }
            }
            StoreError::OrderAlreadyPaid { .. } => EngineError::validation("order is already paid"),
            StoreError::DuplicateIdempotencyKey { .. } => {
                EngineError::validation("idempotency_key is already in use")
            }
            other => EngineError::Storage(other),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::ActivePaymentExists { existing } => {
                EngineError::PaymentInProgress { payment_id: existing }
            }
            StoreError::OrderAlreadyPaid { .. } => EngineError::validation("order is already paid"),
            StoreError::DuplicateIdempotencyKey { .. } => {
                EngineError::validation("idempotency_key is already in use")
            }
            other => EngineError::Storage(other),
        }
    }
}
