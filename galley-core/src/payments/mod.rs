//! The payment driver.
//!
//! [`PaymentService`] feeds the outcome of every gateway call into the
//! [`PaymentStateMachine`] and persists the result with a compare-and-swap
//! on the attempt version. Each gateway call is bounded by the policy's
//! `gateway_timeout`.

mod device;
pub mod gateway;

use std::future::Future;
use std::sync::Arc;

use galley_sdk::objects::StartPaymentRequest;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broadcast::EventBroadcaster;
use crate::config::{EnginePolicy, PolicyStore};
use crate::entities::order::{Order, OrderStatus};
use crate::entities::payment::{
    FailureKind, GatewayOperation, PaymentAttempt, PaymentFailure, PaymentMethod, PaymentState,
};
use crate::entities::{OrderId, PaymentId, TenantId};
use crate::error::{EngineError, ResourceKind};
use crate::events::DomainEvent;
use crate::fsm::payment::{PaymentEvent, PaymentStateMachine};
use crate::store::{PaymentStore, StoreError};
use gateway::{AuthorizeRequest, DeviceCheckoutRequest, GatewayError, PaymentGateway};

pub use device::device_events;

/// A validated request to take payment for an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartPayment {
    pub method: PaymentMethod,
    pub source_token: Option<String>,
    pub device_id: Option<String>,
    pub idempotency_key: Option<String>,
}

impl From<StartPaymentRequest> for StartPayment {
    fn from(request: StartPaymentRequest) -> Self {
        Self {
            method: request.method.into(),
            source_token: request.source_token,
            device_id: request.device_id,
            idempotency_key: request.idempotency_key,
        }
    }
}

/// Tries at the final `cancelled` write before a conflict is returned.
const CANCEL_COMMIT_ATTEMPTS: usize = 3;

#[derive(Clone)]
pub struct PaymentService {
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
    broadcaster: Arc<EventBroadcaster>,
    policy: PolicyStore<EnginePolicy>,
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// The event a failed gateway call feeds the machine. Timeouts are reported
/// as such regardless of where they happened.
fn failure_event(
    error: &GatewayError,
    operation: GatewayOperation,
    wrap: fn(PaymentFailure) -> PaymentEvent,
) -> PaymentEvent {
    if error.kind == FailureKind::Timeout {
        PaymentEvent::TimeoutElapsed(operation)
    } else {
        wrap(error.to_failure())
    }
}

impl PaymentService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn PaymentGateway>,
        broadcaster: Arc<EventBroadcaster>,
        policy: PolicyStore<EnginePolicy>,
    ) -> Self {
        Self {
            store,
            gateway,
            broadcaster,
            policy,
        }
    }

    fn history_capacity(&self) -> usize {
        self.policy.current().payment.history_capacity
    }

    /// Run a gateway call under the configured timeout.
    async fn call<T>(
        &self,
        operation: GatewayOperation,
        call: impl Future<Output = Result<T, GatewayError>>,
    ) -> Result<T, GatewayError> {
        let limit = self.policy.current().payment.gateway_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation = %operation,
                    timeout_secs = limit.as_secs(),
                    "Gateway call timed out"
                );
                Err(GatewayError::timed_out(operation, limit))
            }
        }
    }

    async fn load(
        &self,
        tenant_id: TenantId,
        payment_id: PaymentId,
    ) -> Result<PaymentAttempt, EngineError> {
        self.store
            .get_payment(tenant_id, payment_id)
            .await?
            .ok_or(EngineError::NotFound(ResourceKind::Payment))
    }

    /// Persist the machine's state onto `attempt` and announce it.
    async fn commit(
        &self,
        attempt: &mut PaymentAttempt,
        machine: &PaymentStateMachine,
    ) -> Result<(), EngineError> {
        let expected = attempt.version;
        let mut next = attempt.clone();
        machine.write_back(&mut next);
        next.version = expected + 1;
        next.updated_at = OffsetDateTime::now_utc();
        self.store
            .replace_payment(&next, expected)
            .await
            .map_err(|e| EngineError::from_store(e, ResourceKind::Payment, expected))?;
        *attempt = next;
        self.broadcaster
            .publish(DomainEvent::PaymentUpdated(attempt.clone()));
        Ok(())
    }

    /// Like [`commit`](Self::commit), for results of a gateway call that
    /// may have raced with a cancellation. A lost race returns the attempt
    /// as stored, voiding a reference the stored attempt does not know about.
    async fn commit_outcome(
        &self,
        mut attempt: PaymentAttempt,
        machine: &PaymentStateMachine,
    ) -> Result<PaymentAttempt, EngineError> {
        match self.commit(&mut attempt, machine).await {
            Ok(()) => Ok(attempt),
            Err(EngineError::Conflict { .. }) => {
                let stored = self.load(attempt.tenant_id, attempt.id).await?;
                warn!(
                    payment_id = %attempt.id,
                    state = %stored.state,
                    "Payment changed while a gateway call was in flight"
                );
                let orphaned = machine
                    .gateway_reference()
                    .filter(|r| stored.gateway_reference.as_deref() != Some(*r));
                if let Some(reference) = orphaned {
                    if matches!(stored.state, PaymentState::Cancelling | PaymentState::Cancelled) {
                        self.void(attempt.id, reference).await;
                    }
                }
                Ok(stored)
            }
            Err(e) => Err(e),
        }
    }

    async fn void(&self, payment_id: PaymentId, reference: &str) {
        if let Err(e) = self
            .call(GatewayOperation::Cancel, self.gateway.cancel(reference))
            .await
        {
            warn!(
                payment_id = %payment_id,
                reference,
                error = %e,
                "Best-effort gateway cancel failed"
            );
        }
    }

    fn finish(attempt: PaymentAttempt) -> Result<PaymentAttempt, EngineError> {
        if attempt.state != PaymentState::Failed {
            return Ok(attempt);
        }
        let error = attempt
            .last_error
            .as_ref()
            .map(GatewayError::from)
            .unwrap_or_else(|| GatewayError::new(FailureKind::Unavailable, "payment failed"));
        Err(EngineError::ExternalGateway {
            payment_id: Some(attempt.id),
            error,
        })
    }

    /// Open a payment attempt for `order` and drive it as far as it goes
    /// without outside input.
    ///
    /// Card attempts return captured or failed, terminal attempts return
    /// waiting on the device, cash attempts return waiting for cash.
    pub async fn start(
        &self,
        order: &Order,
        request: StartPayment,
    ) -> Result<PaymentAttempt, EngineError> {
        let idempotency_key = match request.idempotency_key {
            Some(key) if key.trim().is_empty() || key.len() > 255 => {
                return Err(EngineError::validation(
                    "idempotency_key must be 1 to 255 characters",
                ));
            }
            Some(key) => {
                if let Some(existing) = self.store.payment_by_key(order.tenant_id, &key).await? {
                    return Self::replay(order, existing);
                }
                key
            }
            None => Uuid::now_v7().to_string(),
        };
        if order.status == OrderStatus::Cancelled {
            return Err(EngineError::validation("order is cancelled"));
        }
        if order.total <= Decimal::ZERO {
            return Err(EngineError::validation("order total must be positive"));
        }
        match request.method {
            PaymentMethod::Card if non_empty(request.source_token.as_deref()).is_none() => {
                return Err(EngineError::validation(
                    "card payments require a source_token",
                ));
            }
            PaymentMethod::Terminal if non_empty(request.device_id.as_deref()).is_none() => {
                return Err(EngineError::validation(
                    "terminal payments require a device_id",
                ));
            }
            _ => {}
        }
        if let Some(active) = self.store.active_payment(order.tenant_id, order.id).await? {
            return Err(EngineError::PaymentInProgress {
                payment_id: Some(active.id),
            });
        }

        let mut machine = PaymentStateMachine::new(request.method, self.history_capacity());
        machine.transition(PaymentEvent::PaymentRequested(request.method))?;
        let now = OffsetDateTime::now_utc();
        let mut attempt = PaymentAttempt {
            id: PaymentId::generate(),
            tenant_id: order.tenant_id,
            order_id: order.id,
            method: request.method,
            amount: order.total,
            state: PaymentState::Idle,
            idempotency_key,
            attempt_count: 0,
            last_error: None,
            gateway_reference: None,
            source_token: request.source_token,
            device_id: request.device_id,
            history: Default::default(),
            version: 1,
            created_at: now,
            updated_at: now,
        };
        machine.write_back(&mut attempt);
        match self.store.insert_payment(&attempt).await {
            Ok(()) => {}
            Err(StoreError::DuplicateIdempotencyKey { .. }) => {
                let existing = self
                    .store
                    .payment_by_key(order.tenant_id, &attempt.idempotency_key)
                    .await?
                    .ok_or(EngineError::NotFound(ResourceKind::Payment))?;
                return Self::replay(order, existing);
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            payment_id = %attempt.id,
            order_id = %order.id,
            method = %attempt.method,
            amount = %attempt.amount,
            "Payment attempt opened"
        );
        self.broadcaster
            .publish(DomainEvent::PaymentUpdated(attempt.clone()));

        self.advance(attempt, machine).await
    }

    /// Answer a repeated `start` with the attempt its key already opened.
    fn replay(order: &Order, existing: PaymentAttempt) -> Result<PaymentAttempt, EngineError> {
        if existing.order_id != order.id {
            return Err(EngineError::validation(
                "idempotency_key was used for another order",
            ));
        }
        info!(
            payment_id = %existing.id,
            order_id = %order.id,
            state = %existing.state,
            "Replaying payment attempt for repeated idempotency key"
        );
        Self::finish(existing)
    }

    async fn advance(
        &self,
        attempt: PaymentAttempt,
        machine: PaymentStateMachine,
    ) -> Result<PaymentAttempt, EngineError> {
        match attempt.method {
            PaymentMethod::Card => Self::finish(self.run_card(attempt, machine).await?),
            PaymentMethod::Terminal => Self::finish(self.run_terminal(attempt, machine).await?),
            PaymentMethod::Cash => Ok(attempt),
        }
    }

    async fn run_card(
        &self,
        mut attempt: PaymentAttempt,
        mut machine: PaymentStateMachine,
    ) -> Result<PaymentAttempt, EngineError> {
        if machine.state() == PaymentState::InitializingGateway {
            machine.transition(PaymentEvent::GatewayReady)?;
        }
        if machine.state() == PaymentState::GatewayReady {
            machine.transition(PaymentEvent::TokenizationStarted)?;
            let event = match non_empty(attempt.source_token.as_deref()) {
                Some(_) => PaymentEvent::TokenizationComplete,
                None => PaymentEvent::TokenizationFailed(PaymentFailure::new(
                    FailureKind::InvalidRequest,
                    "missing card token",
                )),
            };
            machine.transition(event)?;
        }
        if machine.state() == PaymentState::Tokenized {
            machine.transition(PaymentEvent::AuthorizationStarted)?;
            self.commit(&mut attempt, &machine).await?;
            let request = AuthorizeRequest {
                idempotency_key: attempt.idempotency_key.clone(),
                order_id: attempt.order_id,
                amount: attempt.amount,
                source_token: attempt.source_token.clone().unwrap_or_default(),
            };
            let event = match self
                .call(GatewayOperation::Authorize, self.gateway.authorize(&request))
                .await
            {
                Ok(reference) => PaymentEvent::AuthorizationSucceeded { reference },
                Err(e) => failure_event(
                    &e,
                    GatewayOperation::Authorize,
                    PaymentEvent::AuthorizationFailed,
                ),
            };
            machine.transition(event)?;
            if machine.state() != PaymentState::Authorized {
                return self.commit_outcome(attempt, &machine).await;
            }
        }
        if machine.state() == PaymentState::Authorized {
            machine.transition(PaymentEvent::CaptureStarted)?;
            match self.commit(&mut attempt, &machine).await {
                Ok(()) => {}
                Err(EngineError::Conflict { .. }) => {
                    return self.commit_outcome(attempt, &machine).await;
                }
                Err(e) => return Err(e),
            }
            let reference = machine.gateway_reference().unwrap_or_default().to_owned();
            let event = match self
                .call(
                    GatewayOperation::Capture,
                    self.gateway
                        .capture(&reference, &attempt.idempotency_key, attempt.amount),
                )
                .await
            {
                Ok(()) => PaymentEvent::CaptureSucceeded,
                Err(e) => failure_event(&e, GatewayOperation::Capture, PaymentEvent::CaptureFailed),
            };
            machine.transition(event)?;
        }
        let attempt = self.commit_outcome(attempt, &machine).await?;
        if attempt.state == PaymentState::Captured {
            info!(payment_id = %attempt.id, order_id = %attempt.order_id, "Card payment captured");
        }
        Ok(attempt)
    }

    async fn run_terminal(
        &self,
        mut attempt: PaymentAttempt,
        mut machine: PaymentStateMachine,
    ) -> Result<PaymentAttempt, EngineError> {
        if machine.state() != PaymentState::InitializingGateway {
            return Ok(attempt);
        }
        let request = DeviceCheckoutRequest {
            idempotency_key: attempt.idempotency_key.clone(),
            order_id: attempt.order_id,
            amount: attempt.amount,
            device_id: attempt.device_id.clone().unwrap_or_default(),
        };
        match self
            .call(
                GatewayOperation::DeviceCheckout,
                self.gateway.start_device_checkout(&request),
            )
            .await
        {
            Ok(reference) => {
                machine.transition(PaymentEvent::GatewayReady)?;
                machine.transition(PaymentEvent::DeviceCheckoutStarted { reference })?;
            }
            Err(e) => {
                machine.transition(failure_event(
                    &e,
                    GatewayOperation::DeviceCheckout,
                    PaymentEvent::GatewayUnavailable,
                ))?;
            }
        }
        match self.commit(&mut attempt, &machine).await {
            Ok(()) => {}
            Err(EngineError::Conflict { .. }) => {
                return self.commit_outcome(attempt, &machine).await;
            }
            Err(e) => return Err(e),
        }
        if attempt.state.is_device_state() {
            info!(
                payment_id = %attempt.id,
                device_id = attempt.device_id.as_deref().unwrap_or_default(),
                "Checkout handed to payment terminal"
            );
            self.spawn_device_monitor(attempt.tenant_id, attempt.id);
        }
        Ok(attempt)
    }

    /// Retry a failed attempt with its original idempotency key.
    pub async fn retry(
        &self,
        tenant_id: TenantId,
        payment_id: PaymentId,
    ) -> Result<PaymentAttempt, EngineError> {
        let mut attempt = self.load(tenant_id, payment_id).await?;
        let mut machine = PaymentStateMachine::restore(&attempt, self.history_capacity());
        machine.transition(PaymentEvent::RetryRequested)?;
        self.commit(&mut attempt, &machine).await?;
        info!(
            payment_id = %payment_id,
            attempt_count = attempt.attempt_count,
            state = %attempt.state,
            "Retrying payment"
        );
        self.advance(attempt, machine).await
    }

    /// Cancel an attempt, voiding whatever the gateway already holds.
    ///
    /// An attempt left in `cancelling` by an interrupted cancel picks up at
    /// the void.
    pub async fn cancel(
        &self,
        tenant_id: TenantId,
        payment_id: PaymentId,
    ) -> Result<PaymentAttempt, EngineError> {
        let mut attempt = self.load(tenant_id, payment_id).await?;
        let mut machine = PaymentStateMachine::restore(&attempt, self.history_capacity());
        if attempt.state == PaymentState::Cancelling {
            info!(payment_id = %payment_id, "Resuming interrupted cancellation");
        } else {
            machine.transition(PaymentEvent::CancelRequested)?;
            self.commit(&mut attempt, &machine).await?;
        }

        if let Some(reference) = machine.gateway_reference() {
            self.void(payment_id, reference).await;
        }

        machine.transition(PaymentEvent::CancelCompleted)?;
        let mut remaining = CANCEL_COMMIT_ATTEMPTS;
        loop {
            match self.commit(&mut attempt, &machine).await {
                Ok(()) => break,
                Err(EngineError::Conflict { .. }) if remaining > 1 => {
                    remaining -= 1;
                    attempt = self.load(tenant_id, payment_id).await?;
                    if attempt.state != PaymentState::Cancelling {
                        return Ok(attempt);
                    }
                    machine = PaymentStateMachine::restore(&attempt, self.history_capacity());
                    machine.transition(PaymentEvent::CancelCompleted)?;
                }
                Err(e) => return Err(e),
            }
        }
        info!(payment_id = %payment_id, "Payment cancelled");
        Ok(attempt)
    }

    /// Staff confirmed the cash was handed over.
    pub async fn confirm_cash(
        &self,
        tenant_id: TenantId,
        payment_id: PaymentId,
    ) -> Result<PaymentAttempt, EngineError> {
        let mut attempt = self.load(tenant_id, payment_id).await?;
        let mut machine = PaymentStateMachine::restore(&attempt, self.history_capacity());
        machine.transition(PaymentEvent::CashReceived)?;
        self.commit(&mut attempt, &machine).await?;
        info!(payment_id = %payment_id, amount = %attempt.amount, "Cash payment received");
        Ok(attempt)
    }

    pub async fn get(
        &self,
        tenant_id: TenantId,
        payment_id: PaymentId,
    ) -> Result<PaymentAttempt, EngineError> {
        self.load(tenant_id, payment_id).await
    }

    pub async fn active_for_order(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Option<PaymentAttempt>, EngineError> {
        Ok(self.store.active_payment(tenant_id, order_id).await?)
    }

    /// Cancel the order's non-terminal attempt, if any. Failures are logged.
    pub async fn cancel_active_for_order(&self, tenant_id: TenantId, order_id: OrderId) {
        let active = match self.store.active_payment(tenant_id, order_id).await {
            Ok(Some(active)) => active,
            Ok(None) => return,
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "Could not look up active payment");
                return;
            }
        };
        if !active.can_cancel() && active.state != PaymentState::Cancelling {
            return;
        }
        if let Err(e) = self.cancel(tenant_id, active.id).await {
            warn!(
                order_id = %order_id,
                payment_id = %active.id,
                error = %e,
                "Could not cancel payment of cancelled order"
            );
        }
    }
}
