//! Terminal checkout monitoring.
//!
//! The monitor polls the gateway only while the attempt sits in one of the
//! device states and gives up at the policy's `device_timeout`. Any state
//! change made elsewhere (a cancel, a retry) stops it at the next tick.

use smallvec::{SmallVec, smallvec};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::PaymentService;
use super::gateway::DeviceStatus;
use crate::entities::payment::{FailureKind, GatewayOperation, PaymentFailure, PaymentState};
use crate::entities::{PaymentId, TenantId};
use crate::error::EngineError;
use crate::fsm::payment::{PaymentEvent, PaymentStateMachine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorStep {
    Continue,
    Stop,
}

/// Events that move an attempt in `state` to where the device reports it is.
pub fn device_events(state: PaymentState, status: DeviceStatus) -> SmallVec<[PaymentEvent; 3]> {
    use PaymentState::*;
    match (state, status) {
        (_, DeviceStatus::Waiting) => smallvec![],
        (AwaitingExternalDevice, DeviceStatus::CardPresented) => {
            smallvec![PaymentEvent::CardPresented]
        }
        (AwaitingExternalDevice, DeviceStatus::Processing) => {
            smallvec![PaymentEvent::CardPresented, PaymentEvent::CardRead]
        }
        (DeviceReading, DeviceStatus::Processing) => smallvec![PaymentEvent::CardRead],
        (AwaitingExternalDevice, DeviceStatus::Approved) => smallvec![
            PaymentEvent::CardPresented,
            PaymentEvent::CardRead,
            PaymentEvent::DeviceApproved
        ],
        (DeviceReading, DeviceStatus::Approved) => {
            smallvec![PaymentEvent::CardRead, PaymentEvent::DeviceApproved]
        }
        (DeviceProcessing, DeviceStatus::Approved) => smallvec![PaymentEvent::DeviceApproved],
        (_, DeviceStatus::Declined { reason }) => smallvec![PaymentEvent::DeviceDeclined(
            PaymentFailure::new(FailureKind::Declined, reason)
        )],
        (_, DeviceStatus::Failed { reason }) => smallvec![PaymentEvent::DeviceDeclined(
            PaymentFailure::new(FailureKind::Unavailable, reason)
        )],
        _ => smallvec![],
    }
}

impl PaymentService {
    pub(crate) fn spawn_device_monitor(
        &self,
        tenant_id: TenantId,
        payment_id: PaymentId,
    ) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move { service.monitor_device(tenant_id, payment_id).await })
    }

    async fn monitor_device(self, tenant_id: TenantId, payment_id: PaymentId) {
        let policy = self.policy.current().payment.clone();
        let deadline = Instant::now() + policy.device_timeout;
        let mut ticker = tokio::time::interval_at(
            Instant::now() + policy.device_poll_interval,
            policy.device_poll_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(payment_id = %payment_id, "Device monitor started");

        loop {
            tokio::select! {
                biased;

                _ = tokio::time::sleep_until(deadline) => {
                    self.expire_checkout(tenant_id, payment_id).await;
                    return;
                }

                _ = ticker.tick() => {}
            }

            match self.poll_device(tenant_id, payment_id).await {
                Ok(MonitorStep::Continue) => {}
                Ok(MonitorStep::Stop) => {
                    debug!(payment_id = %payment_id, "Device monitor stopped");
                    return;
                }
                Err(e) => {
                    warn!(payment_id = %payment_id, error = %e, "Device monitor step failed");
                }
            }
        }
    }

    async fn poll_device(
        &self,
        tenant_id: TenantId,
        payment_id: PaymentId,
    ) -> Result<MonitorStep, EngineError> {
        let Some(mut attempt) = self.store.get_payment(tenant_id, payment_id).await? else {
            return Ok(MonitorStep::Stop);
        };
        if !attempt.state.is_device_state() {
            return Ok(MonitorStep::Stop);
        }
        let Some(reference) = attempt.gateway_reference.clone() else {
            return Ok(MonitorStep::Stop);
        };

        let status = match self
            .call(
                GatewayOperation::DeviceStatus,
                self.gateway.device_status(&reference),
            )
            .await
        {
            Ok(status) => status,
            Err(e) if e.retryable() => {
                debug!(payment_id = %payment_id, error = %e, "Device status unavailable");
                return Ok(MonitorStep::Continue);
            }
            Err(e) => DeviceStatus::Failed { reason: e.message },
        };

        let events = device_events(attempt.state, status);
        if events.is_empty() {
            return Ok(MonitorStep::Continue);
        }
        let mut machine = PaymentStateMachine::restore(&attempt, self.history_capacity());
        for event in events {
            machine.transition(event)?;
        }
        match self.commit(&mut attempt, &machine).await {
            Ok(()) => {}
            Err(EngineError::Conflict { .. }) => return Ok(MonitorStep::Continue),
            Err(e) => return Err(e),
        }

        match attempt.state {
            PaymentState::Captured => {
                info!(payment_id = %payment_id, "Terminal payment approved");
                Ok(MonitorStep::Stop)
            }
            PaymentState::Failed => {
                info!(
                    payment_id = %payment_id,
                    reason = attempt.last_error.as_ref().map(|f| f.message.as_str()).unwrap_or_default(),
                    "Terminal payment failed"
                );
                Ok(MonitorStep::Stop)
            }
            _ => Ok(MonitorStep::Continue),
        }
    }

    /// The device took too long: fail the attempt and abort the checkout.
    async fn expire_checkout(&self, tenant_id: TenantId, payment_id: PaymentId) {
        for _ in 0..3 {
            let mut attempt = match self.store.get_payment(tenant_id, payment_id).await {
                Ok(Some(attempt)) => attempt,
                Ok(None) => return,
                Err(e) => {
                    warn!(payment_id = %payment_id, error = %e, "Could not load expired checkout");
                    return;
                }
            };
            if !attempt.state.is_device_state() {
                return;
            }
            let mut machine = PaymentStateMachine::restore(&attempt, self.history_capacity());
            if machine
                .transition(PaymentEvent::TimeoutElapsed(GatewayOperation::DeviceCheckout))
                .is_err()
            {
                return;
            }
            match self.commit(&mut attempt, &machine).await {
                Ok(()) => {
                    warn!(payment_id = %payment_id, "Terminal checkout timed out");
                    if let Some(reference) = machine.gateway_reference() {
                        self.void(payment_id, reference).await;
                    }
                    return;
                }
                Err(EngineError::Conflict { .. }) => continue,
                Err(e) => {
                    warn!(payment_id = %payment_id, error = %e, "Could not expire checkout");
                    return;
                }
            }
        }
    }
}
