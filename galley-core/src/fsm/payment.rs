use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::entities::payment::{
    FailureKind, GatewayOperation, PaymentAttempt, PaymentFailure, PaymentMethod, PaymentState,
};
use crate::error::PaymentTransitionRejected;

/// Inputs to the payment state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEvent {
    PaymentRequested(PaymentMethod),
    GatewayReady,
    GatewayUnavailable(PaymentFailure),
    TokenizationStarted,
    TokenizationComplete,
    TokenizationFailed(PaymentFailure),
    AuthorizationStarted,
    AuthorizationSucceeded { reference: String },
    AuthorizationFailed(PaymentFailure),
    CaptureStarted,
    CaptureSucceeded,
    CaptureFailed(PaymentFailure),
    DeviceCheckoutStarted { reference: String },
    CardPresented,
    CardRead,
    DeviceApproved,
    DeviceDeclined(PaymentFailure),
    CashReceived,
    TimeoutElapsed(GatewayOperation),
    CancelRequested,
    CancelCompleted,
    RetryRequested,
}

/// [`PaymentEvent`] without its payload, for history and error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentEventKind {
    PaymentRequested,
    GatewayReady,
    GatewayUnavailable,
    TokenizationStarted,
    TokenizationComplete,
    TokenizationFailed,
    AuthorizationStarted,
    AuthorizationSucceeded,
    AuthorizationFailed,
    CaptureStarted,
    CaptureSucceeded,
    CaptureFailed,
    DeviceCheckoutStarted,
    CardPresented,
    CardRead,
    DeviceApproved,
    DeviceDeclined,
    CashReceived,
    TimeoutElapsed,
    CancelRequested,
    CancelCompleted,
    RetryRequested,
}

impl PaymentEventKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            PaymentEventKind::PaymentRequested => "payment_requested",
            PaymentEventKind::GatewayReady => "gateway_ready",
            PaymentEventKind::GatewayUnavailable => "gateway_unavailable",
            PaymentEventKind::TokenizationStarted => "tokenization_started",
            PaymentEventKind::TokenizationComplete => "tokenization_complete",
            PaymentEventKind::TokenizationFailed => "tokenization_failed",
            PaymentEventKind::AuthorizationStarted => "authorization_started",
            PaymentEventKind::AuthorizationSucceeded => "authorization_succeeded",
            PaymentEventKind::AuthorizationFailed => "authorization_failed",
            PaymentEventKind::CaptureStarted => "capture_started",
            PaymentEventKind::CaptureSucceeded => "capture_succeeded",
            PaymentEventKind::CaptureFailed => "capture_failed",
            PaymentEventKind::DeviceCheckoutStarted => "device_checkout_started",
            PaymentEventKind::CardPresented => "card_presented",
            PaymentEventKind::CardRead => "card_read",
            PaymentEventKind::DeviceApproved => "device_approved",
            PaymentEventKind::DeviceDeclined => "device_declined",
            PaymentEventKind::CashReceived => "cash_received",
            PaymentEventKind::TimeoutElapsed => "timeout_elapsed",
            PaymentEventKind::CancelRequested => "cancel_requested",
            PaymentEventKind::CancelCompleted => "cancel_completed",
            PaymentEventKind::RetryRequested => "retry_requested",
        }
    }
}

impl std::fmt::Display for PaymentEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PaymentEvent {
    pub fn kind(&self) -> PaymentEventKind {
        match self {
            PaymentEvent::PaymentRequested(_) => PaymentEventKind::PaymentRequested,
            PaymentEvent::GatewayReady => PaymentEventKind::GatewayReady,
            PaymentEvent::GatewayUnavailable(_) => PaymentEventKind::GatewayUnavailable,
            PaymentEvent::TokenizationStarted => PaymentEventKind::TokenizationStarted,
            PaymentEvent::TokenizationComplete => PaymentEventKind::TokenizationComplete,
            PaymentEvent::TokenizationFailed(_) => PaymentEventKind::TokenizationFailed,
            PaymentEvent::AuthorizationStarted => PaymentEventKind::AuthorizationStarted,
            PaymentEvent::AuthorizationSucceeded { .. } => PaymentEventKind::AuthorizationSucceeded,
            PaymentEvent::AuthorizationFailed(_) => PaymentEventKind::AuthorizationFailed,
            PaymentEvent::CaptureStarted => PaymentEventKind::CaptureStarted,
            PaymentEvent::CaptureSucceeded => PaymentEventKind::CaptureSucceeded,
            PaymentEvent::CaptureFailed(_) => PaymentEventKind::CaptureFailed,
            PaymentEvent::DeviceCheckoutStarted { .. } => PaymentEventKind::DeviceCheckoutStarted,
            PaymentEvent::CardPresented => PaymentEventKind::CardPresented,
            PaymentEvent::CardRead => PaymentEventKind::CardRead,
            PaymentEvent::DeviceApproved => PaymentEventKind::DeviceApproved,
            PaymentEvent::DeviceDeclined(_) => PaymentEventKind::DeviceDeclined,
            PaymentEvent::CashReceived => PaymentEventKind::CashReceived,
            PaymentEvent::TimeoutElapsed(_) => PaymentEventKind::TimeoutElapsed,
            PaymentEvent::CancelRequested => PaymentEventKind::CancelRequested,
            PaymentEvent::CancelCompleted => PaymentEventKind::CancelCompleted,
            PaymentEvent::RetryRequested => PaymentEventKind::RetryRequested,
        }
    }
}

/// One accepted transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: PaymentState,
    pub to: PaymentState,
    pub event: PaymentEventKind,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

/// The payment processing state of one attempt.
///
/// The machine only decides; it never performs gateway calls. The driver in
/// [`crate::payments`] feeds it the outcome of each call.
#[derive(Debug, Clone)]
pub struct PaymentStateMachine {
    method: PaymentMethod,
    state: PaymentState,
    failure: Option<PaymentFailure>,
    gateway_reference: Option<String>,
    attempt_count: u32,
    history: VecDeque<TransitionRecord>,
    history_capacity: usize,
}

impl PaymentStateMachine {
    pub fn new(method: PaymentMethod, history_capacity: usize) -> Self {
        Self {
            method,
            state: PaymentState::Idle,
            failure: None,
            gateway_reference: None,
            attempt_count: 0,
            history: VecDeque::with_capacity(history_capacity.min(64)),
            history_capacity: history_capacity.max(1),
        }
    }

    /// Rebuild the machine of a persisted attempt.
    pub fn restore(attempt: &PaymentAttempt, history_capacity: usize) -> Self {
        let mut machine = Self {
            method: attempt.method,
            state: attempt.state,
            failure: attempt.last_error.clone(),
            gateway_reference: attempt.gateway_reference.clone(),
            attempt_count: attempt.attempt_count,
            history: attempt.history.clone(),
            history_capacity: history_capacity.max(1),
        };
        machine.trim_history();
        machine
    }

    /// Copy the machine's state into `attempt`.
    pub fn write_back(&self, attempt: &mut PaymentAttempt) {
        attempt.state = self.state;
        attempt.last_error = self.failure.clone();
        attempt.gateway_reference = self.gateway_reference.clone();
        attempt.attempt_count = self.attempt_count;
        attempt.history = self.history.clone();
    }

    pub fn state(&self) -> PaymentState {
        self.state
    }

    pub fn method(&self) -> PaymentMethod {
        self.method
    }

    /// The most recent failure. Kept after a retry as the attempt's last error.
    pub fn failure(&self) -> Option<&PaymentFailure> {
        self.failure.as_ref()
    }

    pub fn gateway_reference(&self) -> Option<&str> {
        self.gateway_reference.as_deref()
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn history(&self) -> &VecDeque<TransitionRecord> {
        &self.history
    }

    pub fn can_initiate(&self) -> bool {
        self.state == PaymentState::Idle
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal_with(self.failure.as_ref())
    }

    pub fn can_retry(&self) -> bool {
        self.state.can_retry_with(self.failure.as_ref())
    }

    pub fn can_cancel(&self) -> bool {
        self.state.can_cancel_with(self.failure.as_ref())
    }

    pub fn transition(&mut self, event: PaymentEvent) -> Result<PaymentState, PaymentTransitionRejected> {
        self.transition_at(event, OffsetDateTime::now_utc())
    }

    pub fn transition_at(
        &mut self,
        event: PaymentEvent,
        at: OffsetDateTime,
    ) -> Result<PaymentState, PaymentTransitionRejected> {
        let kind = event.kind();
        let Some(next) = self.target(&event) else {
            return Err(PaymentTransitionRejected {
                state: self.state,
                event: kind,
            });
        };

        match event {
            PaymentEvent::PaymentRequested(method) => {
                self.method = method;
                self.attempt_count = 1;
            }
            PaymentEvent::AuthorizationSucceeded { reference }
            | PaymentEvent::DeviceCheckoutStarted { reference } => {
                self.gateway_reference = Some(reference);
            }
            PaymentEvent::GatewayUnavailable(failure)
            | PaymentEvent::TokenizationFailed(failure)
            | PaymentEvent::AuthorizationFailed(failure)
            | PaymentEvent::CaptureFailed(failure)
            | PaymentEvent::DeviceDeclined(failure) => {
                self.failure = Some(failure);
            }
            PaymentEvent::TimeoutElapsed(operation) => {
                self.failure = Some(PaymentFailure::new(
                    FailureKind::Timeout,
                    format!("{operation} timed out"),
                ));
            }
            PaymentEvent::RetryRequested => {
                self.attempt_count += 1;
            }
            _ => {}
        }

        self.history.push_back(TransitionRecord {
            from: self.state,
            to: next,
            event: kind,
            at,
        });
        self.trim_history();
        self.state = next;
        Ok(next)
    }

    fn trim_history(&mut self) {
        while self.history.len() > self.history_capacity {
            self.history.pop_front();
        }
    }

    /// The transition table. `None` means the event is rejected.
    fn target(&self, event: &PaymentEvent) -> Option<PaymentState> {
        use PaymentState::*;
        let method = self.method;
        let next = match (self.state, event) {
            (Idle, PaymentEvent::PaymentRequested(PaymentMethod::Cash)) => AwaitingCash,
            (Idle, PaymentEvent::PaymentRequested(_)) => InitializingGateway,

            (InitializingGateway, PaymentEvent::GatewayReady) => GatewayReady,
            (InitializingGateway, PaymentEvent::GatewayUnavailable(_)) => Failed,

            (GatewayReady, PaymentEvent::TokenizationStarted) if method == PaymentMethod::Card => {
                Tokenizing
            }
            (GatewayReady, PaymentEvent::DeviceCheckoutStarted { .. })
                if method == PaymentMethod::Terminal =>
            {
                AwaitingExternalDevice
            }

            (Tokenizing, PaymentEvent::TokenizationComplete) => Tokenized,
            (Tokenizing, PaymentEvent::TokenizationFailed(_)) => Failed,
            (Tokenized, PaymentEvent::AuthorizationStarted) => Authorizing,
            (Authorizing, PaymentEvent::AuthorizationSucceeded { .. }) => Authorized,
            (Authorizing, PaymentEvent::AuthorizationFailed(_)) => Failed,
            (Authorized, PaymentEvent::CaptureStarted) => Capturing,
            (Capturing, PaymentEvent::CaptureSucceeded) => Captured,
            (Capturing, PaymentEvent::CaptureFailed(_)) => Failed,

            (AwaitingExternalDevice, PaymentEvent::CardPresented) => DeviceReading,
            (DeviceReading, PaymentEvent::CardRead) => DeviceProcessing,
            (DeviceProcessing, PaymentEvent::DeviceApproved) => Captured,
            (
                AwaitingExternalDevice | DeviceReading | DeviceProcessing,
                PaymentEvent::DeviceDeclined(_),
            ) => Failed,

            (AwaitingCash, PaymentEvent::CashReceived) => Captured,

            (state, PaymentEvent::TimeoutElapsed(_)) if state.is_in_flight() => Failed,

            (_, PaymentEvent::CancelRequested) if self.can_cancel() => Cancelling,
            (Cancelling, PaymentEvent::CancelCompleted) => Cancelled,

            (Failed, PaymentEvent::RetryRequested) if self.can_retry() => match method {
                PaymentMethod::Cash => AwaitingCash,
                // An authorization that already went through is only captured again.
                PaymentMethod::Card if self.gateway_reference.is_some() => Authorized,
                PaymentMethod::Card | PaymentMethod::Terminal => InitializingGateway,
            },

            _ => return None,
        };
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drive(machine: &mut PaymentStateMachine, events: Vec<PaymentEvent>) {
        for event in events {
            let kind = event.kind();
            machine
                .transition(event)
                .unwrap_or_else(|e| panic!("{kind} rejected: {e}"));
        }
    }

    fn declined() -> PaymentFailure {
        PaymentFailure::new(FailureKind::Declined, "insufficient funds")
    }

    fn card_to_authorizing() -> PaymentStateMachine {
        let mut m = PaymentStateMachine::new(PaymentMethod::Card, 32);
        drive(
            &mut m,
            vec![
                PaymentEvent::PaymentRequested(PaymentMethod::Card),
                PaymentEvent::GatewayReady,
                PaymentEvent::TokenizationStarted,
                PaymentEvent::TokenizationComplete,
                PaymentEvent::AuthorizationStarted,
            ],
        );
        m
    }

    #[test]
    fn test_card_flow() {
        let mut m = card_to_authorizing();
        assert_eq!(m.state(), PaymentState::Authorizing);
        drive(
            &mut m,
            vec![
                PaymentEvent::AuthorizationSucceeded {
                    reference: "auth_1".into(),
                },
                PaymentEvent::CaptureStarted,
                PaymentEvent::CaptureSucceeded,
            ],
        );
        assert_eq!(m.state(), PaymentState::Captured);
        assert_eq!(m.gateway_reference(), Some("auth_1"));
        assert!(m.is_terminal());
        assert!(!m.can_cancel());
        assert_eq!(m.history().len(), 8);
        assert_eq!(m.history()[0].from, PaymentState::Idle);
    }

    #[test]
    fn test_terminal_flow() {
        let mut m = PaymentStateMachine::new(PaymentMethod::Terminal, 32);
        drive(
            &mut m,
            vec![
                PaymentEvent::PaymentRequested(PaymentMethod::Terminal),
                PaymentEvent::GatewayReady,
                PaymentEvent::DeviceCheckoutStarted {
                    reference: "chk_1".into(),
                },
                PaymentEvent::CardPresented,
                PaymentEvent::CardRead,
                PaymentEvent::DeviceApproved,
            ],
        );
        assert_eq!(m.state(), PaymentState::Captured);
    }

    #[test]
    fn test_cash_flow() {
        let mut m = PaymentStateMachine::new(PaymentMethod::Cash, 32);
        assert!(m.can_initiate());
        drive(
            &mut m,
            vec![
                PaymentEvent::PaymentRequested(PaymentMethod::Cash),
                PaymentEvent::CashReceived,
            ],
        );
        assert_eq!(m.state(), PaymentState::Captured);
        assert!(!m.can_initiate());
    }

    #[test]
    fn test_card_cannot_take_device_path() {
        let mut m = PaymentStateMachine::new(PaymentMethod::Card, 32);
        drive(
            &mut m,
            vec![
                PaymentEvent::PaymentRequested(PaymentMethod::Card),
                PaymentEvent::GatewayReady,
            ],
        );
        let err = m
            .transition(PaymentEvent::DeviceCheckoutStarted {
                reference: "x".into(),
            })
            .unwrap_err();
        assert_eq!(err.state, PaymentState::GatewayReady);
        assert_eq!(err.event, PaymentEventKind::DeviceCheckoutStarted);
        assert_eq!(m.state(), PaymentState::GatewayReady);
    }

    #[test]
    fn test_timeout_is_retryable_and_retry_increments_count() {
        let mut m = card_to_authorizing();
        m.transition(PaymentEvent::TimeoutElapsed(GatewayOperation::Authorize))
            .unwrap();
        assert_eq!(m.state(), PaymentState::Failed);
        assert_eq!(m.failure().map(|f| f.kind), Some(FailureKind::Timeout));
        assert!(m.can_retry());
        assert!(m.can_cancel());
        assert!(!m.is_terminal());

        let next = m.transition(PaymentEvent::RetryRequested).unwrap();
        assert_eq!(next, PaymentState::InitializingGateway);
        assert_eq!(m.attempt_count(), 2);
    }

    #[test]
    fn test_retry_after_authorization_resumes_at_capture() {
        let mut m = card_to_authorizing();
        drive(
            &mut m,
            vec![
                PaymentEvent::AuthorizationSucceeded {
                    reference: "auth_9".into(),
                },
                PaymentEvent::CaptureStarted,
                PaymentEvent::TimeoutElapsed(GatewayOperation::Capture),
                PaymentEvent::RetryRequested,
            ],
        );
        assert_eq!(m.state(), PaymentState::Authorized);
    }

    #[test]
    fn test_declined_is_terminal() {
        let mut m = card_to_authorizing();
        m.transition(PaymentEvent::AuthorizationFailed(declined()))
            .unwrap();
        assert!(m.is_terminal());
        assert!(!m.can_retry());
        assert!(!m.can_cancel());
        assert!(m.transition(PaymentEvent::RetryRequested).is_err());
        assert!(m.transition(PaymentEvent::CancelRequested).is_err());
    }

    #[test]
    fn test_timeout_only_from_in_flight_states() {
        for state in PaymentState::ALL {
            let mut m = PaymentStateMachine::new(PaymentMethod::Card, 32);
            m.state = state;
            let accepted = m
                .transition(PaymentEvent::TimeoutElapsed(GatewayOperation::Authorize))
                .is_ok();
            assert_eq!(accepted, state.is_in_flight(), "{state}");
        }
    }

    #[test]
    fn test_cancel_from_every_non_terminal_state() {
        for state in PaymentState::ALL {
            let mut m = PaymentStateMachine::new(PaymentMethod::Terminal, 32);
            m.state = state;
            if state == PaymentState::Failed {
                m.failure = Some(PaymentFailure::new(FailureKind::Network, "reset"));
            }
            let expected = !matches!(
                state,
                PaymentState::Captured | PaymentState::Cancelled | PaymentState::Cancelling
            );
            assert_eq!(m.transition(PaymentEvent::CancelRequested).is_ok(), expected, "{state}");
            if expected {
                assert_eq!(
                    m.transition(PaymentEvent::CancelCompleted),
                    Ok(PaymentState::Cancelled)
                );
            }
        }
    }

    #[test]
    fn test_rejection_leaves_machine_unchanged() {
        let mut m = PaymentStateMachine::new(PaymentMethod::Card, 32);
        let err = m.transition(PaymentEvent::CaptureSucceeded).unwrap_err();
        assert_eq!(err.state, PaymentState::Idle);
        assert_eq!(m.state(), PaymentState::Idle);
        assert!(m.history().is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut m = PaymentStateMachine::new(PaymentMethod::Cash, 3);
        m.transition(PaymentEvent::PaymentRequested(PaymentMethod::Cash))
            .unwrap();
        for _ in 0..4 {
            m.state = PaymentState::Failed;
            m.failure = Some(PaymentFailure::new(FailureKind::Unavailable, "down"));
            m.transition(PaymentEvent::RetryRequested).unwrap();
        }
        assert_eq!(m.history().len(), 3);
        assert!(
            m.history()
                .iter()
                .all(|r| r.event == PaymentEventKind::RetryRequested)
        );
    }
}
