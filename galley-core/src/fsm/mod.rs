//! The order and payment state machines.
//!
//! Both are tables first: the pure functions decide what is allowed, and
//! only the persistence wrappers touch storage.

pub mod order;
pub mod payment;

pub use order::{OrderStateMachine, Transitioned};
pub use payment::{PaymentEvent, PaymentEventKind, PaymentStateMachine, TransitionRecord};
