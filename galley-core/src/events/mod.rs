//! Domain events emitted by the state machines and fanned out by the
//! [`crate::broadcast::EventBroadcaster`].

use galley_sdk::objects::{EventPayload, EventType};

use crate::entities::order::{Order, OrderStatus};
use crate::entities::payment::PaymentAttempt;
use crate::entities::{Actor, TenantId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    OrderCreated(Order),
    OrderUpdated(Order),
    OrderStatusChanged {
        from: OrderStatus,
        to: OrderStatus,
        actor: Actor,
        order: Order,
    },
    PaymentUpdated(PaymentAttempt),
}

impl DomainEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            DomainEvent::OrderCreated(_) => EventType::OrderCreated,
            DomainEvent::OrderUpdated(_) => EventType::OrderUpdated,
            DomainEvent::OrderStatusChanged { .. } => EventType::OrderStatusChanged,
            DomainEvent::PaymentUpdated(_) => EventType::PaymentUpdated,
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        match self {
            DomainEvent::OrderCreated(order)
            | DomainEvent::OrderUpdated(order)
            | DomainEvent::OrderStatusChanged { order, .. } => order.tenant_id,
            DomainEvent::PaymentUpdated(attempt) => attempt.tenant_id,
        }
    }

    pub fn to_payload(&self) -> EventPayload {
        match self {
            DomainEvent::OrderCreated(order) | DomainEvent::OrderUpdated(order) => {
                EventPayload::Order {
                    order: order.to_response(),
                }
            }
            DomainEvent::OrderStatusChanged {
                from,
                to,
                actor,
                order,
            } => EventPayload::StatusChanged {
                from: (*from).into(),
                to: (*to).into(),
                actor: actor.to_string(),
                order: order.to_response(),
            },
            DomainEvent::PaymentUpdated(attempt) => EventPayload::Payment {
                payment: attempt.to_response(),
            },
        }
    }
}
