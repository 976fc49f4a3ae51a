use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info};

use crate::entities::order::{AuditEntry, Order, OrderStatus};
use crate::entities::{Actor, OrderId, TenantId};
use crate::error::{EngineError, InvalidTransition, ResourceKind};
use crate::events::DomainEvent;
use crate::store::OrderStore;

/// Statuses reachable from `current`, in table order.
pub const fn valid_next_states(current: OrderStatus) -> &'static [OrderStatus] {
    use OrderStatus::*;
    match current {
        New => &[Pending, Cancelled],
        Pending => &[Confirmed, Cancelled],
        Confirmed => &[Preparing, Cancelled],
        Preparing => &[Ready, Cancelled],
        Ready => &[PickedUp, Completed, Cancelled],
        PickedUp => &[Completed, Cancelled],
        Completed | Cancelled => &[],
    }
}

pub fn can_transition(current: OrderStatus, target: OrderStatus) -> bool {
    valid_next_states(current).contains(&target)
}

/// Produce the order as it looks after moving to `target`.
///
/// The input is left untouched; on success the result has the new status,
/// one more audit entry and the next version.
pub fn apply(
    order: &Order,
    target: OrderStatus,
    actor: &Actor,
    at: OffsetDateTime,
) -> Result<Order, InvalidTransition> {
    if !can_transition(order.status, target) {
        return Err(InvalidTransition {
            current: order.status,
            target,
            valid_next: valid_next_states(order.status).iter().copied().collect(),
        });
    }
    let mut next = order.clone();
    next.audit_log.push(AuditEntry {
        from: order.status,
        to: target,
        actor: actor.clone(),
        at,
    });
    next.status = target;
    next.version = order.version + 1;
    Ok(next)
}

/// An applied transition and the event announcing it.
#[derive(Debug, Clone)]
pub struct Transitioned {
    pub order: Order,
    pub event: DomainEvent,
}

pub struct OrderStateMachine {
    store: Arc<dyn OrderStore>,
}

impl OrderStateMachine {
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// Move an order to `target` on behalf of `actor`.
    ///
    /// `expected_version` is the version the caller last read. The stored
    /// order is only written when it still has that version and the table
    /// allows the move.
    pub async fn transition(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
        target: OrderStatus,
        actor: &Actor,
        expected_version: i64,
    ) -> Result<Transitioned, EngineError> {
        let current = self
            .store
            .get_order(tenant_id, order_id)
            .await?
            .ok_or(EngineError::NotFound(ResourceKind::Order))?;
        if current.version != expected_version {
            debug!(
                order_id = %order_id,
                expected_version,
                current_version = current.version,
                "Rejecting transition on stale version"
            );
            return Err(EngineError::Conflict {
                expected: expected_version,
                current: current.version,
            });
        }

        let next = apply(&current, target, actor, OffsetDateTime::now_utc())?;
        self.store
            .replace_order(&next, expected_version)
            .await
            .map_err(|e| EngineError::from_store(e, ResourceKind::Order, expected_version))?;

        info!(
            order_id = %order_id,
            tenant_id = %tenant_id,
            from = %current.status,
            to = %target,
            actor = %actor,
            version = next.version,
            "Order status changed"
        );
        Ok(Transitioned {
            event: DomainEvent::OrderStatusChanged {
                from: current.status,
                to: target,
                actor: actor.clone(),
                order: next.clone(),
            },
            order: next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::testing;

    fn machine() -> (OrderStateMachine, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let dyn_store: Arc<dyn OrderStore> = store.clone();
        (OrderStateMachine::new(dyn_store), store)
    }

    #[test]
    fn test_table_membership_matches_can_transition() {
        use OrderStatus::*;
        let allowed = [
            (New, Pending),
            (New, Cancelled),
            (Pending, Confirmed),
            (Pending, Cancelled),
            (Confirmed, Preparing),
            (Confirmed, Cancelled),
            (Preparing, Ready),
            (Preparing, Cancelled),
            (Ready, PickedUp),
            (Ready, Completed),
            (Ready, Cancelled),
            (PickedUp, Completed),
            (PickedUp, Cancelled),
        ];
        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                assert_eq!(
                    can_transition(from, to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn test_terminal_states_have_no_successors() {
        assert!(valid_next_states(OrderStatus::Completed).is_empty());
        assert!(valid_next_states(OrderStatus::Cancelled).is_empty());
        assert!(OrderStatus::Completed.is_terminal());
        assert!(!OrderStatus::PickedUp.is_terminal());
    }

    #[test]
    fn test_apply_does_not_mutate_input() {
        let order = testing::order(testing::tenant(), 1);
        let before = order.clone();
        let next = apply(
            &order,
            OrderStatus::Pending,
            &Actor::new("host"),
            OffsetDateTime::now_utc(),
        )
        .unwrap();
        assert_eq!(order, before);
        assert_eq!(next.status, OrderStatus::Pending);
        assert_eq!(next.version, 2);
        assert_eq!(next.audit_log.len(), 1);
        assert_eq!(next.audit_log[0].from, OrderStatus::New);
        assert_eq!(next.total, next.subtotal + next.tax + next.tip);
    }

    #[tokio::test]
    async fn test_every_pair_outside_table_leaves_store_unchanged() {
        for from in OrderStatus::ALL {
            for to in OrderStatus::ALL {
                if can_transition(from, to) {
                    continue;
                }
                let mut order = testing::order(testing::tenant(), 3);
                order.status = from;
                let (machine, store) = machine();
                store.insert_order(&order).await.unwrap();

                let err = machine
                    .transition(order.tenant_id, order.id, to, &Actor::new("staff"), 3)
                    .await
                    .unwrap_err();
                match err {
                    EngineError::InvalidTransition(e) => {
                        assert_eq!(e.current, from);
                        assert_eq!(e.target, to);
                        assert_eq!(e.valid_next.as_slice(), valid_next_states(from));
                    }
                    other => panic!("{from} -> {to}: unexpected {other:?}"),
                }
                let stored = store.get_order(order.tenant_id, order.id).await.unwrap();
                assert_eq!(stored.as_ref(), Some(&order));
            }
        }
    }

    #[tokio::test]
    async fn test_happy_path_to_completed() {
        let order = testing::order(testing::tenant(), 1);
        let (machine, store) = machine();
        store.insert_order(&order).await.unwrap();

        let path = [
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            OrderStatus::Preparing,
            OrderStatus::Ready,
            OrderStatus::PickedUp,
            OrderStatus::Completed,
        ];
        let actor = Actor::new("staff-7");
        let mut version = 1;
        for target in path {
            let t = machine
                .transition(order.tenant_id, order.id, target, &actor, version)
                .await
                .unwrap();
            version = t.order.version;
            assert!(matches!(
                t.event,
                DomainEvent::OrderStatusChanged { to, .. } if to == target
            ));
        }
        let stored = store
            .get_order(order.tenant_id, order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);
        assert_eq!(stored.version, 7);
        assert_eq!(stored.audit_log.len(), 6);
        assert!(stored.audit_log.iter().all(|e| e.actor == actor));
    }

    #[tokio::test]
    async fn test_ready_to_confirmed_is_rejected_with_hint() {
        let mut order = testing::order(testing::tenant(), 4);
        order.status = OrderStatus::Ready;
        let (machine, store) = machine();
        store.insert_order(&order).await.unwrap();

        let err = machine
            .transition(
                order.tenant_id,
                order.id,
                OrderStatus::Confirmed,
                &Actor::new("staff"),
                4,
            )
            .await
            .unwrap_err();
        let EngineError::InvalidTransition(e) = err else {
            panic!("expected invalid transition");
        };
        assert_eq!(
            e.valid_next.as_slice(),
            &[
                OrderStatus::PickedUp,
                OrderStatus::Completed,
                OrderStatus::Cancelled
            ]
        );
        let stored = store.get_order(order.tenant_id, order.id).await.unwrap();
        assert_eq!(stored.as_ref().map(|o| o.version), Some(4));
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let order = testing::order(testing::tenant(), 1);
        let (machine, store) = machine();
        store.insert_order(&order).await.unwrap();
        let actor = Actor::new("staff");

        machine
            .transition(order.tenant_id, order.id, OrderStatus::Pending, &actor, 1)
            .await
            .unwrap();
        let err = machine
            .transition(order.tenant_id, order.id, OrderStatus::Cancelled, &actor, 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Conflict {
                expected: 1,
                current: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_concurrent_writers_one_wins() {
        let order = testing::order(testing::tenant(), 1);
        let (machine, store) = machine();
        store.insert_order(&order).await.unwrap();
        let kitchen = Actor::new("kitchen");
        let host = Actor::new("host");

        let (a, b) = tokio::join!(
            machine.transition(order.tenant_id, order.id, OrderStatus::Pending, &kitchen, 1),
            machine.transition(order.tenant_id, order.id, OrderStatus::Cancelled, &host, 1),
        );
        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);
        let loser = if a.is_ok() { b } else { a };
        assert!(matches!(loser, Err(EngineError::Conflict { .. })));

        let stored = store
            .get_order(order.tenant_id, order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.audit_log.len(), 1);
    }

    #[tokio::test]
    async fn test_other_tenant_sees_not_found() {
        let order = testing::order(testing::tenant(), 1);
        let (machine, store) = machine();
        store.insert_order(&order).await.unwrap();

        let err = machine
            .transition(
                TenantId::generate(),
                order.id,
                OrderStatus::Pending,
                &Actor::new("x"),
                1,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(ResourceKind::Order)));
    }
}
