use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use time::OffsetDateTime;

use super::{OrderStore, PaymentStore, StoreError};
use crate::entities::order::{DueCursor, DueOrder, Order};
use crate::entities::payment::{PaymentAttempt, PaymentState};
use crate::entities::{OrderId, PaymentId, TenantId};

/// Process-local store used by tests and by `--memory-store`.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    orders: HashMap<OrderId, Order>,
    payments: HashMap<PaymentId, PaymentAttempt>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        self.lock().orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn get_order(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Option<Order>, StoreError> {
        Ok(self
            .lock()
            .orders
            .get(&order_id)
            .filter(|o| o.tenant_id == tenant_id)
            .cloned())
    }

    async fn replace_order(&self, order: &Order, expected_version: i64) -> Result<(), StoreError> {
        let mut state = self.lock();
        let stored = state
            .orders
            .get_mut(&order.id)
            .filter(|o| o.tenant_id == order.tenant_id)
            .ok_or(StoreError::NotFound)?;
        if stored.version != expected_version {
            return Err(StoreError::Conflict {
                current: stored.version,
            });
        }
        *stored = order.clone();
        Ok(())
    }

    async fn due_orders(
        &self,
        after: DueCursor,
        until: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<DueOrder>, StoreError> {
        let state = self.lock();
        let mut due: Vec<DueOrder> = state
            .orders
            .values()
            .filter_map(|o| {
                o.fire_at.map(|fire_at| DueOrder {
                    tenant_id: o.tenant_id,
                    order_id: o.id,
                    fire_at,
                })
            })
            .filter(|d| d.cursor() > after && d.fire_at <= until)
            .collect();
        due.sort_by_key(DueOrder::cursor);
        due.truncate(limit);
        Ok(due)
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn insert_payment(&self, attempt: &PaymentAttempt) -> Result<(), StoreError> {
        let mut state = self.lock();
        for existing in state.payments.values() {
            if existing.tenant_id == attempt.tenant_id
                && existing.idempotency_key == attempt.idempotency_key
            {
                return Err(StoreError::DuplicateIdempotencyKey {
                    existing: Some(existing.id),
                });
            }
            if existing.order_id != attempt.order_id {
                continue;
            }
            if existing.state == PaymentState::Captured {
                return Err(StoreError::OrderAlreadyPaid {
                    existing: Some(existing.id),
                });
            }
            if !existing.is_terminal() {
                return Err(StoreError::ActivePaymentExists {
                    existing: Some(existing.id),
                });
            }
        }
        state.payments.insert(attempt.id, attempt.clone());
        Ok(())
    }

    async fn get_payment(
        &self,
        tenant_id: TenantId,
        payment_id: PaymentId,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        Ok(self
            .lock()
            .payments
            .get(&payment_id)
            .filter(|p| p.tenant_id == tenant_id)
            .cloned())
    }

    async fn payment_by_key(
        &self,
        tenant_id: TenantId,
        idempotency_key: &str,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        Ok(self
            .lock()
            .payments
            .values()
            .find(|p| p.tenant_id == tenant_id && p.idempotency_key == idempotency_key)
            .cloned())
    }

    async fn active_payment(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        Ok(self
            .lock()
            .payments
            .values()
            .find(|p| p.tenant_id == tenant_id && p.order_id == order_id && !p.is_terminal())
            .cloned())
    }

    async fn replace_payment(
        &self,
        attempt: &PaymentAttempt,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        let stored = state
            .payments
            .get_mut(&attempt.id)
            .filter(|p| p.tenant_id == attempt.tenant_id)
            .ok_or(StoreError::NotFound)?;
        if stored.version != expected_version {
            return Err(StoreError::Conflict {
                current: stored.version,
            });
        }
        *stored = attempt.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn test_replace_with_stale_version_conflicts() {
        let store = MemoryStore::new();
        let order = testing::order(testing::tenant(), 1);
        store.insert_order(&order).await.unwrap();

        let mut next = order.clone();
        next.version = 2;
        store.replace_order(&next, 1).await.unwrap();

        let err = store.replace_order(&next, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { current: 2 }));
    }

    #[tokio::test]
    async fn test_orders_are_tenant_scoped() {
        let store = MemoryStore::new();
        let order = testing::order(testing::tenant(), 1);
        store.insert_order(&order).await.unwrap();

        let other = TenantId::generate();
        assert!(store.get_order(other, order.id).await.unwrap().is_none());
        assert!(store.get_order(order.tenant_id, order.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_active_payment_is_refused() {
        let store = MemoryStore::new();
        let order = testing::order(testing::tenant(), 1);
        let first = testing::cash_attempt(&order);
        store.insert_payment(&first).await.unwrap();

        let second = testing::cash_attempt(&order);
        let err = store.insert_payment(&second).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::ActivePaymentExists { existing: Some(id) } if id == first.id
        ));
    }

    #[tokio::test]
    async fn test_idempotency_key_is_unique_per_tenant() {
        let store = MemoryStore::new();
        let tenant_id = testing::tenant();
        let first = testing::cash_attempt(&testing::order(tenant_id, 1));
        store.insert_payment(&first).await.unwrap();

        let mut same_key = testing::cash_attempt(&testing::order(tenant_id, 1));
        same_key.idempotency_key = first.idempotency_key.clone();
        let err = store.insert_payment(&same_key).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateIdempotencyKey { existing: Some(id) } if id == first.id
        ));

        let mut other_tenant = testing::cash_attempt(&testing::order(testing::tenant(), 1));
        other_tenant.idempotency_key = first.idempotency_key.clone();
        store.insert_payment(&other_tenant).await.unwrap();

        let found = store
            .payment_by_key(tenant_id, &first.idempotency_key)
            .await
            .unwrap();
        assert_eq!(found.map(|p| p.id), Some(first.id));
    }

    #[tokio::test]
    async fn test_paid_order_refuses_new_attempts() {
        let store = MemoryStore::new();
        let order = testing::order(testing::tenant(), 1);
        let mut paid = testing::cash_attempt(&order);
        paid.state = PaymentState::Captured;
        store.insert_payment(&paid).await.unwrap();

        let err = store
            .insert_payment(&testing::cash_attempt(&order))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::OrderAlreadyPaid { existing: Some(id) } if id == paid.id
        ));
    }
}
