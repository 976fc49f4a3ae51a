use async_trait::async_trait;
use kanau::processor::Processor;
use time::OffsetDateTime;

use super::{OrderStore, PaymentStore, StoreError};
use crate::entities::order::{
    DueCursor, DueOrder, GetOrder, GetOrderVersion, InsertOrder, ListDueOrders, Order,
    ReplaceOrder,
};
use crate::entities::payment::{
    GetActivePayment, GetCapturedPayment, GetPayment, GetPaymentByKey, GetPaymentVersion,
    InsertPayment, PaymentAttempt, ReplacePayment,
};
use crate::entities::{OrderId, PaymentId, TenantId};
use crate::framework::DatabaseProcessor;

/// Name of the partial unique index allowing one active attempt per order.
const ONE_ACTIVE_PAYMENT_INDEX: &str = "payment_attempts_one_active_per_order";
const IDEMPOTENCY_KEY_INDEX: &str = "payment_attempts_idempotency_key";

#[derive(Clone)]
pub struct PgStore {
    db: DatabaseProcessor,
}

impl PgStore {
    pub fn new(db: DatabaseProcessor) -> Self {
        Self { db }
    }
}

fn violated_constraint(error: &sqlx::Error) -> Option<&str> {
    match error {
        sqlx::Error::Database(db) => db.constraint(),
        _ => None,
    }
}

fn is_active_payment_violation(error: &sqlx::Error) -> bool {
    violated_constraint(error) == Some(ONE_ACTIVE_PAYMENT_INDEX)
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError> {
        self.db
            .process(InsertOrder {
                order: order.clone(),
            })
            .await?;
        Ok(())
    }

    async fn get_order(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Option<Order>, StoreError> {
        Ok(self.db.process(GetOrder { tenant_id, order_id }).await?)
    }

    async fn replace_order(&self, order: &Order, expected_version: i64) -> Result<(), StoreError> {
        let written = self
            .db
            .process(ReplaceOrder {
                order: order.clone(),
                expected_version,
            })
            .await?;
        if written {
            return Ok(());
        }
        let current = self
            .db
            .process(GetOrderVersion {
                tenant_id: order.tenant_id,
                order_id: order.id,
            })
            .await?;
        match current {
            Some(current) => Err(StoreError::Conflict { current }),
            None => Err(StoreError::NotFound),
        }
    }

    async fn due_orders(
        &self,
        after: DueCursor,
        until: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<DueOrder>, StoreError> {
        Ok(self
            .db
            .process(ListDueOrders {
                after,
                until,
                limit: i64::try_from(limit).unwrap_or(i64::MAX),
            })
            .await?)
    }
}

#[async_trait]
impl PaymentStore for PgStore {
    async fn insert_payment(&self, attempt: &PaymentAttempt) -> Result<(), StoreError> {
        match self
            .db
            .process(InsertPayment {
                attempt: attempt.clone(),
            })
            .await
        {
            Ok(true) => Ok(()),
            Ok(false) => {
                let existing = self
                    .db
                    .process(GetCapturedPayment {
                        tenant_id: attempt.tenant_id,
                        order_id: attempt.order_id,
                    })
                    .await?;
                Err(StoreError::OrderAlreadyPaid {
                    existing: existing.map(|a| a.id),
                })
            }
            Err(e) if violated_constraint(&e) == Some(IDEMPOTENCY_KEY_INDEX) => {
                let existing = self
                    .db
                    .process(GetPaymentByKey {
                        tenant_id: attempt.tenant_id,
                        idempotency_key: attempt.idempotency_key.clone(),
                    })
                    .await?;
                Err(StoreError::DuplicateIdempotencyKey {
                    existing: existing.map(|a| a.id),
                })
            }
            Err(e) if is_active_payment_violation(&e) => {
                let existing = self
                    .db
                    .process(GetActivePayment {
                        tenant_id: attempt.tenant_id,
                        order_id: attempt.order_id,
                    })
                    .await?;
                Err(StoreError::ActivePaymentExists {
                    existing: existing.map(|a| a.id),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_payment(
        &self,
        tenant_id: TenantId,
        payment_id: PaymentId,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        Ok(self
            .db
            .process(GetPayment {
                tenant_id,
                payment_id,
            })
            .await?)
    }

    async fn payment_by_key(
        &self,
        tenant_id: TenantId,
        idempotency_key: &str,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        Ok(self
            .db
            .process(GetPaymentByKey {
                tenant_id,
                idempotency_key: idempotency_key.to_owned(),
            })
            .await?)
    }

    async fn active_payment(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Option<PaymentAttempt>, StoreError> {
        Ok(self
            .db
            .process(GetActivePayment {
                tenant_id,
                order_id,
            })
            .await?)
    }

    async fn replace_payment(
        &self,
        attempt: &PaymentAttempt,
        expected_version: i64,
    ) -> Result<(), StoreError> {
        let written = match self
            .db
            .process(ReplacePayment {
                attempt: attempt.clone(),
                expected_version,
            })
            .await
        {
            Ok(written) => written,
            Err(e) if is_active_payment_violation(&e) => {
                return Err(StoreError::ActivePaymentExists { existing: None });
            }
            Err(e) => return Err(e.into()),
        };
        if written {
            return Ok(());
        }
        let current = self
            .db
            .process(GetPaymentVersion {
                tenant_id: attempt.tenant_id,
                payment_id: attempt.id,
            })
            .await?;
        match current {
            Some(current) => Err(StoreError::Conflict { current }),
            None => Err(StoreError::NotFound),
        }
    }
}
