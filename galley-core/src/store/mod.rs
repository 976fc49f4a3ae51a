//! Persistence seams.
//!
//! Every write is a single compare-and-swap on the record version, which is
//! what lets concurrent writers lose cleanly with [`StoreError::Conflict`].

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

use crate::entities::order::{DueCursor, DueOrder, Order};
use crate::entities::payment::PaymentAttempt;
use crate::entities::{OrderId, PaymentId, TenantId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record was modified concurrently (current version {current})")]
    Conflict { current: i64 },
    #[error("record not found")]
    NotFound,
    #[error("order already has a non-terminal payment attempt")]
    ActivePaymentExists { existing: Option<PaymentId> },
    #[error("idempotency key is already taken by another attempt")]
    DuplicateIdempotencyKey { existing: Option<PaymentId> },
    #[error("order already has a captured payment")]
    OrderAlreadyPaid { existing: Option<PaymentId> },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: &Order) -> Result<(), StoreError>;

    async fn get_order(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Option<Order>, StoreError>;

    /// Overwrite `order` if the stored version is still `expected_version`.
    async fn replace_order(&self, order: &Order, expected_version: i64) -> Result<(), StoreError>;

    /// Orders of any tenant and status with `fire_at` in `(after, until]`,
    /// in cursor order, at most `limit` of them.
    async fn due_orders(
        &self,
        after: DueCursor,
        until: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<DueOrder>, StoreError>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Fails with [`StoreError::ActivePaymentExists`] if the order already
    /// has a non-terminal attempt, [`StoreError::OrderAlreadyPaid`] if it has
    /// a captured one and [`StoreError::DuplicateIdempotencyKey`] if the
    /// tenant already used the attempt's key.
    async fn insert_payment(&self, attempt: &PaymentAttempt) -> Result<(), StoreError>;

    async fn get_payment(
        &self,
        tenant_id: TenantId,
        payment_id: PaymentId,
    ) -> Result<Option<PaymentAttempt>, StoreError>;

    async fn payment_by_key(
        &self,
        tenant_id: TenantId,
        idempotency_key: &str,
    ) -> Result<Option<PaymentAttempt>, StoreError>;

    async fn active_payment(
        &self,
        tenant_id: TenantId,
        order_id: OrderId,
    ) -> Result<Option<PaymentAttempt>, StoreError>;

    async fn replace_payment(
        &self,
        attempt: &PaymentAttempt,
        expected_version: i64,
    ) -> Result<(), StoreError>;
}
