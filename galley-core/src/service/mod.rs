//! The order orchestrator.
//!
//! [`OrderService`] is the entry point request handlers call. It scopes
//! every lookup to the caller's tenant, computes money values itself and
//! hands payment work to the [`PaymentService`].

use std::sync::Arc;

use galley_sdk::objects::CreateOrderRequest;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::info;

use crate::broadcast::EventBroadcaster;
use crate::catalog::{CatalogError, MenuCatalog};
use crate::config::{PolicyStore, TenantDirectory};
use crate::entities::order::{Order, OrderStatus};
use crate::entities::payment::PaymentAttempt;
use crate::entities::{Identity, OrderId, PaymentId};
use crate::error::{AuthError, EngineError, ResourceKind};
use crate::events::DomainEvent;
use crate::fsm::order::OrderStateMachine;
use crate::payments::{PaymentService, StartPayment};
use crate::pricing::{self, MAX_LINE_ITEMS, MAX_QUANTITY};
use crate::store::{OrderStore, StoreError};

pub struct OrderService {
    orders: Arc<dyn OrderStore>,
    catalog: Arc<dyn MenuCatalog>,
    machine: OrderStateMachine,
    payments: PaymentService,
    broadcaster: Arc<EventBroadcaster>,
    tenants: PolicyStore<TenantDirectory>,
}

impl OrderService {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        catalog: Arc<dyn MenuCatalog>,
        payments: PaymentService,
        broadcaster: Arc<EventBroadcaster>,
        tenants: PolicyStore<TenantDirectory>,
    ) -> Self {
        Self {
            machine: OrderStateMachine::new(orders.clone()),
            orders,
            catalog,
            payments,
            broadcaster,
            tenants,
        }
    }

    /// The caller's tax rate, which doubles as the check that the tenant exists.
    fn tax_rate(&self, identity: &Identity) -> Result<Decimal, EngineError> {
        self.tenants
            .current()
            .get(identity.tenant_id)
            .map(|tenant| tenant.tax_rate)
            .ok_or(EngineError::Auth(AuthError::UnknownTenant(identity.tenant_id)))
    }

    async fn load(&self, identity: &Identity, order_id: OrderId) -> Result<Order, EngineError> {
        self.tax_rate(identity)?;
        self.orders
            .get_order(identity.tenant_id, order_id)
            .await?
            .ok_or(EngineError::NotFound(ResourceKind::Order))
    }

    /// Validate, price and store a new order.
    pub async fn create_order(
        &self,
        identity: &Identity,
        request: CreateOrderRequest,
    ) -> Result<Order, EngineError> {
        let tax_rate = self.tax_rate(identity)?;
        if request.items.is_empty() {
            return Err(EngineError::validation("an order needs at least one item"));
        }
        if request.items.len() > MAX_LINE_ITEMS {
            return Err(EngineError::validation(format!(
                "an order holds at most {MAX_LINE_ITEMS} line items"
            )));
        }
        if let Some(line) = request
            .items
            .iter()
            .find(|line| line.quantity == 0 || line.quantity > MAX_QUANTITY)
        {
            return Err(EngineError::validation(format!(
                "quantity of {} must be between 1 and {MAX_QUANTITY}",
                line.menu_item_id
            )));
        }
        let tip = request.tip.unwrap_or(Decimal::ZERO);
        pricing::validate_tip(tip)?;
        let now = OffsetDateTime::now_utc();
        let fire_at = request
            .fire_at
            .map(|secs| {
                OffsetDateTime::from_unix_timestamp(secs)
                    .map_err(|_| EngineError::validation("fire_at is out of range"))
            })
            .transpose()?;
        if fire_at.is_some_and(|at| at <= now) {
            return Err(EngineError::validation("fire_at must be in the future"));
        }

        let items = self
            .catalog
            .price_items(identity.tenant_id, &request.items)
            .await
            .map_err(|e| match e {
                CatalogError::Database(e) => EngineError::Storage(StoreError::Database(e)),
                other => EngineError::validation(other.to_string()),
            })?;

        let mut order = Order {
            id: OrderId::generate(),
            tenant_id: identity.tenant_id,
            status: OrderStatus::New,
            items,
            customer: request.customer,
            tax_rate,
            subtotal: Decimal::ZERO,
            tax: Decimal::ZERO,
            tip,
            total: Decimal::ZERO,
            version: 1,
            created_at: now,
            fire_at,
            audit_log: Vec::new(),
        };
        order.recompute_totals()?;
        self.orders.insert_order(&order).await?;

        info!(
            order_id = %order.id,
            tenant_id = %order.tenant_id,
            actor = %identity.actor,
            total = %order.total,
            scheduled = order.fire_at.is_some(),
            "Order created"
        );
        self.broadcaster
            .publish(DomainEvent::OrderCreated(order.clone()));
        Ok(order)
    }

    pub async fn get_order(
        &self,
        identity: &Identity,
        order_id: OrderId,
    ) -> Result<Order, EngineError> {
        self.load(identity, order_id).await
    }

    /// Move an order to `target`. Cancelling also cancels its payment attempt.
    pub async fn update_status(
        &self,
        identity: &Identity,
        order_id: OrderId,
        target: OrderStatus,
        expected_version: i64,
    ) -> Result<Order, EngineError> {
        self.tax_rate(identity)?;
        let transitioned = self
            .machine
            .transition(
                identity.tenant_id,
                order_id,
                target,
                &identity.actor,
                expected_version,
            )
            .await?;
        self.broadcaster.publish(transitioned.event);
        if target == OrderStatus::Cancelled {
            self.payments
                .cancel_active_for_order(identity.tenant_id, order_id)
                .await;
        }
        Ok(transitioned.order)
    }

    pub async fn cancel_order(
        &self,
        identity: &Identity,
        order_id: OrderId,
        expected_version: i64,
    ) -> Result<Order, EngineError> {
        self.update_status(identity, order_id, OrderStatus::Cancelled, expected_version)
            .await
    }

    /// Change the tip of an open order and recompute its totals.
    pub async fn update_tip(
        &self,
        identity: &Identity,
        order_id: OrderId,
        tip: Decimal,
        expected_version: i64,
    ) -> Result<Order, EngineError> {
        pricing::validate_tip(tip)?;
        let current = self.load(identity, order_id).await?;
        if current.version != expected_version {
            return Err(EngineError::Conflict {
                expected: expected_version,
                current: current.version,
            });
        }
        if current.status.is_terminal() {
            return Err(EngineError::validation(format!(
                "tip cannot change on a {} order",
                current.status
            )));
        }
        if let Some(active) = self
            .payments
            .active_for_order(identity.tenant_id, order_id)
            .await?
        {
            return Err(EngineError::PaymentInProgress {
                payment_id: Some(active.id),
            });
        }

        let mut next = current;
        next.tip = tip;
        next.version = expected_version + 1;
        next.recompute_totals()?;
        self.orders
            .replace_order(&next, expected_version)
            .await
            .map_err(|e| EngineError::from_store(e, ResourceKind::Order, expected_version))?;

        info!(order_id = %order_id, tip = %tip, total = %next.total, "Order tip updated");
        self.broadcaster
            .publish(DomainEvent::OrderUpdated(next.clone()));
        Ok(next)
    }

    pub async fn start_payment(
        &self,
        identity: &Identity,
        order_id: OrderId,
        request: StartPayment,
    ) -> Result<PaymentAttempt, EngineError> {
        let order = self.load(identity, order_id).await?;
        self.payments.start(&order, request).await
    }

    pub async fn retry_payment(
        &self,
        identity: &Identity,
        payment_id: PaymentId,
    ) -> Result<PaymentAttempt, EngineError> {
        self.tax_rate(identity)?;
        self.payments.retry(identity.tenant_id, payment_id).await
    }

    pub async fn cancel_payment(
        &self,
        identity: &Identity,
        payment_id: PaymentId,
    ) -> Result<PaymentAttempt, EngineError> {
        self.tax_rate(identity)?;
        self.payments.cancel(identity.tenant_id, payment_id).await
    }

    pub async fn confirm_cash(
        &self,
        identity: &Identity,
        payment_id: PaymentId,
    ) -> Result<PaymentAttempt, EngineError> {
        self.tax_rate(identity)?;
        self.payments
            .confirm_cash(identity.tenant_id, payment_id)
            .await
    }

    pub async fn get_payment(
        &self,
        identity: &Identity,
        payment_id: PaymentId,
    ) -> Result<PaymentAttempt, EngineError> {
        self.tax_rate(identity)?;
        self.payments.get(identity.tenant_id, payment_id).await
    }
}

#[cfg(test)]
mod tests;
