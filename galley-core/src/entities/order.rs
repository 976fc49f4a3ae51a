use compact_str::CompactString;
use galley_sdk::objects::{self as wire, CustomerContact};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use sqlx::types::Json;
use time::OffsetDateTime;

use super::{Actor, OrderId, TenantId, unix_millis};
use crate::framework::DatabaseProcessor;
use crate::pricing;
use kanau::processor::Processor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    Pending,
    Confirmed,
    Preparing,
    Ready,
    PickedUp,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 8] = [
        OrderStatus::New,
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Preparing,
        OrderStatus::Ready,
        OrderStatus::PickedUp,
        OrderStatus::Completed,
        OrderStatus::Cancelled,
    ];

    pub const fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }

    /// Whether the kitchen has already received the order.
    pub const fn is_fired(self) -> bool {
        matches!(
            self,
            OrderStatus::Preparing
                | OrderStatus::Ready
                | OrderStatus::PickedUp
                | OrderStatus::Completed
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Pending => "pending",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Ready => "ready",
            OrderStatus::PickedUp => "picked_up",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<OrderStatus> for wire::OrderStatus {
    fn from(value: OrderStatus) -> Self {
        match value {
            OrderStatus::New => wire::OrderStatus::New,
            OrderStatus::Pending => wire::OrderStatus::Pending,
            OrderStatus::Confirmed => wire::OrderStatus::Confirmed,
            OrderStatus::Preparing => wire::OrderStatus::Preparing,
            OrderStatus::Ready => wire::OrderStatus::Ready,
            OrderStatus::PickedUp => wire::OrderStatus::PickedUp,
            OrderStatus::Completed => wire::OrderStatus::Completed,
            OrderStatus::Cancelled => wire::OrderStatus::Cancelled,
        }
    }
}

impl From<wire::OrderStatus> for OrderStatus {
    fn from(value: wire::OrderStatus) -> Self {
        match value {
            wire::OrderStatus::New => OrderStatus::New,
            wire::OrderStatus::Pending => OrderStatus::Pending,
            wire::OrderStatus::Confirmed => OrderStatus::Confirmed,
            wire::OrderStatus::Preparing => OrderStatus::Preparing,
            wire::OrderStatus::Ready => OrderStatus::Ready,
            wire::OrderStatus::PickedUp => OrderStatus::PickedUp,
            wire::OrderStatus::Completed => OrderStatus::Completed,
            wire::OrderStatus::Cancelled => OrderStatus::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddOn {
    pub add_on_id: CompactString,
    pub name: String,
    pub price: Decimal,
}

/// A priced line. `unit_price` and add-on prices are captured from the
/// catalog when the order is created and never change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub menu_item_id: CompactString,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub add_ons: SmallVec<[AddOn; 2]>,
}

impl LineItem {
    /// `None` when the line does not fit in a decimal.
    pub fn checked_line_total(&self) -> Option<Decimal> {
        let unit = self
            .add_ons
            .iter()
            .try_fold(self.unit_price, |acc, a| acc.checked_add(a.price))?;
        unit.checked_mul(Decimal::from(self.quantity))
    }

    /// Saturates at `Decimal::MAX`; priced orders never get there.
    pub fn line_total(&self) -> Decimal {
        self.checked_line_total().unwrap_or(Decimal::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub actor: Actor,
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub tenant_id: TenantId,
    pub status: OrderStatus,
    pub items: Vec<LineItem>,
    pub customer: CustomerContact,
    /// Tenant tax rate captured at creation so totals stay reproducible.
    pub tax_rate: Decimal,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub tip: Decimal,
    pub total: Decimal,
    pub version: i64,
    pub created_at: OffsetDateTime,
    pub fire_at: Option<OffsetDateTime>,
    pub audit_log: Vec<AuditEntry>,
}

impl Order {
    /// Recompute subtotal, tax and total from the line items, tax rate and tip.
    /// The order is left untouched when the total is out of range.
    pub fn recompute_totals(&mut self) -> Result<(), pricing::AmountOutOfRange> {
        let totals = pricing::compute_totals(&self.items, self.tax_rate, self.tip)?;
        self.subtotal = totals.subtotal;
        self.tax = totals.tax;
        self.tip = totals.tip;
        self.total = totals.total;
        Ok(())
    }

    pub fn to_response(&self) -> wire::OrderResponse {
        wire::OrderResponse {
            order_id: self.id.0,
            tenant_id: self.tenant_id.0,
            status: self.status.into(),
            items: self
                .items
                .iter()
                .map(|item| wire::LineItemResponse {
                    menu_item_id: item.menu_item_id.clone(),
                    name: item.name.clone(),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    add_ons: item
                        .add_ons
                        .iter()
                        .map(|a| wire::AddOnResponse {
                            add_on_id: a.add_on_id.clone(),
                            name: a.name.clone(),
                            price: a.price,
                        })
                        .collect(),
                    line_total: item.line_total(),
                })
                .collect(),
            customer: self.customer.clone(),
            subtotal: self.subtotal,
            tax: self.tax,
            tip: self.tip,
            total: self.total,
            version: self.version,
            created_at: unix_millis(self.created_at),
            fire_at: self.fire_at.map(|t| t.unix_timestamp()),
            audit_log: self
                .audit_log
                .iter()
                .map(|e| wire::AuditEntryResponse {
                    from: e.from.into(),
                    to: e.to.into(),
                    actor: e.actor.to_string(),
                    at: unix_millis(e.at),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OrderRow {
    pub id: OrderId,
    pub tenant_id: TenantId,
    pub status: OrderStatus,
    pub items: Json<Vec<LineItem>>,
    pub customer: Json<CustomerContact>,
    pub tax_rate: Decimal,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub tip: Decimal,
    pub total: Decimal,
    pub version: i64,
    pub created_at: OffsetDateTime,
    pub fire_at: Option<OffsetDateTime>,
    pub audit_log: Json<Vec<AuditEntry>>,
}

impl From<OrderRow> for Order {
    fn from(row: OrderRow) -> Self {
        Order {
            id: row.id,
            tenant_id: row.tenant_id,
            status: row.status,
            items: row.items.0,
            customer: row.customer.0,
            tax_rate: row.tax_rate,
            subtotal: row.subtotal,
            tax: row.tax,
            tip: row.tip,
            total: row.total,
            version: row.version,
            created_at: row.created_at,
            fire_at: row.fire_at,
            audit_log: row.audit_log.0,
        }
    }
}

/// Position of the scheduler within the `fire_at` ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DueCursor {
    pub fire_at: OffsetDateTime,
    pub order_id: OrderId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::FromRow)]
pub struct DueOrder {
    pub tenant_id: TenantId,
    #[sqlx(rename = "id")]
    pub order_id: OrderId,
    pub fire_at: OffsetDateTime,
}

impl DueOrder {
    pub fn cursor(&self) -> DueCursor {
        DueCursor {
            fire_at: self.fire_at,
            order_id: self.order_id,
        }
    }
}

const ORDER_COLUMNS: &str = "id, tenant_id, status, items, customer, tax_rate, subtotal, tax, \
     tip, total, version, created_at, fire_at, audit_log";

#[derive(Debug, Clone, Copy)]
pub struct GetOrder {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
}

impl Processor<GetOrder> for DatabaseProcessor {
    type Output = Option<Order>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetOrder")]
    async fn process(&self, query: GetOrder) -> Result<Option<Order>, sqlx::Error> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 AND tenant_id = $2");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(query.order_id)
            .bind(query.tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Order::from))
    }
}

#[derive(Debug, Clone)]
pub struct InsertOrder {
    pub order: Order,
}

impl Processor<InsertOrder> for DatabaseProcessor {
    type Output = ();
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:InsertOrder")]
    async fn process(&self, query: InsertOrder) -> Result<(), sqlx::Error> {
        let order = &query.order;
        sqlx::query(
            "INSERT INTO orders (id, tenant_id, status, items, customer, tax_rate, subtotal, tax, \
             tip, total, version, created_at, fire_at, audit_log) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(order.id)
        .bind(order.tenant_id)
        .bind(order.status)
        .bind(Json(&order.items))
        .bind(Json(&order.customer))
        .bind(order.tax_rate)
        .bind(order.subtotal)
        .bind(order.tax)
        .bind(order.tip)
        .bind(order.total)
        .bind(order.version)
        .bind(order.created_at)
        .bind(order.fire_at)
        .bind(Json(&order.audit_log))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Overwrite an order only if the stored version still equals
/// `expected_version`. Returns whether a row was written.
#[derive(Debug, Clone)]
pub struct ReplaceOrder {
    pub order: Order,
    pub expected_version: i64,
}

impl Processor<ReplaceOrder> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ReplaceOrder")]
    async fn process(&self, query: ReplaceOrder) -> Result<bool, sqlx::Error> {
        let order = &query.order;
        let result = sqlx::query(
            "UPDATE orders SET status = $1, items = $2, customer = $3, subtotal = $4, tax = $5, \
             tip = $6, total = $7, version = $8, fire_at = $9, audit_log = $10 \
             WHERE id = $11 AND tenant_id = $12 AND version = $13",
        )
        .bind(order.status)
        .bind(Json(&order.items))
        .bind(Json(&order.customer))
        .bind(order.subtotal)
        .bind(order.tax)
        .bind(order.tip)
        .bind(order.total)
        .bind(order.version)
        .bind(order.fire_at)
        .bind(Json(&order.audit_log))
        .bind(order.id)
        .bind(order.tenant_id)
        .bind(query.expected_version)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GetOrderVersion {
    pub tenant_id: TenantId,
    pub order_id: OrderId,
}

impl Processor<GetOrderVersion> for DatabaseProcessor {
    type Output = Option<i64>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetOrderVersion")]
    async fn process(&self, query: GetOrderVersion) -> Result<Option<i64>, sqlx::Error> {
        sqlx::query_scalar::<_, i64>("SELECT version FROM orders WHERE id = $1 AND tenant_id = $2")
            .bind(query.order_id)
            .bind(query.tenant_id)
            .fetch_optional(&self.pool)
            .await
    }
}

/// Orders (of every tenant and status) whose `fire_at` lies after `after`
/// and at or before `until`, in cursor order.
#[derive(Debug, Clone, Copy)]
pub struct ListDueOrders {
    pub after: DueCursor,
    pub until: OffsetDateTime,
    pub limit: i64,
}

impl Processor<ListDueOrders> for DatabaseProcessor {
    type Output = Vec<DueOrder>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListDueOrders")]
    async fn process(&self, query: ListDueOrders) -> Result<Vec<DueOrder>, sqlx::Error> {
        sqlx::query_as::<_, DueOrder>(
            "SELECT tenant_id, id, fire_at FROM orders \
             WHERE fire_at IS NOT NULL AND (fire_at, id) > ($1, $2) AND fire_at <= $3 \
             ORDER BY fire_at, id LIMIT $4",
        )
        .bind(query.after.fire_at)
        .bind(query.after.order_id)
        .bind(query.until)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await
    }
}
