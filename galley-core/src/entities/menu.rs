use compact_str::CompactString;
use kanau::processor::Processor;
use rust_decimal::Decimal;

use super::TenantId;
use crate::framework::DatabaseProcessor;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MenuItemRecord {
    pub tenant_id: TenantId,
    pub menu_item_id: CompactString,
    pub name: String,
    pub price: Decimal,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MenuAddOnRecord {
    pub tenant_id: TenantId,
    pub menu_item_id: CompactString,
    pub add_on_id: CompactString,
    pub name: String,
    pub price: Decimal,
}

/// Load the given menu items of a tenant. Missing ids are simply absent.
#[derive(Debug, Clone)]
pub struct GetMenuItems {
    pub tenant_id: TenantId,
    pub menu_item_ids: Vec<String>,
}

impl Processor<GetMenuItems> for DatabaseProcessor {
    type Output = Vec<MenuItemRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetMenuItems")]
    async fn process(&self, query: GetMenuItems) -> Result<Vec<MenuItemRecord>, sqlx::Error> {
        sqlx::query_as::<_, MenuItemRecord>(
            "SELECT tenant_id, menu_item_id, name, price, available FROM menu_items \
             WHERE tenant_id = $1 AND menu_item_id = ANY($2)",
        )
        .bind(query.tenant_id)
        .bind(&query.menu_item_ids)
        .fetch_all(&self.pool)
        .await
    }
}

/// Load every add-on offered for the given menu items.
#[derive(Debug, Clone)]
pub struct GetMenuAddOns {
    pub tenant_id: TenantId,
    pub menu_item_ids: Vec<String>,
}

impl Processor<GetMenuAddOns> for DatabaseProcessor {
    type Output = Vec<MenuAddOnRecord>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetMenuAddOns")]
    async fn process(&self, query: GetMenuAddOns) -> Result<Vec<MenuAddOnRecord>, sqlx::Error> {
        sqlx::query_as::<_, MenuAddOnRecord>(
            "SELECT tenant_id, menu_item_id, add_on_id, name, price FROM menu_add_ons \
             WHERE tenant_id = $1 AND menu_item_id = ANY($2)",
        )
        .bind(query.tenant_id)
        .bind(&query.menu_item_ids)
        .fetch_all(&self.pool)
        .await
    }
}
