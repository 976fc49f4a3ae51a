//! Read-only price lookups.
//!
//! Menu management lives elsewhere; the engine only resolves the items and
//! add-ons of an incoming order to names and current prices.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use compact_str::CompactString;
use galley_sdk::objects::LineItemRequest;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use smallvec::SmallVec;
use thiserror::Error;

use crate::entities::TenantId;
use crate::entities::menu::{GetMenuAddOns, GetMenuItems};
use crate::entities::order::{AddOn, LineItem};
use crate::framework::DatabaseProcessor;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown menu item {0}")]
    UnknownItem(CompactString),
    #[error("menu item {0} is not available")]
    Unavailable(CompactString),
    #[error("add-on {add_on} is not offered for menu item {item}")]
    UnknownAddOn {
        item: CompactString,
        add_on: CompactString,
    },
    #[error("catalog lookup failed: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait MenuCatalog: Send + Sync {
    /// Resolve requested lines to priced line items, in request order.
    async fn price_items(
        &self,
        tenant_id: TenantId,
        items: &[LineItemRequest],
    ) -> Result<Vec<LineItem>, CatalogError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    pub name: String,
    pub price: Decimal,
    pub available: bool,
    pub add_ons: HashMap<CompactString, AddOnEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOnEntry {
    pub name: String,
    pub price: Decimal,
}

fn price_line(
    request: &LineItemRequest,
    entry: Option<&MenuEntry>,
) -> Result<LineItem, CatalogError> {
    let entry = entry.ok_or_else(|| CatalogError::UnknownItem(request.menu_item_id.clone()))?;
    if !entry.available {
        return Err(CatalogError::Unavailable(request.menu_item_id.clone()));
    }
    let add_ons = request
        .add_ons
        .iter()
        .map(|id| {
            entry
                .add_ons
                .get(id)
                .map(|a| AddOn {
                    add_on_id: id.clone(),
                    name: a.name.clone(),
                    price: a.price,
                })
                .ok_or_else(|| CatalogError::UnknownAddOn {
                    item: request.menu_item_id.clone(),
                    add_on: id.clone(),
                })
        })
        .collect::<Result<SmallVec<_>, _>>()?;
    Ok(LineItem {
        menu_item_id: request.menu_item_id.clone(),
        name: entry.name.clone(),
        quantity: request.quantity,
        unit_price: entry.price,
        add_ons,
    })
}

/// Menus held in memory, loaded from the config file or set up by tests.
#[derive(Default)]
pub struct MemoryCatalog {
    menus: Mutex<HashMap<TenantId, HashMap<CompactString, MenuEntry>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant_id: TenantId, item_id: impl Into<CompactString>, entry: MenuEntry) {
        self.menus
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(tenant_id)
            .or_default()
            .insert(item_id.into(), entry);
    }

    /// Replace a tenant's whole menu.
    pub fn replace_menu(&self, tenant_id: TenantId, menu: HashMap<CompactString, MenuEntry>) {
        self.menus
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tenant_id, menu);
    }
}

#[async_trait]
impl MenuCatalog for MemoryCatalog {
    async fn price_items(
        &self,
        tenant_id: TenantId,
        items: &[LineItemRequest],
    ) -> Result<Vec<LineItem>, CatalogError> {
        let menus = self.menus.lock().unwrap_or_else(PoisonError::into_inner);
        let menu = menus.get(&tenant_id);
        items
            .iter()
            .map(|request| price_line(request, menu.and_then(|m| m.get(&request.menu_item_id))))
            .collect()
    }
}

/// Catalog backed by the `menu_items` and `menu_add_ons` tables.
#[derive(Clone)]
pub struct PgCatalog {
    db: DatabaseProcessor,
}

impl PgCatalog {
    pub fn new(db: DatabaseProcessor) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MenuCatalog for PgCatalog {
    async fn price_items(
        &self,
        tenant_id: TenantId,
        items: &[LineItemRequest],
    ) -> Result<Vec<LineItem>, CatalogError> {
        let ids: Vec<String> = items
            .iter()
            .map(|i| i.menu_item_id.to_string())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let records = self
            .db
            .process(GetMenuItems {
                tenant_id,
                menu_item_ids: ids.clone(),
            })
            .await?;
        let add_ons = self
            .db
            .process(GetMenuAddOns {
                tenant_id,
                menu_item_ids: ids,
            })
            .await?;

        let mut menu: HashMap<CompactString, MenuEntry> = records
            .into_iter()
            .map(|r| {
                (
                    r.menu_item_id,
                    MenuEntry {
                        name: r.name,
                        price: r.price,
                        available: r.available,
                        add_ons: HashMap::new(),
                    },
                )
            })
            .collect();
        for add_on in add_ons {
            if let Some(entry) = menu.get_mut(&add_on.menu_item_id) {
                entry.add_ons.insert(
                    add_on.add_on_id,
                    AddOnEntry {
                        name: add_on.name,
                        price: add_on.price,
                    },
                );
            }
        }

        items
            .iter()
            .map(|request| price_line(request, menu.get(&request.menu_item_id)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use smallvec::smallvec;

    fn request(id: &str, quantity: u32, add_ons: &[&str]) -> LineItemRequest {
        LineItemRequest {
            menu_item_id: id.into(),
            quantity,
            add_ons: add_ons.iter().map(|a| CompactString::from(*a)).collect(),
        }
    }

    #[tokio::test]
    async fn test_prices_come_from_catalog() {
        let tenant = testing::tenant();
        let catalog = testing::catalog(tenant);
        let items = catalog
            .price_items(tenant, &[request("burger", 2, &["cheese"])])
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].unit_price, "12.50".parse::<Decimal>().unwrap());
        assert_eq!(items[0].add_ons[0].price, "1.25".parse::<Decimal>().unwrap());
    }

    #[tokio::test]
    async fn test_unknown_item_and_add_on_are_rejected() {
        let tenant = testing::tenant();
        let catalog = testing::catalog(tenant);
        let err = catalog
            .price_items(tenant, &[request("lobster", 1, &[])])
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownItem(id) if id == "lobster"));

        let err = catalog
            .price_items(tenant, &[request("fries", 1, &["cheese"])])
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownAddOn { .. }));
    }

    #[tokio::test]
    async fn test_menus_do_not_leak_across_tenants() {
        let tenant = testing::tenant();
        let catalog = testing::catalog(tenant);
        let line = LineItemRequest {
            menu_item_id: "burger".into(),
            quantity: 1,
            add_ons: smallvec![],
        };
        let err = catalog
            .price_items(TenantId::generate(), &[line])
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownItem(_)));
    }
}
