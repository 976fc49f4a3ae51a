//! Application state shared across all request handlers.

use std::sync::Arc;

use galley_core::broadcast::EventBroadcaster;
use galley_core::catalog::MemoryCatalog;
use galley_core::config::{EnginePolicy, PolicyStore, TenantDirectory};
use galley_core::service::OrderService;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OrderService>,
    pub broadcaster: Arc<EventBroadcaster>,
    /// Tenants and their secrets (can be reloaded via SIGHUP).
    pub tenants: PolicyStore<TenantDirectory>,
    /// Engine policy (can be reloaded via SIGHUP).
    pub policy: PolicyStore<EnginePolicy>,
    /// Set when menus are served from the config file instead of the database.
    pub menus: Option<Arc<MemoryCatalog>>,
}
