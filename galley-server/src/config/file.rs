//! TOML file configuration structures.
//!
//! These structs directly map to the `galley-config.toml` file format.

use std::net::SocketAddr;

use compact_str::CompactString;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Database pool settings. The URL comes from `DATABASE_URL`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    10
}

/// Card processor connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub base_url: Url,
    pub api_key: String,
}

/// Engine policy overrides. Anything left out keeps the built-in default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub payment: PaymentPolicyConfig,
    #[serde(default)]
    pub broadcast: BroadcastPolicyConfig,
    #[serde(default)]
    pub scheduler: SchedulerPolicyConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentPolicyConfig {
    pub gateway_timeout_secs: Option<u64>,
    pub device_timeout_secs: Option<u64>,
    pub device_poll_interval_secs: Option<u64>,
    pub history_capacity: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BroadcastPolicyConfig {
    pub subscriber_queue_capacity: Option<usize>,
    pub retained_events: Option<usize>,
    pub retention_window_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub keepalive_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerPolicyConfig {
    pub sweep_interval_secs: Option<u64>,
    pub catch_up_window_secs: Option<u64>,
    pub batch_size: Option<usize>,
    pub max_conflict_retries: Option<u32>,
}

/// One restaurant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub id: Uuid,
    pub name: String,
    /// Shared secret the upstream gateway signs identity headers with.
    pub secret: String,
    /// Sales tax as a fraction, e.g. `"0.0875"`.
    pub tax_rate: Decimal,
    /// Menu served from memory when running without a database.
    #[serde(default)]
    pub menu: Vec<MenuItemConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MenuItemConfig {
    pub id: CompactString,
    pub name: String,
    pub price: Decimal,
    #[serde(default = "default_available")]
    pub available: bool,
    #[serde(default)]
    pub add_ons: Vec<AddOnConfig>,
}

fn default_available() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddOnConfig {
    pub id: CompactString,
    pub name: String,
    pub price: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"

[database]
max_connections = 4

[gateway]
base_url = "https://payments.example.com/"
api_key = "sk_test"

[policy.payment]
gateway_timeout_secs = 10

[policy.broadcast]
keepalive_interval_secs = 20

[[tenants]]
id = "0190b8e4-8c3a-7c1e-9a44-3f1d2e5a6b7c"
name = "Harbor Grill"
secret = "grill-secret"
tax_rate = "0.0875"

[[tenants.menu]]
id = "burger"
name = "Burger"
price = "12.50"

[[tenants.menu.add_ons]]
id = "cheese"
name = "Cheese"
price = "1.25"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.policy.payment.gateway_timeout_secs, Some(10));
        assert_eq!(config.policy.payment.device_timeout_secs, None);
        assert_eq!(config.policy.broadcast.keepalive_interval_secs, Some(20));
        assert_eq!(config.tenants.len(), 1);
        let menu = &config.tenants[0].menu;
        assert_eq!(menu[0].price, Decimal::new(1250, 2));
        assert!(menu[0].available);
        assert_eq!(menu[0].add_ons[0].id, "cheese");
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let toml_str = r#"
[gateway]
base_url = "https://payments.example.com/"
api_key = "sk_test"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, default_listen_addr());
        assert_eq!(config.database.max_connections, 10);
        assert!(config.tenants.is_empty());
        assert!(config.policy.scheduler.sweep_interval_secs.is_none());
    }
}
