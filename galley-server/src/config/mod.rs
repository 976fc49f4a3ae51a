//! Configuration module for galley-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables, and turns it into the engine's runtime types.

pub mod file;

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use compact_str::CompactString;
use galley_core::catalog::{AddOnEntry, MenuEntry};
use galley_core::config::{
    BroadcastPolicy, EnginePolicy, PaymentPolicy, SchedulerPolicy, TenantConfig, TenantDirectory,
};
use galley_core::entities::TenantId;
use rust_decimal::Decimal;
use thiserror::Error;
use url::Url;

use crate::config::file::{
    FileConfig, MenuItemConfig, PolicyConfig, TenantConfig as FileTenantConfig,
};

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

pub type TenantMenus = HashMap<TenantId, HashMap<CompactString, MenuEntry>>;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub max_connections: u32,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: Url,
    pub api_key: String,
}

/// Loaded configuration result containing all parts.
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub policy: EnginePolicy,
    pub tenants: TenantDirectory,
    pub menus: TenantMenus,
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Read, override, validate and convert the configuration file.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let content = std::fs::read_to_string(&self.config_path)?;
        self.parse(&content)
    }

    /// Reload the configuration (used during SIGHUP).
    ///
    /// Only tenants, menus and policies are applied on reload; listen
    /// address, pool size and gateway changes need a restart.
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn parse(&self, content: &str) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(content)?;
        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }
        validate(&file_config)?;
        Ok(build_loaded_config(file_config))
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    if config.database.max_connections == 0 {
        return Err(invalid("database.max_connections must be positive"));
    }
    if config.gateway.api_key.trim().is_empty() {
        return Err(invalid("gateway.api_key must not be empty"));
    }
    validate_policy(&config.policy)?;

    let mut seen = HashSet::new();
    for tenant in &config.tenants {
        if !seen.insert(tenant.id) {
            return Err(invalid(format!("tenant {} is configured twice", tenant.id)));
        }
        if tenant.secret.is_empty() {
            return Err(invalid(format!("tenant {} has an empty secret", tenant.id)));
        }
        if tenant.tax_rate < Decimal::ZERO || tenant.tax_rate >= Decimal::ONE {
            return Err(invalid(format!(
                "tenant {} tax_rate must be a fraction in [0, 1)",
                tenant.id
            )));
        }
        validate_menu(tenant)?;
    }
    Ok(())
}

fn validate_policy(policy: &PolicyConfig) -> Result<(), ConfigError> {
    let non_zero = [
        ("policy.payment.gateway_timeout_secs", policy.payment.gateway_timeout_secs),
        ("policy.payment.device_timeout_secs", policy.payment.device_timeout_secs),
        (
            "policy.payment.device_poll_interval_secs",
            policy.payment.device_poll_interval_secs,
        ),
        (
            "policy.broadcast.retention_window_secs",
            policy.broadcast.retention_window_secs,
        ),
        ("policy.broadcast.idle_timeout_secs", policy.broadcast.idle_timeout_secs),
        (
            "policy.broadcast.keepalive_interval_secs",
            policy.broadcast.keepalive_interval_secs,
        ),
        ("policy.scheduler.sweep_interval_secs", policy.scheduler.sweep_interval_secs),
        (
            "policy.scheduler.catch_up_window_secs",
            policy.scheduler.catch_up_window_secs,
        ),
    ];
    let non_zero_counts = [
        ("policy.payment.history_capacity", policy.payment.history_capacity),
        (
            "policy.broadcast.subscriber_queue_capacity",
            policy.broadcast.subscriber_queue_capacity,
        ),
        ("policy.broadcast.retained_events", policy.broadcast.retained_events),
        ("policy.scheduler.batch_size", policy.scheduler.batch_size),
    ];
    if let Some((name, _)) = non_zero.iter().find(|(_, v)| *v == Some(0)) {
        return Err(invalid(format!("{name} must be positive")));
    }
    if let Some((name, _)) = non_zero_counts.iter().find(|(_, v)| *v == Some(0)) {
        return Err(invalid(format!("{name} must be positive")));
    }
    let keepalive = policy.broadcast.keepalive_interval_secs.unwrap_or(30);
    let idle = policy.broadcast.idle_timeout_secs.unwrap_or(90);
    if keepalive >= idle {
        return Err(invalid(
            "policy.broadcast.keepalive_interval_secs must be below idle_timeout_secs",
        ));
    }
    Ok(())
}

fn validate_menu(tenant: &FileTenantConfig) -> Result<(), ConfigError> {
    let mut items = HashSet::new();
    for item in &tenant.menu {
        if !items.insert(&item.id) {
            return Err(invalid(format!(
                "tenant {} lists menu item {} twice",
                tenant.id, item.id
            )));
        }
        if item.price < Decimal::ZERO || item.add_ons.iter().any(|a| a.price < Decimal::ZERO) {
            return Err(invalid(format!(
                "menu item {} of tenant {} has a negative price",
                item.id, tenant.id
            )));
        }
    }
    Ok(())
}

fn secs_or(value: Option<u64>, default: Duration) -> Duration {
    value.map_or(default, Duration::from_secs)
}

fn convert_policy(policy: PolicyConfig) -> EnginePolicy {
    let defaults = EnginePolicy::default();
    EnginePolicy {
        payment: PaymentPolicy {
            gateway_timeout: secs_or(
                policy.payment.gateway_timeout_secs,
                defaults.payment.gateway_timeout,
            ),
            device_timeout: secs_or(
                policy.payment.device_timeout_secs,
                defaults.payment.device_timeout,
            ),
            device_poll_interval: secs_or(
                policy.payment.device_poll_interval_secs,
                defaults.payment.device_poll_interval,
            ),
            history_capacity: policy
                .payment
                .history_capacity
                .unwrap_or(defaults.payment.history_capacity),
        },
        broadcast: BroadcastPolicy {
            subscriber_queue_capacity: policy
                .broadcast
                .subscriber_queue_capacity
                .unwrap_or(defaults.broadcast.subscriber_queue_capacity),
            retained_events: policy
                .broadcast
                .retained_events
                .unwrap_or(defaults.broadcast.retained_events),
            retention_window: secs_or(
                policy.broadcast.retention_window_secs,
                defaults.broadcast.retention_window,
            ),
            idle_timeout: secs_or(
                policy.broadcast.idle_timeout_secs,
                defaults.broadcast.idle_timeout,
            ),
            keepalive_interval: secs_or(
                policy.broadcast.keepalive_interval_secs,
                defaults.broadcast.keepalive_interval,
            ),
        },
        scheduler: SchedulerPolicy {
            sweep_interval: secs_or(
                policy.scheduler.sweep_interval_secs,
                defaults.scheduler.sweep_interval,
            ),
            catch_up_window: secs_or(
                policy.scheduler.catch_up_window_secs,
                defaults.scheduler.catch_up_window,
            ),
            batch_size: policy
                .scheduler
                .batch_size
                .unwrap_or(defaults.scheduler.batch_size),
            max_conflict_retries: policy
                .scheduler
                .max_conflict_retries
                .unwrap_or(defaults.scheduler.max_conflict_retries),
        },
    }
}

fn convert_menu(menu: Vec<MenuItemConfig>) -> HashMap<CompactString, MenuEntry> {
    menu.into_iter()
        .map(|item| {
            let entry = MenuEntry {
                name: item.name,
                price: item.price,
                available: item.available,
                add_ons: item
                    .add_ons
                    .into_iter()
                    .map(|a| {
                        (
                            a.id,
                            AddOnEntry {
                                name: a.name,
                                price: a.price,
                            },
                        )
                    })
                    .collect(),
            };
            (item.id, entry)
        })
        .collect()
}

/// `Url::join` drops the last path segment unless the base ends with `/`.
fn directory_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

fn build_loaded_config(file_config: FileConfig) -> LoadedConfig {
    let mut menus = TenantMenus::new();
    let tenants = file_config
        .tenants
        .into_iter()
        .map(|t| {
            let id = TenantId::from(t.id);
            menus.insert(id, convert_menu(t.menu));
            TenantConfig::new(id, t.name, t.secret.into_bytes(), t.tax_rate)
        })
        .collect();

    LoadedConfig {
        server: ServerConfig {
            listen: file_config.server.listen,
            max_connections: file_config.database.max_connections,
        },
        gateway: GatewayConfig {
            base_url: directory_url(file_config.gateway.base_url),
            api_key: file_config.gateway.api_key,
        },
        policy: convert_policy(file_config.policy),
        tenants,
        menus,
    }
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TENANT: &str = "0190b8e4-8c3a-7c1e-9a44-3f1d2e5a6b7c";

    fn loader() -> ConfigLoader {
        ConfigLoader::new("unused.toml", None)
    }

    fn with_tenants(tenants: &str) -> String {
        format!(
            r#"
[gateway]
base_url = "https://payments.example.com/api"
api_key = "sk_test"

{tenants}
"#
        )
    }

    #[test]
    fn test_converts_tenants_menus_and_policy() {
        let content = format!(
            r#"
[gateway]
base_url = "https://payments.example.com/api"
api_key = "sk_test"

[policy.payment]
gateway_timeout_secs = 5

[policy.scheduler]
batch_size = 50

[[tenants]]
id = "{TENANT}"
name = "Harbor Grill"
secret = "grill-secret"
tax_rate = "0.08"

[[tenants.menu]]
id = "soda"
name = "Soda"
price = "2.25"
available = false
"#
        );
        let loaded = loader().parse(&content).unwrap();
        assert_eq!(loaded.policy.payment.gateway_timeout, Duration::from_secs(5));
        assert_eq!(
            loaded.policy.payment.device_timeout,
            PaymentPolicy::default().device_timeout
        );
        assert_eq!(loaded.policy.scheduler.batch_size, 50);
        assert_eq!(loaded.gateway.base_url.as_str(), "https://payments.example.com/api/");

        let id = TenantId::from(TENANT.parse::<uuid::Uuid>().unwrap());
        let tenant = loaded.tenants.get(id).unwrap();
        assert_eq!(tenant.secret_bytes(), b"grill-secret");
        assert!(!loaded.menus[&id]["soda"].available);
    }

    #[test]
    fn test_listen_override_wins() {
        let addr: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let loaded = ConfigLoader::new("unused.toml", Some(addr))
            .parse(&with_tenants(""))
            .unwrap();
        assert_eq!(loaded.server.listen, addr);
    }

    #[test]
    fn test_rejects_duplicate_tenants() {
        let tenant = format!(
            r#"
[[tenants]]
id = "{TENANT}"
name = "A"
secret = "a"
tax_rate = "0.08"
"#
        );
        let content = with_tenants(&format!("{tenant}{tenant}"));
        assert!(matches!(
            loader().parse(&content),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_rejects_bad_values() {
        let cases = [
            format!(
                "[[tenants]]\nid = \"{TENANT}\"\nname = \"A\"\nsecret = \"a\"\ntax_rate = \"1.5\"\n"
            ),
            format!(
                "[[tenants]]\nid = \"{TENANT}\"\nname = \"A\"\nsecret = \"\"\ntax_rate = \"0.1\"\n"
            ),
            "[policy.broadcast]\nkeepalive_interval_secs = 120\n".to_string(),
            "[policy.scheduler]\nbatch_size = 0\n".to_string(),
        ];
        for case in cases {
            assert!(
                matches!(
                    loader().parse(&with_tenants(&case)),
                    Err(ConfigError::ValidationError(_))
                ),
                "{case}"
            );
        }
    }
}
