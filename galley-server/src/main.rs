//! Galley Server
//!
//! Order and payment lifecycle engine for restaurant point-of-sale systems.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use galley_core::broadcast::EventBroadcaster;
use galley_core::catalog::{MemoryCatalog, MenuCatalog, PgCatalog};
use galley_core::config::PolicyStore;
use galley_core::framework::DatabaseProcessor;
use galley_core::payments::PaymentService;
use galley_core::payments::gateway::HttpPaymentGateway;
use galley_core::processors::{IdleReaper, SchedulingService};
use galley_core::service::OrderService;
use galley_core::store::{MemoryStore, OrderStore, PaymentStore, PgStore};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use config::{ConfigLoader, LoadedConfig, TenantMenus, get_database_url};
use server::{build_router, run_server};
use shutdown::spawn_config_reload_handler;
use state::AppState;

/// Galley - restaurant order and payment lifecycle engine
#[derive(Parser, Debug)]
#[command(name = "galley-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./galley-config.toml", env = "GALLEY_CONFIG")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,

    /// Emit logs as JSON lines
    #[arg(long, default_value = "false", env = "GALLEY_LOG_JSON")]
    log_json: bool,

    /// Keep orders and payments in memory and serve menus from the config file
    #[arg(long, default_value = "false")]
    memory_store: bool,
}

struct Stores {
    orders: Arc<dyn OrderStore>,
    payments: Arc<dyn PaymentStore>,
    catalog: Arc<dyn MenuCatalog>,
    menus: Option<Arc<MemoryCatalog>>,
    pool: Option<PgPool>,
}

fn memory_stores(menus: TenantMenus) -> Stores {
    let store = Arc::new(MemoryStore::new());
    let catalog = Arc::new(MemoryCatalog::new());
    for (tenant_id, menu) in menus {
        catalog.replace_menu(tenant_id, menu);
    }
    Stores {
        orders: store.clone(),
        payments: store,
        catalog: catalog.clone(),
        menus: Some(catalog),
        pool: None,
    }
}

async fn postgres_stores(max_connections: u32, migrate: bool) -> anyhow::Result<Stores> {
    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let db = DatabaseProcessor::new(db_pool.clone());
    let store = Arc::new(PgStore::new(db.clone()));
    Ok(Stores {
        orders: store.clone(),
        payments: store,
        catalog: Arc::new(PgCatalog::new(db)),
        menus: None,
        pool: Some(db_pool),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    tracing::info!("Starting galley-server v{}", env!("CARGO_PKG_VERSION"));

    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let LoadedConfig {
        server,
        gateway,
        policy,
        tenants,
        menus,
    } = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;
    tracing::info!(
        tenants = tenants.len(),
        "Configuration loaded from {:?}",
        args.config
    );

    let stores = if args.memory_store {
        tracing::warn!("Using the in-memory store, state is lost on restart");
        memory_stores(menus)
    } else {
        postgres_stores(server.max_connections, args.migrate).await?
    };

    let policy = PolicyStore::new(policy);
    let tenants = PolicyStore::new(tenants);
    let broadcaster = Arc::new(EventBroadcaster::new(policy.clone()));
    let payment_gateway = Arc::new(HttpPaymentGateway::new(gateway.base_url, gateway.api_key));
    let payments = PaymentService::new(
        stores.payments,
        payment_gateway,
        broadcaster.clone(),
        policy.clone(),
    );
    let service = Arc::new(OrderService::new(
        stores.orders.clone(),
        stores.catalog,
        payments,
        broadcaster.clone(),
        tenants.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = SchedulingService::new(stores.orders, broadcaster.clone(), policy.clone());
    let scheduler_handle = tokio::spawn(scheduler.run(shutdown_rx.clone()));
    let reaper = IdleReaper::new(broadcaster.clone());
    let reaper_handle = tokio::spawn(reaper.run(shutdown_rx.clone()));

    let state = AppState {
        service,
        broadcaster,
        tenants,
        policy,
        menus: stores.menus,
    };

    spawn_config_reload_handler(state.clone(), config_loader, shutdown_rx);

    let router = build_router(state);

    tracing::info!("Starting HTTP server on {}", server.listen);
    let result = run_server(router, server.listen, shutdown_tx.clone()).await;

    // Also covers a bind failure, where no signal ever arrived.
    shutdown_tx.send_replace(true);
    if let Err(e) = scheduler_handle.await {
        tracing::error!(error = %e, "Scheduling service task failed");
    }
    if let Err(e) = reaper_handle.await {
        tracing::error!(error = %e, "Idle reaper task failed");
    }

    if let Some(pool) = stores.pool {
        tracing::info!("Closing database connections...");
        pool.close().await;
    }
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,tower_http=debug"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
