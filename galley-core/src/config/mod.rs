//! Runtime configuration shared by the engine components.
//!
//! The server crate parses the TOML file and builds these types; the engine
//! reads them through [`PolicyStore`] so a reload takes effect without a
//! restart.

mod policy;
mod policy_store;
mod tenant;

pub use policy::{BroadcastPolicy, EnginePolicy, PaymentPolicy, SchedulerPolicy};
pub use policy_store::{PolicyStore, PolicyWatcher};
pub use tenant::{TenantConfig, TenantDirectory};
