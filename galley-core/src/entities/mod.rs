pub mod menu;
pub mod order;
pub mod payment;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
        )]
        #[serde(transparent)]
        #[sqlx(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

uuid_id!(
    /// A restaurant. Data and event streams never cross tenants.
    TenantId
);
uuid_id!(OrderId);
uuid_id!(PaymentId);

/// Who performed a mutation: a staff member, a device, or the engine itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Actor(pub CompactString);

impl Actor {
    pub fn new(name: impl Into<CompactString>) -> Self {
        Self(name.into())
    }

    /// The scheduling sweeper.
    pub fn scheduler() -> Self {
        Self(CompactString::const_new("scheduler"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An identity established by the upstream authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub tenant_id: TenantId,
    pub actor: Actor,
}

impl Identity {
    pub fn new(tenant_id: TenantId, actor: Actor) -> Self {
        Self { tenant_id, actor }
    }
}

/// What a caller presents when it asks for tenant-scoped resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthContext {
    Anonymous,
    Authenticated(Identity),
}

/// Convert an `OffsetDateTime` to unix milliseconds for the wire.
pub(crate) fn unix_millis(at: time::OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}
