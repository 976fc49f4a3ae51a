use std::collections::HashMap;

use rust_decimal::Decimal;

use crate::entities::TenantId;

#[derive(Debug, Clone)]
pub struct TenantConfig {
    pub id: TenantId,
    pub name: String,
    /// Shared secret used to verify identity assertions.
    pub secret: Box<[u8]>,
    /// Sales tax as a fraction, e.g. `0.0875`.
    pub tax_rate: Decimal,
}

impl TenantConfig {
    pub fn new(id: TenantId, name: String, secret: impl Into<Box<[u8]>>, tax_rate: Decimal) -> Self {
        Self {
            id,
            name,
            secret: secret.into(),
            tax_rate,
        }
    }

    pub fn secret_bytes(&self) -> &[u8] {
        &self.secret
    }
}

/// All configured tenants, indexed by id.
#[derive(Debug, Clone, Default)]
pub struct TenantDirectory {
    tenants: HashMap<TenantId, TenantConfig>,
}

impl TenantDirectory {
    pub fn get(&self, id: TenantId) -> Option<&TenantConfig> {
        self.tenants.get(&id)
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TenantConfig> {
        self.tenants.values()
    }
}

impl FromIterator<TenantConfig> for TenantDirectory {
    fn from_iter<I: IntoIterator<Item = TenantConfig>>(iter: I) -> Self {
        Self {
            tenants: iter.into_iter().map(|t| (t.id, t)).collect(),
        }
    }
}
