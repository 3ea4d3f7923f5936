//! Tenant directory and provisioning

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::tenant::{Tenant, TenantId, TenantStatus, validate_slug};

/// Read access to the set of known tenants
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn find(&self, id: TenantId) -> Result<Option<Tenant>>;

    async fn list(&self) -> Result<Vec<Tenant>>;
}

/// Thread-safe in-memory tenant directory
///
/// Tenants are never removed; suspension is the only way to retire one.
#[derive(Clone, Default)]
pub struct InMemoryTenantDirectory {
    tenants: Arc<RwLock<HashMap<TenantId, Tenant>>>,
}

impl std::fmt::Debug for InMemoryTenantDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTenantDirectory")
            .field("tenant_count", &self.tenants.read().len())
            .finish()
    }
}

impl InMemoryTenantDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new active tenant
    pub fn provision(
        &self,
        name: impl Into<String>,
        slug: impl Into<String>,
        settings: Map<String, Value>,
    ) -> Result<Tenant> {
        self.provision_with_id(TenantId::new(), name, slug, settings)
    }

    /// Create a new active tenant with a caller-chosen identifier
    pub fn provision_with_id(
        &self,
        id: TenantId,
        name: impl Into<String>,
        slug: impl Into<String>,
        settings: Map<String, Value>,
    ) -> Result<Tenant> {
        let name = name.into();
        let slug = slug.into();
        validate_slug(&slug)?;

        if name.trim().is_empty() {
            return Err(Error::InvalidRow("tenant name must not be empty".into()));
        }

        let mut tenants = self.tenants.write();
        if tenants.values().any(|t| t.slug == slug) {
            return Err(Error::SlugTaken(slug));
        }
        if tenants.contains_key(&id) {
            return Err(Error::InvalidRow(format!("tenant {id} already exists")));
        }

        let now = Utc::now();
        let tenant = Tenant {
            id,
            name,
            slug,
            status: TenantStatus::Active,
            settings,
            created_at: now,
            updated_at: now,
        };
        tenants.insert(id, tenant.clone());
        drop(tenants);

        tracing::info!(tenant_id = %tenant.id, slug = %tenant.slug, "Tenant provisioned");
        Ok(tenant)
    }

    /// Change a tenant's status (soft lifecycle)
    pub fn set_status(&self, id: TenantId, status: TenantStatus) -> Result<Tenant> {
        let mut tenants = self.tenants.write();
        let tenant = tenants
            .get_mut(&id)
            .ok_or_else(|| Error::TenantNotFound(id.to_string()))?;
        tenant.status = status;
        tenant.updated_at = Utc::now();
        let updated = tenant.clone();
        drop(tenants);

        tracing::info!(tenant_id = %id, status = ?status, "Tenant status changed");
        Ok(updated)
    }
}

#[async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn find(&self, id: TenantId) -> Result<Option<Tenant>> {
        Ok(self.tenants.read().get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Tenant>> {
        let mut tenants: Vec<Tenant> = self.tenants.read().values().cloned().collect();
        tenants.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(tenants)
    }
}
