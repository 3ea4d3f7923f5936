//! Tenant context resolution
//!
//! Turns a verified token principal into a [`TenantContext`]. The token's
//! tenant claim is authoritative; a client-supplied tenant header is only
//! accepted as a consistency check against that claim.

use std::sync::Arc;

use crate::cache::TenantStatusCache;
use crate::directory::TenantDirectory;
use crate::error::{Error, Result};
use crate::tenant::{TenantId, TenantStatus};

/// Identity extracted from a verified authentication token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Token subject (acting user or job)
    pub subject: String,
    /// Raw tenant claim, if present
    pub tenant_id: Option<String>,
    pub roles: Vec<String>,
}

impl Principal {
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            tenant_id: None,
            roles: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    #[must_use]
    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Validated tenant context for one unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    /// Acting subject, recorded in the audit trail
    pub actor: String,
    pub roles: Vec<String>,
}

impl TenantContext {
    #[must_use]
    pub fn new(tenant_id: TenantId, actor: impl Into<String>) -> Self {
        Self {
            tenant_id,
            actor: actor.into(),
            roles: Vec::new(),
        }
    }
}

/// Tenant resolver
#[derive(Clone)]
pub struct TenantResolver {
    directory: Arc<dyn TenantDirectory>,
    cache: TenantStatusCache,
}

impl std::fmt::Debug for TenantResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantResolver")
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl TenantResolver {
    #[must_use]
    pub fn new(directory: Arc<dyn TenantDirectory>, cache: TenantStatusCache) -> Self {
        Self { directory, cache }
    }

    /// Resolve and validate the tenant for a request
    ///
    /// `header` is the optional client-supplied tenant header. It never
    /// selects the tenant; a value that disagrees with the token claim
    /// rejects the request.
    pub async fn resolve(
        &self,
        principal: Option<&Principal>,
        header: Option<&str>,
    ) -> Result<TenantContext> {
        let result = self.resolve_inner(principal, header).await;

        if let Err(err) = &result {
            // Internal reason is logged; callers only ever see the uniform rejection
            tracing::warn!(
                subject = principal.map_or("<anonymous>", |p| p.subject.as_str()),
                reason = %err,
                "Tenant resolution rejected"
            );
        }

        result
    }

    async fn resolve_inner(
        &self,
        principal: Option<&Principal>,
        header: Option<&str>,
    ) -> Result<TenantContext> {
        let principal = principal.ok_or(Error::Unauthenticated)?;
        if principal.subject.trim().is_empty() {
            return Err(Error::Unauthenticated);
        }

        let claim = principal
            .tenant_id
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or(Error::Unauthenticated)?;
        let tenant_id: TenantId = claim.parse()?;

        if let Some(header) = header.map(str::trim).filter(|h| !h.is_empty()) {
            let matches = header
                .parse::<TenantId>()
                .is_ok_and(|header_id| header_id == tenant_id);
            if !matches {
                return Err(Error::TenantHeaderMismatch);
            }
        }

        match self.status(tenant_id).await? {
            TenantStatus::Active => Ok(TenantContext {
                tenant_id,
                actor: principal.subject.clone(),
                roles: principal.roles.clone(),
            }),
            TenantStatus::Suspended => Err(Error::TenantSuspended(tenant_id)),
        }
    }

    async fn status(&self, tenant_id: TenantId) -> Result<TenantStatus> {
        if let Some(status) = self.cache.get(tenant_id) {
            return Ok(status);
        }

        let tenant = self
            .directory
            .find(tenant_id)
            .await?
            .ok_or_else(|| Error::TenantNotFound(tenant_id.to_string()))?;

        self.cache.insert(tenant_id, tenant.status);
        Ok(tenant.status)
    }

    /// Drop a cached status after the tenant's lifecycle changed
    pub fn invalidate(&self, tenant_id: TenantId) {
        self.cache.invalidate(tenant_id);
    }
}
