//! Shared application state

use std::sync::Arc;

use msls_tenancy::{
    Engine, InMemoryTenantDirectory, TenantResolver, TenantStatusCache, TenantStore,
};

use crate::auth::JwtValidator;
use crate::config::Config;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct AppState {
    pub store: TenantStore,
    pub resolver: Arc<TenantResolver>,
    pub directory: InMemoryTenantDirectory,
    pub validator: Arc<JwtValidator>,
    tenant_header: Arc<str>,
}

impl AppState {
    pub fn new(config: &Config, directory: InMemoryTenantDirectory, engine: Engine) -> Result<Self> {
        let validator = JwtValidator::new(config.jwt.clone())?;
        let store = TenantStore::new(engine, config.pool())?
            .with_elevation_policy(config.tenancy.elevation_policy());
        let resolver = TenantResolver::new(
            Arc::new(directory.clone()),
            TenantStatusCache::new(config.tenancy.status_cache_ttl),
        );

        Ok(Self {
            store,
            resolver: Arc::new(resolver),
            directory,
            validator: Arc::new(validator),
            tenant_header: Arc::from(config.tenancy.tenant_header.as_str()),
        })
    }

    /// Lowercase name of the optional tenant cross-check header
    pub fn tenant_header(&self) -> &str {
        &self.tenant_header
    }
}
