//! Multi-tenant data isolation for the MSLS school ERP

pub mod audit;
mod cache;
mod directory;
mod elevation;
mod entity;
mod error;
mod pool;
mod resolver;
mod session;
pub mod storage;
mod tenant;

#[cfg(test)]
mod scenarios;

pub use audit::{AUDIT_TABLE, AuditAction, AuditRecord, AuditWriter, FieldChange, TableAuditWriter, diff_rows};
pub use cache::{DEFAULT_STATUS_TTL, TenantStatusCache};
pub use directory::{InMemoryTenantDirectory, TenantDirectory};
pub use elevation::{ElevationPolicy, PLATFORM_ADMIN_ROLE};
pub use entity::ScopedEntity;
pub use error::{Error, ErrorClass, REQUEST_FAILED, RESOLUTION_REJECTED, Result};
pub use pool::{ConnectionManager, Pool, PoolConfig, PooledConnection, create_pool};
pub use resolver::{Principal, TenantContext, TenantResolver};
pub use session::{BoundSession, TenantStore, UnitOfWork};
pub use storage::{Engine, Filter, SessionBinding, TableSpec};
pub use tenant::{Tenant, TenantId, TenantStatus, validate_slug};
