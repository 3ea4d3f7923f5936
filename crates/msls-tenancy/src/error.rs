use thiserror::Error;
use uuid::Uuid;

use crate::tenant::TenantId;

/// External message shared by every tenant-resolution failure.
///
/// Callers must not be able to tell a missing token from an unknown or
/// suspended tenant.
pub const RESOLUTION_REJECTED: &str = "authentication required";

/// External message for failures that indicate a server-side fault.
pub const REQUEST_FAILED: &str = "request could not be completed";

#[derive(Error, Debug)]
pub enum Error {
    // Resolution errors
    #[error("authentication required")]
    Unauthenticated,

    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("tenant suspended: {0}")]
    TenantSuspended(TenantId),

    #[error("tenant header does not match token claim")]
    TenantHeaderMismatch,

    // Binding errors
    #[error("session binding failed: {0}")]
    BindingFailed(String),

    #[error("no tenant bound to session")]
    SessionUnbound,

    // Storage policy errors
    #[error("cross-tenant write rejected on table {table}")]
    CrossTenantViolation {
        table: String,
        row_id: Option<Uuid>,
    },

    #[error("table {0} is append-only")]
    AppendOnly(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: String, id: Uuid },

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("invalid row: {0}")]
    InvalidRow(String),

    #[error("duplicate key {id} in table {table}")]
    DuplicateKey { table: String, id: Uuid },

    #[error("storage unavailable")]
    StorageUnavailable,

    // Audit errors
    #[error("audit write failed: {0}")]
    AuditWriteFailed(String),

    // Elevation errors
    #[error("elevated session denied for {0}")]
    ElevationDenied(String),

    // Provisioning errors
    #[error("tenant slug already in use: {0}")]
    SlugTaken(String),

    #[error("invalid tenant slug: {0}")]
    InvalidSlug(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error taxonomy used for propagation and response mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Resolution,
    Binding,
    CrossTenant,
    Audit,
    NotFound,
    Denied,
    Invalid,
    Storage,
    Config,
}

impl Error {
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::Unauthenticated
            | Self::TenantNotFound(_)
            | Self::TenantSuspended(_)
            | Self::TenantHeaderMismatch => ErrorClass::Resolution,
            Self::BindingFailed(_) | Self::SessionUnbound => ErrorClass::Binding,
            Self::CrossTenantViolation { .. } => ErrorClass::CrossTenant,
            Self::AuditWriteFailed(_) => ErrorClass::Audit,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::ElevationDenied(_) => ErrorClass::Denied,
            Self::InvalidRow(_)
            | Self::DuplicateKey { .. }
            | Self::SlugTaken(_)
            | Self::InvalidSlug(_) => ErrorClass::Invalid,
            Self::AppendOnly(_) | Self::UnknownTable(_) | Self::StorageUnavailable => {
                ErrorClass::Storage
            }
            Self::Config(_) => ErrorClass::Config,
        }
    }

    #[must_use]
    pub const fn is_resolution(&self) -> bool {
        matches!(self.class(), ErrorClass::Resolution)
    }

    #[must_use]
    pub const fn is_binding(&self) -> bool {
        matches!(self.class(), ErrorClass::Binding)
    }

    #[must_use]
    pub const fn is_cross_tenant(&self) -> bool {
        matches!(self, Self::CrossTenantViolation { .. })
    }

    #[must_use]
    pub const fn is_audit(&self) -> bool {
        matches!(self, Self::AuditWriteFailed(_))
    }

    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Message safe to return to an untrusted caller.
    ///
    /// Resolution failures collapse to one message; storage-side faults
    /// never carry row or tenant details.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self.class() {
            ErrorClass::Resolution => RESOLUTION_REJECTED.to_string(),
            ErrorClass::NotFound => "resource not found".to_string(),
            ErrorClass::Denied => "operation not permitted".to_string(),
            ErrorClass::Invalid => self.to_string(),
            ErrorClass::Binding
            | ErrorClass::CrossTenant
            | ErrorClass::Audit
            | ErrorClass::Storage
            | ErrorClass::Config => REQUEST_FAILED.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
