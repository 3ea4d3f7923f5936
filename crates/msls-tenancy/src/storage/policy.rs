//! Declarative row policies and the session binding they are evaluated against

use serde_json::Value;

use super::Row;
use crate::error::{Error, Result};
use crate::tenant::TenantId;

/// Column carrying the owning tenant on every scoped table
pub const TENANT_COLUMN: &str = "tenant_id";

/// Primary key column
pub const ID_COLUMN: &str = "id";

/// Tenant binding installed on a storage connection
///
/// The default is `Unbound`, which every tenant-isolated table treats as
/// "deny all".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionBinding {
    #[default]
    Unbound,
    Tenant(TenantId),
    /// Explicitly granted cross-tenant session
    Elevated {
        actor: String,
    },
}

impl SessionBinding {
    #[must_use]
    pub const fn is_bound(&self) -> bool {
        !matches!(self, Self::Unbound)
    }

    #[must_use]
    pub const fn is_elevated(&self) -> bool {
        matches!(self, Self::Elevated { .. })
    }

    #[must_use]
    pub const fn tenant(&self) -> Option<TenantId> {
        match self {
            Self::Tenant(id) => Some(*id),
            _ => None,
        }
    }
}

/// Row filtering rule enforced by the engine on every statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowPolicy {
    /// Rows are visible and writable only when `column` equals the bound tenant
    TenantIsolation { column: String },
    /// No row filtering (non-tenant tables only)
    Unrestricted,
}

/// Table definition registered with the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub policy: RowPolicy,
    /// Reject UPDATE and DELETE
    pub append_only: bool,
}

impl TableSpec {
    #[must_use]
    pub fn tenant_scoped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: RowPolicy::TenantIsolation {
                column: TENANT_COLUMN.to_string(),
            },
            append_only: false,
        }
    }

    #[must_use]
    pub fn unrestricted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: RowPolicy::Unrestricted,
            append_only: false,
        }
    }

    #[must_use]
    pub const fn append_only(mut self) -> Self {
        self.append_only = true;
        self
    }

    #[must_use]
    pub fn tenant_column(&self) -> Option<&str> {
        match &self.policy {
            RowPolicy::TenantIsolation { column } => Some(column),
            RowPolicy::Unrestricted => None,
        }
    }
}

/// Read the tenant reference stored in `column`.
///
/// `Ok(None)` means the column is absent or null; a present but malformed
/// value is `Err(())`.
pub(crate) fn row_tenant(row: &Row, column: &str) -> std::result::Result<Option<TenantId>, ()> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => s.parse::<TenantId>().map(Some).map_err(|_| ()),
        Some(_) => Err(()),
    }
}

/// USING clause: may this session see `row`?
pub(crate) fn row_visible(spec: &TableSpec, row: &Row, binding: &SessionBinding) -> bool {
    let Some(column) = spec.tenant_column() else {
        return true;
    };

    match binding {
        SessionBinding::Unbound => false,
        SessionBinding::Elevated { .. } => true,
        SessionBinding::Tenant(bound) => matches!(row_tenant(row, column), Ok(Some(t)) if t == *bound),
    }
}

/// WITH CHECK clause for inserts. Stamps the bound tenant when the row has none.
pub(crate) fn check_insert(
    spec: &TableSpec,
    row: &mut Row,
    row_id: uuid::Uuid,
    binding: &SessionBinding,
) -> Result<()> {
    let Some(column) = spec.tenant_column() else {
        return Ok(());
    };
    let claimed = row_tenant(row, column);

    match binding {
        SessionBinding::Unbound => Err(Error::SessionUnbound),
        SessionBinding::Tenant(bound) => match claimed {
            Ok(None) => {
                row.insert(column.to_string(), Value::String(bound.to_string()));
                Ok(())
            }
            Ok(Some(t)) if t == *bound => Ok(()),
            _ => Err(Error::CrossTenantViolation {
                table: spec.name.clone(),
                row_id: Some(row_id),
            }),
        },
        SessionBinding::Elevated { .. } => match claimed {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(Error::InvalidRow(format!(
                "elevated writes to {} must name a tenant",
                spec.name
            ))),
            Err(()) => Err(Error::InvalidRow(format!(
                "malformed {column} on {}",
                spec.name
            ))),
        },
    }
}

/// WITH CHECK clause for updates. The tenant reference is immutable.
///
/// `old` must already have passed [`row_visible`].
pub(crate) fn check_update(
    spec: &TableSpec,
    old: &Row,
    new: &mut Row,
    row_id: uuid::Uuid,
    binding: &SessionBinding,
) -> Result<()> {
    let Some(column) = spec.tenant_column() else {
        return Ok(());
    };
    if !binding.is_bound() {
        return Err(Error::SessionUnbound);
    }

    let existing = row_tenant(old, column)
        .ok()
        .flatten()
        .ok_or_else(|| Error::InvalidRow(format!("stored row in {} has no tenant", spec.name)))?;

    match row_tenant(new, column) {
        Ok(None) => {
            new.insert(column.to_string(), Value::String(existing.to_string()));
            Ok(())
        }
        Ok(Some(t)) if t == existing => Ok(()),
        _ => Err(Error::CrossTenantViolation {
            table: spec.name.clone(),
            row_id: Some(row_id),
        }),
    }
}
