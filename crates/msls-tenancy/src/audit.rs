//! Audit trail for tenant-scoped mutations
//!
//! Every insert, update and delete made through a unit of work produces an
//! [`AuditRecord`] in the same transaction as the change itself, so a change
//! without its audit record can never commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::{Row, TENANT_COLUMN, Transaction};
use crate::tenant::TenantId;

/// Append-only table holding audit records
pub const AUDIT_TABLE: &str = "audit_log";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub entity_type: String,
    pub row_id: Uuid,
    pub action: AuditAction,
    pub actor: String,
    pub tenant_id: TenantId,
    pub changes: Vec<FieldChange>,
    /// Written by an elevated session
    pub elevated: bool,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    /// Build a record for a change from `old` to `new`
    ///
    /// The owning tenant is read from whichever row version carries it.
    pub fn for_change(
        entity_type: &str,
        row_id: Uuid,
        action: AuditAction,
        actor: &str,
        elevated: bool,
        old: Option<&Row>,
        new: Option<&Row>,
    ) -> Result<Self> {
        let tenant_id = new
            .or(old)
            .and_then(|row| row.get(TENANT_COLUMN))
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<TenantId>().ok())
            .ok_or_else(|| {
                Error::AuditWriteFailed(format!("{entity_type} {row_id} has no owning tenant"))
            })?;

        Ok(Self {
            id: Uuid::new_v4(),
            entity_type: entity_type.to_string(),
            row_id,
            action,
            actor: actor.to_string(),
            tenant_id,
            changes: diff_rows(old, new),
            elevated,
            recorded_at: Utc::now(),
        })
    }

    pub fn from_row(row: Row) -> Result<Self> {
        serde_json::from_value(Value::Object(row))
            .map_err(|e| Error::InvalidRow(format!("malformed audit record: {e}")))
    }
}

/// Field-level differences between two row versions, sorted by field name
pub fn diff_rows(old: Option<&Row>, new: Option<&Row>) -> Vec<FieldChange> {
    let empty = Row::new();
    let old = old.unwrap_or(&empty);
    let new = new.unwrap_or(&empty);

    let mut fields: Vec<&String> = old.keys().chain(new.keys()).collect();
    fields.sort();
    fields.dedup();

    fields
        .into_iter()
        .filter_map(|field| {
            let before = old.get(field);
            let after = new.get(field);
            (before != after).then(|| FieldChange {
                field: field.clone(),
                old: before.cloned(),
                new: after.cloned(),
            })
        })
        .collect()
}

/// Persists audit records inside the caller's transaction
pub trait AuditWriter: Send + Sync {
    fn write(&self, tx: &mut Transaction<'_>, record: &AuditRecord) -> Result<()>;
}

/// Writes audit records to the append-only [`AUDIT_TABLE`]
#[derive(Debug, Clone, Copy, Default)]
pub struct TableAuditWriter;

impl AuditWriter for TableAuditWriter {
    fn write(&self, tx: &mut Transaction<'_>, record: &AuditRecord) -> Result<()> {
        let row = match serde_json::to_value(record) {
            Ok(Value::Object(row)) => row,
            Ok(_) => return Err(Error::AuditWriteFailed("record is not an object".into())),
            Err(e) => return Err(Error::AuditWriteFailed(e.to_string())),
        };
        tx.insert(AUDIT_TABLE, row).map(|_| ()).map_err(|e| match e {
            Error::CrossTenantViolation { .. } => e,
            other => Error::AuditWriteFailed(other.to_string()),
        })
    }
}
