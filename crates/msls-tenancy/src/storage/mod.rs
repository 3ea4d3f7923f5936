//! Policy-enforced storage
//!
//! Every table registered with a [`RowPolicy::TenantIsolation`] policy is
//! filtered by the engine itself against the binding installed on the
//! connection, so a statement that forgets a tenant predicate still cannot
//! reach another tenant's rows.

mod ddl;
mod engine;
mod filter;
mod policy;
mod transaction;

pub use ddl::{BIND_TENANT_STATEMENT, ELEVATED_ROLE, TENANT_SETTING, postgres_ddl};
pub use engine::{Connection, Engine, EngineBuilder, EngineStats};
pub use filter::Filter;
pub use policy::{ID_COLUMN, RowPolicy, SessionBinding, TENANT_COLUMN, TableSpec};
pub use transaction::{Savepoint, Transaction};

/// A stored row: a JSON object keyed by column name
pub type Row = serde_json::Map<String, serde_json::Value>;

pub(crate) fn row_id(table: &str, row: &Row) -> crate::Result<uuid::Uuid> {
    row.get(ID_COLUMN)
        .and_then(serde_json::Value::as_str)
        .and_then(|s| uuid::Uuid::parse_str(s).ok())
        .ok_or_else(|| crate::Error::InvalidRow(format!("{table} row has no valid {ID_COLUMN}")))
}
