//! PostgreSQL row-level security DDL for the registered tables
//!
//! The generated statements mirror the in-process policy: a transaction-local
//! `app.current_tenant` setting drives the isolation policy, an unset setting
//! matches nothing, and only the platform role bypasses the filter.

use super::policy::{RowPolicy, TableSpec};
use crate::error::{Error, Result};

/// Session setting carrying the bound tenant id
pub const TENANT_SETTING: &str = "app.current_tenant";

/// Role used by elevated sessions
pub const ELEVATED_ROLE: &str = "msls_platform";

/// Statement that installs the binding for the current transaction only
pub const BIND_TENANT_STATEMENT: &str = "SELECT set_config('app.current_tenant', $1, true)";

fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid_start && valid_rest && name.len() <= 63 {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid SQL identifier: {name}")))
    }
}

/// Emit the DDL enforcing `specs` on a PostgreSQL database
pub fn postgres_ddl(specs: &[TableSpec]) -> Result<Vec<String>> {
    let mut statements = Vec::new();

    for spec in specs {
        validate_identifier(&spec.name)?;
        let table = &spec.name;

        if let RowPolicy::TenantIsolation { column } = &spec.policy {
            validate_identifier(column)?;
            statements.push(format!(
                "ALTER TABLE {table} ALTER COLUMN {column} SET NOT NULL"
            ));
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table} ({column})"
            ));
            statements.push(format!("ALTER TABLE {table} ENABLE ROW LEVEL SECURITY"));
            statements.push(format!("ALTER TABLE {table} FORCE ROW LEVEL SECURITY"));
            statements.push(format!(
                "CREATE POLICY {table}_tenant_isolation ON {table} \
                 USING ({column} = NULLIF(current_setting('{TENANT_SETTING}', true), '')::uuid) \
                 WITH CHECK ({column} = NULLIF(current_setting('{TENANT_SETTING}', true), '')::uuid)"
            ));
            statements.push(format!(
                "CREATE POLICY {table}_platform_access ON {table} TO {ELEVATED_ROLE} \
                 USING (true) WITH CHECK ({column} IS NOT NULL)"
            ));
        }

        if spec.append_only {
            statements.push(format!("REVOKE UPDATE, DELETE ON {table} FROM PUBLIC"));
        }
    }

    Ok(statements)
}
