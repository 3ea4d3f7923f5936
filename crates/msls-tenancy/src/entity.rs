use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::Row;
use crate::tenant::TenantId;

/// A typed record stored in a tenant-scoped table
///
/// Implementors serialize to a JSON object with an `id` and a `tenant_id`
/// field. Leaving `tenant_id` empty lets the storage layer fill it from the
/// bound session; naming a different tenant than the bound one is rejected
/// before the row reaches storage.
pub trait ScopedEntity: Serialize + DeserializeOwned + Send + Sync {
    const TABLE: &'static str;

    fn id(&self) -> Uuid;

    fn tenant_id(&self) -> Option<TenantId>;
}

pub(crate) fn to_row<E: ScopedEntity>(entity: &E) -> Result<Row> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(_) => Err(Error::InvalidRow(format!(
            "{} entity must serialize to an object",
            E::TABLE
        ))),
        Err(e) => Err(Error::InvalidRow(e.to_string())),
    }
}

pub(crate) fn from_row<E: ScopedEntity>(row: Row) -> Result<E> {
    serde_json::from_value(Value::Object(row))
        .map_err(|e| Error::InvalidRow(format!("malformed {} row: {e}", E::TABLE)))
}
