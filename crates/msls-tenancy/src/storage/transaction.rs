//! Write transactions with an undo log

use serde_json::Value;
use tokio::sync::OwnedRwLockWriteGuard;
use uuid::Uuid;

use super::engine::{Connection, Database};
use super::filter::Filter;
use super::policy::{ID_COLUMN, SessionBinding, check_insert, check_update};
use super::{Row, row_id};
use crate::error::{Error, Result};

enum Undo {
    Inserted { table: String, id: Uuid },
    Replaced { table: String, id: Uuid, old: Row },
    Removed { table: String, id: Uuid, old: Row },
}

/// Position in a transaction's undo log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Savepoint(usize);

/// Exclusive write transaction on one connection
///
/// Changes are visible to other connections only after [`commit`](Self::commit).
/// A transaction that is dropped on an error path, a panic, or a cancelled
/// future is rolled back.
pub struct Transaction<'c> {
    conn: &'c mut Connection,
    db: OwnedRwLockWriteGuard<Database>,
    undo: Vec<Undo>,
    finished: bool,
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("connection_id", &self.conn.id())
            .field("pending", &self.undo.len())
            .finish_non_exhaustive()
    }
}

impl<'c> Transaction<'c> {
    pub(crate) fn new(conn: &'c mut Connection, db: OwnedRwLockWriteGuard<Database>) -> Self {
        Self {
            conn,
            db,
            undo: Vec::new(),
            finished: false,
        }
    }

    pub fn binding(&self) -> &SessionBinding {
        self.conn.binding()
    }

    pub fn actor(&self) -> Option<&str> {
        self.conn.actor()
    }

    /// Insert a row, assigning an id when the row carries none
    ///
    /// A missing tenant reference is filled from the bound tenant; a
    /// conflicting one is rejected with [`Error::CrossTenantViolation`].
    pub fn insert(&mut self, table: &str, mut row: Row) -> Result<Row> {
        self.conn.engine().ensure_available()?;
        self.conn.engine().record_statement();

        let id = match row.get(ID_COLUMN) {
            None | Some(Value::Null) => {
                let id = Uuid::new_v4();
                row.insert(ID_COLUMN.to_string(), Value::String(id.to_string()));
                id
            }
            Some(_) => row_id(table, &row)?,
        };

        let binding = self.conn.binding().clone();
        let target = self.db.table_mut(table)?;
        if let Err(e) = check_insert(&target.spec, &mut row, id, &binding) {
            return Err(self.report(e));
        }
        if target.contains(id) {
            return Err(Error::DuplicateKey {
                table: table.to_string(),
                id,
            });
        }

        target.put(id, row.clone());
        self.undo.push(Undo::Inserted {
            table: table.to_string(),
            id,
        });
        self.conn.engine().record_write();
        Ok(row)
    }

    /// Merge `changes` into a visible row and return `(old, new)`
    pub fn update(&mut self, table: &str, id: Uuid, changes: Row) -> Result<(Row, Row)> {
        self.conn.engine().ensure_available()?;
        self.conn.engine().record_statement();

        let binding = self.conn.binding().clone();
        let target = self.db.table_mut(table)?;
        if target.spec.append_only {
            return Err(Error::AppendOnly(table.to_string()));
        }
        let old = target
            .find_visible(&binding, id)
            .cloned()
            .ok_or_else(|| Error::NotFound {
                entity: table.to_string(),
                id,
            })?;

        if let Some(new_id) = changes.get(ID_COLUMN)
            && new_id.as_str() != Some(id.to_string().as_str())
        {
            return Err(Error::InvalidRow(format!("{ID_COLUMN} of {table} rows is immutable")));
        }

        let mut new = old.clone();
        new.extend(changes);
        if let Err(e) = check_update(&target.spec, &old, &mut new, id, &binding) {
            return Err(self.report(e));
        }

        target.put(id, new.clone());
        self.undo.push(Undo::Replaced {
            table: table.to_string(),
            id,
            old: old.clone(),
        });
        self.conn.engine().record_write();
        Ok((old, new))
    }

    /// Delete a visible row and return it
    pub fn delete(&mut self, table: &str, id: Uuid) -> Result<Row> {
        self.conn.engine().ensure_available()?;
        self.conn.engine().record_statement();

        let binding = self.conn.binding().clone();
        let target = self.db.table_mut(table)?;
        if target.spec.append_only {
            return Err(Error::AppendOnly(table.to_string()));
        }
        if target.find_visible(&binding, id).is_none() {
            return Err(Error::NotFound {
                entity: table.to_string(),
                id,
            });
        }

        let old = target.remove(id).ok_or_else(|| Error::NotFound {
            entity: table.to_string(),
            id,
        })?;
        self.undo.push(Undo::Removed {
            table: table.to_string(),
            id,
            old: old.clone(),
        });
        self.conn.engine().record_write();
        Ok(old)
    }

    /// Read through the transaction, including its own uncommitted writes
    pub fn find(&self, table: &str, id: Uuid) -> Result<Option<Row>> {
        self.conn.engine().record_statement();
        Ok(self
            .db
            .table(table)?
            .find_visible(self.conn.binding(), id)
            .cloned())
    }

    pub fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>> {
        self.conn.engine().record_statement();
        Ok(self.db.table(table)?.select(self.conn.binding(), filter))
    }

    #[must_use]
    pub fn savepoint(&self) -> Savepoint {
        Savepoint(self.undo.len())
    }

    /// Undo every write made after `savepoint`
    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        while self.undo.len() > savepoint.0 {
            if let Some(entry) = self.undo.pop() {
                self.apply(entry);
            }
        }
    }

    pub fn commit(mut self) {
        self.finished = true;
        self.conn.engine().record_commit();
        tracing::debug!(
            connection_id = self.conn.id(),
            writes = self.undo.len(),
            "Transaction committed"
        );
    }

    pub fn rollback(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        self.rollback_to(Savepoint(0));
        self.finished = true;
        self.conn.engine().record_rollback();
        tracing::debug!(connection_id = self.conn.id(), "Transaction rolled back");
    }

    fn apply(&mut self, entry: Undo) {
        match entry {
            Undo::Inserted { table, id } => {
                if let Ok(t) = self.db.table_mut(&table) {
                    t.remove(id);
                }
            }
            Undo::Replaced { table, id, old } | Undo::Removed { table, id, old } => {
                if let Ok(t) = self.db.table_mut(&table) {
                    t.remove(id);
                    t.put(id, old);
                }
            }
        }
    }

    /// Log and count a cross-tenant write before returning it
    pub(crate) fn report(&self, err: Error) -> Error {
        if let Error::CrossTenantViolation { table, row_id } = &err {
            self.conn.engine().record_violation();
            tracing::error!(
                connection_id = self.conn.id(),
                actor = self.conn.actor().unwrap_or("unknown"),
                bound_tenant = ?self.conn.binding().tenant(),
                table = %table,
                row_id = ?row_id,
                "Cross-tenant write rejected"
            );
        }
        err
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.abort();
        }
    }
}
