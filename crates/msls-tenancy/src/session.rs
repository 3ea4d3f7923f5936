//! Tenant-bound sessions and units of work
//!
//! A [`BoundSession`] owns a pooled connection for exactly one unit of work.
//! The binding is installed when the session is created and cleared in
//! `Drop`, before the connection is handed back to the pool, on every exit
//! path including panics and cancelled futures.

use std::sync::Arc;

use uuid::Uuid;

use crate::audit::{AUDIT_TABLE, AuditAction, AuditRecord, AuditWriter, TableAuditWriter};
use crate::elevation::ElevationPolicy;
use crate::entity::{ScopedEntity, from_row, to_row};
use crate::error::{Error, Result};
use crate::pool::{Pool, PoolConfig, PooledConnection, create_pool};
use crate::resolver::{Principal, TenantContext};
use crate::storage::{Engine, Filter, Row, Savepoint, SessionBinding, Transaction, row_id};
use crate::tenant::TenantId;

/// Entry point for scoped data access
#[derive(Clone)]
pub struct TenantStore {
    engine: Engine,
    pool: Pool,
    audit: Arc<dyn AuditWriter>,
    elevation: ElevationPolicy,
}

impl std::fmt::Debug for TenantStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantStore")
            .field("engine", &self.engine)
            .field("pool", &self.pool.status())
            .field("elevation", &self.elevation)
            .finish_non_exhaustive()
    }
}

impl TenantStore {
    pub fn new(engine: Engine, pool_config: PoolConfig) -> Result<Self> {
        let pool = create_pool(engine.clone(), pool_config)?;
        Ok(Self {
            engine,
            pool,
            audit: Arc::new(TableAuditWriter),
            elevation: ElevationPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_audit_writer(mut self, writer: Arc<dyn AuditWriter>) -> Self {
        self.audit = writer;
        self
    }

    #[must_use]
    pub fn with_elevation_policy(mut self, policy: ElevationPolicy) -> Self {
        self.elevation = policy;
        self
    }

    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn pool_status(&self) -> deadpool::managed::Status {
        self.pool.status()
    }

    async fn checkout(&self) -> Result<PooledConnection> {
        self.pool.get().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to acquire storage connection");
            Error::BindingFailed(format!("connection unavailable: {e}"))
        })
    }

    /// Bind `context` to a pooled connection for one unit of work
    ///
    /// Any error is fatal to the unit of work; there is no unscoped fallback.
    pub async fn bind(&self, context: &TenantContext) -> Result<BoundSession> {
        let mut conn = self.checkout().await?;
        conn.bind(SessionBinding::Tenant(context.tenant_id), &context.actor)
            .inspect_err(|e| {
                tracing::error!(tenant_id = %context.tenant_id, error = %e, "Tenant binding refused");
            })?;

        if conn.binding().tenant() != Some(context.tenant_id) {
            conn.reset();
            return Err(Error::BindingFailed(format!(
                "connection {} did not retain tenant {}",
                conn.id(),
                context.tenant_id
            )));
        }

        tracing::debug!(
            connection_id = conn.id(),
            tenant_id = %context.tenant_id,
            actor = %context.actor,
            "Tenant bound to session"
        );
        Ok(BoundSession {
            conn,
            audit: Arc::clone(&self.audit),
        })
    }

    /// Check `principal` against the elevation allowlist
    ///
    /// Platform operations that do not touch tenant-scoped tables use this
    /// directly; [`elevate`](Self::elevate) calls it before binding. Every
    /// grant is logged and counted as a privileged action.
    pub fn authorize_elevation(&self, principal: &Principal, reason: &str) -> Result<()> {
        if let Err(e) = self.elevation.authorize(principal, reason) {
            tracing::warn!(
                actor = %principal.subject,
                reason = %reason,
                "Elevated access denied"
            );
            return Err(e);
        }

        self.engine.record_elevation();
        tracing::warn!(
            actor = %principal.subject,
            reason = %reason,
            "Elevated access granted"
        );
        Ok(())
    }

    /// Open a cross-tenant session for an allowlisted principal
    pub async fn elevate(&self, principal: &Principal, reason: &str) -> Result<BoundSession> {
        self.authorize_elevation(principal, reason)?;

        let mut conn = self.checkout().await?;
        conn.bind(
            SessionBinding::Elevated {
                actor: principal.subject.clone(),
            },
            &principal.subject,
        )?;

        tracing::debug!(
            connection_id = conn.id(),
            actor = %principal.subject,
            "Elevated session bound"
        );
        Ok(BoundSession {
            conn,
            audit: Arc::clone(&self.audit),
        })
    }
}

/// Pre-scoped data access handle for one unit of work
pub struct BoundSession {
    conn: PooledConnection,
    audit: Arc<dyn AuditWriter>,
}

impl std::fmt::Debug for BoundSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundSession")
            .field("connection_id", &self.conn.id())
            .field("binding", self.conn.binding())
            .finish_non_exhaustive()
    }
}

impl BoundSession {
    pub fn tenant_id(&self) -> Option<TenantId> {
        self.conn.binding().tenant()
    }

    pub fn is_elevated(&self) -> bool {
        self.conn.binding().is_elevated()
    }

    pub fn actor(&self) -> &str {
        self.conn.actor().unwrap_or_default()
    }

    pub fn connection_id(&self) -> u64 {
        self.conn.id()
    }

    pub async fn find<E: ScopedEntity>(&self, id: Uuid) -> Result<Option<E>> {
        self.conn
            .find(E::TABLE, id)
            .await?
            .map(from_row)
            .transpose()
    }

    /// Like [`find`](Self::find), but a missing or foreign row is `NotFound`
    pub async fn get<E: ScopedEntity>(&self, id: Uuid) -> Result<E> {
        self.find(id).await?.ok_or_else(|| Error::NotFound {
            entity: E::TABLE.to_string(),
            id,
        })
    }

    pub async fn list<E: ScopedEntity>(&self, filter: &Filter) -> Result<Vec<E>> {
        self.conn
            .select(E::TABLE, filter)
            .await?
            .into_iter()
            .map(from_row)
            .collect()
    }

    pub async fn count<E: ScopedEntity>(&self, filter: &Filter) -> Result<usize> {
        self.conn.count(E::TABLE, filter).await
    }

    /// Audit records for one row, oldest first
    pub async fn history(&self, entity_type: &str, row_id: Uuid) -> Result<Vec<AuditRecord>> {
        let filter = Filter::all()
            .eq("entity_type", entity_type)
            .eq("row_id", row_id.to_string());
        let mut records = self
            .conn
            .select(AUDIT_TABLE, &filter)
            .await?
            .into_iter()
            .map(AuditRecord::from_row)
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|r| r.recorded_at);
        Ok(records)
    }

    /// Start an audited write transaction
    pub async fn begin(&mut self) -> Result<UnitOfWork<'_>> {
        let audit = Arc::clone(&self.audit);
        let actor = self.actor().to_string();
        let elevated = self.is_elevated();
        let tx = self.conn.begin().await?;
        Ok(UnitOfWork {
            tx,
            audit,
            actor,
            elevated,
            poisoned: false,
        })
    }
}

impl Drop for BoundSession {
    fn drop(&mut self) {
        self.conn.reset();
        tracing::trace!(connection_id = self.conn.id(), "Session binding cleared");
    }
}

/// Audited transaction over a bound session
///
/// Each mutation and its audit record are written together. When the audit
/// write fails the mutation is undone and the unit of work refuses to commit.
pub struct UnitOfWork<'s> {
    tx: Transaction<'s>,
    audit: Arc<dyn AuditWriter>,
    actor: String,
    elevated: bool,
    poisoned: bool,
}

impl std::fmt::Debug for UnitOfWork<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("tx", &self.tx)
            .field("actor", &self.actor)
            .field("elevated", &self.elevated)
            .field("poisoned", &self.poisoned)
            .finish_non_exhaustive()
    }
}

impl UnitOfWork<'_> {
    pub fn find<E: ScopedEntity>(&self, id: Uuid) -> Result<Option<E>> {
        self.tx.find(E::TABLE, id)?.map(from_row).transpose()
    }

    /// Rows visible to the bound session, including this unit's own writes
    ///
    /// The unit of work holds the engine's writer lock, so a check made with
    /// this read still holds when the following write commits.
    pub fn list<E: ScopedEntity>(&self, filter: &Filter) -> Result<Vec<E>> {
        self.tx
            .select(E::TABLE, filter)?
            .into_iter()
            .map(from_row)
            .collect()
    }

    pub fn insert<E: ScopedEntity>(&mut self, entity: &E) -> Result<E> {
        self.ensure_usable()?;
        if let (Some(bound), Some(claimed)) = (self.tx.binding().tenant(), entity.tenant_id())
            && bound != claimed
        {
            return Err(self.tx.report(Error::CrossTenantViolation {
                table: E::TABLE.to_string(),
                row_id: Some(entity.id()),
            }));
        }
        let savepoint = self.tx.savepoint();
        let stored = self.tx.insert(E::TABLE, to_row(entity)?)?;
        let id = row_id(E::TABLE, &stored)?;
        self.audit(savepoint, E::TABLE, id, AuditAction::Insert, None, Some(&stored))?;
        from_row(stored)
    }

    /// Replace the stored row with `entity`; the tenant reference cannot change
    pub fn update<E: ScopedEntity>(&mut self, entity: &E) -> Result<E> {
        self.ensure_usable()?;
        let savepoint = self.tx.savepoint();
        let (old, new) = self.tx.update(E::TABLE, entity.id(), to_row(entity)?)?;
        self.audit(
            savepoint,
            E::TABLE,
            entity.id(),
            AuditAction::Update,
            Some(&old),
            Some(&new),
        )?;
        from_row(new)
    }

    pub fn delete<E: ScopedEntity>(&mut self, id: Uuid) -> Result<E> {
        self.ensure_usable()?;
        let savepoint = self.tx.savepoint();
        let old = self.tx.delete(E::TABLE, id)?;
        self.audit(savepoint, E::TABLE, id, AuditAction::Delete, Some(&old), None)?;
        from_row(old)
    }

    pub fn commit(self) -> Result<()> {
        if self.poisoned {
            self.tx.rollback();
            return Err(Error::AuditWriteFailed(
                "unit of work aborted after audit failure".into(),
            ));
        }
        self.tx.commit();
        Ok(())
    }

    pub fn rollback(self) {
        self.tx.rollback();
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.poisoned {
            Err(Error::AuditWriteFailed(
                "unit of work aborted after audit failure".into(),
            ))
        } else {
            Ok(())
        }
    }

    fn audit(
        &mut self,
        savepoint: Savepoint,
        entity_type: &str,
        id: Uuid,
        action: AuditAction,
        old: Option<&Row>,
        new: Option<&Row>,
    ) -> Result<()> {
        let written = AuditRecord::for_change(
            entity_type,
            id,
            action,
            &self.actor,
            self.elevated,
            old,
            new,
        )
        .and_then(|record| self.audit.write(&mut self.tx, &record));

        written.map_err(|e| {
            self.tx.rollback_to(savepoint);
            self.poisoned = true;
            tracing::error!(
                actor = %self.actor,
                entity_type,
                row_id = %id,
                action = %action,
                error = %e,
                "Audit write failed, mutation rolled back"
            );
            match e {
                Error::AuditWriteFailed(_) => e,
                other => Error::AuditWriteFailed(other.to_string()),
            }
        })
    }
}
