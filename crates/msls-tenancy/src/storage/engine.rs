//! In-process storage engine and connections

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::sync::RwLock;
use uuid::Uuid;

use super::filter::Filter;
use super::policy::{SessionBinding, TableSpec, row_tenant, row_visible};
use super::transaction::Transaction;
use super::Row;
use crate::audit::AUDIT_TABLE;
use crate::error::{Error, Result};
use crate::tenant::TenantId;

pub(crate) struct Table {
    pub(crate) spec: TableSpec,
    rows: BTreeMap<Uuid, Row>,
    /// Row ids per owning tenant
    tenant_index: HashMap<TenantId, BTreeSet<Uuid>>,
}

impl Table {
    fn new(spec: TableSpec) -> Self {
        Self {
            spec,
            rows: BTreeMap::new(),
            tenant_index: HashMap::new(),
        }
    }

    fn owner(&self, row: &Row) -> Option<TenantId> {
        self.spec
            .tenant_column()
            .and_then(|column| row_tenant(row, column).ok().flatten())
    }

    /// Rows the binding may see, narrowed through the tenant index when possible
    fn visible<'a>(&'a self, binding: &SessionBinding) -> Vec<&'a Row> {
        let candidates: Vec<&Row> = match (self.spec.tenant_column(), binding) {
            (Some(_), SessionBinding::Unbound) => Vec::new(),
            (Some(_), SessionBinding::Tenant(tenant)) => self
                .tenant_index
                .get(tenant)
                .map(|ids| ids.iter().filter_map(|id| self.rows.get(id)).collect())
                .unwrap_or_default(),
            _ => self.rows.values().collect(),
        };

        candidates
            .into_iter()
            .filter(|row| row_visible(&self.spec, row, binding))
            .collect()
    }

    pub(crate) fn select(&self, binding: &SessionBinding, filter: &Filter) -> Vec<Row> {
        self.visible(binding)
            .into_iter()
            .filter(|row| filter.matches(row))
            .cloned()
            .collect()
    }

    pub(crate) fn find_visible(&self, binding: &SessionBinding, id: Uuid) -> Option<&Row> {
        self.rows
            .get(&id)
            .filter(|row| row_visible(&self.spec, row, binding))
    }

    pub(crate) fn contains(&self, id: Uuid) -> bool {
        self.rows.contains_key(&id)
    }

    pub(crate) fn put(&mut self, id: Uuid, row: Row) -> Option<Row> {
        if let Some(owner) = self.owner(&row) {
            self.tenant_index.entry(owner).or_default().insert(id);
        }
        self.rows.insert(id, row)
    }

    pub(crate) fn remove(&mut self, id: Uuid) -> Option<Row> {
        let removed = self.rows.remove(&id)?;
        if let Some(owner) = self.owner(&removed)
            && let Some(ids) = self.tenant_index.get_mut(&owner)
        {
            ids.remove(&id);
            if ids.is_empty() {
                self.tenant_index.remove(&owner);
            }
        }
        Some(removed)
    }
}

pub(crate) struct Database {
    tables: HashMap<String, Table>,
}

impl Database {
    pub(crate) fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    pub(crate) fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }
}

#[derive(Default)]
struct Counters {
    statements: AtomicU64,
    rows_written: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
    policy_violations: AtomicU64,
    elevations_granted: AtomicU64,
    connections_opened: AtomicU64,
}

/// Snapshot of engine activity counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineStats {
    pub statements: u64,
    pub rows_written: u64,
    pub commits: u64,
    pub rollbacks: u64,
    pub policy_violations: u64,
    pub elevations_granted: u64,
    pub connections_opened: u64,
}

struct EngineInner {
    db: Arc<RwLock<Database>>,
    specs: Vec<TableSpec>,
    available: AtomicBool,
    counters: Counters,
}

/// Storage engine shared by all connections
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("tables", &self.inner.specs.len())
            .field("available", &self.is_available())
            .finish_non_exhaustive()
    }
}

impl Engine {
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn connect(&self) -> Result<Connection> {
        self.ensure_available()?;
        let id = self
            .inner
            .counters
            .connections_opened
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        tracing::debug!(connection_id = id, "Storage connection opened");
        Ok(Connection {
            id,
            engine: self.clone(),
            binding: SessionBinding::Unbound,
            actor: None,
        })
    }

    /// Mark the engine unavailable; new bindings and statements fail
    pub fn close(&self) {
        self.inner.available.store(false, Ordering::SeqCst);
        tracing::warn!("Storage engine closed");
    }

    pub fn reopen(&self) {
        self.inner.available.store(true, Ordering::SeqCst);
        tracing::info!("Storage engine reopened");
    }

    pub fn is_available(&self) -> bool {
        self.inner.available.load(Ordering::SeqCst)
    }

    pub fn table_specs(&self) -> &[TableSpec] {
        &self.inner.specs
    }

    pub fn stats(&self) -> EngineStats {
        let c = &self.inner.counters;
        EngineStats {
            statements: c.statements.load(Ordering::Relaxed),
            rows_written: c.rows_written.load(Ordering::Relaxed),
            commits: c.commits.load(Ordering::Relaxed),
            rollbacks: c.rollbacks.load(Ordering::Relaxed),
            policy_violations: c.policy_violations.load(Ordering::Relaxed),
            elevations_granted: c.elevations_granted.load(Ordering::Relaxed),
            connections_opened: c.connections_opened.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn ensure_available(&self) -> Result<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(Error::StorageUnavailable)
        }
    }

    pub(crate) fn db(&self) -> &Arc<RwLock<Database>> {
        &self.inner.db
    }

    pub(crate) fn record_statement(&self) {
        self.inner.counters.statements.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_write(&self) {
        self.inner
            .counters
            .rows_written
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.inner.counters.commits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.inner.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_violation(&self) {
        self.inner
            .counters
            .policy_violations
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_elevation(&self) {
        self.inner
            .counters
            .elevations_granted
            .fetch_add(1, Ordering::Relaxed);
    }
}

/// Builder registering the tables an engine serves
///
/// The append-only audit table is always registered.
#[derive(Debug, Default)]
pub struct EngineBuilder {
    specs: Vec<TableSpec>,
}

impl EngineBuilder {
    #[must_use]
    pub fn table(mut self, spec: TableSpec) -> Self {
        self.specs.retain(|s| s.name != spec.name);
        self.specs.push(spec);
        self
    }

    #[must_use]
    pub fn build(mut self) -> Engine {
        if !self.specs.iter().any(|s| s.name == AUDIT_TABLE) {
            self.specs
                .push(TableSpec::tenant_scoped(AUDIT_TABLE).append_only());
        }

        let tables = self
            .specs
            .iter()
            .cloned()
            .map(|spec| (spec.name.clone(), Table::new(spec)))
            .collect();

        Engine {
            inner: Arc::new(EngineInner {
                db: Arc::new(RwLock::new(Database { tables })),
                specs: self.specs,
                available: AtomicBool::new(true),
                counters: Counters::default(),
            }),
        }
    }
}

/// One storage connection with its session-local binding
///
/// The binding lives on the connection, never in process-wide state.
pub struct Connection {
    id: u64,
    engine: Engine,
    binding: SessionBinding,
    actor: Option<String>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("binding", &self.binding)
            .finish_non_exhaustive()
    }
}

impl Connection {
    pub const fn id(&self) -> u64 {
        self.id
    }

    pub const fn binding(&self) -> &SessionBinding {
        &self.binding
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Install a binding on this connection
    pub(crate) fn bind(&mut self, binding: SessionBinding, actor: &str) -> Result<()> {
        if !self.engine.is_available() {
            return Err(Error::BindingFailed(format!(
                "connection {} cannot accept a binding: storage unavailable",
                self.id
            )));
        }
        if self.binding.is_bound() {
            return Err(Error::BindingFailed(format!(
                "connection {} already carries a binding",
                self.id
            )));
        }
        self.binding = binding;
        self.actor = Some(actor.to_string());
        Ok(())
    }

    /// Clear the binding (back to deny-all)
    pub(crate) fn reset(&mut self) {
        self.binding = SessionBinding::Unbound;
        self.actor = None;
    }

    pub async fn select(&self, table: &str, filter: &Filter) -> Result<Vec<Row>> {
        self.engine.ensure_available()?;
        self.engine.record_statement();
        let db = self.engine.db().read().await;
        Ok(db.table(table)?.select(&self.binding, filter))
    }

    pub async fn find(&self, table: &str, id: Uuid) -> Result<Option<Row>> {
        self.engine.ensure_available()?;
        self.engine.record_statement();
        let db = self.engine.db().read().await;
        Ok(db.table(table)?.find_visible(&self.binding, id).cloned())
    }

    pub async fn count(&self, table: &str, filter: &Filter) -> Result<usize> {
        self.engine.ensure_available()?;
        self.engine.record_statement();
        let db = self.engine.db().read().await;
        Ok(db
            .table(table)?
            .visible(&self.binding)
            .into_iter()
            .filter(|row| filter.matches(row))
            .count())
    }

    /// Start a write transaction
    ///
    /// Writers are serialized on the engine lock for the lifetime of the
    /// transaction. Dropping the transaction without committing rolls it back.
    pub async fn begin(&mut self) -> Result<Transaction<'_>> {
        self.engine.ensure_available()?;
        let guard = Arc::clone(self.engine.db()).write_owned().await;
        Ok(Transaction::new(self, guard))
    }
}
