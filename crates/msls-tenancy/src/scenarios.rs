//! End-to-end isolation tests across resolver, session and storage

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Map;
use uuid::Uuid;

use crate::audit::{AuditAction, AuditRecord, AuditWriter, TableAuditWriter};
use crate::cache::TenantStatusCache;
use crate::directory::InMemoryTenantDirectory;
use crate::elevation::{ElevationPolicy, PLATFORM_ADMIN_ROLE};
use crate::entity::ScopedEntity;
use crate::error::{Error, Result};
use crate::pool::PoolConfig;
use crate::resolver::{Principal, TenantContext, TenantResolver};
use crate::session::TenantStore;
use crate::storage::{Engine, Filter, SessionBinding, TableSpec, Transaction};
use crate::tenant::{TenantId, TenantStatus};

const TENANT_A: Uuid = Uuid::from_u128(0x1111_1111_1111_1111_1111_1111_1111_1111);
const TENANT_B: Uuid = Uuid::from_u128(0x2222_2222_2222_2222_2222_2222_2222_2222);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Student {
    id: Uuid,
    tenant_id: Option<TenantId>,
    name: String,
    grade: u8,
}

impl Student {
    fn new(name: &str, grade: u8) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: None,
            name: name.to_string(),
            grade,
        }
    }
}

impl ScopedEntity for Student {
    const TABLE: &'static str = "students";

    fn id(&self) -> Uuid {
        self.id
    }

    fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }
}

struct FailingAuditWriter;

impl AuditWriter for FailingAuditWriter {
    fn write(&self, _: &mut Transaction<'_>, _: &AuditRecord) -> Result<()> {
        Err(Error::AuditWriteFailed("injected fault".into()))
    }
}

/// Persists the record, then fails
struct LateFailingAuditWriter;

impl AuditWriter for LateFailingAuditWriter {
    fn write(&self, tx: &mut Transaction<'_>, record: &AuditRecord) -> Result<()> {
        TableAuditWriter.write(tx, record)?;
        Err(Error::AuditWriteFailed("injected fault after write".into()))
    }
}

struct Fixture {
    directory: InMemoryTenantDirectory,
    resolver: TenantResolver,
    store: TenantStore,
    a: TenantId,
    b: TenantId,
}

fn fixture(max_size: usize) -> Fixture {
    let directory = InMemoryTenantDirectory::new();
    let a = directory
        .provision_with_id(TenantId::from_uuid(TENANT_A), "Tenant A", "tenant-a", Map::new())
        .unwrap()
        .id;
    let b = directory
        .provision_with_id(TenantId::from_uuid(TENANT_B), "Tenant B", "tenant-b", Map::new())
        .unwrap()
        .id;
    let resolver = TenantResolver::new(Arc::new(directory.clone()), TenantStatusCache::default());

    let engine = Engine::builder()
        .table(TableSpec::tenant_scoped(Student::TABLE))
        .build();
    let store = TenantStore::new(
        engine,
        PoolConfig {
            max_size,
            wait_timeout: Duration::from_secs(10),
        },
    )
    .unwrap()
    .with_elevation_policy(ElevationPolicy::default());

    Fixture {
        directory,
        resolver,
        store,
        a,
        b,
    }
}

fn ctx(tenant: TenantId, actor: &str) -> TenantContext {
    TenantContext::new(tenant, actor)
}

fn admin() -> Principal {
    Principal::new("platform-ops").with_roles(vec![PLATFORM_ADMIN_ROLE.into()])
}

async fn seed(store: &TenantStore, tenant: TenantId, names: &[&str]) -> Vec<Student> {
    let mut session = store.bind(&ctx(tenant, "seeder")).await.unwrap();
    let mut uow = session.begin().await.unwrap();
    let stored = names
        .iter()
        .map(|name| uow.insert(&Student::new(name, 5)).unwrap())
        .collect();
    uow.commit().unwrap();
    stored
}

async fn total_students(store: &TenantStore) -> usize {
    let session = store.elevate(&admin(), "test inspection").await.unwrap();
    session.count::<Student>(&Filter::all()).await.unwrap()
}

#[tokio::test]
async fn test_isolation_read_update_delete() {
    let f = fixture(4);
    let s1 = seed(&f.store, f.a, &["Ada"]).await.remove(0);

    let mut session_b = f.store.bind(&ctx(f.b, "user-b")).await.unwrap();
    assert!(session_b.find::<Student>(s1.id).await.unwrap().is_none());
    assert!(session_b.list::<Student>(&Filter::all()).await.unwrap().is_empty());
    // Filtering on the other tenant explicitly does not widen visibility
    let foreign = Filter::all().eq("tenant_id", f.a.to_string());
    assert_eq!(session_b.count::<Student>(&foreign).await.unwrap(), 0);

    let mut uow = session_b.begin().await.unwrap();
    let mut tampered = s1.clone();
    tampered.name = "Mallory".into();
    assert!(matches!(uow.update(&tampered), Err(Error::NotFound { .. })));
    assert!(matches!(
        uow.delete::<Student>(s1.id),
        Err(Error::NotFound { .. })
    ));
    uow.commit().unwrap();
    drop(session_b);

    let session_a = f.store.bind(&ctx(f.a, "user-a")).await.unwrap();
    let unchanged: Student = session_a.get(s1.id).await.unwrap();
    assert_eq!(unchanged, s1);
}

#[tokio::test]
async fn test_fail_closed_without_binding() {
    let f = fixture(2);
    seed(&f.store, f.a, &["Ada", "Bo"]).await;

    let unbound = f.store.engine().connect().unwrap();
    assert!(unbound
        .select(Student::TABLE, &Filter::all())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(unbound.count(Student::TABLE, &Filter::all()).await.unwrap(), 0);
    assert_eq!(unbound.count(crate::AUDIT_TABLE, &Filter::all()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_sequential_requests_share_connection_without_leaking() {
    let f = fixture(1);
    seed(&f.store, f.a, &["Ada"]).await;
    seed(&f.store, f.b, &["Bo", "Cy"]).await;

    let first_conn = {
        let session = f.store.bind(&ctx(f.a, "user-a")).await.unwrap();
        let rows: Vec<Student> = session.list(&Filter::all()).await.unwrap();
        assert_eq!(rows.len(), 1);
        session.connection_id()
    };

    let session = f.store.bind(&ctx(f.b, "user-b")).await.unwrap();
    assert_eq!(session.connection_id(), first_conn);
    let rows: Vec<Student> = session.list(&Filter::all()).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|s| s.tenant_id == Some(f.b)));
}

#[tokio::test]
async fn test_binding_cleared_after_business_error() {
    async fn failing_request(store: &TenantStore, tenant: TenantId) -> Result<()> {
        let mut session = store.bind(&ctx(tenant, "user-a")).await?;
        let mut uow = session.begin().await?;
        uow.insert(&Student::new("Ada", 5))?;
        uow.delete::<Student>(Uuid::new_v4())?;
        uow.commit()
    }

    let f = fixture(1);
    let result = failing_request(&f.store, f.a).await;
    assert!(matches!(result, Err(Error::NotFound { .. })));

    // Pool of one: the next session reuses the same connection
    let session = f.store.bind(&ctx(f.b, "user-b")).await.unwrap();
    assert_eq!(session.tenant_id(), Some(f.b));
    drop(session);
    assert_eq!(total_students(&f.store).await, 0);
}

#[tokio::test]
async fn test_binding_cleared_after_panic() {
    let f = fixture(1);
    seed(&f.store, f.a, &["Ada"]).await;

    let store = f.store.clone();
    let a = f.a;
    let handle = tokio::spawn(async move {
        let _session = store.bind(&ctx(a, "user-a")).await.unwrap();
        panic!("handler bug");
    });
    assert!(handle.await.unwrap_err().is_panic());

    let session = f.store.bind(&ctx(f.b, "user-b")).await.unwrap();
    assert!(session.list::<Student>(&Filter::all()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_unit_of_work_rolls_back() {
    let f = fixture(1);
    let a = f.a;
    let store = f.store.clone();

    let request = async move {
        let mut session = store.bind(&ctx(a, "user-a")).await.unwrap();
        let mut uow = session.begin().await.unwrap();
        uow.insert(&Student::new("Ada", 5)).unwrap();
        std::future::pending::<()>().await;
    };
    let timed_out = tokio::time::timeout(Duration::from_millis(50), request).await;
    assert!(timed_out.is_err());

    let session = f.store.bind(&ctx(f.a, "user-a")).await.unwrap();
    assert_eq!(session.count::<Student>(&Filter::all()).await.unwrap(), 0);
    assert!(f.store.engine().stats().rollbacks >= 1);
}

#[tokio::test]
async fn test_mutation_and_audit_commit_together() {
    let f = fixture(2);
    let mut session = f.store.bind(&ctx(f.a, "registrar")).await.unwrap();
    let mut uow = session.begin().await.unwrap();
    let mut student = uow.insert(&Student::new("Ada", 4)).unwrap();
    student.grade = 5;
    uow.update(&student).unwrap();
    uow.commit().unwrap();

    let history = session.history(Student::TABLE, student.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].action, AuditAction::Insert);
    assert_eq!(history[1].action, AuditAction::Update);
    assert!(history.iter().all(|r| r.actor == "registrar"));
    assert!(history.iter().all(|r| r.tenant_id == f.a && !r.elevated));
    let grade = history[1]
        .changes
        .iter()
        .find(|c| c.field == "grade")
        .unwrap();
    assert_eq!(grade.old, Some(serde_json::json!(4)));
    assert_eq!(grade.new, Some(serde_json::json!(5)));
}

#[tokio::test]
async fn test_history_is_tenant_scoped() {
    let f = fixture(2);
    let s1 = seed(&f.store, f.a, &["Ada"]).await.remove(0);

    let session_b = f.store.bind(&ctx(f.b, "user-b")).await.unwrap();
    assert!(session_b.history(Student::TABLE, s1.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_audit_log_is_append_only() {
    let f = fixture(2);
    let s1 = seed(&f.store, f.a, &["Ada"]).await.remove(0);

    let session = f.store.bind(&ctx(f.a, "user-a")).await.unwrap();
    let record_id = session.history(Student::TABLE, s1.id).await.unwrap()[0].id;

    let mut conn = f.store.engine().connect().unwrap();
    conn.bind(SessionBinding::Tenant(f.a), "user-a").unwrap();
    let mut tx = conn.begin().await.unwrap();
    assert!(matches!(
        tx.delete(crate::AUDIT_TABLE, record_id),
        Err(Error::AppendOnly(_))
    ));
    let mut changes = Map::new();
    changes.insert("actor".into(), "someone-else".into());
    assert!(matches!(
        tx.update(crate::AUDIT_TABLE, record_id, changes),
        Err(Error::AppendOnly(_))
    ));
}

#[tokio::test]
async fn test_resolution_is_idempotent() {
    let f = fixture(1);
    let principal = Principal::new("staff-1").with_tenant(TENANT_A.to_string());
    let first = f.resolver.resolve(Some(&principal), None).await.unwrap();
    let second = f.resolver.resolve(Some(&principal), None).await.unwrap();
    assert_eq!(first.tenant_id, second.tenant_id);
    assert_eq!(first.tenant_id, f.a);
}

#[tokio::test]
async fn test_suspended_tenant_cannot_reach_storage() {
    let f = fixture(1);
    f.directory.set_status(f.b, TenantStatus::Suspended).unwrap();
    f.resolver.invalidate(f.b);

    let principal = Principal::new("user-b").with_tenant(f.b.to_string());
    let err = f.resolver.resolve(Some(&principal), None).await.unwrap_err();
    assert!(err.is_resolution());
    assert_eq!(err.public_message(), crate::RESOLUTION_REJECTED);
}

#[tokio::test]
async fn test_closed_storage_fails_binding() {
    let f = fixture(1);
    f.store.engine().close();
    let result = f.store.bind(&ctx(f.a, "user-a")).await;
    assert!(matches!(result, Err(Error::BindingFailed(_))));
}

#[tokio::test]
async fn test_elevated_session_spans_tenants_and_is_audited() {
    let f = fixture(2);
    seed(&f.store, f.a, &["Ada"]).await;
    let s_b = seed(&f.store, f.b, &["Bo"]).await.remove(0);

    let mut session = f.store.elevate(&admin(), "grade correction").await.unwrap();
    assert!(session.is_elevated());
    assert_eq!(session.tenant_id(), None);
    assert_eq!(session.count::<Student>(&Filter::all()).await.unwrap(), 2);

    let mut uow = session.begin().await.unwrap();
    // Elevated writes must name their tenant
    assert!(matches!(
        uow.insert(&Student::new("Nobody", 1)),
        Err(Error::InvalidRow(_))
    ));
    let mut corrected = s_b.clone();
    corrected.grade = 6;
    corrected.tenant_id = None;
    let updated = uow.update(&corrected).unwrap();
    uow.commit().unwrap();
    assert_eq!(updated.tenant_id, Some(f.b));

    let history = session.history(Student::TABLE, s_b.id).await.unwrap();
    let last = history.last().unwrap();
    assert!(last.elevated);
    assert_eq!(last.actor, "platform-ops");
    assert_eq!(last.tenant_id, f.b);
}

#[tokio::test]
async fn test_elevation_denied_for_ordinary_principal() {
    let f = fixture(1);
    let staff = Principal::new("staff-1")
        .with_tenant(TENANT_A.to_string())
        .with_roles(vec!["staff".into()]);
    let result = f.store.elevate(&staff, "curious").await;
    assert!(matches!(result, Err(Error::ElevationDenied(_))));
}

#[tokio::test]
async fn test_elevation_grants_are_counted() {
    let f = fixture(1);
    f.store.authorize_elevation(&admin(), "list tenants").unwrap();
    assert_eq!(f.store.engine().stats().elevations_granted, 1);

    let staff = Principal::new("staff-1").with_roles(vec!["staff".into()]);
    assert!(f.store.authorize_elevation(&staff, "list tenants").is_err());
    assert_eq!(f.store.engine().stats().elevations_granted, 1);

    let session = f.store.elevate(&admin(), "report").await.unwrap();
    assert!(session.is_elevated());
    assert_eq!(f.store.engine().stats().elevations_granted, 2);
}

// Scenario: a tenant-B request asks for a tenant-A student by id.
#[tokio::test]
async fn test_cross_tenant_get_is_not_found() {
    let f = fixture(2);
    let s1 = seed(&f.store, f.a, &["Ada Lovelace"]).await.remove(0);

    let session_b = f.store.bind(&ctx(f.b, "user-b")).await.unwrap();
    let err = session_b.get::<Student>(s1.id).await.unwrap_err();
    assert!(err.is_not_found());
    let message = err.public_message();
    assert!(!message.contains("Ada"));
    assert!(!message.contains(&f.a.to_string()));
}

// Scenario: no token, no storage call.
#[tokio::test]
async fn test_unauthenticated_request_makes_no_storage_call() {
    let f = fixture(1);
    let before = f.store.engine().stats();

    let err = f.resolver.resolve(None, None).await.unwrap_err();
    assert!(matches!(err, Error::Unauthenticated));
    assert_eq!(f.store.engine().stats(), before);
}

// Scenario: 100 concurrent workers alternate tenants over a pool of 10.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_never_observe_foreign_rows() {
    const WORKERS: usize = 100;
    const REQUESTS_PER_WORKER: usize = 100;

    let f = fixture(10);
    seed(&f.store, f.a, &["A1", "A2", "A3"]).await;
    seed(&f.store, f.b, &["B1", "B2"]).await;

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let store = f.store.clone();
            let resolver = f.resolver.clone();
            let (a, b) = (f.a, f.b);
            tokio::spawn(async move {
                let mut foreign = 0usize;
                let mut served = 0usize;
                for i in 0..REQUESTS_PER_WORKER {
                    let tenant = if (worker + i) % 2 == 0 { a } else { b };
                    let principal =
                        Principal::new(format!("worker-{worker}")).with_tenant(tenant.to_string());
                    let context = resolver.resolve(Some(&principal), None).await.unwrap();
                    let session = store.bind(&context).await.unwrap();
                    let rows: Vec<Student> = session.list(&Filter::all()).await.unwrap();
                    let expected = if tenant == a { 3 } else { 2 };
                    assert_eq!(rows.len(), expected);
                    foreign += rows.iter().filter(|s| s.tenant_id != Some(tenant)).count();
                    served += 1;
                }
                (served, foreign)
            })
        })
        .collect();

    let results = futures::future::join_all(handles).await;
    let (served, foreign) = results
        .into_iter()
        .map(|r| r.unwrap())
        .fold((0, 0), |(s, x), (served, foreign)| (s + served, x + foreign));

    assert_eq!(served, WORKERS * REQUESTS_PER_WORKER);
    assert_eq!(foreign, 0);
    assert_eq!(f.store.pool_status().max_size, 10);
}

// Scenario: session bound to B inserts a row claiming tenant A.
#[tokio::test]
async fn test_insert_for_other_tenant_is_violation() {
    let f = fixture(2);
    let mut session_b = f.store.bind(&ctx(f.b, "user-b")).await.unwrap();
    let mut uow = session_b.begin().await.unwrap();

    let mut forged = Student::new("Forged", 3);
    forged.tenant_id = Some(f.a);
    let statements = f.store.engine().stats().statements;
    let err = uow.insert(&forged).unwrap_err();
    assert!(err.is_cross_tenant());
    // Rejected from the entity's tenant reference, no statement issued
    assert_eq!(f.store.engine().stats().statements, statements);
    uow.commit().unwrap();
    drop(session_b);

    assert_eq!(total_students(&f.store).await, 0);
    assert_eq!(f.store.engine().stats().policy_violations, 1);
    let session_a = f.store.bind(&ctx(f.a, "user-a")).await.unwrap();
    assert!(session_a.history(Student::TABLE, forged.id).await.unwrap().is_empty());
}

// Scenario: the audit write fails after the mutation succeeded.
#[tokio::test]
async fn test_audit_failure_rolls_back_insert() {
    let f = fixture(2);
    let faulty = f.store.clone().with_audit_writer(Arc::new(FailingAuditWriter));

    let mut session = faulty.bind(&ctx(f.a, "user-a")).await.unwrap();
    let mut uow = session.begin().await.unwrap();
    let err = uow.insert(&Student::new("Ada", 5)).unwrap_err();
    assert!(err.is_audit());
    // Further writes and the commit are refused
    assert!(uow.insert(&Student::new("Bo", 5)).unwrap_err().is_audit());
    assert!(uow.commit().unwrap_err().is_audit());
    drop(session);

    assert_eq!(total_students(&f.store).await, 0);
}

#[tokio::test]
async fn test_audit_failure_restores_updated_row() {
    let f = fixture(2);
    let original = seed(&f.store, f.a, &["Ada"]).await.remove(0);
    let faulty = f
        .store
        .clone()
        .with_audit_writer(Arc::new(LateFailingAuditWriter));

    let mut session = faulty.bind(&ctx(f.a, "user-a")).await.unwrap();
    let history_before = session.history(Student::TABLE, original.id).await.unwrap();
    {
        let mut uow = session.begin().await.unwrap();
        let mut changed = original.clone();
        changed.grade = 9;
        assert!(uow.update(&changed).unwrap_err().is_audit());
        assert!(uow.commit().is_err());
    }

    let current: Student = session.get(original.id).await.unwrap();
    assert_eq!(current, original);
    let history_after = session.history(Student::TABLE, original.id).await.unwrap();
    assert_eq!(history_after, history_before);
}

#[tokio::test]
async fn test_audit_failure_restores_deleted_row() {
    let f = fixture(2);
    let original = seed(&f.store, f.a, &["Ada"]).await.remove(0);
    let faulty = f
        .store
        .clone()
        .with_audit_writer(Arc::new(LateFailingAuditWriter));

    let mut session = faulty.bind(&ctx(f.a, "user-a")).await.unwrap();
    let history_before = session.history(Student::TABLE, original.id).await.unwrap();
    {
        let mut uow = session.begin().await.unwrap();
        assert!(uow.delete::<Student>(original.id).unwrap_err().is_audit());
        assert!(uow.find::<Student>(original.id).unwrap().is_some());
        assert!(uow.commit().is_err());
    }

    let current: Student = session.get(original.id).await.unwrap();
    assert_eq!(current, original);
    let history_after = session.history(Student::TABLE, original.id).await.unwrap();
    assert_eq!(history_after, history_before);
    drop(session);
    assert_eq!(total_students(&f.store).await, 1);
}

#[tokio::test]
async fn test_unit_of_work_list_sees_own_writes() {
    let f = fixture(2);
    seed(&f.store, f.b, &["Bo"]).await;

    let mut session = f.store.bind(&ctx(f.a, "user-a")).await.unwrap();
    let mut uow = session.begin().await.unwrap();
    assert!(uow.list::<Student>(&Filter::all()).unwrap().is_empty());
    uow.insert(&Student::new("Ada", 5)).unwrap();

    let rows: Vec<Student> = uow.list(&Filter::all().eq("name", "Ada")).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].tenant_id, Some(f.a));
    uow.rollback();
}
