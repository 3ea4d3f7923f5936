//! Isolation scenarios exercised over HTTP

use std::time::{SystemTime, UNIX_EPOCH};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use jsonwebtoken::{EncodingKey, Header, encode};
use msls_tenancy::{
    InMemoryTenantDirectory, PLATFORM_ADMIN_ROLE, REQUEST_FAILED, RESOLUTION_REJECTED, TenantId,
};
use serde_json::{Map, Value, json};
use tower::ServiceExt;
use uuid::Uuid;

use crate::config::Config;
use crate::schema::build_engine;
use crate::server::build_app;
use crate::state::AppState;

const SECRET: &str = "test-secret-key-at-least-32-bytes-long";
const TENANT_A: Uuid = Uuid::from_u128(0x1111_1111_1111_1111_1111_1111_1111_1111);
const TENANT_B: Uuid = Uuid::from_u128(0x2222_2222_2222_2222_2222_2222_2222_2222);

struct Harness {
    app: Router,
    state: AppState,
    a: TenantId,
    b: TenantId,
}

fn harness() -> Harness {
    let config = Config::builder()
        .jwt_secret(SECRET.to_string())
        .build()
        .unwrap();
    let directory = InMemoryTenantDirectory::new();
    let a = directory
        .provision_with_id(TenantId::from_uuid(TENANT_A), "Green Valley", "green-valley", Map::new())
        .unwrap()
        .id;
    let b = directory
        .provision_with_id(TenantId::from_uuid(TENANT_B), "Hill Side", "hill-side", Map::new())
        .unwrap()
        .id;
    let state = AppState::new(&config, directory, build_engine()).unwrap();
    let app = build_app(state.clone(), &config.http);
    Harness { app, state, a, b }
}

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

fn token(sub: &str, tenant: Option<TenantId>, roles: &[&str]) -> String {
    let mut claims = json!({
        "sub": sub,
        "exp": now() + 3600,
        "roles": roles,
    });
    if let Some(tenant) = tenant {
        claims["tenant_id"] = json!(tenant.to_string());
    }
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn user(tenant: TenantId) -> String {
    token("staff-1", Some(tenant), &["staff"])
}

fn admin() -> String {
    token("ops", None, &[PLATFORM_ADMIN_ROLE])
}

async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    send_with_headers(app, method, uri, bearer, body, &[]).await
}

async fn send_with_headers(
    app: &Router,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    body: Option<Value>,
    headers: &[(&str, &str)],
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let request = match body {
        Some(json) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

fn student_body(admission: &str, first: &str) -> Value {
    json!({
        "admission_number": admission,
        "first_name": first,
        "last_name": "Rao",
        "grade": 4,
    })
}

async fn create_student(h: &Harness, tenant: TenantId, admission: &str) -> Value {
    let (status, body) = send(
        &h.app,
        Method::POST,
        "/students",
        Some(&user(tenant)),
        Some(student_body(admission, "Asha")),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body
}

#[tokio::test]
async fn test_health_needs_no_token() {
    let h = harness();
    let (status, body) = send(&h.app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_created_student_is_stamped_with_tenant() {
    let h = harness();
    let body = create_student(&h, h.a, "ADM-001").await;
    assert_eq!(body["tenant_id"], h.a.to_string());
    assert_eq!(body["status"], "active");
}

#[tokio::test]
async fn test_cross_tenant_get_is_not_found() {
    let h = harness();
    let created = create_student(&h, h.a, "ADM-001").await;
    let id = created["id"].as_str().unwrap();

    let (status, body) = send(
        &h.app,
        Method::GET,
        &format!("/students/{id}"),
        Some(&user(h.b)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({"error": "resource not found"}));
    assert!(!body.to_string().contains(&h.a.to_string()));

    let (status, list) = send(&h.app, Method::GET, "/students", Some(&user(h.b)), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list, json!([]));

    let (status, _) = send(
        &h.app,
        Method::GET,
        &format!("/students/{id}"),
        Some(&user(h.a)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_cross_tenant_update_and_delete_are_not_found() {
    let h = harness();
    let created = create_student(&h, h.a, "ADM-001").await;
    let id = created["id"].as_str().unwrap();
    let uri = format!("/students/{id}");

    let (status, _) = send(
        &h.app,
        Method::PUT,
        &uri,
        Some(&user(h.b)),
        Some(json!({"first_name": "Mallory"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&h.app, Method::DELETE, &uri, Some(&user(h.b)), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, unchanged) = send(&h.app, Method::GET, &uri, Some(&user(h.a)), None).await;
    assert_eq!(unchanged["first_name"], "Asha");
}

#[tokio::test]
async fn test_resolution_failures_are_uniform() {
    let h = harness();
    let storage_before = h.state.store.engine().stats();

    let expired = {
        let claims = json!({
            "sub": "staff-1",
            "exp": now() - 3600,
            "tenant_id": h.a.to_string(),
        });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    };
    let unknown = token("staff-1", Some(TenantId::new()), &[]);
    let no_tenant = token("staff-1", None, &[]);
    let malformed_tenant = {
        let claims = json!({"sub": "staff-1", "exp": now() + 3600, "tenant_id": "not-a-uuid"});
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    };

    let cases: Vec<Option<&str>> = vec![
        None,
        Some("garbage"),
        Some(expired.as_str()),
        Some(unknown.as_str()),
        Some(no_tenant.as_str()),
        Some(malformed_tenant.as_str()),
    ];

    for bearer in cases {
        let (status, body) = send(&h.app, Method::GET, "/students", bearer, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, json!({"error": RESOLUTION_REJECTED}));
    }

    // No storage statement ran for any rejected request
    assert_eq!(h.state.store.engine().stats(), storage_before);
}

#[tokio::test]
async fn test_suspended_tenant_is_rejected_like_unknown() {
    let h = harness();
    let (status, _) = send(
        &h.app,
        Method::POST,
        &format!("/admin/tenants/{}/suspend", h.a),
        Some(&admin()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&h.app, Method::GET, "/students", Some(&user(h.a)), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": RESOLUTION_REJECTED}));

    let (status, _) = send(
        &h.app,
        Method::POST,
        &format!("/admin/tenants/{}/activate", h.a),
        Some(&admin()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&h.app, Method::GET, "/students", Some(&user(h.a)), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_tenant_header_cannot_override_claim() {
    let h = harness();
    let (status, body) = send_with_headers(
        &h.app,
        Method::GET,
        "/students",
        Some(&user(h.a)),
        None,
        &[("x-tenant-id", h.b.to_string().as_str())],
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": RESOLUTION_REJECTED}));

    let (status, _) = send_with_headers(
        &h.app,
        Method::GET,
        "/students",
        Some(&user(h.a)),
        None,
        &[("x-tenant-id", h.a.to_string().as_str())],
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_student_lifecycle_is_audited() {
    let h = harness();
    let created = create_student(&h, h.a, "ADM-001").await;
    let id = created["id"].as_str().unwrap();
    let uri = format!("/students/{id}");
    let token = user(h.a);

    let (status, updated) = send(
        &h.app,
        Method::PUT,
        &uri,
        Some(&token),
        Some(json!({"grade": 5})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["grade"], 5);
    assert_eq!(updated["first_name"], "Asha");

    let (status, _) = send(&h.app, Method::DELETE, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(&h.app, Method::GET, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, history) = send(
        &h.app,
        Method::GET,
        &format!("{uri}/history"),
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let actions: Vec<&str> = history
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["action"].as_str().unwrap())
        .collect();
    assert_eq!(actions, vec!["insert", "update", "delete"]);
    for record in history.as_array().unwrap() {
        assert_eq!(record["actor"], "staff-1");
        assert_eq!(record["tenant_id"], h.a.to_string());
        assert_eq!(record["elevated"], false);
    }
    let grade_change = history[1]["changes"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["field"] == "grade")
        .cloned()
        .unwrap();
    assert_eq!(grade_change["old"], 4);
    assert_eq!(grade_change["new"], 5);
}

#[tokio::test]
async fn test_history_is_tenant_scoped() {
    let h = harness();
    let created = create_student(&h, h.a, "ADM-001").await;
    let id = created["id"].as_str().unwrap();

    let (status, _) = send(
        &h.app,
        Method::GET,
        &format!("/students/{id}/history"),
        Some(&user(h.b)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admission_numbers_are_unique_per_tenant() {
    let h = harness();
    create_student(&h, h.a, "ADM-001").await;

    let (status, _) = send(
        &h.app,
        Method::POST,
        "/students",
        Some(&user(h.a)),
        Some(student_body("ADM-001", "Ravi")),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Another tenant may reuse the number
    create_student(&h, h.b, "ADM-001").await;
}

#[tokio::test]
async fn test_invalid_student_is_bad_request() {
    let h = harness();
    let (status, body) = send(
        &h.app,
        Method::POST,
        "/students",
        Some(&user(h.a)),
        Some(json!({
            "admission_number": "ADM-009",
            "first_name": "",
            "last_name": "Rao",
            "grade": 4,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "first_name must not be empty");
}

#[tokio::test]
async fn test_list_filters_by_grade() {
    let h = harness();
    create_student(&h, h.a, "ADM-001").await;
    let (status, _) = send(
        &h.app,
        Method::POST,
        "/students",
        Some(&user(h.a)),
        Some(json!({
            "admission_number": "ADM-002",
            "first_name": "Ravi",
            "last_name": "Iyer",
            "grade": 7,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, list) = send(
        &h.app,
        Method::GET,
        "/students?grade=7",
        Some(&user(h.a)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["admission_number"], "ADM-002");
}

#[tokio::test]
async fn test_storage_outage_fails_closed() {
    let h = harness();
    h.state.store.engine().close();

    let (status, body) = send(&h.app, Method::GET, "/students", Some(&user(h.a)), None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": REQUEST_FAILED}));

    let (status, body) = send(&h.app, Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["storage"], false);
}

#[tokio::test]
async fn test_admin_routes_require_elevation() {
    let h = harness();

    let (status, body) = send(&h.app, Method::GET, "/admin/tenants", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"error": RESOLUTION_REJECTED}));

    let (status, _) = send(&h.app, Method::GET, "/admin/tenants", Some(&user(h.a)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &h.app,
        Method::POST,
        &format!("/admin/tenants/{}/suspend", h.b),
        Some(&user(h.a)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(h.state.store.engine().stats().elevations_granted, 0);

    let (status, tenants) = send(&h.app, Method::GET, "/admin/tenants", Some(&admin()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tenants.as_array().unwrap().len(), 2);
    assert_eq!(h.state.store.engine().stats().elevations_granted, 1);
}

#[tokio::test]
async fn test_admin_provisions_tenant() {
    let h = harness();
    let body = json!({"name": "River Park", "slug": "river-park", "settings": {"board": "state"}});

    let (status, tenant) = send(
        &h.app,
        Method::POST,
        "/admin/tenants",
        Some(&admin()),
        Some(body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(tenant["slug"], "river-park");
    assert_eq!(tenant["status"], "active");
    assert_eq!(tenant["settings"]["board"], "state");

    let (status, _) = send(&h.app, Method::POST, "/admin/tenants", Some(&admin()), Some(body)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &h.app,
        Method::POST,
        "/admin/tenants",
        Some(&admin()),
        Some(json!({"name": "Bad", "slug": "Bad Slug"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // A user of the new tenant can start working immediately
    let new_id: TenantId = tenant["id"].as_str().unwrap().parse().unwrap();
    create_student(&h, new_id, "ADM-001").await;
}

#[tokio::test]
async fn test_admin_unknown_tenant_is_not_found() {
    let h = harness();
    let (status, _) = send(
        &h.app,
        Method::POST,
        &format!("/admin/tenants/{}/suspend", Uuid::new_v4()),
        Some(&admin()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_report_spans_tenants() {
    let h = harness();
    create_student(&h, h.a, "ADM-001").await;
    create_student(&h, h.a, "ADM-002").await;
    create_student(&h, h.b, "ADM-001").await;

    let (status, report) = send(
        &h.app,
        Method::GET,
        "/admin/reports/students",
        Some(&admin()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let count_for = |slug: &str| {
        report
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["slug"] == slug)
            .map(|r| r["students"].clone())
            .unwrap()
    };
    assert_eq!(count_for("green-valley"), 2);
    assert_eq!(count_for("hill-side"), 1);

    let (status, _) = send(
        &h.app,
        Method::GET,
        "/admin/reports/students",
        Some(&user(h.a)),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_requests_stay_isolated() {
    let h = harness();
    for i in 0..5 {
        create_student(&h, h.a, &format!("A-{i}")).await;
        create_student(&h, h.b, &format!("B-{i}")).await;
    }

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..200 {
        let app = h.app.clone();
        let tenant = if i % 2 == 0 { h.a } else { h.b };
        let prefix = if i % 2 == 0 { "A-" } else { "B-" };
        tasks.spawn(async move {
            let (status, list) = send(&app, Method::GET, "/students", Some(&user(tenant)), None).await;
            assert_eq!(status, StatusCode::OK);
            let list = list.as_array().unwrap().clone();
            assert_eq!(list.len(), 5);
            for student in list {
                assert_eq!(student["tenant_id"], tenant.to_string());
                assert!(student["admission_number"].as_str().unwrap().starts_with(prefix));
            }
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap();
    }

    assert!(h.state.store.pool_status().size <= 10);
}
