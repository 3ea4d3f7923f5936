//! HTTP routes
//!
//! Route groups differ only in the middleware guarding them:
//! tenant routes require a resolved tenant context, admin routes require an
//! authenticated principal and check elevation per request.

mod admin;
mod health;
mod students;

use axum::routing::{get, post};
use axum::{Router, middleware};

use crate::auth::{authenticate, require_principal, resolve_tenant};
use crate::state::AppState;

pub use admin::{CreateTenant, TenantStudentCount};
pub use health::HealthResponse;
pub use students::{CreateStudent, ListQuery, UpdateStudent};

fn tenant_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/students",
            get(students::list_students).post(students::create_student),
        )
        .route(
            "/students/{id}",
            get(students::get_student)
                .put(students::update_student)
                .delete(students::delete_student),
        )
        .route("/students/{id}/history", get(students::student_history))
        .route_layer(middleware::from_fn_with_state(state.clone(), resolve_tenant))
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/admin/tenants",
            get(admin::list_tenants).post(admin::create_tenant),
        )
        .route("/admin/tenants/{id}/suspend", post(admin::suspend_tenant))
        .route("/admin/tenants/{id}/activate", post(admin::activate_tenant))
        .route("/admin/reports/students", get(admin::student_report))
        .route_layer(middleware::from_fn(require_principal))
}

/// Application routes with authentication applied
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .merge(tenant_routes(&state))
        .merge(admin_routes())
        .layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .with_state(state)
}
