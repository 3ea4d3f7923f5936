//! Platform administration
//!
//! These routes act across tenants and therefore never run under a tenant
//! binding. Every request is checked against the elevation allowlist, and
//! the cross-tenant report reads through an elevated session.

use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use msls_tenancy::{
    Error, Filter, Principal, ScopedEntity, Tenant, TenantDirectory, TenantId, TenantStatus,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ApiError, Result};
use crate::schema::Student;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateTenant {
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub settings: Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct TenantStudentCount {
    pub tenant_id: TenantId,
    pub slug: String,
    pub status: TenantStatus,
    pub students: usize,
}

fn tenant_not_found(id: Uuid) -> ApiError {
    Error::NotFound {
        entity: "tenant".to_string(),
        id,
    }
    .into()
}

pub async fn list_tenants(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<Tenant>>> {
    state.store.authorize_elevation(&principal, "list tenants")?;
    Ok(Json(state.directory.list().await?))
}

pub async fn create_tenant(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CreateTenant>,
) -> Result<(StatusCode, Json<Tenant>)> {
    state
        .store
        .authorize_elevation(&principal, "provision tenant")?;

    let tenant = state
        .directory
        .provision(body.name, body.slug, body.settings)
        .map_err(|e| match e {
            Error::SlugTaken(slug) => {
                ApiError::Conflict(format!("tenant slug {slug} is already in use"))
            }
            other => other.into(),
        })?;

    tracing::info!(
        actor = %principal.subject,
        tenant_id = %tenant.id,
        slug = %tenant.slug,
        "Tenant created by platform admin"
    );
    Ok((StatusCode::CREATED, Json(tenant)))
}

async fn change_status(
    state: &AppState,
    principal: &Principal,
    id: Uuid,
    status: TenantStatus,
) -> Result<Json<Tenant>> {
    let reason = match status {
        TenantStatus::Active => "activate tenant",
        TenantStatus::Suspended => "suspend tenant",
    };
    state.store.authorize_elevation(principal, reason)?;

    let tenant_id = TenantId::from_uuid(id);
    let tenant = state
        .directory
        .set_status(tenant_id, status)
        .map_err(|e| match e {
            Error::TenantNotFound(_) => tenant_not_found(id),
            other => other.into(),
        })?;

    // Status changes take effect on the next request, not after the cache TTL
    state.resolver.invalidate(tenant_id);

    tracing::warn!(
        actor = %principal.subject,
        tenant_id = %tenant_id,
        status = ?status,
        "Tenant status changed by platform admin"
    );
    Ok(Json(tenant))
}

pub async fn suspend_tenant(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<Tenant>> {
    change_status(&state, &principal, id, TenantStatus::Suspended).await
}

pub async fn activate_tenant(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<Uuid>,
) -> Result<Json<Tenant>> {
    change_status(&state, &principal, id, TenantStatus::Active).await
}

/// Student counts for every tenant, read through one elevated session
pub async fn student_report(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<TenantStudentCount>>> {
    let session = state
        .store
        .elevate(&principal, "cross-tenant student report")
        .await?;

    #[cfg(feature = "metrics")]
    crate::observability::record_elevated_session(&principal.subject);

    let tenants = state.directory.list().await?;
    let mut report = Vec::with_capacity(tenants.len());
    for tenant in tenants {
        let filter = Filter::all().eq("tenant_id", tenant.id.to_string());
        let students = session.count::<Student>(&filter).await?;
        report.push(TenantStudentCount {
            tenant_id: tenant.id,
            slug: tenant.slug,
            status: tenant.status,
            students,
        });
    }

    tracing::info!(
        actor = %principal.subject,
        tenants = report.len(),
        table = Student::TABLE,
        "Cross-tenant report generated"
    );
    Ok(Json(report))
}
