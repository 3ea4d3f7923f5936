//! Tenant-scoped student records
//!
//! Every handler receives the [`TenantContext`] established by the
//! resolution middleware and works through a session bound to it. Handlers
//! never filter by tenant themselves.

use axum::Json;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use msls_tenancy::{
    AuditRecord, BoundSession, Error, Filter, ScopedEntity, TenantContext, UnitOfWork,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiError, Result};
use crate::schema::{Student, StudentStatus};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub grade: Option<u8>,
    pub status: Option<StudentStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CreateStudent {
    pub admission_number: String,
    pub first_name: String,
    pub last_name: String,
    pub grade: u8,
    #[serde(default)]
    pub status: StudentStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateStudent {
    pub admission_number: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub grade: Option<u8>,
    pub status: Option<StudentStatus>,
}

impl UpdateStudent {
    fn apply(self, student: &mut Student) {
        if let Some(v) = self.admission_number {
            student.admission_number = v;
        }
        if let Some(v) = self.first_name {
            student.first_name = v;
        }
        if let Some(v) = self.last_name {
            student.last_name = v;
        }
        if let Some(v) = self.grade {
            student.grade = v;
        }
        if let Some(v) = self.status {
            student.status = v;
        }
    }
}

fn not_found(id: Uuid) -> ApiError {
    Error::NotFound {
        entity: Student::TABLE.to_string(),
        id,
    }
    .into()
}

/// Fails with a conflict when another visible student holds `admission_number`
///
/// Runs inside the unit of work so the check and the following write are
/// serialized against other writers.
fn ensure_admission_free(
    uow: &UnitOfWork<'_>,
    admission_number: &str,
    except: Option<Uuid>,
) -> Result<()> {
    let filter = Filter::all().eq("admission_number", admission_number);
    let taken = uow
        .list::<Student>(&filter)?
        .iter()
        .any(|s| Some(s.id) != except);
    if taken {
        return Err(ApiError::Conflict(format!(
            "admission number {admission_number} is already in use"
        )));
    }
    Ok(())
}

async fn insert_student(session: &mut BoundSession, student: &Student) -> Result<Student> {
    let mut uow = session.begin().await?;
    ensure_admission_free(&uow, &student.admission_number, None)?;
    let stored = uow.insert(student)?;
    uow.commit()?;
    Ok(stored)
}

pub async fn list_students(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Student>>> {
    let session = state.store.bind(&ctx).await?;

    let mut filter = Filter::all();
    if let Some(grade) = query.grade {
        filter = filter.eq("grade", grade);
    }
    if let Some(status) = query.status {
        filter = filter.eq("status", status.as_str());
    }

    let mut students = session.list::<Student>(&filter).await?;
    students.sort_by(|a, b| a.admission_number.cmp(&b.admission_number));
    Ok(Json(students))
}

pub async fn create_student(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(body): Json<CreateStudent>,
) -> Result<(StatusCode, Json<Student>)> {
    let student = Student {
        id: Uuid::new_v4(),
        tenant_id: None,
        admission_number: body.admission_number.trim().to_string(),
        first_name: body.first_name,
        last_name: body.last_name,
        grade: body.grade,
        status: body.status,
    };
    student.validate()?;

    let mut session = state.store.bind(&ctx).await?;
    let stored = insert_student(&mut session, &student).await?;

    tracing::info!(
        tenant_id = %ctx.tenant_id,
        actor = %ctx.actor,
        student_id = %stored.id,
        "Student created"
    );
    Ok((StatusCode::CREATED, Json(stored)))
}

pub async fn get_student(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Student>> {
    let session = state.store.bind(&ctx).await?;
    Ok(Json(session.get::<Student>(id).await?))
}

pub async fn update_student(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateStudent>,
) -> Result<Json<Student>> {
    let mut session = state.store.bind(&ctx).await?;
    let mut uow = session.begin().await?;
    let mut student = uow.find::<Student>(id)?.ok_or_else(|| not_found(id))?;

    let previous_admission = student.admission_number.clone();
    body.apply(&mut student);
    student.admission_number = student.admission_number.trim().to_string();
    student.validate()?;

    if student.admission_number != previous_admission {
        ensure_admission_free(&uow, &student.admission_number, Some(id))?;
    }

    let updated = uow.update(&student)?;
    uow.commit()?;
    Ok(Json(updated))
}

pub async fn delete_student(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    let mut session = state.store.bind(&ctx).await?;
    let mut uow = session.begin().await?;
    uow.delete::<Student>(id)?;
    uow.commit()?;

    tracing::info!(
        tenant_id = %ctx.tenant_id,
        actor = %ctx.actor,
        student_id = %id,
        "Student deleted"
    );
    Ok(StatusCode::NO_CONTENT)
}

/// Audit trail for one student, oldest first
///
/// Deleted students keep their history; an id with no visible records is
/// reported as not found.
pub async fn student_history(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AuditRecord>>> {
    let session = state.store.bind(&ctx).await?;
    let records = session.history(Student::TABLE, id).await?;
    if records.is_empty() {
        return Err(not_found(id));
    }
    Ok(Json(records))
}
