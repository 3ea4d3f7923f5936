//! Tenant-scoped tables served by the API

use msls_tenancy::storage::{EngineBuilder, postgres_ddl};
use msls_tenancy::{Engine, ScopedEntity, TableSpec, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ApiError, Result};

/// Highest grade level; 0 is kindergarten
pub const MAX_GRADE: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StudentStatus {
    #[default]
    Active,
    Inactive,
    Graduated,
}

impl StudentStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Graduated => "graduated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    /// Filled from the bound session on insert
    pub tenant_id: Option<TenantId>,
    pub admission_number: String,
    pub first_name: String,
    pub last_name: String,
    pub grade: u8,
    #[serde(default)]
    pub status: StudentStatus,
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

impl Student {
    pub fn validate(&self) -> Result<()> {
        if self.admission_number.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "admission_number must not be empty".into(),
            ));
        }
        if self.first_name.trim().is_empty() {
            return Err(ApiError::BadRequest("first_name must not be empty".into()));
        }
        if self.last_name.trim().is_empty() {
            return Err(ApiError::BadRequest("last_name must not be empty".into()));
        }
        if self.grade > MAX_GRADE {
            return Err(ApiError::BadRequest(format!(
                "grade must be between 0 and {MAX_GRADE}"
            )));
        }
        Ok(())
    }
}

/// Tables registered with the storage engine
#[must_use]
pub fn tables() -> Vec<TableSpec> {
    vec![TableSpec::tenant_scoped(Student::TABLE)]
}

/// Build the storage engine with every application table
#[must_use]
pub fn build_engine() -> Engine {
    tables()
        .into_iter()
        .fold(Engine::builder(), EngineBuilder::table)
        .build()
}

/// PostgreSQL DDL for the application tables, including the audit log
pub fn ddl() -> Result<Vec<String>> {
    Ok(postgres_ddl(build_engine().table_specs())?)
}
