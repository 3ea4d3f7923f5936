use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use msls_tenancy::{ErrorClass, REQUEST_FAILED, RESOLUTION_REJECTED};
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Tenancy(#[from] msls_tenancy::Error),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl ApiError {
    /// HTTP status and caller-facing message
    pub fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            Self::Auth(_) => (StatusCode::UNAUTHORIZED, RESOLUTION_REJECTED.to_string()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Self::Config(_) | Self::Transport(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, REQUEST_FAILED.to_string())
            }
            Self::Tenancy(err) => {
                let status = match err.class() {
                    ErrorClass::Resolution => StatusCode::UNAUTHORIZED,
                    ErrorClass::Denied => StatusCode::FORBIDDEN,
                    ErrorClass::NotFound => StatusCode::NOT_FOUND,
                    ErrorClass::Invalid => StatusCode::BAD_REQUEST,
                    ErrorClass::Binding
                    | ErrorClass::CrossTenant
                    | ErrorClass::Audit
                    | ErrorClass::Storage
                    | ErrorClass::Config => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.public_message())
            }
        }
    }

    fn log(&self) {
        match self {
            Self::Tenancy(err) => match err.class() {
                ErrorClass::CrossTenant => {
                    tracing::error!(error = %err, "Cross-tenant access blocked");
                }
                ErrorClass::Binding | ErrorClass::Audit | ErrorClass::Storage | ErrorClass::Config => {
                    tracing::error!(error = %err, class = ?err.class(), "Request failed");
                }
                // Resolution failures are logged by the resolver
                _ => tracing::debug!(error = %err, "Request rejected"),
            },
            Self::Auth(err) => tracing::debug!(error = %err, "Token rejected"),
            Self::BadRequest(msg) | Self::Conflict(msg) => {
                tracing::debug!(reason = %msg, "Bad request");
            }
            Self::Config(_) | Self::Transport(_) => tracing::error!(error = %self, "Request failed"),
        }
    }

    #[cfg(feature = "metrics")]
    fn record(&self) {
        use crate::observability::{
            record_audit_failure, record_cross_tenant_violation, record_resolution_rejected,
        };

        match self {
            Self::Auth(_) => record_resolution_rejected(),
            Self::Tenancy(err) => match err.class() {
                ErrorClass::Resolution => record_resolution_rejected(),
                ErrorClass::CrossTenant => record_cross_tenant_violation(),
                ErrorClass::Audit => record_audit_failure(),
                _ => {}
            },
            _ => {}
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.log();
        #[cfg(feature = "metrics")]
        self.record();

        let (status, error) = self.status_and_message();
        (status, Json(ErrorBody { error })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
