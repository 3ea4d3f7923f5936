use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    storage: bool,
}

/// Liveness plus storage availability; needs no token
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let storage = state.store.engine().is_available();
    let (code, status) = if storage {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            storage,
        }),
    )
}
