//! Request authentication and tenant context middleware

use axum::extract::{Request, State};
use axum::http::{HeaderMap, header};
use axum::middleware::Next;
use axum::response::Response;
use msls_tenancy::Principal;

use super::error::AuthError;
use crate::error::ApiError;
use crate::state::AppState;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Verify the bearer token, attaching a [`Principal`] when it is valid
///
/// Rejection is left to the route layers so that every failure produces the
/// same response.
#[allow(clippy::future_not_send)]
pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let principal = match bearer_token(request.headers()) {
        Some(token) => match state.validator.validate(token) {
            Ok(claims) => Some(claims.principal()),
            Err(e) => {
                // Do not log token contents
                tracing::warn!(reason = %e, "JWT validation failed");
                None
            }
        },
        None => None,
    };

    if let Some(principal) = principal {
        request.extensions_mut().insert(principal);
    }
    next.run(request).await
}

/// Resolve and attach the [`TenantContext`](msls_tenancy::TenantContext)
///
/// Runs before any handler touching storage.
#[allow(clippy::future_not_send)]
pub async fn resolve_tenant(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal = request.extensions().get::<Principal>().cloned();
    let header = request
        .headers()
        .get(state.tenant_header())
        .map(|v| v.to_str().map_or_else(|_| "<invalid>".to_string(), str::to_string));

    let context = state
        .resolver
        .resolve(principal.as_ref(), header.as_deref())
        .await?;

    request.extensions_mut().insert(context);
    Ok(next.run(request).await)
}

/// Require an authenticated principal without resolving a tenant
#[allow(clippy::future_not_send)]
pub async fn require_principal(request: Request, next: Next) -> Result<Response, ApiError> {
    if request.extensions().get::<Principal>().is_none() {
        tracing::warn!(path = %request.uri().path(), "Unauthenticated platform request");
        return Err(AuthError::NotAuthenticated.into());
    }
    Ok(next.run(request).await)
}
