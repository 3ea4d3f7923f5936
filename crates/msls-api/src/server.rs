//! HTTP server

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode, header};
#[cfg(feature = "metrics")]
use axum::response::IntoResponse;
#[cfg(feature = "metrics")]
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::{Config, HttpConfig};
use crate::error::{ApiError, Result};
use crate::routes::router;
use crate::state::AppState;

const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";

/// Full application with tracing, timeout and CORS layers
pub fn build_app(state: AppState, http: &HttpConfig) -> Router {
    let cors = build_cors_layer(http, state.tenant_header());

    #[allow(unused_mut)]
    let mut app = router(state);

    #[cfg(feature = "metrics")]
    {
        app = app.route("/metrics", get(metrics_handler));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            http.request_timeout,
        ))
        .layer(cors)
}

/// Serve until `shutdown` resolves
pub async fn run_http(
    config: &Config,
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = SocketAddr::new(config.http.host, config.http.port);
    emit_security_warnings(config);

    let app = build_app(state, &config.http);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::Transport(format!("Failed to bind to {addr}: {e}")))?;

    tracing::info!("HTTP server listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ApiError::Transport(format!("HTTP server error: {e}")))?;

    tracing::info!("HTTP server shutdown complete");
    Ok(())
}

/// CORS for the configured origin; the tenant cross-check header is allowed
fn build_cors_layer(config: &HttpConfig, tenant_header: &str) -> CorsLayer {
    let origin = config
        .cors_origin
        .as_ref()
        .and_then(|o| o.parse::<HeaderValue>().ok())
        // Restrictive default: only localhost
        .unwrap_or_else(|| HeaderValue::from_static(DEFAULT_CORS_ORIGIN));

    let mut headers = vec![header::CONTENT_TYPE, header::AUTHORIZATION];
    if let Ok(name) = HeaderName::from_bytes(tenant_header.as_bytes()) {
        headers.push(name);
    }

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(headers)
}

fn security_warnings(config: &Config) -> Vec<String> {
    let mut warnings = Vec::new();
    let host = config.http.host;
    let is_all_interfaces = host == IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        || host == IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED);

    if is_all_interfaces {
        warnings.push(
            "HTTP server binding to all interfaces (0.0.0.0). \
             This exposes the server to all network interfaces."
                .to_string(),
        );
    } else if !host.is_loopback() {
        warnings.push(format!(
            "HTTP server binding to non-loopback address ({host}). \
             Ensure network security policies are in place."
        ));
    }

    if config.jwt.hs_secret.as_ref().is_some_and(|s| s.len() < 32) {
        warnings.push(
            "SECURITY WARNING: JWT shared secret is shorter than 32 bytes. \
             Use MSLS_JWT_SECRET with at least 256 bits of entropy."
                .to_string(),
        );
    }

    if config.jwt.issuer.is_none() {
        warnings.push(
            "JWT issuer not configured (MSLS_JWT_ISSUER); any issuer is accepted".to_string(),
        );
    }

    warnings
}

fn emit_security_warnings(config: &Config) {
    for warning in security_warnings(config) {
        tracing::warn!("{warning}");
    }

    if config.http.cors_origin.is_none() {
        tracing::info!(
            "CORS origin not configured (MSLS_CORS_ORIGIN). \
             Using restrictive default: {DEFAULT_CORS_ORIGIN}"
        );
    }
}

#[cfg(feature = "metrics")]
async fn metrics_handler() -> impl IntoResponse {
    (
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        crate::observability::render_metrics(),
    )
}
