//! Prometheus metrics for the MSLS server

use std::sync::OnceLock;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::error::{ApiError, Result};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static START_TIME: OnceLock<Instant> = OnceLock::new();

const METRIC_UPTIME: &str = "msls_uptime_seconds";
const METRIC_INFO: &str = "msls_info";

// Isolation metrics
const METRIC_RESOLUTION_REJECTED: &str = "msls_resolution_rejected_total";
const METRIC_CROSS_TENANT: &str = "msls_cross_tenant_violations_total";
const METRIC_ELEVATED_SESSIONS: &str = "msls_elevated_sessions_total";
const METRIC_AUDIT_FAILURES: &str = "msls_audit_failures_total";

/// Initialize Prometheus metrics recorder.
pub fn init_metrics() -> Result<()> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ApiError::Config(format!("Failed to install metrics recorder: {e}")))?;

    PROMETHEUS_HANDLE.set(handle).ok();
    START_TIME.set(Instant::now()).ok();

    register_metrics();
    tracing::info!("Prometheus metrics initialized");
    Ok(())
}

fn register_metrics() {
    describe_gauge!(METRIC_UPTIME, "Server uptime in seconds");
    describe_gauge!(METRIC_INFO, "Server information (always 1)");

    describe_counter!(
        METRIC_RESOLUTION_REJECTED,
        "Requests rejected before a tenant context was established"
    );
    describe_counter!(
        METRIC_CROSS_TENANT,
        "Writes blocked for targeting another tenant"
    );
    describe_counter!(METRIC_ELEVATED_SESSIONS, "Elevated sessions granted");
    describe_counter!(METRIC_AUDIT_FAILURES, "Mutations rolled back on audit failure");

    gauge!(
        METRIC_INFO,
        "version" => env!("CARGO_PKG_VERSION"),
    )
    .set(1.0);
}

/// Render metrics in Prometheus text format.
#[must_use]
pub fn render_metrics() -> String {
    if let Some(start) = START_TIME.get() {
        gauge!(METRIC_UPTIME).set(start.elapsed().as_secs_f64());
    }

    PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

pub fn record_resolution_rejected() {
    counter!(METRIC_RESOLUTION_REJECTED).increment(1);
}

pub fn record_cross_tenant_violation() {
    counter!(METRIC_CROSS_TENANT).increment(1);
}

pub fn record_elevated_session(actor: &str) {
    counter!(METRIC_ELEVATED_SESSIONS, "actor" => actor.to_owned()).increment(1);
}

pub fn record_audit_failure() {
    counter!(METRIC_AUDIT_FAILURES).increment(1);
}
