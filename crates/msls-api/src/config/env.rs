//! Environment variable loading for configuration

use std::env;
use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::time::Duration;

use url::Url;

use super::builder::ConfigBuilder;
use crate::error::{ApiError, Result};

/// Environment variable names
mod vars {
    pub const MSLS_HTTP_HOST: &str = "MSLS_HTTP_HOST";
    pub const MSLS_HTTP_PORT: &str = "MSLS_HTTP_PORT";
    pub const MSLS_REQUEST_TIMEOUT_SECS: &str = "MSLS_REQUEST_TIMEOUT_SECS";
    pub const MSLS_CORS_ORIGIN: &str = "MSLS_CORS_ORIGIN";
    pub const MSLS_POOL_SIZE: &str = "MSLS_POOL_SIZE";
    pub const MSLS_POOL_WAIT_TIMEOUT_SECS: &str = "MSLS_POOL_WAIT_TIMEOUT_SECS";
    pub const MSLS_JWT_ISSUER: &str = "MSLS_JWT_ISSUER";
    pub const MSLS_JWT_AUDIENCE: &str = "MSLS_JWT_AUDIENCE";
    pub const MSLS_JWT_SECRET: &str = "MSLS_JWT_SECRET";
    pub const MSLS_JWT_PUBLIC_KEY_FILE: &str = "MSLS_JWT_PUBLIC_KEY_FILE";
    pub const MSLS_TENANT_HEADER: &str = "MSLS_TENANT_HEADER";
    pub const MSLS_STATUS_CACHE_TTL_SECS: &str = "MSLS_STATUS_CACHE_TTL_SECS";
    pub const MSLS_ELEVATED_ACTORS: &str = "MSLS_ELEVATED_ACTORS";
    pub const MSLS_ELEVATED_ROLES: &str = "MSLS_ELEVATED_ROLES";
    pub const MSLS_SERVICE_NAME: &str = "MSLS_SERVICE_NAME";
    pub const MSLS_LOG_LEVEL: &str = "MSLS_LOG_LEVEL";
    pub const MSLS_JSON_LOGS: &str = "MSLS_JSON_LOGS";
}

/// Load configuration from environment variables
pub fn load_from_env(mut builder: ConfigBuilder) -> Result<ConfigBuilder> {
    // HTTP listener
    if let Ok(host_str) = env::var(vars::MSLS_HTTP_HOST)
        && let Ok(host) = host_str.parse::<IpAddr>()
    {
        builder = builder.http_host(host);
    }

    if let Ok(port_str) = env::var(vars::MSLS_HTTP_PORT)
        && let Ok(port) = port_str.parse::<u16>()
    {
        builder = builder.http_port(port);
    }

    if let Some(secs) = parse_secs(vars::MSLS_REQUEST_TIMEOUT_SECS) {
        builder = builder.request_timeout(secs);
    }

    if let Ok(origin) = env::var(vars::MSLS_CORS_ORIGIN) {
        builder = builder.cors_origin(Some(origin));
    }

    // Pool
    if let Ok(size_str) = env::var(vars::MSLS_POOL_SIZE)
        && let Ok(size) = size_str.parse::<usize>()
        && let Some(nz) = NonZeroUsize::new(size)
    {
        builder = builder.pool_size(nz);
    }

    if let Some(secs) = parse_secs(vars::MSLS_POOL_WAIT_TIMEOUT_SECS) {
        builder = builder.pool_wait_timeout(secs);
    }

    // Token verification
    if let Ok(issuer) = env::var(vars::MSLS_JWT_ISSUER) {
        let url = Url::parse(&issuer).map_err(|e| {
            ApiError::Config(format!("Invalid {}: {e}", vars::MSLS_JWT_ISSUER))
        })?;
        builder = builder.jwt_issuer(url);
    }

    if let Ok(audience) = env::var(vars::MSLS_JWT_AUDIENCE) {
        builder = builder.jwt_audience(split_list(&audience));
    }

    if let Ok(secret) = env::var(vars::MSLS_JWT_SECRET) {
        builder = builder.jwt_secret(secret);
    }

    if let Ok(path) = env::var(vars::MSLS_JWT_PUBLIC_KEY_FILE) {
        let pem = std::fs::read_to_string(&path).map_err(|e| {
            ApiError::Config(format!("Failed to read public key {path}: {e}"))
        })?;
        builder = builder.jwt_public_key_pem(pem);
    }

    // Tenancy
    if let Ok(header) = env::var(vars::MSLS_TENANT_HEADER) {
        builder = builder.tenant_header(header);
    }

    if let Some(ttl) = parse_secs(vars::MSLS_STATUS_CACHE_TTL_SECS) {
        builder = builder.status_cache_ttl(ttl);
    }

    if let Ok(actors) = env::var(vars::MSLS_ELEVATED_ACTORS) {
        builder = builder.elevated_actors(split_list(&actors));
    }

    if let Ok(roles) = env::var(vars::MSLS_ELEVATED_ROLES) {
        builder = builder.elevated_roles(split_list(&roles));
    }

    // Telemetry
    if let Ok(name) = env::var(vars::MSLS_SERVICE_NAME) {
        builder = builder.service_name(name);
    }

    if let Ok(level) = env::var(vars::MSLS_LOG_LEVEL) {
        builder = builder.log_level(level);
    }

    if let Ok(val) = env::var(vars::MSLS_JSON_LOGS) {
        builder = builder.json_logs(parse_bool(&val));
    }

    Ok(builder)
}

fn parse_secs(var: &str) -> Option<Duration> {
    env::var(var)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(s: &str) -> bool {
    matches!(s.to_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

/// Serializes tests that read or modify the process environment
#[cfg(test)]
pub(super) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
