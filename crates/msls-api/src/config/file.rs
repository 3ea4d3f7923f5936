//! TOML configuration file loading

use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use super::builder::ConfigBuilder;
use crate::error::{ApiError, Result};

/// Configuration file locations checked in order
const CONFIG_PATHS: &[&str] = &[
    "./msls.toml",
    "~/.config/msls/config.toml",
    "/etc/msls/config.toml",
];

/// Find the first existing configuration file
pub fn find_config_file() -> Option<PathBuf> {
    for path_str in CONFIG_PATHS {
        let path = if path_str.starts_with('~') {
            if let Ok(home) = std::env::var("HOME") {
                PathBuf::from(path_str.replacen('~', &home, 1))
            } else {
                continue;
            }
        } else {
            PathBuf::from(path_str)
        };

        if path.exists() {
            return Some(path);
        }
    }
    None
}

/// Load configuration from a TOML file
pub fn load_from_file(path: &Path, builder: ConfigBuilder) -> Result<ConfigBuilder> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ApiError::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;

    let file_config: FileConfig = toml::from_str(&content).map_err(|e| {
        ApiError::Config(format!(
            "Failed to parse config file {}: {}",
            path.display(),
            e
        ))
    })?;

    apply_file_config(builder, file_config, path.parent())
}

fn apply_file_config(
    mut builder: ConfigBuilder,
    config: FileConfig,
    base_dir: Option<&Path>,
) -> Result<ConfigBuilder> {
    if let Some(http) = config.http {
        if let Some(host_str) = http.host
            && let Ok(host) = host_str.parse::<IpAddr>()
        {
            builder = builder.http_host(host);
        }

        if let Some(port) = http.port {
            builder = builder.http_port(port);
        }

        if let Some(secs) = http.request_timeout_secs {
            builder = builder.request_timeout(Duration::from_secs(secs));
        }

        if http.cors_origin.is_some() {
            builder = builder.cors_origin(http.cors_origin);
        }
    }

    if let Some(pool) = config.pool {
        if let Some(size) = pool.size
            && let Some(nz) = NonZeroUsize::new(size)
        {
            builder = builder.pool_size(nz);
        }

        if let Some(secs) = pool.wait_timeout_secs {
            builder = builder.pool_wait_timeout(Duration::from_secs(secs));
        }
    }

    if let Some(auth) = config.auth {
        if let Some(issuer) = auth.issuer {
            let url = Url::parse(&issuer)
                .map_err(|e| ApiError::Config(format!("Invalid JWT issuer: {e}")))?;
            builder = builder.jwt_issuer(url);
        }

        if let Some(audience) = auth.audience {
            builder = builder.jwt_audience(audience);
        }

        if let Some(secret) = auth.secret {
            builder = builder.jwt_secret(secret);
        }

        if let Some(key_file) = auth.public_key_file {
            // Relative key paths resolve against the config file's directory
            let key_path = match base_dir {
                Some(dir) if key_file.is_relative() => dir.join(&key_file),
                _ => key_file,
            };
            let pem = std::fs::read_to_string(&key_path).map_err(|e| {
                ApiError::Config(format!(
                    "Failed to read public key {}: {}",
                    key_path.display(),
                    e
                ))
            })?;
            builder = builder.jwt_public_key_pem(pem);
        }

        if let Some(secs) = auth.clock_skew_secs {
            builder = builder.jwt_clock_skew(Duration::from_secs(secs));
        }
    }

    if let Some(tenancy) = config.tenancy {
        if let Some(header) = tenancy.tenant_header {
            builder = builder.tenant_header(header);
        }

        if let Some(secs) = tenancy.status_cache_ttl_secs {
            builder = builder.status_cache_ttl(Duration::from_secs(secs));
        }

        if let Some(actors) = tenancy.elevated_actors {
            builder = builder.elevated_actors(actors);
        }

        if let Some(roles) = tenancy.elevated_roles {
            builder = builder.elevated_roles(roles);
        }
    }

    if let Some(obs) = config.observability {
        if let Some(name) = obs.service_name {
            builder = builder.service_name(name);
        }

        if let Some(level) = obs.log_level {
            builder = builder.log_level(level);
        }

        if let Some(json) = obs.json_logs {
            builder = builder.json_logs(json);
        }
    }

    Ok(builder)
}

/// Root configuration file structure
#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    http: Option<HttpFileConfig>,
    pool: Option<PoolFileConfig>,
    auth: Option<AuthFileConfig>,
    tenancy: Option<TenancyFileConfig>,
    observability: Option<ObservabilityConfig>,
}

#[derive(Debug, Deserialize)]
struct HttpFileConfig {
    host: Option<String>,
    port: Option<u16>,
    request_timeout_secs: Option<u64>,
    cors_origin: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PoolFileConfig {
    size: Option<usize>,
    wait_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AuthFileConfig {
    issuer: Option<String>,
    audience: Option<Vec<String>>,
    secret: Option<String>,
    public_key_file: Option<PathBuf>,
    clock_skew_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TenancyFileConfig {
    tenant_header: Option<String>,
    status_cache_ttl_secs: Option<u64>,
    elevated_actors: Option<Vec<String>>,
    elevated_roles: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ObservabilityConfig {
    service_name: Option<String>,
    log_level: Option<String>,
    json_logs: Option<bool>,
}
