//! Configuration builder

use std::net::{IpAddr, Ipv4Addr};
use std::num::NonZeroUsize;
use std::time::Duration;

use axum::http::HeaderName;
use msls_tenancy::{DEFAULT_STATUS_TTL, ElevationPolicy, PLATFORM_ADMIN_ROLE, PoolConfig};
use url::Url;

use crate::auth::JwtConfig;
use crate::error::{ApiError, Result};

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub http: HttpConfig,
    pub pool_size: NonZeroUsize,
    pub pool_wait_timeout: Duration,
    pub jwt: JwtConfig,
    pub tenancy: TenancyConfig,
    pub telemetry: TelemetryConfig,
}

impl Config {
    #[must_use]
    pub const fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    #[must_use]
    pub const fn pool(&self) -> PoolConfig {
        PoolConfig {
            max_size: self.pool_size.get(),
            wait_timeout: self.pool_wait_timeout,
        }
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: IpAddr,
    pub port: u16,
    pub request_timeout: Duration,
    pub cors_origin: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            request_timeout: Duration::from_secs(30),
            cors_origin: None,
        }
    }
}

/// Tenant resolution and elevation settings
#[derive(Debug, Clone)]
pub struct TenancyConfig {
    /// Optional client header cross-checked against the token claim
    pub tenant_header: String,
    pub status_cache_ttl: Duration,
    pub elevated_actors: Vec<String>,
    pub elevated_roles: Vec<String>,
}

impl Default for TenancyConfig {
    fn default() -> Self {
        Self {
            tenant_header: "x-tenant-id".to_string(),
            status_cache_ttl: DEFAULT_STATUS_TTL,
            elevated_actors: Vec::new(),
            elevated_roles: vec![PLATFORM_ADMIN_ROLE.to_string()],
        }
    }
}

impl TenancyConfig {
    #[must_use]
    pub fn elevation_policy(&self) -> ElevationPolicy {
        let policy = self
            .elevated_actors
            .iter()
            .fold(ElevationPolicy::deny_all(), |p, actor| p.allow_actor(actor.clone()));
        self.elevated_roles
            .iter()
            .fold(policy, |p, role| p.allow_role(role.clone()))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Default)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub log_level: String,
    pub json_logs: bool,
}

/// Configuration builder with fluent API
#[derive(Debug)]
pub struct ConfigBuilder {
    http: HttpConfig,
    pool_size: NonZeroUsize,
    pool_wait_timeout: Duration,
    jwt: JwtConfig,
    tenancy: Option<TenancyConfig>,
    elevated_actors: Option<Vec<String>>,
    elevated_roles: Option<Vec<String>>,
    tenant_header: Option<String>,
    status_cache_ttl: Option<Duration>,
    telemetry: TelemetryConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    const DEFAULT_POOL_SIZE: NonZeroUsize = NonZeroUsize::MIN.saturating_add(9); // 10

    #[must_use]
    pub const fn new() -> Self {
        Self {
            http: HttpConfig {
                host: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 8080,
                request_timeout: Duration::from_secs(30),
                cors_origin: None,
            },
            pool_size: Self::DEFAULT_POOL_SIZE,
            pool_wait_timeout: Duration::from_secs(10),
            jwt: JwtConfig {
                issuer: None,
                audience: Vec::new(),
                clock_skew: Duration::from_secs(60),
                hs_secret: None,
                rsa_public_key_pem: None,
            },
            tenancy: None,
            elevated_actors: None,
            elevated_roles: None,
            tenant_header: None,
            status_cache_ttl: None,
            telemetry: TelemetryConfig {
                service_name: String::new(),
                log_level: String::new(),
                json_logs: false,
            },
        }
    }

    #[must_use]
    pub const fn http_host(mut self, host: IpAddr) -> Self {
        self.http.host = host;
        self
    }

    #[must_use]
    pub const fn http_port(mut self, port: u16) -> Self {
        self.http.port = port;
        self
    }

    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.http.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn cors_origin(mut self, origin: Option<String>) -> Self {
        self.http.cors_origin = origin;
        self
    }

    #[must_use]
    pub const fn pool_size(mut self, size: NonZeroUsize) -> Self {
        self.pool_size = size;
        self
    }

    #[must_use]
    pub const fn pool_wait_timeout(mut self, timeout: Duration) -> Self {
        self.pool_wait_timeout = timeout;
        self
    }

    #[must_use]
    pub fn jwt_issuer(mut self, issuer: Url) -> Self {
        self.jwt.issuer = Some(issuer);
        self
    }

    #[must_use]
    pub fn jwt_audience(mut self, audience: Vec<String>) -> Self {
        self.jwt.audience = audience;
        self
    }

    #[must_use]
    pub fn jwt_secret(mut self, secret: String) -> Self {
        self.jwt.hs_secret = Some(secret);
        self
    }

    #[must_use]
    pub fn jwt_public_key_pem(mut self, pem: String) -> Self {
        self.jwt.rsa_public_key_pem = Some(pem);
        self
    }

    #[must_use]
    pub const fn jwt_clock_skew(mut self, skew: Duration) -> Self {
        self.jwt.clock_skew = skew;
        self
    }

    #[must_use]
    pub fn tenant_header(mut self, header: String) -> Self {
        self.tenant_header = Some(header);
        self
    }

    #[must_use]
    pub const fn status_cache_ttl(mut self, ttl: Duration) -> Self {
        self.status_cache_ttl = Some(ttl);
        self
    }

    /// Subjects allowed to open elevated sessions
    #[must_use]
    pub fn elevated_actors(mut self, actors: Vec<String>) -> Self {
        self.elevated_actors = Some(actors);
        self
    }

    /// Roles allowed to open elevated sessions
    #[must_use]
    pub fn elevated_roles(mut self, roles: Vec<String>) -> Self {
        self.elevated_roles = Some(roles);
        self
    }

    #[must_use]
    pub fn service_name(mut self, name: String) -> Self {
        self.telemetry.service_name = name;
        self
    }

    #[must_use]
    pub fn log_level(mut self, level: String) -> Self {
        self.telemetry.log_level = level;
        self
    }

    #[must_use]
    pub const fn json_logs(mut self, enabled: bool) -> Self {
        self.telemetry.json_logs = enabled;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config> {
        if !self.jwt.has_key() {
            return Err(ApiError::Config(
                "a JWT secret or RSA public key is required".into(),
            ));
        }

        let defaults = self.tenancy.unwrap_or_default();
        let tenancy = TenancyConfig {
            tenant_header: self
                .tenant_header
                .map_or(defaults.tenant_header, |h| h.to_ascii_lowercase()),
            status_cache_ttl: self.status_cache_ttl.unwrap_or(defaults.status_cache_ttl),
            elevated_actors: self.elevated_actors.unwrap_or(defaults.elevated_actors),
            elevated_roles: self.elevated_roles.unwrap_or(defaults.elevated_roles),
        };
        HeaderName::from_bytes(tenancy.tenant_header.as_bytes()).map_err(|_| {
            ApiError::Config(format!("invalid tenant header name: {}", tenancy.tenant_header))
        })?;

        let service_name = if self.telemetry.service_name.is_empty() {
            "msls-server".to_string()
        } else {
            self.telemetry.service_name
        };

        let log_level = if self.telemetry.log_level.is_empty() {
            "info".to_string()
        } else {
            self.telemetry.log_level
        };

        Ok(Config {
            http: self.http,
            pool_size: self.pool_size,
            pool_wait_timeout: self.pool_wait_timeout,
            jwt: self.jwt,
            tenancy,
            telemetry: TelemetryConfig {
                service_name,
                log_level,
                json_logs: self.telemetry.json_logs,
            },
        })
    }
}
