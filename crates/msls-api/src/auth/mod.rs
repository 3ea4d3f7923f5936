//! Authentication
//!
//! Bearer JWTs are verified with a shared HS secret or an RSA public key.
//! The verified `sub`, `tenant_id` and `roles` claims become a
//! [`Principal`](msls_tenancy::Principal) for tenant resolution.

mod claims;
mod config;
mod error;
mod jwt;
mod middleware;

pub use claims::{CustomClaims, JwtClaims, OneOrMany, StandardClaims};
pub use config::JwtConfig;
pub use error::{AuthError, Result};
pub use jwt::JwtValidator;
pub use middleware::{authenticate, require_principal, resolve_tenant};
