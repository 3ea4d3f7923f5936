//! JWT claims types

use msls_tenancy::Principal;
use serde::Deserialize;

/// Audience can be a single string or array of strings
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn contains(&self, value: &str) -> bool {
        match self {
            Self::One(s) => s == value,
            Self::Many(v) => v.iter().any(|s| s == value),
        }
    }
}

/// Standard JWT claims we validate
#[derive(Debug, Clone, Deserialize)]
pub struct StandardClaims {
    pub sub: String,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<OneOrMany>,
    pub exp: i64,
    #[serde(default)]
    pub nbf: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
}

/// School ERP claims
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CustomClaims {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Complete JWT payload
#[derive(Debug, Clone, Deserialize)]
pub struct JwtClaims {
    #[serde(flatten)]
    pub standard: StandardClaims,
    #[serde(flatten)]
    pub custom: CustomClaims,
}

impl JwtClaims {
    /// Identity handed to tenant resolution
    pub fn principal(&self) -> Principal {
        let principal =
            Principal::new(self.standard.sub.clone()).with_roles(self.custom.roles.clone());
        match &self.custom.tenant_id {
            Some(tenant) => principal.with_tenant(tenant.clone()),
            None => principal,
        }
    }
}
