//! Token verification settings

use std::time::Duration;

use url::Url;

/// JWT verification configuration
#[derive(Clone)]
pub struct JwtConfig {
    /// Expected `iss` claim; unchecked when `None`
    pub issuer: Option<Url>,
    /// Expected audience claims (must contain at least one match)
    pub audience: Vec<String>,
    /// Clock skew tolerance for exp/nbf validation
    pub clock_skew: Duration,
    /// HS256/384/512 shared secret
    pub hs_secret: Option<String>,
    /// PEM-encoded RSA public key for RS256/384/512
    pub rsa_public_key_pem: Option<String>,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("clock_skew", &self.clock_skew)
            .field("has_hs_secret", &self.hs_secret.is_some())
            .field("has_rsa_public_key", &self.rsa_public_key_pem.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer: None,
            audience: vec![],
            clock_skew: Duration::from_secs(60),
            hs_secret: None,
            rsa_public_key_pem: None,
        }
    }
}

impl JwtConfig {
    #[must_use]
    pub fn with_issuer(mut self, issuer: Url) -> Self {
        self.issuer = Some(issuer);
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: Vec<String>) -> Self {
        self.audience = audience;
        self
    }

    #[must_use]
    pub fn with_hs_secret(mut self, secret: String) -> Self {
        self.hs_secret = Some(secret);
        self
    }

    #[must_use]
    pub fn with_rsa_public_key_pem(mut self, pem: String) -> Self {
        self.rsa_public_key_pem = Some(pem);
        self
    }

    pub const fn has_key(&self) -> bool {
        self.hs_secret.is_some() || self.rsa_public_key_pem.is_some()
    }
}
