//! JWT parsing and validation

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode_header};

use super::claims::JwtClaims;
use super::config::JwtConfig;
use super::error::{AuthError, Result};

/// JWT validator
pub struct JwtValidator {
    config: JwtConfig,
    hs_key: Option<DecodingKey>,
    rsa_key: Option<DecodingKey>,
}

impl std::fmt::Debug for JwtValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtValidator")
            .field("issuer", &self.config.issuer)
            .field("has_hs_key", &self.hs_key.is_some())
            .field("has_rsa_key", &self.rsa_key.is_some())
            .finish()
    }
}

impl JwtValidator {
    pub fn new(config: JwtConfig) -> Result<Self> {
        let hs_key = config
            .hs_secret
            .as_ref()
            .map(|s| DecodingKey::from_secret(s.as_bytes()));
        let rsa_key = config
            .rsa_public_key_pem
            .as_ref()
            .map(|pem| DecodingKey::from_rsa_pem(pem.as_bytes()))
            .transpose()
            .map_err(|e| AuthError::Config(format!("invalid RSA public key: {e}")))?;

        if hs_key.is_none() && rsa_key.is_none() {
            return Err(AuthError::Config("no token verification key configured".into()));
        }

        Ok(Self {
            config,
            hs_key,
            rsa_key,
        })
    }

    pub fn validate(&self, token: &str) -> Result<JwtClaims> {
        let header = decode_header(token).map_err(|_| AuthError::InvalidToken)?;
        let key = self.decoding_key(header.alg)?;

        let mut validation = Validation::new(header.alg);

        if let Some(issuer) = &self.config.issuer {
            // Normalize issuer by removing trailing slash for comparison
            validation.set_issuer(&[issuer.as_str().trim_end_matches('/')]);
        }

        if self.config.audience.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&self.config.audience);
        }

        validation.leeway = self.config.clock_skew.as_secs();

        let token_data = jsonwebtoken::decode::<JwtClaims>(token, key, &validation)?;
        Ok(token_data.claims)
    }

    fn decoding_key(&self, alg: Algorithm) -> Result<&DecodingKey> {
        let key = match alg {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => self.hs_key.as_ref(),
            Algorithm::RS256 | Algorithm::RS384 | Algorithm::RS512 => self.rsa_key.as_ref(),
            other => return Err(AuthError::UnsupportedAlgorithm(other)),
        };
        key.ok_or(AuthError::UnsupportedAlgorithm(alg))
    }
}
