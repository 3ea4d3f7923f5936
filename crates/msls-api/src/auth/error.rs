//! Authentication error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication required")]
    NotAuthenticated,

    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    TokenExpired,

    #[error("invalid issuer")]
    InvalidIssuer,

    #[error("invalid audience")]
    InvalidAudience,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("unsupported signing algorithm: {0:?}")]
    UnsupportedAlgorithm(jsonwebtoken::Algorithm),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            ErrorKind::InvalidIssuer => Self::InvalidIssuer,
            ErrorKind::InvalidAudience => Self::InvalidAudience,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            _ => Self::InvalidToken,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
