//! Error types for the permissions module.

use filevault_core::CryptoError;
use thiserror::Error;

/// Errors that can occur during permission operations.
#[derive(Debug, Error)]
pub enum PermsError {
    /// A share token could not be parsed.
    #[error("invalid share token")]
    InvalidToken,

    /// Unknown access level string.
    #[error("invalid access level: {0}")]
    InvalidAccessLevel(String),

    /// A grant record violates its invariants.
    #[error("invalid grant: {0}")]
    InvalidGrant(String),

    /// Cryptographic failure while wrapping or unwrapping a token key.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Result type for permission operations.
pub type Result<T> = std::result::Result<T, PermsError>;
