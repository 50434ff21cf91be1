//! Error types for filevault core.

use thiserror::Error;

/// Errors produced by the cryptographic primitives.
///
/// None of the variants carry key material. `UnwrapFailure` and
/// `AuthenticationFailure` deliberately carry nothing at all.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("invalid key encoding: {0}")]
    InvalidKey(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Tag mismatch on an AEAD open. Never accompanied by partial plaintext.
    #[error("authentication failed")]
    AuthenticationFailure,

    /// Wrapped key could not be recovered. Covers padding errors, wrong
    /// private key, and malformed payloads without distinguishing them.
    #[error("key unwrap failed")]
    UnwrapFailure,

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("malformed blob: {0}")]
    MalformedBlob(String),

    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
