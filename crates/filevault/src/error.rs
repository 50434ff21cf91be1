//! Error types for the vault.
//!
//! Callers cannot tell a missing file or grant from one they may not touch:
//! both surface as [`VaultError::AccessDenied`].

use filevault_core::{CryptoError, FileId, PrincipalId};
use filevault_perms::PermsError;
use filevault_store::StoreError;
use thiserror::Error;

/// Errors that can occur during vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Key pair generation or encoding failed during registration.
    #[error("key generation failed: {0}")]
    KeyGenerationFailure(String),

    /// The recipient exists but has no public key.
    #[error("recipient {0} has no public key")]
    RecipientKeyMissing(PrincipalId),

    /// The recipient already holds a live envelope for the file.
    #[error("grant already exists")]
    DuplicateGrant,

    /// Not permitted. Deliberately carries no reason.
    #[error("access denied")]
    AccessDenied,

    /// Ciphertext or tag failed authentication, or stored data is malformed.
    #[error("file {0} is corrupt or has been tampered with")]
    CorruptOrTampered(FileId),

    /// The file's key changed while the operation was in flight. Nothing it
    /// prepared was kept; retrying against the current file may succeed.
    #[error("key for file {0} changed during the operation")]
    StaleEnvelope(FileId),

    /// The file is already stored encrypted.
    #[error("file {0} is already encrypted")]
    AlreadyEncrypted(FileId),

    /// The file is stored in plaintext.
    #[error("file {0} is not encrypted")]
    NotEncrypted(FileId),

    /// A blob was written but its records were not. The blob has been
    /// removed again.
    #[error("records for file {file_id} could not be committed: {reason}")]
    OrphanWriteFailure { file_id: FileId, reason: String },

    /// The acting principal is unknown or has no key pair.
    #[error("principal not found: {0}")]
    PrincipalNotFound(PrincipalId),

    /// The grant recipient is unknown.
    #[error("recipient not found: {0}")]
    RecipientNotFound(PrincipalId),

    /// The principal already has a key pair.
    #[error("principal {0} is already registered")]
    AlreadyRegistered(PrincipalId),

    /// Expiry is not in the future.
    #[error("expiry must be in the future")]
    InvalidExpiry,

    /// Owners cannot share a file with themselves.
    #[error("cannot share a file with its owner")]
    SelfShare,

    /// Unexpected cryptographic failure while sealing or wrapping.
    #[error("cryptographic failure: {0}")]
    Crypto(CryptoError),

    /// Permission error.
    #[error("permission error: {0}")]
    Permission(#[from] PermsError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
