//! Plain records persisted by the store.

use std::fmt;

use serde::{Deserialize, Serialize};

use filevault_core::{
    CipherAlgorithm, FileId, PrincipalId, ProtectedPrivateKey, PublicKey, WrapAlgorithm,
    WrappedKey, NONCE_LEN, TAG_LEN,
};

use filevault_perms::Grant;

use crate::blob::BlobLocator;
use crate::error::{Result, StoreError};

/// A principal as the store sees it.
///
/// Key columns are `None` until the principal registers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalRecord {
    pub id: PrincipalId,
    /// SPKI PEM.
    pub public_key: Option<String>,
    /// Output of [`ProtectedPrivateKey::to_encoded`].
    pub encrypted_private_key: Option<String>,
    pub created_at: i64,
}

impl PrincipalRecord {
    /// A principal known to the identity provider but without keys.
    pub fn without_keys(id: PrincipalId, now: i64) -> Self {
        Self {
            id,
            public_key: None,
            encrypted_private_key: None,
            created_at: now,
        }
    }

    pub fn has_keys(&self) -> bool {
        self.public_key.is_some() && self.encrypted_private_key.is_some()
    }

    /// Parse the stored public key.
    pub fn parse_public_key(&self) -> Result<Option<PublicKey>> {
        self.public_key
            .as_deref()
            .map(PublicKey::from_pem)
            .transpose()
            .map_err(|e| StoreError::InvalidData(format!("public key for {}: {}", self.id, e)))
    }

    /// Parse the stored protected private key.
    pub fn parse_private_key(&self) -> Result<Option<ProtectedPrivateKey>> {
        self.encrypted_private_key
            .as_deref()
            .map(ProtectedPrivateKey::from_encoded)
            .transpose()
            .map_err(|e| StoreError::InvalidData(format!("private key for {}: {}", self.id, e)))
    }
}

/// How a file's blob is encrypted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealing {
    pub algorithm: CipherAlgorithm,
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
}

/// Metadata for one stored file. The bytes themselves live in a blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedFile {
    pub id: FileId,
    pub owner_id: PrincipalId,
    pub blob: BlobLocator,
    /// `None` while the blob holds plaintext.
    pub sealing: Option<Sealing>,
    pub plaintext_size: u64,
    /// Size of the stored blob, header included.
    pub stored_size: u64,
    /// Advanced whenever the file key changes, including sealing and
    /// unsealing in place.
    pub key_epoch: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SealedFile {
    pub fn is_encrypted(&self) -> bool {
        self.sealing.is_some()
    }

    /// Refuse a write prepared under another key epoch.
    pub fn require_epoch(&self, key_epoch: u32) -> Result<()> {
        if self.key_epoch == key_epoch {
            Ok(())
        } else {
            Err(StoreError::StaleKeyEpoch {
                file_id: self.id,
                expected: key_epoch,
                found: self.key_epoch,
            })
        }
    }

    /// Check the key material accompanying a grant for `recipient_id`: an
    /// envelope at the file's epoch when encrypted, nothing otherwise.
    pub fn check_recipient_envelope(
        &self,
        recipient_id: &PrincipalId,
        envelope: Option<&Envelope>,
    ) -> Result<()> {
        match (self.is_encrypted(), envelope) {
            (true, Some(envelope)) => {
                if envelope.file_id != self.id || envelope.recipient_id != *recipient_id {
                    return Err(StoreError::InvalidData(
                        "envelope does not match grant".into(),
                    ));
                }
                self.require_epoch(envelope.key_epoch)
            }
            (false, None) => Ok(()),
            (true, None) => Err(StoreError::InvalidData(format!(
                "grant on encrypted file {} needs an envelope",
                self.id
            ))),
            (false, Some(_)) => Err(StoreError::InvalidData(format!(
                "plaintext file {} cannot carry an envelope",
                self.id
            ))),
        }
    }

    /// A public grant embeds a key exactly when the file is encrypted.
    pub fn check_public_grant(&self, grant: &Grant) -> Result<()> {
        if !grant.is_public() {
            return Err(StoreError::InvalidData("public grant without token".into()));
        }
        if grant.embedded_key().is_some() != self.is_encrypted() {
            return Err(StoreError::InvalidData(format!(
                "public grant key does not match encryption state of file {}",
                self.id
            )));
        }
        Ok(())
    }

    /// Check that `owner_envelope` is what this file needs: the owner's
    /// envelope at the file's epoch when encrypted, nothing otherwise.
    pub fn check_owner_envelope(&self, owner_envelope: Option<&Envelope>) -> Result<()> {
        match (self.is_encrypted(), owner_envelope) {
            (true, Some(envelope)) => {
                if envelope.file_id != self.id || envelope.recipient_id != self.owner_id {
                    return Err(StoreError::InvalidData(
                        "owner envelope does not match file".into(),
                    ));
                }
                if envelope.key_epoch != self.key_epoch {
                    return Err(StoreError::InvalidData(format!(
                        "owner envelope epoch {} does not match file epoch {}",
                        envelope.key_epoch, self.key_epoch
                    )));
                }
                Ok(())
            }
            (false, None) => Ok(()),
            (true, None) => Err(StoreError::InvalidData(format!(
                "encrypted file {} needs an owner envelope",
                self.id
            ))),
            (false, Some(_)) => Err(StoreError::InvalidData(format!(
                "plaintext file {} cannot carry an envelope",
                self.id
            ))),
        }
    }
}

/// A file key wrapped for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub file_id: FileId,
    pub recipient_id: PrincipalId,
    pub wrapped_key: WrappedKey,
    pub algorithm: WrapAlgorithm,
    /// The file's key epoch when the key was wrapped.
    pub key_epoch: u32,
    pub created_at: i64,
}

/// Envelope listing entry. Carries no key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvelopeSummary {
    pub recipient_id: PrincipalId,
    pub algorithm: WrapAlgorithm,
    pub key_epoch: u32,
    pub created_at: i64,
}

impl From<&Envelope> for EnvelopeSummary {
    fn from(envelope: &Envelope) -> Self {
        Self {
            recipient_id: envelope.recipient_id,
            algorithm: envelope.algorithm,
            key_epoch: envelope.key_epoch,
            created_at: envelope.created_at,
        }
    }
}

/// Audit log actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityAction {
    Register,
    Upload,
    Encrypt,
    Decrypt,
    Delete,
    ShareCreate,
    ShareUpdate,
    ShareDelete,
    ShareDownload,
    ShareAccess,
}

impl ActivityAction {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::Register => "auth:register",
            ActivityAction::Upload => "file:upload",
            ActivityAction::Encrypt => "file:encrypt",
            ActivityAction::Decrypt => "file:decrypt",
            ActivityAction::Delete => "file:delete",
            ActivityAction::ShareCreate => "share:create",
            ActivityAction::ShareUpdate => "share:update",
            ActivityAction::ShareDelete => "share:delete",
            ActivityAction::ShareDownload => "share:download",
            ActivityAction::ShareAccess => "share:access",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "auth:register" => ActivityAction::Register,
            "file:upload" => ActivityAction::Upload,
            "file:encrypt" => ActivityAction::Encrypt,
            "file:decrypt" => ActivityAction::Decrypt,
            "file:delete" => ActivityAction::Delete,
            "share:create" => ActivityAction::ShareCreate,
            "share:update" => ActivityAction::ShareUpdate,
            "share:delete" => ActivityAction::ShareDelete,
            "share:download" => ActivityAction::ShareDownload,
            "share:access" => ActivityAction::ShareAccess,
            _ => return None,
        })
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    /// `None` for anonymous (token) access.
    pub principal_id: Option<PrincipalId>,
    pub action: ActivityAction,
    pub file_id: Option<FileId>,
    pub metadata: serde_json::Value,
    pub created_at: i64,
}

impl ActivityRecord {
    pub fn new(
        principal_id: Option<PrincipalId>,
        action: ActivityAction,
        file_id: Option<FileId>,
        metadata: serde_json::Value,
        now: i64,
    ) -> Self {
        Self {
            principal_id,
            action,
            file_id,
            metadata,
            created_at: now,
        }
    }
}

/// Filter for [`crate::Store::list_activity`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivityFilter {
    pub principal_id: Option<PrincipalId>,
    pub file_id: Option<FileId>,
}

impl ActivityFilter {
    pub fn matches(&self, record: &ActivityRecord) -> bool {
        self.principal_id.map_or(true, |p| record.principal_id == Some(p))
            && self.file_id.map_or(true, |f| record.file_id == Some(f))
    }
}
