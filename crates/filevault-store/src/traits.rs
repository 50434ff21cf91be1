//! Store traits: the abstract interface for vault persistence.
//!
//! [`EnvelopeStore`] covers wrapped file keys alone. [`Store`] extends it with
//! principals, sealed files, grants, and the audit log. Every method that
//! touches more than one record is atomic: either all of it is visible
//! afterwards or none of it is.
//!
//! Writes that carry key material name the file's key epoch they were
//! prepared under. If the stored epoch differs, the write is refused with
//! [`StoreError::StaleKeyEpoch`](crate::StoreError::StaleKeyEpoch) and nothing
//! changes.

use async_trait::async_trait;

use filevault_core::{FileId, GrantId, PrincipalId};
use filevault_perms::{Grant, TokenHash};

use crate::error::Result;
use crate::records::{ActivityFilter, ActivityRecord, Envelope, PrincipalRecord, SealedFile};

/// How [`EnvelopeStore::put_envelope`] treats an existing envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutMode {
    /// Reject if one exists for the pair.
    Insert,
    /// Replace an existing envelope. Used when rotating a file key.
    Rekey,
}

/// Result of a uniqueness-checked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutResult {
    /// Record was new.
    Inserted,
    /// An existing record was overwritten (rekey only).
    Replaced,
    /// A record already exists and nothing was written.
    AlreadyExists,
}

/// What a reseal commit invalidated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResealOutcome {
    /// Non-owner envelopes deleted.
    pub envelopes_invalidated: usize,
    /// Public grants whose embedded key was cleared.
    pub public_keys_cleared: usize,
}

/// Persistence for envelopes.
///
/// At most one envelope exists per (file, recipient). The check and the
/// write happen atomically, so concurrent inserts for one pair leave exactly
/// one row.
#[async_trait]
pub trait EnvelopeStore: Send + Sync {
    /// Store an envelope. The file must exist, be encrypted, and be at the
    /// envelope's key epoch.
    async fn put_envelope(&self, envelope: &Envelope, mode: PutMode) -> Result<PutResult>;

    /// Look up the envelope for one recipient.
    async fn get_envelope(
        &self,
        file_id: &FileId,
        recipient_id: &PrincipalId,
    ) -> Result<Option<Envelope>>;

    /// Delete a non-owner envelope. Returns whether one existed.
    ///
    /// The owner's envelope can only go away with the file.
    async fn delete_envelope(&self, file_id: &FileId, recipient_id: &PrincipalId)
        -> Result<bool>;

    /// All envelopes for a file, owner first.
    async fn list_envelopes(&self, file_id: &FileId) -> Result<Vec<Envelope>>;
}

/// Full vault persistence.
#[async_trait]
pub trait Store: EnvelopeStore {
    // ─────────────────────────────────────────────────────────────────────────
    // Principals
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a principal. `AlreadyExists` if the id is taken.
    async fn insert_principal(&self, record: &PrincipalRecord) -> Result<PutResult>;

    /// Attach keys to a principal that has none.
    ///
    /// `AlreadyExists` if keys are already set. Errors if the principal is
    /// unknown.
    async fn set_principal_keys(
        &self,
        id: &PrincipalId,
        public_key: &str,
        encrypted_private_key: &str,
    ) -> Result<PutResult>;

    async fn get_principal(&self, id: &PrincipalId) -> Result<Option<PrincipalRecord>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist a new file. An encrypted file comes with its owner's
    /// envelope; a plaintext file with none.
    async fn commit_sealed_file(
        &self,
        file: &SealedFile,
        owner_envelope: Option<&Envelope>,
    ) -> Result<()>;

    async fn get_file(&self, id: &FileId) -> Result<Option<SealedFile>>;

    /// Replace a file's sealing parameters and owner envelope after a key
    /// change: a rotation, sealing in place, or unsealing in place.
    ///
    /// Refused unless the stored epoch is `expected_epoch`. Deletes every
    /// non-owner envelope and clears the embedded key of every public grant
    /// on the file. Grant rows themselves survive.
    async fn commit_reseal(
        &self,
        file: &SealedFile,
        owner_envelope: Option<&Envelope>,
        expected_epoch: u32,
    ) -> Result<ResealOutcome>;

    /// Delete a file with all of its envelopes and grants.
    ///
    /// Returns the deleted record so the caller can remove its blob.
    async fn delete_file(&self, id: &FileId) -> Result<Option<SealedFile>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Grants
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist a private grant and, for an encrypted file, the recipient's
    /// envelope.
    ///
    /// Refused unless the file is at `key_epoch`. `AlreadyExists` if the
    /// recipient already holds an envelope for an encrypted file, or a grant
    /// for a plaintext one. A grant row left without an envelope by a key
    /// change is replaced.
    async fn issue_private_grant(
        &self,
        grant: &Grant,
        envelope: Option<&Envelope>,
        key_epoch: u32,
    ) -> Result<PutResult>;

    /// Persist a public grant. Refused unless the file is at `key_epoch`.
    async fn insert_public_grant(&self, grant: &Grant, key_epoch: u32) -> Result<()>;

    async fn get_grant(&self, id: &GrantId) -> Result<Option<Grant>>;

    /// Look up a public grant by token hash, whatever its expiry.
    async fn find_grant_by_token(&self, token_hash: &TokenHash) -> Result<Option<Grant>>;

    /// All grants on a file, oldest first.
    async fn list_grants_for_file(&self, file_id: &FileId) -> Result<Vec<Grant>>;

    /// All private grants naming a principal, oldest first.
    async fn list_grants_for_recipient(&self, recipient_id: &PrincipalId) -> Result<Vec<Grant>>;

    /// All grants an owner has issued across their files, oldest first.
    async fn list_grants_for_owner(&self, owner_id: &PrincipalId) -> Result<Vec<Grant>>;

    /// Overwrite a grant's access level, expiry, and `updated_at`.
    ///
    /// Returns `false` if the grant does not exist.
    async fn update_grant(&self, grant: &Grant) -> Result<bool>;

    /// Delete a grant and, for a private grant, the recipient's envelope.
    async fn delete_grant(&self, id: &GrantId) -> Result<Option<Grant>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Activity
    // ─────────────────────────────────────────────────────────────────────────

    async fn record_activity(&self, record: &ActivityRecord) -> Result<()>;

    /// Matching entries in insertion order.
    async fn list_activity(&self, filter: &ActivityFilter) -> Result<Vec<ActivityRecord>>;
}
