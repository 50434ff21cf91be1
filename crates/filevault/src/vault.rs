//! The vault: sealing, sharing and retrieval over a store and a blob store.
//!
//! Every operation resolves the caller against the file's owner and grants
//! through [`ShareGate`] before touching key material. Failures to authorize
//! collapse into [`VaultError::AccessDenied`]; the real reason is logged at
//! debug level only.
//!
//! Writes carrying key material are committed against the key epoch they
//! were prepared under. If the file's key moved on in between they fail with
//! [`VaultError::StaleEnvelope`] and leave nothing behind.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::json;
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use filevault_core::{
    now_millis, open, protect, seal, unprotect, unwrap, wrap, CipherAlgorithm, CryptoError,
    FileId, FileKey, GrantId, KdfParams, KeyPairProvider, Passphrase, PrincipalId, PrivateKey,
    PublicKey, RsaKeyPairProvider, SealedPayload, WrapAlgorithm, WrappedKey,
};
use filevault_perms::{
    AccessDecision, AccessLevel, AccessRequest, DenyReason, Grant, GrantUpdate, ShareGate,
    ShareToken,
};
use filevault_store::{
    ActivityAction, ActivityFilter, ActivityRecord, BlobStore, Envelope, EnvelopeSummary,
    PrincipalRecord, PutResult, ResealOutcome, SealedFile, Sealing, Store, StoreError,
};

use crate::caller::Caller;
use crate::error::{Result, VaultError};

/// Configuration for the vault.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Argon2id parameters for newly registered private keys. Existing keys
    /// keep the parameters they were protected with.
    pub kdf: KdfParams,
    /// Reject grants whose expiry is not after the current time.
    pub require_future_expiry: bool,
    /// Write activity log entries.
    pub record_activity: bool,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            require_future_expiry: true,
            record_activity: true,
        }
    }
}

/// What a public link resolves to. Carries no content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicShare {
    pub grant_id: GrantId,
    pub file_id: FileId,
    pub access_level: AccessLevel,
    pub expires_at: Option<i64>,
    pub plaintext_size: u64,
    pub is_encrypted: bool,
    pub shared_at: i64,
}

/// The main vault struct.
///
/// Provides a unified API for:
/// - Registering principal key pairs
/// - Sealing uploads and retrieving plaintext
/// - Private and public sharing, expiry and revocation
/// - Rotating a file key, and sealing or unsealing a file in place
pub struct FileVault<S: Store, B: BlobStore> {
    /// Records: principals, files, envelopes, grants, activity.
    store: Arc<S>,
    /// Ciphertext.
    blobs: Arc<B>,
    /// Source of principal key pairs.
    keys: Arc<dyn KeyPairProvider>,
    config: VaultConfig,
}

impl<S: Store, B: BlobStore> FileVault<S, B> {
    /// Create a vault generating RSA key pairs.
    pub fn new(store: S, blobs: B, config: VaultConfig) -> Self {
        Self::with_key_provider(store, blobs, Arc::new(RsaKeyPairProvider::new()), config)
    }

    /// Create a vault with a custom key pair source.
    pub fn with_key_provider(
        store: S,
        blobs: B,
        keys: Arc<dyn KeyPairProvider>,
        config: VaultConfig,
    ) -> Self {
        Self {
            store: Arc::new(store),
            blobs: Arc::new(blobs),
            keys,
            config,
        }
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Get the blob store reference.
    pub fn blobs(&self) -> &B {
        &self.blobs
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Principals
    // ─────────────────────────────────────────────────────────────────────────

    /// Generate a key pair for a principal and store it, the private half
    /// protected under `passphrase`.
    ///
    /// Creates the principal record if the store has never seen the id.
    pub async fn register_principal(
        &self,
        id: PrincipalId,
        passphrase: &Passphrase,
    ) -> Result<PublicKey> {
        let existing = self.store.get_principal(&id).await?;
        if existing.as_ref().is_some_and(|p| p.public_key.is_some()) {
            return Err(VaultError::AlreadyRegistered(id));
        }

        // RSA generation and Argon2id are CPU-bound.
        let keys = Arc::clone(&self.keys);
        let passphrase = passphrase.clone();
        let kdf = self.config.kdf;
        let (public, public_pem, protected) = tokio::task::spawn_blocking(move || {
            let pair = keys.generate()?;
            let public_pem = pair.public.to_pem()?;
            let protected = protect(&pair.private, &passphrase, &kdf)?.to_encoded();
            Ok::<_, CryptoError>((pair.public, public_pem, protected))
        })
        .await
        .map_err(|e| VaultError::KeyGenerationFailure(e.to_string()))?
        .map_err(|e| VaultError::KeyGenerationFailure(e.to_string()))?;

        let now = now_millis();
        let result = match existing {
            None => {
                let record = PrincipalRecord {
                    id,
                    public_key: Some(public_pem),
                    encrypted_private_key: Some(protected),
                    created_at: now,
                };
                self.store.insert_principal(&record).await?
            }
            Some(_) => {
                self.store
                    .set_principal_keys(&id, &public_pem, &protected)
                    .await?
            }
        };
        if result == PutResult::AlreadyExists {
            return Err(VaultError::AlreadyRegistered(id));
        }

        info!(principal = %id, "registered principal key pair");
        self.record(Some(id), ActivityAction::Register, None, json!({}))
            .await;

        Ok(public)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sealing
    // ─────────────────────────────────────────────────────────────────────────

    /// Encrypt `plaintext` under a fresh file key and store it for `owner_id`.
    ///
    /// The ciphertext is written first. If the records cannot be committed
    /// afterwards the ciphertext is deleted again and
    /// [`VaultError::OrphanWriteFailure`] is returned.
    pub async fn seal_upload(&self, owner_id: &PrincipalId, plaintext: &[u8]) -> Result<SealedFile> {
        let owner_key = self
            .principal_public_key(owner_id)
            .await?
            .ok_or(VaultError::PrincipalNotFound(*owner_id))?;

        let (sealed, wrapped) = seal_for(plaintext, &owner_key)?;
        let locator = self.blobs.put(Bytes::from(sealed.to_blob())).await?;

        let now = now_millis();
        let file = SealedFile {
            id: FileId::new(),
            owner_id: *owner_id,
            blob: locator,
            sealing: Some(sealing_of(&sealed)),
            plaintext_size: plaintext.len() as u64,
            stored_size: sealed.blob_len() as u64,
            key_epoch: 0,
            created_at: now,
            updated_at: now,
        };
        let envelope = owner_envelope(&file, wrapped, now);

        if let Err(e) = self.store.commit_sealed_file(&file, Some(&envelope)).await {
            return Err(self.discard_orphan(&file, e).await);
        }

        info!(file_id = %file.id, owner = %owner_id, size = file.plaintext_size, "sealed upload");
        self.record(
            Some(*owner_id),
            ActivityAction::Upload,
            Some(file.id),
            json!({
                "encrypted": true,
                "plaintext_size": file.plaintext_size,
                "stored_size": file.stored_size,
                "algorithm": CipherAlgorithm::Aes256Gcm.as_str(),
            }),
        )
        .await;

        Ok(file)
    }

    /// Store `bytes` as-is for `owner_id`. The file can be sealed later with
    /// [`FileVault::seal_in_place`].
    pub async fn upload_plain(&self, owner_id: &PrincipalId, bytes: &[u8]) -> Result<SealedFile> {
        if self.store.get_principal(owner_id).await?.is_none() {
            return Err(VaultError::PrincipalNotFound(*owner_id));
        }

        let locator = self.blobs.put(Bytes::copy_from_slice(bytes)).await?;

        let now = now_millis();
        let file = SealedFile {
            id: FileId::new(),
            owner_id: *owner_id,
            blob: locator,
            sealing: None,
            plaintext_size: bytes.len() as u64,
            stored_size: bytes.len() as u64,
            key_epoch: 0,
            created_at: now,
            updated_at: now,
        };

        if let Err(e) = self.store.commit_sealed_file(&file, None).await {
            return Err(self.discard_orphan(&file, e).await);
        }

        info!(file_id = %file.id, owner = %owner_id, size = file.plaintext_size, "stored plaintext upload");
        self.record(
            Some(*owner_id),
            ActivityAction::Upload,
            Some(file.id),
            json!({
                "encrypted": false,
                "plaintext_size": file.plaintext_size,
                "stored_size": file.stored_size,
            }),
        )
        .await;

        Ok(file)
    }

    /// Re-encrypt a file under a new key.
    ///
    /// Every non-owner envelope is deleted and every public grant loses its
    /// embedded key. Grant rows survive, so recipients can be granted again.
    /// Loses to any key change committed since the file was read, with
    /// [`VaultError::StaleEnvelope`].
    pub async fn reseal(&self, owner: &Caller, file_id: &FileId) -> Result<SealedFile> {
        let current = self.require_owner(owner, file_id).await?;
        if !current.is_encrypted() {
            return Err(VaultError::NotEncrypted(*file_id));
        }

        let private = self.unlock(owner).await?;
        let old_key = self.owner_file_key(&current, &private).await?;
        let plaintext = self.read_plaintext(&current, &old_key).await?;

        let (sealed, wrapped) = seal_for(&plaintext, &private.public_key())?;
        let locator = self.blobs.put(Bytes::from(sealed.to_blob())).await?;

        let now = now_millis();
        let file = SealedFile {
            blob: locator,
            sealing: Some(sealing_of(&sealed)),
            stored_size: sealed.blob_len() as u64,
            key_epoch: current.key_epoch + 1,
            updated_at: now,
            ..current.clone()
        };
        let envelope = owner_envelope(&file, wrapped, now);

        let outcome = self
            .commit_key_change(&current, &file, Some(&envelope))
            .await?;

        info!(
            file_id = %file_id,
            key_epoch = file.key_epoch,
            envelopes_invalidated = outcome.envelopes_invalidated,
            public_keys_cleared = outcome.public_keys_cleared,
            "resealed file"
        );
        self.record(
            Some(file.owner_id),
            ActivityAction::Encrypt,
            Some(file.id),
            json!({
                "key_epoch": file.key_epoch,
                "envelopes_invalidated": outcome.envelopes_invalidated,
                "public_keys_cleared": outcome.public_keys_cleared,
            }),
        )
        .await;

        Ok(file)
    }

    /// Encrypt a plaintext file where it stands.
    ///
    /// Needs only the owner's public key. Private grants survive without
    /// envelopes and public grants stay keyless, so sharing must be issued
    /// again before it grants retrieval.
    pub async fn seal_in_place(&self, owner: &Caller, file_id: &FileId) -> Result<SealedFile> {
        let current = self.require_owner(owner, file_id).await?;
        if current.is_encrypted() {
            return Err(VaultError::AlreadyEncrypted(*file_id));
        }
        let owner_key = self
            .principal_public_key(&current.owner_id)
            .await?
            .ok_or(VaultError::PrincipalNotFound(current.owner_id))?;

        let plaintext = self.read_plain(&current).await?;
        let (sealed, wrapped) = seal_for(&plaintext, &owner_key)?;
        let locator = self.blobs.put(Bytes::from(sealed.to_blob())).await?;

        let now = now_millis();
        let file = SealedFile {
            blob: locator,
            sealing: Some(sealing_of(&sealed)),
            stored_size: sealed.blob_len() as u64,
            key_epoch: current.key_epoch + 1,
            updated_at: now,
            ..current.clone()
        };
        let envelope = owner_envelope(&file, wrapped, now);

        self.commit_key_change(&current, &file, Some(&envelope))
            .await?;

        info!(file_id = %file_id, key_epoch = file.key_epoch, "sealed file in place");
        self.record(
            Some(file.owner_id),
            ActivityAction::Encrypt,
            Some(file.id),
            json!({
                "key_epoch": file.key_epoch,
                "plaintext_size": file.plaintext_size,
                "stored_size": file.stored_size,
                "algorithm": CipherAlgorithm::Aes256Gcm.as_str(),
            }),
        )
        .await;

        Ok(file)
    }

    /// Replace a file's ciphertext with its plaintext.
    ///
    /// Every non-owner envelope goes. Grants that survive authorize
    /// retrieval of the plaintext without key material.
    pub async fn unseal(&self, owner: &Caller, file_id: &FileId) -> Result<SealedFile> {
        let current = self.require_owner(owner, file_id).await?;
        if !current.is_encrypted() {
            return Err(VaultError::NotEncrypted(*file_id));
        }

        let private = self.unlock(owner).await?;
        let key = self.owner_file_key(&current, &private).await?;
        let plaintext = self.read_plaintext(&current, &key).await?;
        let locator = self.blobs.put(Bytes::copy_from_slice(&plaintext)).await?;

        let file = SealedFile {
            blob: locator,
            sealing: None,
            stored_size: plaintext.len() as u64,
            key_epoch: current.key_epoch + 1,
            updated_at: now_millis(),
            ..current.clone()
        };

        let outcome = self.commit_key_change(&current, &file, None).await?;

        info!(
            file_id = %file_id,
            key_epoch = file.key_epoch,
            envelopes_invalidated = outcome.envelopes_invalidated,
            "unsealed file"
        );
        self.record(
            Some(file.owner_id),
            ActivityAction::Decrypt,
            Some(file.id),
            json!({
                "key_epoch": file.key_epoch,
                "encrypted_size": current.stored_size,
                "plaintext_size": file.plaintext_size,
            }),
        )
        .await;

        Ok(file)
    }

    /// Delete a file, its envelopes, its grants, and its ciphertext.
    pub async fn delete_file(&self, owner: &Caller, file_id: &FileId) -> Result<()> {
        let file = self.require_owner(owner, file_id).await?;

        let deleted = self
            .store
            .delete_file(file_id)
            .await?
            .ok_or(VaultError::AccessDenied)?;

        if let Err(e) = self.blobs.delete(&deleted.blob).await {
            warn!(file_id = %file_id, blob = %deleted.blob, error = %e, "failed to delete ciphertext");
        }

        info!(file_id = %file_id, "deleted file");
        self.record(
            Some(file.owner_id),
            ActivityAction::Delete,
            Some(*file_id),
            json!({ "plaintext_size": file.plaintext_size }),
        )
        .await;

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sharing
    // ─────────────────────────────────────────────────────────────────────────

    /// Share a file with a registered principal.
    ///
    /// For an encrypted file, unwraps the file key with the owner's private
    /// key and wraps it again for the recipient. The grant and the
    /// recipient's envelope are committed together, and only if the file's
    /// key has not changed since it was unwrapped.
    pub async fn grant_access(
        &self,
        owner: &Caller,
        file_id: &FileId,
        recipient_id: &PrincipalId,
        level: AccessLevel,
        expires_at: Option<i64>,
    ) -> Result<Grant> {
        let file = self.require_owner(owner, file_id).await?;
        if *recipient_id == file.owner_id {
            return Err(VaultError::SelfShare);
        }
        let now = now_millis();
        self.check_expiry(expires_at, now)?;

        let recipient_key = self
            .principal_public_key(recipient_id)
            .await
            .map_err(|e| match e {
                VaultError::PrincipalNotFound(id) => VaultError::RecipientNotFound(id),
                other => other,
            })?;

        let envelope = if file.is_encrypted() {
            let recipient_key =
                recipient_key.ok_or(VaultError::RecipientKeyMissing(*recipient_id))?;
            if self
                .store
                .get_envelope(file_id, recipient_id)
                .await?
                .is_some()
            {
                return Err(VaultError::DuplicateGrant);
            }

            let private = self.unlock(owner).await?;
            let key = self.owner_file_key(&file, &private).await?;
            Some(Envelope {
                file_id: *file_id,
                recipient_id: *recipient_id,
                wrapped_key: wrap(&key, &recipient_key).map_err(VaultError::Crypto)?,
                algorithm: WrapAlgorithm::RsaOaepSha256,
                key_epoch: file.key_epoch,
                created_at: now,
            })
        } else {
            None
        };

        let grant = Grant::private(*file_id, file.owner_id, *recipient_id, level, expires_at, now);
        let issued = self
            .store
            .issue_private_grant(&grant, envelope.as_ref(), file.key_epoch)
            .await
            .map_err(|e| key_changed(file_id, e))?;
        if issued == PutResult::AlreadyExists {
            return Err(VaultError::DuplicateGrant);
        }

        info!(file_id = %file_id, grant_id = %grant.id, recipient = %recipient_id, level = %level, "granted access");
        self.record(
            Some(file.owner_id),
            ActivityAction::ShareCreate,
            Some(*file_id),
            json!({
                "grant_id": grant.id.to_string(),
                "recipient_id": recipient_id.to_string(),
                "access_level": level.as_str(),
                "expires_at": expires_at,
                "public": false,
            }),
        )
        .await;

        Ok(grant)
    }

    /// Create a public link. The returned token is the only copy; the store
    /// keeps its hash.
    ///
    /// For an encrypted file the grant embeds the file key wrapped under
    /// the token, which needs the owner's passphrase.
    pub async fn create_public_link(
        &self,
        owner: &Caller,
        file_id: &FileId,
        level: AccessLevel,
        expires_at: Option<i64>,
    ) -> Result<(Grant, ShareToken)> {
        let file = self.require_owner(owner, file_id).await?;
        let now = now_millis();
        self.check_expiry(expires_at, now)?;

        let token = ShareToken::generate();
        let embedded = if file.is_encrypted() {
            let private = self.unlock(owner).await?;
            let key = self.owner_file_key(&file, &private).await?;
            Some(token.wrap_file_key(&key, file_id)?)
        } else {
            None
        };

        let grant = Grant::public(
            *file_id,
            file.owner_id,
            token.hash(),
            embedded,
            level,
            expires_at,
            now,
        );
        self.store
            .insert_public_grant(&grant, file.key_epoch)
            .await
            .map_err(|e| key_changed(file_id, e))?;

        info!(file_id = %file_id, grant_id = %grant.id, level = %level, "created public link");
        self.record(
            Some(file.owner_id),
            ActivityAction::ShareCreate,
            Some(*file_id),
            json!({
                "grant_id": grant.id.to_string(),
                "access_level": level.as_str(),
                "expires_at": expires_at,
                "public": true,
            }),
        )
        .await;

        Ok((grant, token))
    }

    /// Change a grant's access level or expiry.
    pub async fn update_grant(
        &self,
        owner: &Caller,
        grant_id: &GrantId,
        update: GrantUpdate,
    ) -> Result<Grant> {
        let mut grant = self.require_owned_grant(owner, grant_id).await?;
        let now = now_millis();
        if let Some(expires_at) = update.expires_at {
            self.check_expiry(expires_at, now)?;
        }

        grant.apply(&update, now);
        if !self.store.update_grant(&grant).await? {
            return Err(VaultError::AccessDenied);
        }

        info!(grant_id = %grant_id, level = %grant.access_level, "updated grant");
        self.record(
            Some(grant.owner_id),
            ActivityAction::ShareUpdate,
            Some(grant.file_id),
            json!({
                "grant_id": grant_id.to_string(),
                "access_level": grant.access_level.as_str(),
                "expires_at": grant.expires_at,
            }),
        )
        .await;

        Ok(grant)
    }

    /// Revoke a grant. A private grant's envelope goes with it.
    pub async fn revoke(&self, owner: &Caller, grant_id: &GrantId) -> Result<()> {
        let grant = self.require_owned_grant(owner, grant_id).await?;

        self.store
            .delete_grant(grant_id)
            .await?
            .ok_or(VaultError::AccessDenied)?;

        info!(grant_id = %grant_id, file_id = %grant.file_id, "revoked grant");
        self.record(
            Some(grant.owner_id),
            ActivityAction::ShareDelete,
            Some(grant.file_id),
            json!({
                "grant_id": grant_id.to_string(),
                "public": grant.is_public(),
            }),
        )
        .await;

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retrieval
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve what `caller` may do with a file without releasing anything.
    ///
    /// Denials never say why: a missing file, a missing grant and an expired
    /// grant all read as [`DenyReason::NoGrant`].
    pub async fn access(
        &self,
        caller: &Caller,
        file_id: &FileId,
        token: Option<&ShareToken>,
    ) -> Result<AccessDecision> {
        let Some(file) = self.store.get_file(file_id).await? else {
            debug!(file_id = %file_id, "access to unknown file");
            return Ok(AccessDecision::Denied(DenyReason::NoGrant));
        };

        let (decision, _) = self.evaluate(caller, &file, token).await?;
        if !decision.is_allowed() {
            return Ok(AccessDecision::Denied(DenyReason::NoGrant));
        }

        if let Some(grant_id) = decision.grant_id() {
            self.record(
                caller.principal_id().copied(),
                ActivityAction::ShareAccess,
                Some(*file_id),
                json!({ "grant_id": grant_id.to_string() }),
            )
            .await;
        }

        Ok(decision)
    }

    /// Retrieve and decrypt a file.
    ///
    /// Requires ownership or a live grant whose level permits retrieval. For
    /// an encrypted file a private grant additionally needs the caller's
    /// envelope at the file's current key epoch, which a key change removes.
    pub async fn fetch(
        &self,
        caller: &Caller,
        file_id: &FileId,
        token: Option<&ShareToken>,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let Some(file) = self.store.get_file(file_id).await? else {
            debug!(file_id = %file_id, "fetch of unknown file");
            return Err(VaultError::AccessDenied);
        };

        let (decision, grants) = self.evaluate(caller, &file, token).await?;
        if !decision.permits_retrieval() {
            debug!(file_id = %file_id, ?decision, "retrieval refused");
            return Err(VaultError::AccessDenied);
        }

        let plaintext = if file.is_encrypted() {
            let key = self
                .retrieval_key(caller, &file, &decision, &grants, token)
                .await?;
            self.read_plaintext(&file, &key).await?
        } else {
            self.read_plain(&file).await?
        };

        if let Some(grant_id) = decision.grant_id() {
            self.record(
                caller.principal_id().copied(),
                ActivityAction::ShareDownload,
                Some(*file_id),
                json!({
                    "grant_id": grant_id.to_string(),
                    "public": matches!(decision, AccessDecision::PublicGrant { .. }),
                }),
            )
            .await;
        }

        Ok(plaintext)
    }

    /// Describe what a public link points at, given only its token.
    ///
    /// Unknown, revoked and expired tokens all read as
    /// [`VaultError::AccessDenied`].
    pub async fn public_share(&self, token: &ShareToken) -> Result<PublicShare> {
        let grant = self.resolve_token(token).await?;
        let Some(file) = self.store.get_file(&grant.file_id).await? else {
            return Err(VaultError::AccessDenied);
        };

        let (decision, _) = self.evaluate(&Caller::anonymous(), &file, Some(token)).await?;
        if decision.grant_id() != Some(grant.id) {
            debug!(grant_id = %grant.id, ?decision, "public link no longer authorizes");
            return Err(VaultError::AccessDenied);
        }

        self.record(
            None,
            ActivityAction::ShareAccess,
            Some(file.id),
            json!({
                "grant_id": grant.id.to_string(),
                "public": true,
            }),
        )
        .await;

        Ok(PublicShare {
            grant_id: grant.id,
            file_id: file.id,
            access_level: grant.access_level,
            expires_at: grant.expires_at,
            plaintext_size: file.plaintext_size,
            is_encrypted: file.is_encrypted(),
            shared_at: grant.created_at,
        })
    }

    /// Retrieve a file through a public link, given only its token.
    pub async fn fetch_shared(&self, token: &ShareToken) -> Result<Zeroizing<Vec<u8>>> {
        let grant = self.resolve_token(token).await?;
        self.fetch(&Caller::anonymous(), &grant.file_id, Some(token))
            .await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Listing
    // ─────────────────────────────────────────────────────────────────────────

    /// All grants on a file, oldest first. Owner only.
    pub async fn list_grants(&self, owner: &Caller, file_id: &FileId) -> Result<Vec<Grant>> {
        self.require_owner(owner, file_id).await?;
        Ok(self.store.list_grants_for_file(file_id).await?)
    }

    /// Every grant the caller has issued, across all their files, oldest
    /// first. Expired grants are included.
    pub async fn owned_grants(&self, caller: &Caller) -> Result<Vec<Grant>> {
        let principal = caller.principal_id().ok_or(VaultError::AccessDenied)?;
        Ok(self.store.list_grants_for_owner(principal).await?)
    }

    /// Unexpired private grants naming the caller.
    pub async fn received_grants(&self, caller: &Caller) -> Result<Vec<Grant>> {
        let principal = caller.principal_id().ok_or(VaultError::AccessDenied)?;
        let now = now_millis();
        let grants = self.store.list_grants_for_recipient(principal).await?;
        Ok(grants.into_iter().filter(|g| !g.is_expired(now)).collect())
    }

    /// Who holds an envelope for a file, owner first. Owner only.
    pub async fn list_envelopes(
        &self,
        owner: &Caller,
        file_id: &FileId,
    ) -> Result<Vec<EnvelopeSummary>> {
        self.require_owner(owner, file_id).await?;
        let envelopes = self.store.list_envelopes(file_id).await?;
        Ok(envelopes.iter().map(EnvelopeSummary::from).collect())
    }

    /// Activity log entries touching a file. Owner only.
    pub async fn file_activity(
        &self,
        owner: &Caller,
        file_id: &FileId,
    ) -> Result<Vec<ActivityRecord>> {
        self.require_owner(owner, file_id).await?;
        let filter = ActivityFilter {
            principal_id: None,
            file_id: Some(*file_id),
        };
        Ok(self.store.list_activity(&filter).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal
    // ─────────────────────────────────────────────────────────────────────────

    /// The principal's public key. `None` if they have not registered.
    async fn principal_public_key(&self, id: &PrincipalId) -> Result<Option<PublicKey>> {
        let record = self
            .store
            .get_principal(id)
            .await?
            .ok_or(VaultError::PrincipalNotFound(*id))?;
        Ok(record.parse_public_key()?)
    }

    /// Decrypt the caller's private key. Any failure is a denial.
    async fn unlock(&self, caller: &Caller) -> Result<PrivateKey> {
        let (Some(id), Some(passphrase)) = (caller.principal_id(), caller.passphrase()) else {
            return Err(VaultError::AccessDenied);
        };
        let Some(record) = self.store.get_principal(id).await? else {
            return Err(VaultError::AccessDenied);
        };
        let protected = record
            .parse_private_key()?
            .ok_or(VaultError::AccessDenied)?;

        unprotect(&protected, passphrase).map_err(|e| {
            debug!(principal = %id, error = %e, "private key unlock failed");
            VaultError::AccessDenied
        })
    }

    /// The file if `caller` owns it.
    async fn require_owner(&self, caller: &Caller, file_id: &FileId) -> Result<SealedFile> {
        let principal = caller.principal_id().ok_or(VaultError::AccessDenied)?;
        let Some(file) = self.store.get_file(file_id).await? else {
            debug!(file_id = %file_id, "owner operation on unknown file");
            return Err(VaultError::AccessDenied);
        };

        let request = AccessRequest {
            file_id,
            file_owner: &file.owner_id,
            caller: Some(principal),
            token: None,
        };
        if ShareGate::evaluate(&request, &[], now_millis()) != AccessDecision::Owner {
            debug!(file_id = %file_id, principal = %principal, "caller is not the owner");
            return Err(VaultError::AccessDenied);
        }

        Ok(file)
    }

    /// The grant if `caller` owns the file it belongs to.
    async fn require_owned_grant(&self, caller: &Caller, grant_id: &GrantId) -> Result<Grant> {
        let Some(grant) = self.store.get_grant(grant_id).await? else {
            debug!(grant_id = %grant_id, "operation on unknown grant");
            return Err(VaultError::AccessDenied);
        };
        self.require_owner(caller, &grant.file_id).await?;
        Ok(grant)
    }

    /// Evaluate a retrieval or metadata request.
    async fn evaluate(
        &self,
        caller: &Caller,
        file: &SealedFile,
        token: Option<&ShareToken>,
    ) -> Result<(AccessDecision, Vec<Grant>)> {
        let grants = self.store.list_grants_for_file(&file.id).await?;
        let token_hash = token.map(ShareToken::hash);

        let request = AccessRequest {
            file_id: &file.id,
            file_owner: &file.owner_id,
            caller: caller.principal_id(),
            token: token_hash.as_ref(),
        };
        let decision = ShareGate::evaluate(&request, &grants, now_millis());
        debug!(file_id = %file.id, ?decision, "evaluated access");

        Ok((decision, grants))
    }

    fn check_expiry(&self, expires_at: Option<i64>, now: i64) -> Result<()> {
        match expires_at {
            Some(at) if self.config.require_future_expiry && at <= now => {
                Err(VaultError::InvalidExpiry)
            }
            _ => Ok(()),
        }
    }

    /// Unwrap the file key from the owner's envelope.
    async fn owner_file_key(&self, file: &SealedFile, private: &PrivateKey) -> Result<FileKey> {
        let Some(envelope) = self.store.get_envelope(&file.id, &file.owner_id).await? else {
            return Err(match self.store.get_file(&file.id).await? {
                None => VaultError::AccessDenied,
                Some(latest) if latest.key_epoch != file.key_epoch => {
                    VaultError::StaleEnvelope(file.id)
                }
                Some(_) => {
                    error!(file_id = %file.id, "owner envelope missing");
                    VaultError::CorruptOrTampered(file.id)
                }
            });
        };
        if envelope.key_epoch != file.key_epoch {
            debug!(file_id = %file.id, read = file.key_epoch, found = envelope.key_epoch, "owner envelope from another key epoch");
            return Err(VaultError::StaleEnvelope(file.id));
        }
        unwrap(&envelope.wrapped_key, private).map_err(|_| VaultError::AccessDenied)
    }

    /// The file key for an authorized retrieval of an encrypted file.
    async fn retrieval_key(
        &self,
        caller: &Caller,
        file: &SealedFile,
        decision: &AccessDecision,
        grants: &[Grant],
        token: Option<&ShareToken>,
    ) -> Result<FileKey> {
        match decision {
            AccessDecision::Owner | AccessDecision::PrivateGrant { .. } => {
                let principal = caller.principal_id().ok_or(VaultError::AccessDenied)?;
                let Some(envelope) = self.store.get_envelope(&file.id, principal).await? else {
                    debug!(file_id = %file.id, principal = %principal, "no envelope for caller");
                    return Err(VaultError::AccessDenied);
                };
                if envelope.key_epoch != file.key_epoch {
                    debug!(file_id = %file.id, principal = %principal, "envelope from another key epoch");
                    return Err(VaultError::StaleEnvelope(file.id));
                }
                let private = self.unlock(caller).await?;
                unwrap(&envelope.wrapped_key, &private).map_err(|_| VaultError::AccessDenied)
            }
            AccessDecision::PublicGrant { grant_id, .. } => {
                let token = token.ok_or(VaultError::AccessDenied)?;
                let Some(embedded) = grants
                    .iter()
                    .find(|g| g.id == *grant_id)
                    .and_then(Grant::embedded_key)
                else {
                    debug!(file_id = %file.id, grant_id = %grant_id, "public grant has no key");
                    return Err(VaultError::AccessDenied);
                };
                token
                    .unwrap_file_key(embedded, &file.id)
                    .map_err(|_| VaultError::AccessDenied)
            }
            AccessDecision::Denied(_) => Err(VaultError::AccessDenied),
        }
    }

    /// The unexpired grant behind a public token.
    async fn resolve_token(&self, token: &ShareToken) -> Result<Grant> {
        let hash = token.hash();
        let Some(grant) = self.store.find_grant_by_token(&hash).await? else {
            debug!(token = ?hash, "unknown share token");
            return Err(VaultError::AccessDenied);
        };
        if grant.is_expired(now_millis()) {
            debug!(grant_id = %grant.id, "expired share token");
            return Err(VaultError::AccessDenied);
        }
        Ok(grant)
    }

    /// Load a file's blob. A blob missing because a key change replaced it
    /// is [`VaultError::StaleEnvelope`].
    async fn load_blob(&self, file: &SealedFile) -> Result<Bytes> {
        match self.blobs.get(&file.blob).await {
            Ok(blob) => Ok(blob),
            Err(StoreError::NotFound(_)) => match self.store.get_file(&file.id).await? {
                Some(latest) if latest.blob != file.blob || latest.key_epoch != file.key_epoch => {
                    debug!(file_id = %file.id, blob = %file.blob, "blob superseded by a key change");
                    Err(VaultError::StaleEnvelope(file.id))
                }
                Some(_) => {
                    warn!(file_id = %file.id, blob = %file.blob, "stored blob missing");
                    Err(VaultError::CorruptOrTampered(file.id))
                }
                None => {
                    debug!(file_id = %file.id, "file deleted during read");
                    Err(VaultError::AccessDenied)
                }
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Load a plaintext file's bytes, checking them against the file record.
    async fn read_plain(&self, file: &SealedFile) -> Result<Zeroizing<Vec<u8>>> {
        let blob = self.load_blob(file).await?;
        if blob.len() as u64 != file.plaintext_size {
            warn!(file_id = %file.id, expected = file.plaintext_size, found = blob.len(), "plaintext size does not match file record");
            return Err(VaultError::CorruptOrTampered(file.id));
        }
        Ok(Zeroizing::new(blob.to_vec()))
    }

    /// Load the ciphertext and open it, checking it against the file record.
    async fn read_plaintext(&self, file: &SealedFile, key: &FileKey) -> Result<Zeroizing<Vec<u8>>> {
        let sealing = file
            .sealing
            .as_ref()
            .ok_or(VaultError::NotEncrypted(file.id))?;
        let blob = self.load_blob(file).await?;

        let sealed = SealedPayload::from_blob(&blob).map_err(|e| {
            warn!(file_id = %file.id, error = %e, "malformed ciphertext");
            VaultError::CorruptOrTampered(file.id)
        })?;
        if sealed.nonce() != &sealing.nonce || sealed.tag() != &sealing.tag {
            warn!(file_id = %file.id, "ciphertext header does not match file record");
            return Err(VaultError::CorruptOrTampered(file.id));
        }

        match open(&sealed, key) {
            Ok(plaintext) => Ok(Zeroizing::new(plaintext)),
            Err(CryptoError::AuthenticationFailure) => {
                warn!(file_id = %file.id, "ciphertext failed authentication");
                Err(VaultError::CorruptOrTampered(file.id))
            }
            Err(e) => Err(VaultError::Crypto(e)),
        }
    }

    /// Commit `next` over `current`, provided no other key change landed in
    /// between, then drop the superseded blob. On any failure the new blob
    /// is removed again.
    async fn commit_key_change(
        &self,
        current: &SealedFile,
        next: &SealedFile,
        owner_envelope: Option<&Envelope>,
    ) -> Result<ResealOutcome> {
        match self
            .store
            .commit_reseal(next, owner_envelope, current.key_epoch)
            .await
        {
            Ok(outcome) => {
                if let Err(e) = self.blobs.delete(&current.blob).await {
                    warn!(file_id = %current.id, blob = %current.blob, error = %e, "failed to delete superseded blob");
                }
                Ok(outcome)
            }
            Err(StoreError::StaleKeyEpoch { expected, found, .. }) => {
                warn!(file_id = %current.id, expected, found, "key changed concurrently, discarding new blob");
                self.discard_blob(next).await;
                Err(VaultError::StaleEnvelope(current.id))
            }
            Err(e) => Err(self.discard_orphan(next, e).await),
        }
    }

    /// Remove a blob whose records failed to commit.
    async fn discard_orphan(&self, file: &SealedFile, cause: StoreError) -> VaultError {
        error!(file_id = %file.id, blob = %file.blob, error = %cause, "record commit failed after blob write");
        self.discard_blob(file).await;
        VaultError::OrphanWriteFailure {
            file_id: file.id,
            reason: cause.to_string(),
        }
    }

    async fn discard_blob(&self, file: &SealedFile) {
        if let Err(e) = self.blobs.delete(&file.blob).await {
            error!(file_id = %file.id, blob = %file.blob, error = %e, "orphaned blob could not be removed");
        }
    }

    /// Append to the activity log. Failures are logged, never raised: the
    /// operation they describe has already committed.
    async fn record(
        &self,
        principal_id: Option<PrincipalId>,
        action: ActivityAction,
        file_id: Option<FileId>,
        metadata: serde_json::Value,
    ) {
        if !self.config.record_activity {
            return;
        }
        let record = ActivityRecord::new(principal_id, action, file_id, metadata, now_millis());
        if let Err(e) = self.store.record_activity(&record).await {
            warn!(action = %action, error = %e, "failed to record activity");
        }
    }
}

/// Encrypt under a fresh file key and wrap that key for `owner_key`.
fn seal_for(plaintext: &[u8], owner_key: &PublicKey) -> Result<(SealedPayload, WrappedKey)> {
    let key = FileKey::generate();
    let sealed = seal(plaintext, &key).map_err(VaultError::Crypto)?;
    let wrapped = wrap(&key, owner_key).map_err(VaultError::Crypto)?;
    Ok((sealed, wrapped))
}

fn sealing_of(sealed: &SealedPayload) -> Sealing {
    Sealing {
        algorithm: CipherAlgorithm::Aes256Gcm,
        nonce: *sealed.nonce(),
        tag: *sealed.tag(),
    }
}

fn owner_envelope(file: &SealedFile, wrapped_key: WrappedKey, now: i64) -> Envelope {
    Envelope {
        file_id: file.id,
        recipient_id: file.owner_id,
        wrapped_key,
        algorithm: WrapAlgorithm::RsaOaepSha256,
        key_epoch: file.key_epoch,
        created_at: now,
    }
}

/// A grant refused because the file key moved on is reported as such.
fn key_changed(file_id: &FileId, e: StoreError) -> VaultError {
    match e {
        StoreError::StaleKeyEpoch { expected, found, .. } => {
            debug!(file_id = %file_id, expected, found, "grant prepared under a superseded key");
            VaultError::StaleEnvelope(*file_id)
        }
        other => other.into(),
    }
}
