//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use filevault_core::{FileId, GrantId, PrincipalId};
use filevault_perms::{Grant, TokenHash};

use crate::error::{Result, StoreError};
use crate::records::{ActivityFilter, ActivityRecord, Envelope, PrincipalRecord, SealedFile};
use crate::traits::{EnvelopeStore, PutMode, PutResult, ResealOutcome, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock; every
/// method holds the lock for its whole duration, which makes composite writes
/// atomic.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
    fail_writes: AtomicBool,
}

#[derive(Default)]
struct MemoryStoreInner {
    principals: HashMap<PrincipalId, PrincipalRecord>,

    files: HashMap<FileId, SealedFile>,

    /// Owner envelopes, one per file.
    owner_envelopes: HashMap<FileId, Envelope>,

    /// Non-owner envelopes.
    envelopes: BTreeMap<(FileId, PrincipalId), Envelope>,

    /// Grants with their insertion sequence.
    grants: HashMap<GrantId, (u64, Grant)>,

    /// Public token index: token hash -> grant id.
    tokens: HashMap<TokenHash, GrantId>,

    next_grant_seq: u64,

    activity: Vec<ActivityRecord>,
}

impl MemoryStoreInner {
    fn require_file(&self, id: &FileId) -> Result<&SealedFile> {
        self.files
            .get(id)
            .ok_or_else(|| StoreError::NotFound(format!("file {}", id)))
    }

    fn require_principal(&self, id: &PrincipalId) -> Result<()> {
        if self.principals.contains_key(id) {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("principal {}", id)))
        }
    }

    fn remove_grant(&mut self, id: &GrantId) -> Option<Grant> {
        let (_, grant) = self.grants.remove(id)?;
        if let Some(hash) = grant.token_hash() {
            self.tokens.remove(hash);
        }
        Some(grant)
    }

    fn sorted_grants<'a>(&'a self, pred: impl Fn(&Grant) -> bool) -> Vec<Grant> {
        let mut matched: Vec<&'a (u64, Grant)> =
            self.grants.values().filter(|(_, g)| pred(g)).collect();
        matched.sort_by_key(|(seq, g)| (g.created_at, *seq));
        matched.into_iter().map(|(_, g)| g.clone()).collect()
    }
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent write fail with [`StoreError::Unavailable`].
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryStoreInner>> {
        self.inner
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryStoreInner>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".into()));
        }
        self.inner
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EnvelopeStore for MemoryStore {
    async fn put_envelope(&self, envelope: &Envelope, mode: PutMode) -> Result<PutResult> {
        let mut inner = self.write()?;
        let file = inner.require_file(&envelope.file_id)?;
        if !file.is_encrypted() {
            return Err(StoreError::InvalidData(format!(
                "file {} is not encrypted",
                file.id
            )));
        }
        file.require_epoch(envelope.key_epoch)?;
        let owner_id = file.owner_id;

        if envelope.recipient_id == owner_id {
            return Ok(match mode {
                PutMode::Insert => PutResult::AlreadyExists,
                PutMode::Rekey => {
                    inner
                        .owner_envelopes
                        .insert(envelope.file_id, envelope.clone());
                    PutResult::Replaced
                }
            });
        }

        inner.require_principal(&envelope.recipient_id)?;
        let key = (envelope.file_id, envelope.recipient_id);
        let exists = inner.envelopes.contains_key(&key);

        match (exists, mode) {
            (true, PutMode::Insert) => Ok(PutResult::AlreadyExists),
            (true, PutMode::Rekey) => {
                inner.envelopes.insert(key, envelope.clone());
                Ok(PutResult::Replaced)
            }
            (false, _) => {
                inner.envelopes.insert(key, envelope.clone());
                Ok(PutResult::Inserted)
            }
        }
    }

    async fn get_envelope(
        &self,
        file_id: &FileId,
        recipient_id: &PrincipalId,
    ) -> Result<Option<Envelope>> {
        let inner = self.read()?;
        let Some(file) = inner.files.get(file_id) else {
            return Ok(None);
        };

        if file.owner_id == *recipient_id {
            return Ok(inner.owner_envelopes.get(file_id).cloned());
        }
        Ok(inner.envelopes.get(&(*file_id, *recipient_id)).cloned())
    }

    async fn delete_envelope(
        &self,
        file_id: &FileId,
        recipient_id: &PrincipalId,
    ) -> Result<bool> {
        let mut inner = self.write()?;
        Ok(inner.envelopes.remove(&(*file_id, *recipient_id)).is_some())
    }

    async fn list_envelopes(&self, file_id: &FileId) -> Result<Vec<Envelope>> {
        let inner = self.read()?;
        let mut out: Vec<Envelope> = inner.owner_envelopes.get(file_id).cloned().into_iter().collect();

        let mut others: Vec<Envelope> = inner
            .envelopes
            .range((*file_id, PrincipalId::from_uuid(uuid::Uuid::nil()))..)
            .take_while(|((f, _), _)| f == file_id)
            .map(|(_, e)| e.clone())
            .collect();
        others.sort_by_key(|e| (e.created_at, e.recipient_id));

        out.extend(others);
        Ok(out)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_principal(&self, record: &PrincipalRecord) -> Result<PutResult> {
        let mut inner = self.write()?;
        if inner.principals.contains_key(&record.id) {
            return Ok(PutResult::AlreadyExists);
        }
        inner.principals.insert(record.id, record.clone());
        Ok(PutResult::Inserted)
    }

    async fn set_principal_keys(
        &self,
        id: &PrincipalId,
        public_key: &str,
        encrypted_private_key: &str,
    ) -> Result<PutResult> {
        let mut inner = self.write()?;
        let record = inner
            .principals
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("principal {}", id)))?;

        if record.public_key.is_some() {
            return Ok(PutResult::AlreadyExists);
        }
        record.public_key = Some(public_key.to_string());
        record.encrypted_private_key = Some(encrypted_private_key.to_string());
        Ok(PutResult::Inserted)
    }

    async fn get_principal(&self, id: &PrincipalId) -> Result<Option<PrincipalRecord>> {
        Ok(self.read()?.principals.get(id).cloned())
    }

    async fn commit_sealed_file(
        &self,
        file: &SealedFile,
        owner_envelope: Option<&Envelope>,
    ) -> Result<()> {
        file.check_owner_envelope(owner_envelope)?;

        let mut inner = self.write()?;
        inner.require_principal(&file.owner_id)?;
        if inner.files.contains_key(&file.id) {
            return Err(StoreError::InvalidData(format!("file {} already exists", file.id)));
        }

        inner.files.insert(file.id, file.clone());
        if let Some(envelope) = owner_envelope {
            inner.owner_envelopes.insert(file.id, envelope.clone());
        }
        Ok(())
    }

    async fn get_file(&self, id: &FileId) -> Result<Option<SealedFile>> {
        Ok(self.read()?.files.get(id).cloned())
    }

    async fn commit_reseal(
        &self,
        file: &SealedFile,
        owner_envelope: Option<&Envelope>,
        expected_epoch: u32,
    ) -> Result<ResealOutcome> {
        file.check_owner_envelope(owner_envelope)?;

        let mut inner = self.write()?;
        inner.require_file(&file.id)?.require_epoch(expected_epoch)?;

        inner.files.insert(file.id, file.clone());
        match owner_envelope {
            Some(envelope) => inner.owner_envelopes.insert(file.id, envelope.clone()),
            None => inner.owner_envelopes.remove(&file.id),
        };

        let before = inner.envelopes.len();
        inner.envelopes.retain(|(f, _), _| *f != file.id);
        let envelopes_invalidated = before - inner.envelopes.len();

        let mut public_keys_cleared = 0;
        for (_, grant) in inner.grants.values_mut() {
            if grant.file_id == file.id && grant.embedded_key().is_some() {
                grant.clear_embedded_key();
                public_keys_cleared += 1;
            }
        }

        Ok(ResealOutcome {
            envelopes_invalidated,
            public_keys_cleared,
        })
    }

    async fn delete_file(&self, id: &FileId) -> Result<Option<SealedFile>> {
        let mut inner = self.write()?;
        let Some(file) = inner.files.remove(id) else {
            return Ok(None);
        };

        inner.owner_envelopes.remove(id);
        inner.envelopes.retain(|(f, _), _| f != id);

        let doomed: Vec<GrantId> = inner
            .grants
            .values()
            .filter(|(_, g)| g.file_id == *id)
            .map(|(_, g)| g.id)
            .collect();
        for grant_id in doomed {
            inner.remove_grant(&grant_id);
        }

        Ok(Some(file))
    }

    async fn issue_private_grant(
        &self,
        grant: &Grant,
        envelope: Option<&Envelope>,
        key_epoch: u32,
    ) -> Result<PutResult> {
        let recipient = *grant
            .recipient()
            .ok_or_else(|| StoreError::InvalidData("private grant without recipient".into()))?;

        let mut inner = self.write()?;
        let file = inner.require_file(&grant.file_id)?;
        file.require_epoch(key_epoch)?;
        file.check_recipient_envelope(&recipient, envelope)?;
        let encrypted = file.is_encrypted();
        inner.require_principal(&recipient)?;

        let key = (grant.file_id, recipient);
        let existing: Vec<GrantId> = inner
            .grants
            .values()
            .filter(|(_, g)| g.file_id == grant.file_id && g.recipient() == Some(&recipient))
            .map(|(_, g)| g.id)
            .collect();

        let live = if encrypted {
            inner.envelopes.contains_key(&key)
        } else {
            !existing.is_empty()
        };
        if live {
            return Ok(PutResult::AlreadyExists);
        }

        for grant_id in existing {
            inner.remove_grant(&grant_id);
        }

        let seq = inner.next_grant_seq;
        inner.next_grant_seq += 1;
        inner.grants.insert(grant.id, (seq, grant.clone()));
        if let Some(envelope) = envelope {
            inner.envelopes.insert(key, envelope.clone());
        }

        Ok(PutResult::Inserted)
    }

    async fn insert_public_grant(&self, grant: &Grant, key_epoch: u32) -> Result<()> {
        let mut inner = self.write()?;
        let file = inner.require_file(&grant.file_id)?;
        file.require_epoch(key_epoch)?;
        file.check_public_grant(grant)?;

        let hash = *grant
            .token_hash()
            .ok_or_else(|| StoreError::InvalidData("public grant without token".into()))?;
        if inner.tokens.contains_key(&hash) {
            return Err(StoreError::InvalidData("duplicate share token".into()));
        }

        let seq = inner.next_grant_seq;
        inner.next_grant_seq += 1;
        inner.grants.insert(grant.id, (seq, grant.clone()));
        inner.tokens.insert(hash, grant.id);
        Ok(())
    }

    async fn get_grant(&self, id: &GrantId) -> Result<Option<Grant>> {
        Ok(self.read()?.grants.get(id).map(|(_, g)| g.clone()))
    }

    async fn find_grant_by_token(&self, token_hash: &TokenHash) -> Result<Option<Grant>> {
        let inner = self.read()?;
        Ok(inner
            .tokens
            .get(token_hash)
            .and_then(|id| inner.grants.get(id))
            .map(|(_, g)| g.clone()))
    }

    async fn list_grants_for_file(&self, file_id: &FileId) -> Result<Vec<Grant>> {
        Ok(self.read()?.sorted_grants(|g| g.file_id == *file_id))
    }

    async fn list_grants_for_recipient(&self, recipient_id: &PrincipalId) -> Result<Vec<Grant>> {
        Ok(self
            .read()?
            .sorted_grants(|g| g.recipient() == Some(recipient_id)))
    }

    async fn list_grants_for_owner(&self, owner_id: &PrincipalId) -> Result<Vec<Grant>> {
        Ok(self.read()?.sorted_grants(|g| g.owner_id == *owner_id))
    }

    async fn update_grant(&self, grant: &Grant) -> Result<bool> {
        let mut inner = self.write()?;
        let Some((_, stored)) = inner.grants.get_mut(&grant.id) else {
            return Ok(false);
        };

        stored.access_level = grant.access_level;
        stored.expires_at = grant.expires_at;
        stored.updated_at = grant.updated_at;
        Ok(true)
    }

    async fn delete_grant(&self, id: &GrantId) -> Result<Option<Grant>> {
        let mut inner = self.write()?;
        let Some(grant) = inner.remove_grant(id) else {
            return Ok(None);
        };

        if let Some(recipient) = grant.recipient() {
            inner.envelopes.remove(&(grant.file_id, *recipient));
        }
        Ok(Some(grant))
    }

    async fn record_activity(&self, record: &ActivityRecord) -> Result<()> {
        self.write()?.activity.push(record.clone());
        Ok(())
    }

    async fn list_activity(&self, filter: &ActivityFilter) -> Result<Vec<ActivityRecord>> {
        Ok(self
            .read()?
            .activity
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }
}
