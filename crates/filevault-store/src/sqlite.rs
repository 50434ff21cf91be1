//! SQLite implementation of the Store trait.
//!
//! This is the primary storage backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking. Composite writes run in one
//! transaction under the connection mutex.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use filevault_core::{CipherAlgorithm, FileId, GrantId, PrincipalId, WrapAlgorithm, WrappedKey};
use filevault_perms::{AccessLevel, Grant, ShareTarget, TokenHash, TokenWrappedKey};

use crate::blob::BlobLocator;
use crate::error::{Result, StoreError};
use crate::migration;
use crate::records::{
    ActivityAction, ActivityFilter, ActivityRecord, Envelope, PrincipalRecord, SealedFile, Sealing,
};
use crate::traits::{EnvelopeStore, PutMode, PutResult, ResealOutcome, Store};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    /// The SQLite connection, protected by a mutex.
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(mut conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&mut conn)
        })
        .await
        .map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(format!("spawn_blocking failed: {}", e)),
            ))
        })?
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

const FILE_COLUMNS: &str = "id, owner_id, blob_locator, is_encrypted, encryption_key,
     encryption_key_algorithm, encryption_key_created_at, encryption_method, nonce, auth_tag,
     plaintext_size, stored_size, key_epoch, created_at, updated_at";

const GRANT_COLUMNS: &str = "id, file_id, owner_id, shared_with_id, access_type, is_public,
     public_token_hash, expired_at, encrypted_key_for_recipient, created_at, updated_at";

/// The owner's envelope, read from the file row.
const OWNER_ENVELOPE_SELECT: &str = "SELECT id, owner_id, encryption_key, encryption_key_algorithm,
            key_epoch, encryption_key_created_at
     FROM files WHERE id = ?1 AND is_encrypted = 1";

fn bad_column(
    idx: usize,
    ty: Type,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, err.into())
}

fn parse_id<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: String = row.get(idx)?;
    s.parse().map_err(|e| bad_column(idx, Type::Text, e))
}

fn parse_opt_id<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let s: Option<String> = row.get(idx)?;
    s.map(|s| s.parse().map_err(|e| bad_column(idx, Type::Text, e)))
        .transpose()
}

fn fixed<const N: usize>(row: &Row<'_>, idx: usize) -> rusqlite::Result<[u8; N]> {
    let bytes: Vec<u8> = row.get(idx)?;
    bytes.try_into().map_err(|v: Vec<u8>| {
        bad_column(
            idx,
            Type::Blob,
            format!("expected {} bytes, got {}", N, v.len()),
        )
    })
}

fn wrap_algorithm(row: &Row<'_>, idx: usize) -> rusqlite::Result<WrapAlgorithm> {
    let s: String = row.get(idx)?;
    WrapAlgorithm::parse(&s)
        .ok_or_else(|| bad_column(idx, Type::Text, format!("unknown wrap algorithm {}", s)))
}

fn wrapped_key(row: &Row<'_>, idx: usize) -> rusqlite::Result<WrappedKey> {
    let s: String = row.get(idx)?;
    WrappedKey::from_base64(&s).map_err(|e| bad_column(idx, Type::Text, e))
}

/// `file_id, recipient, wrapped key, algorithm, key_epoch, created_at`.
fn row_to_envelope(row: &Row<'_>) -> rusqlite::Result<Envelope> {
    Ok(Envelope {
        file_id: parse_id(row, 0)?,
        recipient_id: parse_id(row, 1)?,
        wrapped_key: wrapped_key(row, 2)?,
        algorithm: wrap_algorithm(row, 3)?,
        key_epoch: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn row_to_file(row: &Row<'_>) -> rusqlite::Result<SealedFile> {
    let is_encrypted: bool = row.get(3)?;
    let sealing = if is_encrypted {
        let method: String = row.get(7)?;
        let algorithm = CipherAlgorithm::parse(&method)
            .ok_or_else(|| bad_column(7, Type::Text, format!("unknown cipher {}", method)))?;
        Some(Sealing {
            algorithm,
            nonce: fixed(row, 8)?,
            tag: fixed(row, 9)?,
        })
    } else {
        None
    };

    Ok(SealedFile {
        id: parse_id(row, 0)?,
        owner_id: parse_id(row, 1)?,
        blob: BlobLocator::from_string(row.get::<_, String>(2)?),
        sealing,
        plaintext_size: row.get::<_, i64>(10)? as u64,
        stored_size: row.get::<_, i64>(11)? as u64,
        key_epoch: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

fn row_to_grant(row: &Row<'_>) -> rusqlite::Result<Grant> {
    let is_public: bool = row.get(5)?;
    let target = if is_public {
        let embedded: Option<String> = row.get(8)?;
        let embedded_key = embedded
            .map(|s| TokenWrappedKey::from_base64(&s))
            .transpose()
            .map_err(|e| bad_column(8, Type::Text, e))?;
        ShareTarget::PublicToken {
            token_hash: TokenHash(fixed(row, 6)?),
            embedded_key,
        }
    } else {
        ShareTarget::Recipient(parse_id(row, 3)?)
    };

    let access: String = row.get(4)?;
    Ok(Grant {
        id: parse_id(row, 0)?,
        file_id: parse_id(row, 1)?,
        owner_id: parse_id(row, 2)?,
        target,
        access_level: AccessLevel::parse(&access).map_err(|e| bad_column(4, Type::Text, e))?,
        expires_at: row.get(7)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

fn row_to_principal(row: &Row<'_>) -> rusqlite::Result<PrincipalRecord> {
    Ok(PrincipalRecord {
        id: parse_id(row, 0)?,
        public_key: row.get(1)?,
        encrypted_private_key: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn row_to_activity(row: &Row<'_>) -> rusqlite::Result<ActivityRecord> {
    let action: String = row.get(1)?;
    let metadata: String = row.get(3)?;

    Ok(ActivityRecord {
        principal_id: parse_opt_id(row, 0)?,
        action: ActivityAction::parse(&action)
            .ok_or_else(|| bad_column(1, Type::Text, format!("unknown action {}", action)))?,
        file_id: parse_opt_id(row, 2)?,
        metadata: serde_json::from_str(&metadata).map_err(|e| bad_column(3, Type::Text, e))?,
        created_at: row.get(4)?,
    })
}

/// The encryption columns of a file row, `is_encrypted` through `auth_tag`.
struct SealingColumns {
    is_encrypted: bool,
    key: Option<String>,
    key_algorithm: Option<&'static str>,
    key_created_at: Option<i64>,
    method: Option<&'static str>,
    nonce: Option<Vec<u8>>,
    tag: Option<Vec<u8>>,
}

impl SealingColumns {
    fn new(file: &SealedFile, owner_envelope: Option<&Envelope>) -> Self {
        let sealing = file.sealing.as_ref();
        Self {
            is_encrypted: file.is_encrypted(),
            key: owner_envelope.map(|e| e.wrapped_key.to_base64()),
            key_algorithm: owner_envelope.map(|e| e.algorithm.as_str()),
            key_created_at: owner_envelope.map(|e| e.created_at),
            method: sealing.map(|s| s.algorithm.as_str()),
            nonce: sealing.map(|s| s.nonce.to_vec()),
            tag: sealing.map(|s| s.tag.to_vec()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Statement helpers (run inside a transaction)
// ─────────────────────────────────────────────────────────────────────────────

fn require_file(conn: &Connection, file_id: &FileId) -> Result<SealedFile> {
    select_file(conn, file_id)?.ok_or_else(|| StoreError::NotFound(format!("file {}", file_id)))
}

fn require_principal(conn: &Connection, id: &PrincipalId) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        params![id.to_string()],
        |row| row.get(0),
    )?;

    if exists {
        Ok(())
    } else {
        Err(StoreError::NotFound(format!("principal {}", id)))
    }
}

fn envelope_exists(conn: &Connection, file_id: &FileId, recipient: &PrincipalId) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM file_keys WHERE file_id = ?1 AND user_id = ?2)",
        params![file_id.to_string(), recipient.to_string()],
        |row| row.get(0),
    )?)
}

fn private_grant_exists(
    conn: &Connection,
    file_id: &FileId,
    recipient: &PrincipalId,
) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM file_shares WHERE file_id = ?1 AND shared_with_id = ?2)",
        params![file_id.to_string(), recipient.to_string()],
        |row| row.get(0),
    )?)
}

fn insert_envelope_row(conn: &Connection, envelope: &Envelope) -> Result<()> {
    conn.execute(
        "INSERT INTO file_keys (file_id, user_id, encrypted_key, algorithm, key_epoch, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            envelope.file_id.to_string(),
            envelope.recipient_id.to_string(),
            envelope.wrapped_key.to_base64(),
            envelope.algorithm.as_str(),
            envelope.key_epoch,
            envelope.created_at,
        ],
    )?;
    Ok(())
}

fn insert_grant_row(conn: &Connection, grant: &Grant) -> Result<()> {
    let (shared_with, is_public, token_hash, embedded) = match &grant.target {
        ShareTarget::Recipient(id) => (Some(id.to_string()), false, None, None),
        ShareTarget::PublicToken {
            token_hash,
            embedded_key,
        } => (
            None,
            true,
            Some(token_hash.as_bytes().to_vec()),
            embedded_key.as_ref().map(|k| k.to_base64()),
        ),
    };

    conn.execute(
        "INSERT INTO file_shares (
            id, file_id, owner_id, shared_with_id, access_type, is_public,
            public_token_hash, expired_at, encrypted_key_for_recipient, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            grant.id.to_string(),
            grant.file_id.to_string(),
            grant.owner_id.to_string(),
            shared_with,
            grant.access_level.as_str(),
            is_public,
            token_hash,
            grant.expires_at,
            embedded,
            grant.created_at,
            grant.updated_at,
        ],
    )?;
    Ok(())
}

fn select_file(conn: &Connection, id: &FileId) -> Result<Option<SealedFile>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM files WHERE id = ?1", FILE_COLUMNS),
            params![id.to_string()],
            row_to_file,
        )
        .optional()?)
}

fn select_grant(conn: &Connection, id: &GrantId) -> Result<Option<Grant>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM file_shares WHERE id = ?1", GRANT_COLUMNS),
            params![id.to_string()],
            row_to_grant,
        )
        .optional()?)
}

fn select_grants(conn: &Connection, filter_sql: &str, key: String) -> Result<Vec<Grant>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM file_shares WHERE {} ORDER BY created_at, rowid",
        GRANT_COLUMNS, filter_sql
    ))?;
    let grants = stmt
        .query_map(params![key], row_to_grant)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(grants)
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait implementations
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl EnvelopeStore for SqliteStore {
    async fn put_envelope(&self, envelope: &Envelope, mode: PutMode) -> Result<PutResult> {
        let envelope = envelope.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let file = require_file(&tx, &envelope.file_id)?;
            if !file.is_encrypted() {
                return Err(StoreError::InvalidData(format!(
                    "file {} is not encrypted",
                    file.id
                )));
            }
            file.require_epoch(envelope.key_epoch)?;

            let result = if file.owner_id == envelope.recipient_id {
                match mode {
                    PutMode::Insert => PutResult::AlreadyExists,
                    PutMode::Rekey => {
                        tx.execute(
                            "UPDATE files SET encryption_key = ?2, encryption_key_algorithm = ?3,
                                 encryption_key_created_at = ?4
                             WHERE id = ?1",
                            params![
                                envelope.file_id.to_string(),
                                envelope.wrapped_key.to_base64(),
                                envelope.algorithm.as_str(),
                                envelope.created_at,
                            ],
                        )?;
                        PutResult::Replaced
                    }
                }
            } else {
                require_principal(&tx, &envelope.recipient_id)?;
                let exists = envelope_exists(&tx, &envelope.file_id, &envelope.recipient_id)?;

                match (exists, mode) {
                    (true, PutMode::Insert) => PutResult::AlreadyExists,
                    (true, PutMode::Rekey) => {
                        tx.execute(
                            "UPDATE file_keys SET encrypted_key = ?3, algorithm = ?4,
                                 key_epoch = ?5, created_at = ?6
                             WHERE file_id = ?1 AND user_id = ?2",
                            params![
                                envelope.file_id.to_string(),
                                envelope.recipient_id.to_string(),
                                envelope.wrapped_key.to_base64(),
                                envelope.algorithm.as_str(),
                                envelope.key_epoch,
                                envelope.created_at,
                            ],
                        )?;
                        PutResult::Replaced
                    }
                    (false, _) => {
                        insert_envelope_row(&tx, &envelope)?;
                        PutResult::Inserted
                    }
                }
            };

            tx.commit()?;
            Ok(result)
        })
        .await
    }

    async fn get_envelope(
        &self,
        file_id: &FileId,
        recipient_id: &PrincipalId,
    ) -> Result<Option<Envelope>> {
        let file_id = file_id.to_string();
        let recipient_id = recipient_id.to_string();

        self.blocking(move |conn| {
            let owner = conn
                .query_row(
                    &format!("{} AND owner_id = ?2", OWNER_ENVELOPE_SELECT),
                    params![file_id, recipient_id],
                    row_to_envelope,
                )
                .optional()?;
            if owner.is_some() {
                return Ok(owner);
            }

            Ok(conn
                .query_row(
                    "SELECT file_id, user_id, encrypted_key, algorithm, key_epoch, created_at
                     FROM file_keys WHERE file_id = ?1 AND user_id = ?2",
                    params![file_id, recipient_id],
                    row_to_envelope,
                )
                .optional()?)
        })
        .await
    }

    async fn delete_envelope(
        &self,
        file_id: &FileId,
        recipient_id: &PrincipalId,
    ) -> Result<bool> {
        let file_id = file_id.to_string();
        let recipient_id = recipient_id.to_string();

        self.blocking(move |conn| {
            let n = conn.execute(
                "DELETE FROM file_keys WHERE file_id = ?1 AND user_id = ?2",
                params![file_id, recipient_id],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn list_envelopes(&self, file_id: &FileId) -> Result<Vec<Envelope>> {
        let file_id = file_id.to_string();

        self.blocking(move |conn| {
            let mut out: Vec<Envelope> = conn
                .query_row(OWNER_ENVELOPE_SELECT, params![file_id], row_to_envelope)
                .optional()?
                .into_iter()
                .collect();

            let mut stmt = conn.prepare(
                "SELECT file_id, user_id, encrypted_key, algorithm, key_epoch, created_at
                 FROM file_keys WHERE file_id = ?1 ORDER BY created_at, user_id",
            )?;
            let others = stmt
                .query_map(params![file_id], row_to_envelope)?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            out.extend(others);
            Ok(out)
        })
        .await
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_principal(&self, record: &PrincipalRecord) -> Result<PutResult> {
        let record = record.clone();

        self.blocking(move |conn| {
            let n = conn.execute(
                "INSERT INTO users (id, public_key, encrypted_private_key, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    record.id.to_string(),
                    record.public_key,
                    record.encrypted_private_key,
                    record.created_at,
                ],
            )?;
            Ok(if n > 0 {
                PutResult::Inserted
            } else {
                PutResult::AlreadyExists
            })
        })
        .await
    }

    async fn set_principal_keys(
        &self,
        id: &PrincipalId,
        public_key: &str,
        encrypted_private_key: &str,
    ) -> Result<PutResult> {
        let id = *id;
        let public_key = public_key.to_string();
        let encrypted_private_key = encrypted_private_key.to_string();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            require_principal(&tx, &id)?;

            let n = tx.execute(
                "UPDATE users SET public_key = ?2, encrypted_private_key = ?3
                 WHERE id = ?1 AND public_key IS NULL",
                params![id.to_string(), public_key, encrypted_private_key],
            )?;
            tx.commit()?;

            Ok(if n > 0 {
                PutResult::Inserted
            } else {
                PutResult::AlreadyExists
            })
        })
        .await
    }

    async fn get_principal(&self, id: &PrincipalId) -> Result<Option<PrincipalRecord>> {
        let id = id.to_string();

        self.blocking(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, public_key, encrypted_private_key, created_at
                     FROM users WHERE id = ?1",
                    params![id],
                    row_to_principal,
                )
                .optional()?)
        })
        .await
    }

    async fn commit_sealed_file(
        &self,
        file: &SealedFile,
        owner_envelope: Option<&Envelope>,
    ) -> Result<()> {
        file.check_owner_envelope(owner_envelope)?;
        let columns = SealingColumns::new(file, owner_envelope);
        let file = file.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            require_principal(&tx, &file.owner_id)?;
            if select_file(&tx, &file.id)?.is_some() {
                return Err(StoreError::InvalidData(format!(
                    "file {} already exists",
                    file.id
                )));
            }

            tx.execute(
                &format!(
                    "INSERT INTO files ({}) VALUES
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                    FILE_COLUMNS
                ),
                params![
                    file.id.to_string(),
                    file.owner_id.to_string(),
                    file.blob.as_str(),
                    columns.is_encrypted,
                    columns.key,
                    columns.key_algorithm,
                    columns.key_created_at,
                    columns.method,
                    columns.nonce,
                    columns.tag,
                    file.plaintext_size as i64,
                    file.stored_size as i64,
                    file.key_epoch,
                    file.created_at,
                    file.updated_at,
                ],
            )?;

            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_file(&self, id: &FileId) -> Result<Option<SealedFile>> {
        let id = *id;
        self.blocking(move |conn| select_file(conn, &id)).await
    }

    async fn commit_reseal(
        &self,
        file: &SealedFile,
        owner_envelope: Option<&Envelope>,
        expected_epoch: u32,
    ) -> Result<ResealOutcome> {
        file.check_owner_envelope(owner_envelope)?;
        let columns = SealingColumns::new(file, owner_envelope);
        let file = file.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            require_file(&tx, &file.id)?.require_epoch(expected_epoch)?;

            tx.execute(
                "UPDATE files SET
                    blob_locator = ?2, is_encrypted = ?3, encryption_key = ?4,
                    encryption_key_algorithm = ?5, encryption_key_created_at = ?6,
                    encryption_method = ?7, nonce = ?8, auth_tag = ?9, plaintext_size = ?10,
                    stored_size = ?11, key_epoch = ?12, updated_at = ?13
                 WHERE id = ?1 AND key_epoch = ?14",
                params![
                    file.id.to_string(),
                    file.blob.as_str(),
                    columns.is_encrypted,
                    columns.key,
                    columns.key_algorithm,
                    columns.key_created_at,
                    columns.method,
                    columns.nonce,
                    columns.tag,
                    file.plaintext_size as i64,
                    file.stored_size as i64,
                    file.key_epoch,
                    file.updated_at,
                    expected_epoch,
                ],
            )?;

            let envelopes_invalidated = tx.execute(
                "DELETE FROM file_keys WHERE file_id = ?1",
                params![file.id.to_string()],
            )?;
            let public_keys_cleared = tx.execute(
                "UPDATE file_shares SET encrypted_key_for_recipient = NULL
                 WHERE file_id = ?1 AND is_public = 1 AND encrypted_key_for_recipient IS NOT NULL",
                params![file.id.to_string()],
            )?;

            tx.commit()?;
            Ok(ResealOutcome {
                envelopes_invalidated,
                public_keys_cleared,
            })
        })
        .await
    }

    async fn delete_file(&self, id: &FileId) -> Result<Option<SealedFile>> {
        let id = *id;

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let Some(file) = select_file(&tx, &id)? else {
                return Ok(None);
            };

            // file_keys and file_shares cascade.
            tx.execute("DELETE FROM files WHERE id = ?1", params![id.to_string()])?;
            tx.commit()?;
            Ok(Some(file))
        })
        .await
    }

    async fn issue_private_grant(
        &self,
        grant: &Grant,
        envelope: Option<&Envelope>,
        key_epoch: u32,
    ) -> Result<PutResult> {
        let grant = grant.clone();
        let envelope = envelope.cloned();

        self.blocking(move |conn| {
            let recipient = *grant
                .recipient()
                .ok_or_else(|| StoreError::InvalidData("private grant without recipient".into()))?;

            let tx = conn.transaction()?;
            let file = require_file(&tx, &grant.file_id)?;
            file.require_epoch(key_epoch)?;
            file.check_recipient_envelope(&recipient, envelope.as_ref())?;
            require_principal(&tx, &recipient)?;

            let live = if file.is_encrypted() {
                envelope_exists(&tx, &grant.file_id, &recipient)?
            } else {
                private_grant_exists(&tx, &grant.file_id, &recipient)?
            };
            if live {
                return Ok(PutResult::AlreadyExists);
            }

            tx.execute(
                "DELETE FROM file_shares WHERE file_id = ?1 AND shared_with_id = ?2",
                params![grant.file_id.to_string(), recipient.to_string()],
            )?;
            insert_grant_row(&tx, &grant)?;
            if let Some(envelope) = &envelope {
                insert_envelope_row(&tx, envelope)?;
            }

            tx.commit()?;
            Ok(PutResult::Inserted)
        })
        .await
    }

    async fn insert_public_grant(&self, grant: &Grant, key_epoch: u32) -> Result<()> {
        let grant = grant.clone();

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let file = require_file(&tx, &grant.file_id)?;
            file.require_epoch(key_epoch)?;
            file.check_public_grant(&grant)?;

            insert_grant_row(&tx, &grant)?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn get_grant(&self, id: &GrantId) -> Result<Option<Grant>> {
        let id = *id;
        self.blocking(move |conn| select_grant(conn, &id)).await
    }

    async fn find_grant_by_token(&self, token_hash: &TokenHash) -> Result<Option<Grant>> {
        let hash = token_hash.as_bytes().to_vec();

        self.blocking(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {} FROM file_shares WHERE public_token_hash = ?1",
                        GRANT_COLUMNS
                    ),
                    params![hash],
                    row_to_grant,
                )
                .optional()?)
        })
        .await
    }

    async fn list_grants_for_file(&self, file_id: &FileId) -> Result<Vec<Grant>> {
        let key = file_id.to_string();
        self.blocking(move |conn| select_grants(conn, "file_id = ?1", key))
            .await
    }

    async fn list_grants_for_recipient(&self, recipient_id: &PrincipalId) -> Result<Vec<Grant>> {
        let key = recipient_id.to_string();
        self.blocking(move |conn| select_grants(conn, "shared_with_id = ?1", key))
            .await
    }

    async fn list_grants_for_owner(&self, owner_id: &PrincipalId) -> Result<Vec<Grant>> {
        let key = owner_id.to_string();
        self.blocking(move |conn| select_grants(conn, "owner_id = ?1", key))
            .await
    }

    async fn update_grant(&self, grant: &Grant) -> Result<bool> {
        let grant = grant.clone();

        self.blocking(move |conn| {
            let n = conn.execute(
                "UPDATE file_shares SET access_type = ?2, expired_at = ?3, updated_at = ?4
                 WHERE id = ?1",
                params![
                    grant.id.to_string(),
                    grant.access_level.as_str(),
                    grant.expires_at,
                    grant.updated_at,
                ],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn delete_grant(&self, id: &GrantId) -> Result<Option<Grant>> {
        let id = *id;

        self.blocking(move |conn| {
            let tx = conn.transaction()?;
            let Some(grant) = select_grant(&tx, &id)? else {
                return Ok(None);
            };

            tx.execute(
                "DELETE FROM file_shares WHERE id = ?1",
                params![id.to_string()],
            )?;
            if let Some(recipient) = grant.recipient() {
                tx.execute(
                    "DELETE FROM file_keys WHERE file_id = ?1 AND user_id = ?2",
                    params![grant.file_id.to_string(), recipient.to_string()],
                )?;
            }

            tx.commit()?;
            Ok(Some(grant))
        })
        .await
    }

    async fn record_activity(&self, record: &ActivityRecord) -> Result<()> {
        let record = record.clone();

        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO activities (user_id, action, file_id, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.principal_id.map(|p| p.to_string()),
                    record.action.as_str(),
                    record.file_id.map(|f| f.to_string()),
                    serde_json::to_string(&record.metadata)?,
                    record.created_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn list_activity(&self, filter: &ActivityFilter) -> Result<Vec<ActivityRecord>> {
        let principal = filter.principal_id.map(|p| p.to_string());
        let file = filter.file_id.map(|f| f.to_string());

        self.blocking(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, action, file_id, metadata, created_at FROM activities
                 WHERE (?1 IS NULL OR user_id = ?1) AND (?2 IS NULL OR file_id = ?2)
                 ORDER BY id",
            )?;
            let records = stmt
                .query_map(params![principal, file], row_to_activity)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
    }
}
