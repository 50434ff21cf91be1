//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;

use filevault_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    let current: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current > CURRENT_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, CURRENT_VERSION
        )));
    }

    if current < CURRENT_VERSION {
        tracing::info!(from = current, to = CURRENT_VERSION, "migrating schema");
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Principals. Key columns stay NULL until registration.
        CREATE TABLE users (
            id TEXT PRIMARY KEY,
            public_key TEXT,                  -- SPKI PEM
            encrypted_private_key TEXT,       -- base64(CBOR(protected PKCS#8))
            created_at INTEGER NOT NULL
        );

        -- Files. While encrypted, the owner's envelope lives inline; all
        -- encryption columns are NULL for a plaintext file.
        CREATE TABLE files (
            id TEXT PRIMARY KEY,
            owner_id TEXT NOT NULL REFERENCES users(id),
            blob_locator TEXT NOT NULL,
            is_encrypted INTEGER NOT NULL,
            encryption_key TEXT,              -- owner's wrapped key, base64
            encryption_key_algorithm TEXT,
            encryption_key_created_at INTEGER,
            encryption_method TEXT,           -- e.g. AES-256-GCM
            nonce BLOB,
            auth_tag BLOB,
            plaintext_size INTEGER NOT NULL,
            stored_size INTEGER NOT NULL,
            key_epoch INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            CHECK (
                (is_encrypted = 1
                    AND encryption_key IS NOT NULL
                    AND encryption_key_algorithm IS NOT NULL
                    AND encryption_key_created_at IS NOT NULL
                    AND encryption_method IS NOT NULL
                    AND nonce IS NOT NULL
                    AND auth_tag IS NOT NULL)
                OR
                (is_encrypted = 0
                    AND encryption_key IS NULL
                    AND encryption_key_algorithm IS NULL
                    AND encryption_key_created_at IS NULL
                    AND encryption_method IS NULL
                    AND nonce IS NULL
                    AND auth_tag IS NULL)
            )
        );

        -- Non-owner envelopes.
        CREATE TABLE file_keys (
            file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            user_id TEXT NOT NULL REFERENCES users(id),
            encrypted_key TEXT NOT NULL,      -- base64
            algorithm TEXT NOT NULL,
            key_epoch INTEGER NOT NULL,       -- files.key_epoch when wrapped
            created_at INTEGER NOT NULL,
            UNIQUE(file_id, user_id)
        );

        -- Grants: private (shared_with_id) xor public (public_token_hash).
        CREATE TABLE file_shares (
            id TEXT PRIMARY KEY,
            file_id TEXT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            owner_id TEXT NOT NULL REFERENCES users(id),
            shared_with_id TEXT REFERENCES users(id),
            access_type TEXT NOT NULL,
            is_public INTEGER NOT NULL,
            public_token_hash BLOB UNIQUE,
            expired_at INTEGER,
            encrypted_key_for_recipient TEXT, -- token-wrapped key, public grants only
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            CHECK (
                (is_public = 0 AND shared_with_id IS NOT NULL AND public_token_hash IS NULL)
                OR
                (is_public = 1 AND shared_with_id IS NULL AND public_token_hash IS NOT NULL)
            )
        );

        -- Audit log.
        CREATE TABLE activities (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT,
            action TEXT NOT NULL,
            file_id TEXT,
            metadata TEXT NOT NULL,           -- JSON
            created_at INTEGER NOT NULL
        );

        CREATE INDEX idx_files_owner ON files(owner_id);
        CREATE INDEX idx_file_shares_file ON file_shares(file_id);
        CREATE INDEX idx_file_shares_recipient ON file_shares(shared_with_id);
        CREATE INDEX idx_file_shares_owner ON file_shares(owner_id);
        CREATE INDEX idx_activities_user ON activities(user_id);
        CREATE INDEX idx_activities_file ON activities(file_id);
        "#,
    )?;

    Ok(())
}
