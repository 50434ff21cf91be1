//! # filevault
//!
//! Envelope-encrypted file storage: every file is sealed under its own key,
//! and that key is distributed to each authorized principal wrapped under
//! their public key.
//!
//! ## Overview
//!
//! - **Sealing**: uploads are encrypted with AES-256-GCM under a fresh file key
//! - **Envelopes**: the file key wrapped with RSA-OAEP for the owner and for
//!   every private grant recipient
//! - **Public links**: bearer tokens carrying their own token-wrapped key
//! - **Reseal**: rotating a file key invalidates every non-owner envelope
//! - **Plaintext files**: stored as-is, then sealed or unsealed in place
//!
//! ## Usage
//!
//! ```rust,no_run
//! use filevault::{Caller, FileVault, VaultConfig};
//! use filevault::core::{Passphrase, PrincipalId};
//! use filevault::perms::AccessLevel;
//! use filevault::store::{FsBlobStore, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("vault.db").unwrap();
//!     let blobs = FsBlobStore::open("blobs").await.unwrap();
//!     let vault = FileVault::new(store, blobs, VaultConfig::default());
//!
//!     let alice = PrincipalId::new();
//!     let bob = PrincipalId::new();
//!     let alice_pass = Passphrase::new("alice passphrase");
//!     let bob_pass = Passphrase::new("bob passphrase");
//!     vault.register_principal(alice, &alice_pass).await.unwrap();
//!     vault.register_principal(bob, &bob_pass).await.unwrap();
//!
//!     let file = vault.seal_upload(&alice, b"quarterly report").await.unwrap();
//!
//!     let owner = Caller::new(alice, alice_pass);
//!     vault
//!         .grant_access(&owner, &file.id, &bob, AccessLevel::Download, None)
//!         .await
//!         .unwrap();
//!
//!     let plaintext = vault
//!         .fetch(&Caller::new(bob, bob_pass), &file.id, None)
//!         .await
//!         .unwrap();
//!     assert_eq!(&plaintext[..], b"quarterly report");
//! }
//! ```
//!
//! ## Re-exports
//!
//! This crate re-exports the component crates for convenience:
//!
//! - `filevault::core` - Identifiers and cryptographic primitives
//! - `filevault::perms` - Grants, share tokens and access evaluation
//! - `filevault::store` - Record and blob storage

pub mod caller;
pub mod error;
pub mod vault;

// Re-export component crates
pub use filevault_core as core;
pub use filevault_perms as perms;
pub use filevault_store as store;

// Re-export main types for convenience
pub use caller::Caller;
pub use error::{Result, VaultError};
pub use vault::{FileVault, PublicShare, VaultConfig};

// Re-export commonly used types
pub use filevault_core::{FileId, GrantId, Passphrase, PrincipalId};
pub use filevault_perms::{AccessDecision, AccessLevel, Grant, GrantUpdate, ShareToken};
pub use filevault_store::{EnvelopeSummary, SealedFile, Sealing};
