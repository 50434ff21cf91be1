//! # filevault Store
//!
//! Storage abstraction for filevault. Provides a trait-based interface for
//! principals, sealed files, envelopes, grants, and the activity log, with
//! SQLite and in-memory implementations, plus ciphertext blob storage.
//!
//! ## Key Types
//!
//! - [`EnvelopeStore`] - Wrapped file keys, one per (file, recipient)
//! - [`Store`] - Everything else the vault persists
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`BlobStore`] - Ciphertext blobs ([`FsBlobStore`], [`MemoryBlobStore`])
//!
//! ## Usage
//!
//! ```rust,no_run
//! use filevault_store::{SqliteStore, Store};
//! use filevault_core::FileId;
//!
//! async fn example() {
//!     let store = SqliteStore::open("vault.db").unwrap();
//!     let file = store.get_file(&FileId::new()).await.unwrap();
//!     assert!(file.is_none());
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Owner envelopes live with the file**: the owner's wrapped key is part
//!   of the file row and is created and replaced with it
//! - **Uniqueness**: inserting a second envelope for a pair returns
//!   [`PutResult::AlreadyExists`] instead of overwriting
//! - **Cascade**: deleting a file removes its envelopes and grants
//! - **Key epochs**: writes carrying key material are refused once the
//!   file's key has moved on

pub mod blob;
pub mod error;
pub mod memory;
pub mod migration;
pub mod records;
pub mod sqlite;
pub mod traits;

pub use blob::{BlobLocator, BlobStore, FsBlobStore, MemoryBlobStore};
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use records::{
    ActivityAction, ActivityFilter, ActivityRecord, Envelope, EnvelopeSummary, PrincipalRecord,
    SealedFile, Sealing,
};
pub use sqlite::SqliteStore;
pub use traits::{EnvelopeStore, PutMode, PutResult, ResealOutcome, Store};
