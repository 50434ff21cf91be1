//! # filevault Testkit
//!
//! Testing utilities for filevault.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: an in-memory vault with fast key derivation and helpers for
//!   registering parties
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use filevault_testkit::TestFixture;
//!
//! async fn example() {
//!     let fixture = TestFixture::new();
//!     let alice = fixture.register("alice").await;
//!     let file = fixture.vault.seal_upload(&alice.id, b"hello").await.unwrap();
//!     let bytes = fixture.vault.fetch(&alice.caller(), &file.id, None).await.unwrap();
//!     assert_eq!(&bytes[..], b"hello");
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use filevault_testkit::generators::{access_level, plaintext};
//!
//! proptest! {
//!     #[test]
//!     fn sealing_roundtrips(bytes in plaintext(4096), level in access_level()) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{test_config, FailingKeyPairProvider, Party, TestFixture, TestVault};
pub use generators::{access_level, expiry_offset, plaintext, GrantParams};
