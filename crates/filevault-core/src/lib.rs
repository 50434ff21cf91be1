//! # filevault Core
//!
//! Pure primitives for envelope-encrypted file storage: identifiers, the
//! symmetric file cipher, asymmetric key wrapping, and private-key protection.
//!
//! This crate contains no I/O, no storage, no access control. It is pure
//! computation over key material and ciphertext.
//!
//! ## Key Types
//!
//! - [`FileKey`] - One-time 256-bit AES key for a single sealed file
//! - [`SealedPayload`] - Nonce, tag and ciphertext produced by [`seal`]
//! - [`WrappedKey`] - A [`FileKey`] encrypted under a principal's RSA public key
//! - [`KeyPair`] - A principal's RSA-2048 key pair
//! - [`ProtectedPrivateKey`] - A private key encrypted at rest under a passphrase
//!
//! ## Encryption Model
//!
//! 1. **File key**: a fresh AES-256-GCM key seals the file bytes ([`seal`]/[`open`])
//! 2. **Envelopes**: the file key is wrapped per recipient with RSA-OAEP/SHA-256
//!    ([`wrap`]/[`unwrap`])
//! 3. **Private keys at rest**: PKCS#8 encrypted under an Argon2id-derived key
//!    ([`protect`]/[`unprotect`])
//!
//! ## Stored Blob Layout
//!
//! ```text
//! [nonce: 16 bytes][auth tag: 16 bytes][ciphertext: N bytes]
//! ```
//!
//! The nonce is 16 bytes wide for compatibility with blobs written by the
//! previous storage format. See [`SealedPayload::to_blob`].

pub mod cipher;
pub mod error;
pub mod keypair;
pub mod protect;
pub mod types;
pub mod wrap;

pub use cipher::{open, seal, FileKey, SealedPayload, KEY_LEN, NONCE_LEN, TAG_LEN};
pub use error::{CryptoError, Result};
pub use keypair::{KeyPair, KeyPairProvider, PrivateKey, PublicKey, RsaKeyPairProvider, RSA_BITS};
pub use protect::{protect, unprotect, KdfParams, Passphrase, ProtectedPrivateKey};
pub use types::{now_millis, CipherAlgorithm, FileId, GrantId, PrincipalId, WrapAlgorithm};
pub use wrap::{unwrap, wrap, WrappedKey};
