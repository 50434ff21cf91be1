//! Public share tokens.
//!
//! A token is 32 random bytes handed to the owner once, as URL-safe base64.
//! Only a keyed BLAKE3 hash of it is persisted. Because anonymous holders
//! have no key pair, a public grant carries the file key wrapped under a key
//! derived from the token itself.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use filevault_core::{CryptoError, FileId, FileKey};

use crate::error::{PermsError, Result};

/// Size of a share token in bytes.
pub const TOKEN_LEN: usize = 32;

/// Size of the AES-GCM nonce for token-wrapped keys.
const TOKEN_NONCE_LEN: usize = 12;

const HASH_CONTEXT: &str = "filevault v1 public share token hash";
const WRAP_CONTEXT: &str = "filevault v1 public share key";

/// A bearer token for a public grant. Zeroized on drop, never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ShareToken([u8; TOKEN_LEN]);

impl ShareToken {
    /// Generate a new random token.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse the URL-safe text form.
    pub fn parse(s: &str) -> Result<Self> {
        let bytes = Zeroizing::new(
            URL_SAFE_NO_PAD
                .decode(s)
                .map_err(|_| PermsError::InvalidToken)?,
        );
        let arr: [u8; TOKEN_LEN] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| PermsError::InvalidToken)?;
        Ok(Self(arr))
    }

    /// The URL-safe text form handed to the owner.
    pub fn to_url_safe(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0)
    }

    /// The hash under which this token is looked up.
    pub fn hash(&self) -> TokenHash {
        let mut hasher = blake3::Hasher::new_derive_key(HASH_CONTEXT);
        hasher.update(&self.0);
        TokenHash(*hasher.finalize().as_bytes())
    }

    fn wrap_key(&self, file_id: &FileId) -> Zeroizing<[u8; 32]> {
        let mut hasher = blake3::Hasher::new_derive_key(WRAP_CONTEXT);
        hasher.update(&self.0);
        hasher.update(file_id.as_bytes());
        Zeroizing::new(*hasher.finalize().as_bytes())
    }

    /// Wrap a file key so that only holders of this token can recover it.
    ///
    /// The file id is bound as associated data.
    pub fn wrap_file_key(&self, key: &FileKey, file_id: &FileId) -> Result<TokenWrappedKey> {
        let wrap_key = self.wrap_key(file_id);
        let cipher = Aes256Gcm::new_from_slice(&wrap_key[..])
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        let mut nonce = [0u8; TOKEN_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: key.as_bytes(),
                    aad: file_id.as_bytes(),
                },
            )
            .map_err(|e| CryptoError::Encryption(e.to_string()))?;

        Ok(TokenWrappedKey { nonce, ciphertext })
    }

    /// Recover the file key from a public grant.
    pub fn unwrap_file_key(&self, wrapped: &TokenWrappedKey, file_id: &FileId) -> Result<FileKey> {
        let wrap_key = self.wrap_key(file_id);
        let cipher = Aes256Gcm::new_from_slice(&wrap_key[..])
            .map_err(|_| CryptoError::UnwrapFailure)?;

        let bytes = Zeroizing::new(
            cipher
                .decrypt(
                    Nonce::from_slice(&wrapped.nonce),
                    Payload {
                        msg: &wrapped.ciphertext,
                        aad: file_id.as_bytes(),
                    },
                )
                .map_err(|_| CryptoError::UnwrapFailure)?,
        );

        FileKey::from_slice(&bytes).ok_or_else(|| CryptoError::UnwrapFailure.into())
    }
}

impl fmt::Debug for ShareToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ShareToken([REDACTED])")
    }
}

/// Keyed BLAKE3 hash of a [`ShareToken`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenHash(pub [u8; 32]);

impl TokenHash {
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|_| PermsError::InvalidToken)?;
        let arr: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| PermsError::InvalidToken)?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for TokenHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A file key wrapped under a token-derived key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenWrappedKey {
    nonce: [u8; TOKEN_NONCE_LEN],
    /// Wrapped key with the GCM tag appended.
    ciphertext: Vec<u8>,
}

impl TokenWrappedKey {
    /// Encode as base64(nonce || ciphertext), the persisted text form.
    pub fn to_base64(&self) -> String {
        let mut buf = Vec::with_capacity(TOKEN_NONCE_LEN + self.ciphertext.len());
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.ciphertext);
        STANDARD.encode(buf)
    }

    /// Decode the persisted text form.
    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(s)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        if bytes.len() <= TOKEN_NONCE_LEN {
            return Err(CryptoError::Encoding("token-wrapped key too short".into()).into());
        }

        let mut nonce = [0u8; TOKEN_NONCE_LEN];
        nonce.copy_from_slice(&bytes[..TOKEN_NONCE_LEN]);
        Ok(Self {
            nonce,
            ciphertext: bytes[TOKEN_NONCE_LEN..].to_vec(),
        })
    }
}

impl fmt::Debug for TokenWrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenWrappedKey({} bytes)", self.ciphertext.len())
    }
}
