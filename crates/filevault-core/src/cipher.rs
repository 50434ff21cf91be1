//! Symmetric file sealing with AES-256-GCM.
//!
//! Nonces are generated inside [`seal`] and are never accepted from callers,
//! so a key cannot be paired with a repeated nonce through this API.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce, Tag};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};

/// AES-256-GCM instantiated with a 16-byte nonce.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Size of a file key in bytes.
pub const KEY_LEN: usize = 32;

/// Size of the GCM nonce in bytes.
pub const NONCE_LEN: usize = 16;

/// Size of the GCM authentication tag in bytes.
pub const TAG_LEN: usize = 16;

/// A one-time 256-bit key for a single sealed file.
///
/// Zeroized on drop. Never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct FileKey([u8; KEY_LEN]);

impl FileKey {
    /// Generate a new random key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, failing unless it is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FileKey([REDACTED])")
    }
}

/// Output of [`seal`]: everything needed to [`open`] given the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    nonce: [u8; NONCE_LEN],
    tag: [u8; TAG_LEN],
    ciphertext: Vec<u8>,
}

impl SealedPayload {
    /// The nonce used for this encryption.
    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// The 128-bit authentication tag.
    pub fn tag(&self) -> &[u8; TAG_LEN] {
        &self.tag
    }

    /// The ciphertext. Same length as the plaintext.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Length of the stored blob produced by [`Self::to_blob`].
    pub fn blob_len(&self) -> usize {
        NONCE_LEN + TAG_LEN + self.ciphertext.len()
    }

    /// Encode as the on-disk layout `[nonce:16][tag:16][ciphertext:N]`.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.blob_len());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Decode the on-disk layout.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        if blob.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::MalformedBlob(format!(
                "expected at least {} bytes, got {}",
                NONCE_LEN + TAG_LEN,
                blob.len()
            )));
        }

        let (nonce, rest) = blob.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let mut n = [0u8; NONCE_LEN];
        n.copy_from_slice(nonce);
        let mut t = [0u8; TAG_LEN];
        t.copy_from_slice(tag);

        Ok(Self {
            nonce: n,
            tag: t,
            ciphertext: ciphertext.to_vec(),
        })
    }
}

/// Encrypt `plaintext` under `key` with a freshly generated random nonce.
pub fn seal(plaintext: &[u8], key: &FileKey) -> Result<SealedPayload> {
    let cipher = Aes256Gcm16::new_from_slice(key.as_bytes())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let mut buf = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<U16>::from_slice(&nonce), b"", &mut buf)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(SealedPayload {
        nonce,
        tag: tag_bytes,
        ciphertext: buf,
    })
}

/// Decrypt and authenticate a sealed payload.
///
/// Fails closed: any tag mismatch returns
/// [`CryptoError::AuthenticationFailure`] and no plaintext.
pub fn open(sealed: &SealedPayload, key: &FileKey) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm16::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::AuthenticationFailure)?;

    let mut buf = sealed.ciphertext.clone();
    let tag = Tag::<U16>::from_slice(&sealed.tag);
    match cipher.decrypt_in_place_detached(Nonce::<U16>::from_slice(&sealed.nonce), b"", &mut buf, tag)
    {
        Ok(()) => Ok(buf),
        Err(_) => {
            buf.zeroize();
            Err(CryptoError::AuthenticationFailure)
        }
    }
}
