//! Private-key protection at rest.
//!
//! A principal's PKCS#8 private key is encrypted with AES-256-GCM under a key
//! derived from their passphrase with Argon2id. The salt, KDF parameters and
//! nonce travel with the ciphertext so the passphrase is the only secret
//! needed to unlock it.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{CryptoError, Result};
use crate::keypair::PrivateKey;

/// Size of the Argon2id salt in bytes.
pub const SALT_LEN: usize = 16;

/// Size of the AES-GCM nonce used for key protection.
const PROTECT_NONCE_LEN: usize = 12;

/// A principal's passphrase. Zeroized on drop, never printed.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Passphrase([REDACTED])")
    }
}

/// Argon2id parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_cost: u32,
    /// Time cost (iterations).
    pub time_cost: u32,
    /// Parallelism factor.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        // OWASP recommendations for Argon2id
        Self {
            memory_cost: 19 * 1024,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Minimal parameters for tests. Not for production use.
    pub fn fast() -> Self {
        Self {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }
}

/// A private key sealed under a passphrase-derived key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedPrivateKey {
    /// KDF parameters in force when the key was protected.
    pub params: KdfParams,
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; PROTECT_NONCE_LEN],
    /// PKCS#8 DER ciphertext with the GCM tag appended.
    pub ciphertext: Vec<u8>,
}

impl ProtectedPrivateKey {
    /// Encode as base64(CBOR), the form stored in `users.encrypted_private_key`.
    pub fn to_encoded(&self) -> String {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf).expect("CBOR serialization failed");
        STANDARD.encode(buf)
    }

    /// Decode the stored text form.
    pub fn from_encoded(s: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(s)
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        ciborium::from_reader(bytes.as_slice()).map_err(|e| CryptoError::Encoding(e.to_string()))
    }
}

impl std::fmt::Debug for ProtectedPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtectedPrivateKey")
            .field("params", &self.params)
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

fn derive_key(
    passphrase: &Passphrase,
    salt: &[u8; SALT_LEN],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>> {
    let argon_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(32),
    )
    .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut out = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.expose().as_bytes(), salt, &mut out[..])
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    Ok(out)
}

/// Encrypt a private key under a passphrase.
pub fn protect(
    private: &PrivateKey,
    passphrase: &Passphrase,
    params: &KdfParams,
) -> Result<ProtectedPrivateKey> {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let mut nonce = [0u8; PROTECT_NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(passphrase, &salt, params)?;
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    let der = private.to_pkcs8_der()?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), der.as_slice())
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(ProtectedPrivateKey {
        params: *params,
        salt,
        nonce,
        ciphertext,
    })
}

/// Decrypt a protected private key.
///
/// A wrong passphrase surfaces as [`CryptoError::AuthenticationFailure`].
pub fn unprotect(protected: &ProtectedPrivateKey, passphrase: &Passphrase) -> Result<PrivateKey> {
    let key = derive_key(passphrase, &protected.salt, &protected.params)?;
    let cipher =
        Aes256Gcm::new_from_slice(&key[..]).map_err(|_| CryptoError::AuthenticationFailure)?;

    let der = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(&protected.nonce), protected.ciphertext.as_slice())
            .map_err(|_| CryptoError::AuthenticationFailure)?,
    );

    PrivateKey::from_pkcs8_der(&der)
}
