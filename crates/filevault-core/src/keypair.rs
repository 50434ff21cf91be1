//! Principal key pairs.
//!
//! Each principal owns one RSA-2048 key pair, generated once at registration.
//! Public keys travel as SPKI PEM; private keys as PKCS#8 DER, and only ever
//! leave this module encrypted (see [`crate::protect`]).

use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use zeroize::Zeroizing;

use crate::error::{CryptoError, Result};

/// Modulus size for principal key pairs.
pub const RSA_BITS: usize = 2048;

/// A principal's RSA public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Parse an SPKI PEM document.
    pub fn from_pem(pem: &str) -> Result<Self> {
        RsaPublicKey::from_public_key_pem(pem)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    /// Encode as an SPKI PEM document.
    pub fn to_pem(&self) -> Result<String> {
        self.0
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Encoding(e.to_string()))
    }

    pub(crate) fn as_rsa(&self) -> &RsaPublicKey {
        &self.0
    }
}

/// A principal's RSA private key.
///
/// The inner key zeroizes itself on drop.
pub struct PrivateKey(RsaPrivateKey);

impl PrivateKey {
    /// Derive the matching public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(RsaPublicKey::from(&self.0))
    }

    /// Encode as PKCS#8 DER.
    pub fn to_pkcs8_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        let doc = self
            .0
            .to_pkcs8_der()
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        Ok(Zeroizing::new(doc.as_bytes().to_vec()))
    }

    /// Parse PKCS#8 DER.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        RsaPrivateKey::from_pkcs8_der(der)
            .map(Self)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    pub(crate) fn as_rsa(&self) -> &RsaPrivateKey {
        &self.0
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey([REDACTED])")
    }
}

/// A freshly generated key pair.
#[derive(Debug)]
pub struct KeyPair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

/// Source of principal key pairs.
///
/// Only produces the pair. Deciding how the private half is protected at
/// rest belongs to the caller.
pub trait KeyPairProvider: Send + Sync {
    /// Generate a new key pair.
    fn generate(&self) -> Result<KeyPair>;
}

/// RSA key pairs from the OS CSPRNG.
#[derive(Debug, Clone)]
pub struct RsaKeyPairProvider {
    bits: usize,
}

impl RsaKeyPairProvider {
    pub fn new() -> Self {
        Self { bits: RSA_BITS }
    }
}

impl Default for RsaKeyPairProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyPairProvider for RsaKeyPairProvider {
    fn generate(&self) -> Result<KeyPair> {
        let private = RsaPrivateKey::new(&mut OsRng, self.bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        let public = RsaPublicKey::from(&private);

        Ok(KeyPair {
            public: PublicKey(public),
            private: PrivateKey(private),
        })
    }
}
