//! Wrapping file keys under principal key pairs with RSA-OAEP/SHA-256.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rsa::Oaep;
use sha2::Sha256;

use crate::cipher::FileKey;
use crate::error::{CryptoError, Result};
use crate::keypair::{PrivateKey, PublicKey};

/// A [`FileKey`] encrypted under one principal's public key.
#[derive(Clone, PartialEq, Eq)]
pub struct WrappedKey(Vec<u8>);

impl WrappedKey {
    /// Create from raw RSA ciphertext.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Get the raw RSA ciphertext.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encode as standard base64, the persisted text form.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    /// Decode the persisted text form.
    pub fn from_base64(s: &str) -> Result<Self> {
        STANDARD
            .decode(s)
            .map(Self)
            .map_err(|e| CryptoError::Encoding(e.to_string()))
    }
}

impl std::fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WrappedKey({} bytes)", self.0.len())
    }
}

/// Wrap `key` under `public`.
pub fn wrap(key: &FileKey, public: &PublicKey) -> Result<WrappedKey> {
    public
        .as_rsa()
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.as_bytes())
        .map(WrappedKey)
        .map_err(|e| CryptoError::Encryption(e.to_string()))
}

/// Recover a file key with `private`.
///
/// The RSA operation is blinded with a fresh random factor. Every failure,
/// whether padding, wrong key, or wrong payload length, collapses into
/// [`CryptoError::UnwrapFailure`].
pub fn unwrap(wrapped: &WrappedKey, private: &PrivateKey) -> Result<FileKey> {
    let bytes = zeroize::Zeroizing::new(
        private
            .as_rsa()
            .decrypt_blinded(&mut OsRng, Oaep::new::<Sha256>(), &wrapped.0)
            .map_err(|_| CryptoError::UnwrapFailure)?,
    );

    FileKey::from_slice(&bytes).ok_or(CryptoError::UnwrapFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::{KeyPairProvider, RsaKeyPairProvider};

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let pair = RsaKeyPairProvider::new().generate().unwrap();
        let key = FileKey::generate();

        let wrapped = wrap(&key, &pair.public).unwrap();
        assert_eq!(wrapped.as_bytes().len(), 256);

        let recovered = unwrap(&wrapped, &pair.private).unwrap();
        assert_eq!(recovered.as_bytes(), key.as_bytes());
    }

    #[test]
    fn test_blinded_unwrap_is_stable() {
        let pair = RsaKeyPairProvider::new().generate().unwrap();
        let key = FileKey::generate();
        let wrapped = wrap(&key, &pair.public).unwrap();

        // Each call draws a new blinding factor.
        for _ in 0..4 {
            let recovered = unwrap(&wrapped, &pair.private).unwrap();
            assert_eq!(recovered.as_bytes(), key.as_bytes());
        }
    }

    #[test]
    fn test_cross_key_fails() {
        let provider = RsaKeyPairProvider::new();
        let alice = provider.generate().unwrap();
        let bob = provider.generate().unwrap();

        let wrapped = wrap(&FileKey::generate(), &alice.public).unwrap();
        let err = unwrap(&wrapped, &bob.private).unwrap_err();
        assert!(matches!(err, CryptoError::UnwrapFailure));
    }

    #[test]
    fn test_truncated_wrapped_key_fails() {
        let pair = RsaKeyPairProvider::new().generate().unwrap();
        let wrapped = wrap(&FileKey::generate(), &pair.public).unwrap();
        let truncated = WrappedKey::from_bytes(wrapped.as_bytes()[..100].to_vec());

        assert!(matches!(
            unwrap(&truncated, &pair.private),
            Err(CryptoError::UnwrapFailure)
        ));
    }

    #[test]
    fn test_base64_roundtrip() {
        let wrapped = WrappedKey::from_bytes(vec![1, 2, 3, 250]);
        let text = wrapped.to_base64();
        assert_eq!(WrappedKey::from_base64(&text).unwrap(), wrapped);
        assert!(WrappedKey::from_base64("***").is_err());
    }
}
