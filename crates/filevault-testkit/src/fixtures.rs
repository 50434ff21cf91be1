//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use filevault::{Caller, FileVault, VaultConfig};
use filevault_core::{
    CryptoError, KdfParams, KeyPair, KeyPairProvider, Passphrase, PrincipalId, PublicKey,
};
use filevault_store::{MemoryBlobStore, MemoryStore};

/// The vault type every in-memory fixture uses.
pub type TestVault = FileVault<MemoryStore, MemoryBlobStore>;

/// Vault configuration with cheap key derivation.
pub fn test_config() -> VaultConfig {
    VaultConfig {
        kdf: KdfParams::fast(),
        ..VaultConfig::default()
    }
}

/// A registered principal and the passphrase protecting their key.
#[derive(Debug, Clone)]
pub struct Party {
    pub id: PrincipalId,
    pub passphrase: Passphrase,
    pub public_key: PublicKey,
}

impl Party {
    /// Caller able to unlock this party's private key.
    pub fn caller(&self) -> Caller {
        Caller::new(self.id, self.passphrase.clone())
    }

    /// Caller with identity only.
    pub fn identified(&self) -> Caller {
        Caller::identified(self.id)
    }

    /// Caller presenting the wrong passphrase.
    pub fn with_wrong_passphrase(&self) -> Caller {
        Caller::new(self.id, Passphrase::new("not the passphrase"))
    }
}

/// A vault over in-memory stores.
pub struct TestFixture {
    pub vault: TestVault,
}

impl TestFixture {
    /// Create a fixture with [`test_config`].
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: VaultConfig) -> Self {
        Self {
            vault: FileVault::new(MemoryStore::new(), MemoryBlobStore::new(), config),
        }
    }

    /// Register a new principal whose passphrase is derived from `name`.
    ///
    /// # Panics
    ///
    /// Panics if registration fails.
    pub async fn register(&self, name: &str) -> Party {
        let id = PrincipalId::new();
        let passphrase = Passphrase::new(format!("{name} passphrase"));
        let public_key = self
            .vault
            .register_principal(id, &passphrase)
            .await
            .expect("registration failed");
        Party {
            id,
            passphrase,
            public_key,
        }
    }

    /// Register several principals.
    pub async fn register_many(&self, names: &[&str]) -> Vec<Party> {
        let mut parties = Vec::with_capacity(names.len());
        for name in names {
            parties.push(self.register(name).await);
        }
        parties
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Key pair source that always fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingKeyPairProvider;

impl KeyPairProvider for FailingKeyPairProvider {
    fn generate(&self) -> filevault_core::Result<KeyPair> {
        Err(CryptoError::KeyGeneration("entropy source unavailable".into()))
    }
}

impl FailingKeyPairProvider {
    /// An in-memory vault wired to this provider.
    pub fn vault() -> TestVault {
        FileVault::with_key_provider(
            MemoryStore::new(),
            MemoryBlobStore::new(),
            Arc::new(FailingKeyPairProvider),
            test_config(),
        )
    }
}
