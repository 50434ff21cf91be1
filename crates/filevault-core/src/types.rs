//! Strong type definitions for filevault.
//!
//! All identifiers are newtypes to prevent mixing a file id with a principal
//! id at compile time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from an existing UUID.
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the raw 16 bytes.
            pub fn as_bytes(&self) -> &[u8; 16] {
                self.0.as_bytes()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Identity of a principal (a registered user).
    PrincipalId
);

uuid_id!(
    /// Identity of a sealed file.
    FileId
);

uuid_id!(
    /// Identity of a share grant.
    GrantId
);

/// Symmetric algorithm used to seal file contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CipherAlgorithm {
    /// AES-256-GCM with a 16-byte nonce and 16-byte tag.
    Aes256Gcm,
}

impl CipherAlgorithm {
    /// The identifier persisted in `files.encryption_method`.
    pub const fn as_str(&self) -> &'static str {
        match self {
            CipherAlgorithm::Aes256Gcm => "AES-256-GCM",
        }
    }

    /// Parse a persisted identifier.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AES-256-GCM" => Some(CipherAlgorithm::Aes256Gcm),
            _ => None,
        }
    }
}

impl fmt::Display for CipherAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Algorithm used to protect a file key inside an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WrapAlgorithm {
    /// RSA-OAEP with SHA-256 for both the label hash and MGF1.
    RsaOaepSha256,
    /// AES-256-GCM under a key derived from a public share token.
    TokenAes256Gcm,
}

impl WrapAlgorithm {
    /// The identifier persisted in `file_keys.algorithm`.
    pub const fn as_str(&self) -> &'static str {
        match self {
            WrapAlgorithm::RsaOaepSha256 => "RSA-OAEP-SHA256",
            WrapAlgorithm::TokenAes256Gcm => "AES-256-GCM-BLAKE3",
        }
    }

    /// Parse a persisted identifier.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RSA-OAEP-SHA256" => Some(WrapAlgorithm::RsaOaepSha256),
            "AES-256-GCM-BLAKE3" => Some(WrapAlgorithm::TokenAes256Gcm),
            _ => None,
        }
    }
}

impl fmt::Display for WrapAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Get current time in milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_millis() as i64
}
