//! Share grants.
//!
//! A grant links a file to either one recipient principal or an anonymous
//! public token, with an access level and an optional expiry. Key material
//! for private grants lives in envelopes, not here; public grants embed a
//! token-wrapped copy of the file key because there is no recipient key pair.

use std::fmt;

use serde::{Deserialize, Serialize};

use filevault_core::{FileId, GrantId, PrincipalId};

use crate::error::{PermsError, Result};
use crate::token::{TokenHash, TokenWrappedKey};

/// What a grant lets its holder do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessLevel {
    /// Metadata only. Raw bytes are never released.
    View,
    /// May retrieve and decrypt.
    Edit,
    /// May retrieve and decrypt.
    Download,
}

impl AccessLevel {
    /// Whether this level permits ciphertext retrieval and key unwrap.
    pub const fn permits_retrieval(&self) -> bool {
        matches!(self, AccessLevel::Edit | AccessLevel::Download)
    }

    /// The identifier persisted in `file_shares.access_type`.
    pub const fn as_str(&self) -> &'static str {
        match self {
            AccessLevel::View => "view",
            AccessLevel::Edit => "edit",
            AccessLevel::Download => "download",
        }
    }

    /// Parse a persisted identifier.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "view" => Ok(AccessLevel::View),
            "edit" => Ok(AccessLevel::Edit),
            "download" => Ok(AccessLevel::Download),
            other => Err(PermsError::InvalidAccessLevel(other.to_string())),
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who a grant is for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShareTarget {
    /// A specific registered principal.
    Recipient(PrincipalId),

    /// Anyone presenting the token whose hash matches.
    PublicToken {
        token_hash: TokenHash,
        /// File key wrapped under the token. `None` for a plaintext file and
        /// once invalidated by a key change.
        embedded_key: Option<TokenWrappedKey>,
    },
}

/// A share grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub id: GrantId,
    pub file_id: FileId,
    pub owner_id: PrincipalId,
    pub target: ShareTarget,
    pub access_level: AccessLevel,
    /// Unix milliseconds after which the grant no longer authorizes anything.
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Grant {
    /// Create a private grant for one recipient.
    pub fn private(
        file_id: FileId,
        owner_id: PrincipalId,
        recipient: PrincipalId,
        access_level: AccessLevel,
        expires_at: Option<i64>,
        now: i64,
    ) -> Self {
        Self {
            id: GrantId::new(),
            file_id,
            owner_id,
            target: ShareTarget::Recipient(recipient),
            access_level,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a public grant keyed by a token hash.
    ///
    /// `embedded_key` is `None` for a file stored in plaintext.
    pub fn public(
        file_id: FileId,
        owner_id: PrincipalId,
        token_hash: TokenHash,
        embedded_key: Option<TokenWrappedKey>,
        access_level: AccessLevel,
        expires_at: Option<i64>,
        now: i64,
    ) -> Self {
        Self {
            id: GrantId::new(),
            file_id,
            owner_id,
            target: ShareTarget::PublicToken {
                token_hash,
                embedded_key,
            },
            access_level,
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// The recipient of a private grant.
    pub fn recipient(&self) -> Option<&PrincipalId> {
        match &self.target {
            ShareTarget::Recipient(id) => Some(id),
            ShareTarget::PublicToken { .. } => None,
        }
    }

    /// The token hash of a public grant.
    pub fn token_hash(&self) -> Option<&TokenHash> {
        match &self.target {
            ShareTarget::Recipient(_) => None,
            ShareTarget::PublicToken { token_hash, .. } => Some(token_hash),
        }
    }

    /// The embedded key of a public grant, if still valid.
    pub fn embedded_key(&self) -> Option<&TokenWrappedKey> {
        match &self.target {
            ShareTarget::PublicToken { embedded_key, .. } => embedded_key.as_ref(),
            ShareTarget::Recipient(_) => None,
        }
    }

    pub fn is_public(&self) -> bool {
        matches!(self.target, ShareTarget::PublicToken { .. })
    }

    /// Whether the grant has expired at `now`.
    ///
    /// The boundary instant itself is still valid.
    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(expires) if now > expires)
    }

    /// Drop the embedded key of a public grant.
    pub fn clear_embedded_key(&mut self) {
        if let ShareTarget::PublicToken { embedded_key, .. } = &mut self.target {
            *embedded_key = None;
        }
    }

    /// Apply an owner update.
    pub fn apply(&mut self, update: &GrantUpdate, now: i64) {
        if let Some(level) = update.access_level {
            self.access_level = level;
        }
        if let Some(expiry) = update.expires_at {
            self.expires_at = expiry;
        }
        self.updated_at = now;
    }
}

/// Owner-side changes to an existing grant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantUpdate {
    pub access_level: Option<AccessLevel>,
    /// `Some(None)` clears the expiry; `None` leaves it unchanged.
    pub expires_at: Option<Option<i64>>,
}

impl GrantUpdate {
    pub fn access_level(mut self, level: AccessLevel) -> Self {
        self.access_level = Some(level);
        self
    }

    pub fn expires_at(mut self, expiry: Option<i64>) -> Self {
        self.expires_at = Some(expiry);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::ShareToken;
    use filevault_core::FileKey;

    #[test]
    fn test_access_level_parse() {
        assert_eq!(AccessLevel::parse("download").unwrap(), AccessLevel::Download);
        assert_eq!(AccessLevel::View.as_str(), "view");
        assert!(AccessLevel::parse("admin").is_err());
    }

    #[test]
    fn test_view_does_not_permit_retrieval() {
        assert!(!AccessLevel::View.permits_retrieval());
        assert!(AccessLevel::Edit.permits_retrieval());
        assert!(AccessLevel::Download.permits_retrieval());
    }

    #[test]
    fn test_expiry_boundary() {
        let grant = Grant::private(
            FileId::new(),
            PrincipalId::new(),
            PrincipalId::new(),
            AccessLevel::Download,
            Some(1000),
            0,
        );

        assert!(!grant.is_expired(500));
        assert!(!grant.is_expired(1000));
        assert!(grant.is_expired(1001));
    }

    #[test]
    fn test_target_accessors() {
        let file_id = FileId::new();
        let recipient = PrincipalId::new();
        let private = Grant::private(
            file_id,
            PrincipalId::new(),
            recipient,
            AccessLevel::View,
            None,
            0,
        );
        assert_eq!(private.recipient(), Some(&recipient));
        assert!(private.token_hash().is_none());
        assert!(!private.is_public());

        let token = ShareToken::generate();
        let embedded = token.wrap_file_key(&FileKey::generate(), &file_id).unwrap();
        let mut public = Grant::public(
            file_id,
            PrincipalId::new(),
            token.hash(),
            Some(embedded),
            AccessLevel::Download,
            None,
            0,
        );
        assert!(public.is_public());
        assert_eq!(public.token_hash(), Some(&token.hash()));
        assert!(public.embedded_key().is_some());

        public.clear_embedded_key();
        assert!(public.embedded_key().is_none());
    }

    #[test]
    fn test_apply_update() {
        let mut grant = Grant::private(
            FileId::new(),
            PrincipalId::new(),
            PrincipalId::new(),
            AccessLevel::View,
            Some(10),
            0,
        );

        grant.apply(&GrantUpdate::default().access_level(AccessLevel::Edit), 5);
        assert_eq!(grant.access_level, AccessLevel::Edit);
        assert_eq!(grant.expires_at, Some(10));
        assert_eq!(grant.updated_at, 5);

        grant.apply(&GrantUpdate::default().expires_at(None), 6);
        assert_eq!(grant.expires_at, None);
    }
}
