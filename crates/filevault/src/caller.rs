//! Who is asking.

use filevault_core::{Passphrase, PrincipalId};

/// The party behind a vault call.
///
/// The principal id is trusted as given; authenticating it is the job of
/// the surrounding system. The passphrase is needed only by operations that
/// unwrap a file key.
#[derive(Debug, Clone)]
pub struct Caller {
    principal_id: Option<PrincipalId>,
    passphrase: Option<Passphrase>,
}

impl Caller {
    /// An authenticated principal able to unlock their private key.
    pub fn new(principal_id: PrincipalId, passphrase: Passphrase) -> Self {
        Self {
            principal_id: Some(principal_id),
            passphrase: Some(passphrase),
        }
    }

    /// An authenticated principal without key access. Enough for listing,
    /// revoking, updating and deleting.
    pub fn identified(principal_id: PrincipalId) -> Self {
        Self {
            principal_id: Some(principal_id),
            passphrase: None,
        }
    }

    /// No principal. Only public share tokens apply.
    pub fn anonymous() -> Self {
        Self {
            principal_id: None,
            passphrase: None,
        }
    }

    pub fn principal_id(&self) -> Option<&PrincipalId> {
        self.principal_id.as_ref()
    }

    pub fn passphrase(&self) -> Option<&Passphrase> {
        self.passphrase.as_ref()
    }
}
