//! Access evaluation.
//!
//! The gate answers one question: may this caller, optionally holding a share
//! token, act on this file right now? It is a pure function over the file's
//! owner and its grants, so it can be evaluated against any clock.
//!
//! Evaluation order: ownership, then a private grant naming the caller, then
//! a public grant matching the token. The first live match wins.

use serde::{Deserialize, Serialize};

use filevault_core::{FileId, GrantId, PrincipalId};

use crate::grant::{AccessLevel, Grant};
use crate::token::TokenHash;

/// Why access was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenyReason {
    /// No grant matches the caller or token.
    NoGrant,
    /// A matching grant exists but has expired.
    Expired,
}

/// Result of evaluating a request against a file's grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessDecision {
    Denied(DenyReason),
    /// The caller owns the file.
    Owner,
    /// Authorized by a grant naming the caller.
    PrivateGrant { grant_id: GrantId, level: AccessLevel },
    /// Authorized by a public token.
    PublicGrant { grant_id: GrantId, level: AccessLevel },
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, AccessDecision::Denied(_))
    }

    /// Whether the decision releases ciphertext and key material.
    pub fn permits_retrieval(&self) -> bool {
        match self {
            AccessDecision::Denied(_) => false,
            AccessDecision::Owner => true,
            AccessDecision::PrivateGrant { level, .. } | AccessDecision::PublicGrant { level, .. } => {
                level.permits_retrieval()
            }
        }
    }

    /// The grant that authorized access, if any.
    pub fn grant_id(&self) -> Option<GrantId> {
        match self {
            AccessDecision::PrivateGrant { grant_id, .. }
            | AccessDecision::PublicGrant { grant_id, .. } => Some(*grant_id),
            _ => None,
        }
    }

    /// The granted level. Owners are not bound by a level and return `None`.
    pub fn level(&self) -> Option<AccessLevel> {
        match self {
            AccessDecision::PrivateGrant { level, .. }
            | AccessDecision::PublicGrant { level, .. } => Some(*level),
            _ => None,
        }
    }
}

/// One access request.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    pub file_id: &'a FileId,
    pub file_owner: &'a PrincipalId,
    /// The authenticated principal, if any.
    pub caller: Option<&'a PrincipalId>,
    /// Hash of the presented share token, if any.
    pub token: Option<&'a TokenHash>,
}

/// Stateless access evaluator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShareGate;

impl ShareGate {
    /// Evaluate `request` against `grants` at `now` (Unix milliseconds).
    ///
    /// Grants for other files are ignored.
    pub fn evaluate(request: &AccessRequest<'_>, grants: &[Grant], now: i64) -> AccessDecision {
        if request.caller == Some(request.file_owner) {
            return AccessDecision::Owner;
        }

        let mut saw_expired = false;
        let for_file = grants.iter().filter(|g| g.file_id == *request.file_id);

        if let Some(caller) = request.caller {
            for grant in for_file.clone().filter(|g| g.recipient() == Some(caller)) {
                if grant.is_expired(now) {
                    saw_expired = true;
                    continue;
                }
                return AccessDecision::PrivateGrant {
                    grant_id: grant.id,
                    level: grant.access_level,
                };
            }
        }

        if let Some(token) = request.token {
            for grant in for_file.filter(|g| g.token_hash() == Some(token)) {
                if grant.is_expired(now) {
                    saw_expired = true;
                    continue;
                }
                return AccessDecision::PublicGrant {
                    grant_id: grant.id,
                    level: grant.access_level,
                };
            }
        }

        if saw_expired {
            AccessDecision::Denied(DenyReason::Expired)
        } else {
            AccessDecision::Denied(DenyReason::NoGrant)
        }
    }
}
