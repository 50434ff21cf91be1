//! # filevault Permissions
//!
//! Share grants and access evaluation.
//!
//! ## Overview
//!
//! A file is reachable by its owner, by principals named in private grants,
//! and by anyone holding the token of a public grant. Every grant carries an
//! [`AccessLevel`] and an optional expiry.
//!
//! ## Key Concepts
//!
//! - **Grant**: links a file to one recipient or one public token
//! - **ShareToken**: bearer secret for a public grant; only its hash is stored
//! - **ShareGate**: pure evaluator producing an [`AccessDecision`]
//!
//! Private grants rely on envelopes for key distribution. Public grants have
//! no recipient key pair, so they embed the file key wrapped under a key
//! derived from the token ([`TokenWrappedKey`]).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use filevault_core::{now_millis, FileId, PrincipalId};
//! use filevault_perms::{AccessLevel, AccessRequest, Grant, ShareGate};
//!
//! let file_id = FileId::new();
//! let owner = PrincipalId::new();
//! let bob = PrincipalId::new();
//! let grant = Grant::private(file_id, owner, bob, AccessLevel::Download, None, now_millis());
//!
//! let decision = ShareGate::evaluate(
//!     &AccessRequest { file_id: &file_id, file_owner: &owner, caller: Some(&bob), token: None },
//!     &[grant],
//!     now_millis(),
//! );
//! assert!(decision.permits_retrieval());
//! ```

pub mod error;
pub mod gate;
pub mod grant;
pub mod token;

pub use error::{PermsError, Result};
pub use gate::{AccessDecision, AccessRequest, DenyReason, ShareGate};
pub use grant::{AccessLevel, Grant, GrantUpdate, ShareTarget};
pub use token::{ShareToken, TokenHash, TokenWrappedKey, TOKEN_LEN};
