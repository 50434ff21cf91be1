//! Proptest generators for property-based testing.

use proptest::prelude::*;
use uuid::Uuid;

use filevault_core::{FileId, GrantId, PrincipalId};
use filevault_perms::AccessLevel;

/// Generate an access level.
pub fn access_level() -> impl Strategy<Value = AccessLevel> {
    prop_oneof![
        Just(AccessLevel::View),
        Just(AccessLevel::Edit),
        Just(AccessLevel::Download),
    ]
}

/// Generate plaintext of at most `max_len` bytes.
pub fn plaintext(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Generate a file id.
pub fn file_id() -> impl Strategy<Value = FileId> {
    any::<u128>().prop_map(|n| FileId::from_uuid(uuid_from(n)))
}

/// Generate a principal id.
pub fn principal_id() -> impl Strategy<Value = PrincipalId> {
    any::<u128>().prop_map(|n| PrincipalId::from_uuid(uuid_from(n)))
}

/// Generate a grant id.
pub fn grant_id() -> impl Strategy<Value = GrantId> {
    any::<u128>().prop_map(|n| GrantId::from_uuid(uuid_from(n)))
}

/// Generate an expiry offset in milliseconds relative to now. Negative
/// offsets lie in the past.
pub fn expiry_offset() -> impl Strategy<Value = Option<i64>> {
    prop::option::of(-86_400_000i64..=86_400_000)
}

/// Parameters for issuing a grant.
#[derive(Debug, Clone)]
pub struct GrantParams {
    pub level: AccessLevel,
    /// Offset from now, see [`expiry_offset`].
    pub expiry_offset: Option<i64>,
    pub public: bool,
}

impl GrantParams {
    /// Absolute expiry given the current time.
    pub fn expires_at(&self, now: i64) -> Option<i64> {
        self.expiry_offset.map(|offset| now + offset)
    }
}

impl Arbitrary for GrantParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (access_level(), expiry_offset(), any::<bool>())
            .prop_map(|(level, expiry_offset, public)| GrantParams {
                level,
                expiry_offset,
                public,
            })
            .boxed()
    }
}

fn uuid_from(n: u128) -> Uuid {
    Uuid::from_u128(n)
}
