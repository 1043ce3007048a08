//! Error taxonomy for the trust graph kernel.
//!
//! Validation errors abort the enclosing operation and are never logged
//! beyond `debug`. Unknown-entity and duplicate-entity errors are typed
//! failures returned to callers. Parse failures are absorbed by the
//! importer and never propagate out of it. Internal errors roll back the
//! transaction that raised them and trigger a full score recompute for the
//! affected owner.

use thiserror::Error;

use crate::ids::IdentityId;

/// The kernel's single error type. Every fallible kernel operation returns
/// `Result<T, WotError>`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WotError {
    /// Malformed input: bad id, oversize nickname, out-of-range trust value, etc.
    #[error("validation error: {0}")]
    Validation(String),

    /// Lookup miss for an identity.
    #[error("unknown identity: {0}")]
    UnknownIdentity(IdentityId),

    /// Lookup miss for a trust edge.
    #[error("unknown trust: {truster} -> {trustee}")]
    UnknownTrust {
        truster: IdentityId,
        trustee: IdentityId,
    },

    /// Lookup miss for a score row.
    #[error("unknown score: {owner} -> {target}")]
    UnknownScore {
        owner: IdentityId,
        target: IdentityId,
    },

    /// Lookup miss for a subscription.
    #[error("unknown subscription: {0}")]
    UnknownSubscription(uuid::Uuid),

    /// Lookup miss for a client.
    #[error("unknown client: {0}")]
    UnknownClient(uuid::Uuid),

    /// Attempt to create an entity that already exists.
    #[error("duplicate {kind}: {id}")]
    DuplicateEntity { kind: &'static str, id: String },

    /// An identity's published document could not be parsed.
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// A fetcher or client transport failure; retried by the caller.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// An invariant was violated inside the store or the score engine.
    #[error("internal invariant violation: {0}")]
    Internal(String),
}

impl WotError {
    pub fn invalid_identity_id(raw: &str) -> Self {
        WotError::Validation(format!(
            "identity id must be 43 base64url chars decoding to 32 bytes, got {:?}",
            raw
        ))
    }

    pub fn self_trust(id: &IdentityId) -> Self {
        WotError::Validation(format!("identity {id} cannot trust itself"))
    }

    pub fn trust_value_out_of_range(value: i32) -> Self {
        WotError::Validation(format!(
            "trust value {value} out of range [-100, 100]"
        ))
    }

    pub fn nickname_too_long(len: usize) -> Self {
        WotError::Validation(format!(
            "nickname length {len} exceeds the 30 character limit"
        ))
    }

    pub fn nickname_empty() -> Self {
        WotError::Validation("nickname must not be empty".into())
    }

    pub fn nickname_immutable(id: &IdentityId) -> Self {
        WotError::Validation(format!(
            "identity {id} already has a nickname; nicknames cannot change once set"
        ))
    }

    pub fn too_many_contexts(count: usize) -> Self {
        WotError::Validation(format!(
            "{count} contexts exceeds the 32 context limit"
        ))
    }

    pub fn too_many_properties(count: usize) -> Self {
        WotError::Validation(format!(
            "{count} properties exceeds the 64 property limit"
        ))
    }

    pub fn edition_not_increasing(current: u64, attempted: u64) -> Self {
        WotError::Validation(format!(
            "edition must only increase: current={current}, attempted={attempted}"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_carry_a_readable_message() {
        let err = WotError::trust_value_out_of_range(150);
        assert!(err.to_string().contains("150"));
    }

    #[test]
    fn variants_are_comparable_for_test_assertions() {
        assert_eq!(
            WotError::nickname_empty(),
            WotError::Validation("nickname must not be empty".into())
        );
    }
}
