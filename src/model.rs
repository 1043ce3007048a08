//! Core entities: [`Identity`], [`OwnIdentity`], [`Trust`], [`Score`].
//! Every entity is a plain, fully-owned value — nothing here borrows from
//! the store, so a clone leaving the store boundary is always a deep copy.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::error::WotError;
use crate::ids::{IdentityId, VersionId};

pub const MAX_NICKNAME_LEN: usize = 30;
pub const MAX_CONTEXTS: usize = 32;
pub const MAX_CONTEXT_LEN: usize = 32;
pub const MAX_PROPERTIES: usize = 64;
pub const MAX_PROPERTY_KEY_LEN: usize = 256;
pub const MAX_PROPERTY_VALUE_LEN: usize = 10 * 1024;
pub const MAX_COMMENT_LEN: usize = 256;
pub const MIN_TRUST_VALUE: i32 = -100;
pub const MAX_TRUST_VALUE: i32 = 100;

/// Seconds since the Unix epoch.
pub fn now_ts() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs()
}

/// Retrieval status of an identity's current edition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FetchState {
    NotFetched,
    ParsingFailed,
    Fetched,
}

/// A pseudonymous identity: the node common to the graph store, the score
/// engine and the subscription engine's `Identities` event source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: IdentityId,
    /// Monotonic non-decreasing edition currently known for this identity's
    /// request URI.
    pub edition: u64,
    pub fetch_state: FetchState,
    /// Highest edition anyone has claimed exists for this identity; advisory.
    pub edition_hint: u64,
    pub last_fetched: Option<u64>,
    pub last_changed: u64,
    /// Immutable once set to `Some`; enforced on import as well as on
    /// direct mutation.
    pub nickname: Option<String>,
    pub publishes_trust_list: bool,
    pub contexts: HashSet<String>,
    pub properties: HashMap<String, String>,
    pub version_id: Option<VersionId>,
}

impl Identity {
    /// A freshly-discovered stub identity, as created when a trust list
    /// names a previously-unknown trustee.
    pub fn stub(id: IdentityId) -> Self {
        Identity {
            id,
            edition: 0,
            fetch_state: FetchState::NotFetched,
            edition_hint: 0,
            last_fetched: None,
            last_changed: now_ts(),
            nickname: None,
            publishes_trust_list: false,
            contexts: HashSet::new(),
            properties: HashMap::new(),
            version_id: None,
        }
    }

    /// Validates §3's size/shape constraints. Called by the store before
    /// any write becomes visible.
    pub fn validate(&self) -> Result<(), WotError> {
        if let Some(nick) = &self.nickname {
            validate_nickname(nick)?;
        }
        if self.contexts.len() > MAX_CONTEXTS {
            return Err(WotError::too_many_contexts(self.contexts.len()));
        }
        for ctx in &self.contexts {
            if ctx.is_empty()
                || ctx.len() > MAX_CONTEXT_LEN
                || !ctx.chars().all(|c| c.is_ascii_alphanumeric())
            {
                return Err(WotError::Validation(format!(
                    "context {ctx:?} must be 1-{MAX_CONTEXT_LEN} latin-alphanumeric chars"
                )));
            }
        }
        if self.properties.len() > MAX_PROPERTIES {
            return Err(WotError::too_many_properties(self.properties.len()));
        }
        for (key, value) in &self.properties {
            if key.is_empty()
                || key.len() > MAX_PROPERTY_KEY_LEN
                || !key
                    .split('.')
                    .all(|tok| !tok.is_empty() && tok.chars().all(|c| c.is_ascii_alphanumeric()))
            {
                return Err(WotError::Validation(format!(
                    "property key {key:?} must be dotted latin-alphanumeric tokens, <= {MAX_PROPERTY_KEY_LEN} chars"
                )));
            }
            if value.len() > MAX_PROPERTY_VALUE_LEN {
                return Err(WotError::Validation(format!(
                    "property value for {key:?} exceeds {MAX_PROPERTY_VALUE_LEN} bytes"
                )));
            }
        }
        Ok(())
    }
}

pub fn validate_nickname(nick: &str) -> Result<(), WotError> {
    if nick.is_empty() {
        return Err(WotError::nickname_empty());
    }
    if nick.chars().count() > MAX_NICKNAME_LEN {
        return Err(WotError::nickname_too_long(nick.chars().count()));
    }
    if !nick
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ' ')
    {
        return Err(WotError::Validation(format!(
            "nickname {nick:?} contains characters outside the restricted alphabet"
        )));
    }
    Ok(())
}

/// An `Identity` whose private insert key is locally held — a root for
/// score computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnIdentity {
    pub identity: Identity,
    /// Opaque private-half token; never inspected by the kernel beyond
    /// being stored and round-tripped; no cryptographic protocol design
    /// happens in this crate.
    pub insert_key: Vec<u8>,
    pub last_insert: Option<u64>,
}

impl OwnIdentity {
    pub fn id(&self) -> IdentityId {
        self.identity.id
    }

    /// Creates a brand-new `OwnIdentity` anchored in a freshly generated
    /// key pair. The private half is kept only as the opaque `insert_key`
    /// byte string the kernel never itself inspects further; the identity
    /// id is derived from the public half the same way any discovered
    /// identity's id would be.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(signing_key)
    }

    /// Anchors a new `OwnIdentity` in a supplied key pair.
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        let id = IdentityId::from_public_key(verifying_key.as_bytes());
        OwnIdentity {
            identity: Identity::stub(id),
            insert_key: signing_key.to_bytes().to_vec(),
            last_insert: None,
        }
    }
}

/// A directed trust edge: `truster` -> `trustee`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trust {
    pub truster: IdentityId,
    pub trustee: IdentityId,
    pub value: i32,
    pub comment: String,
    /// Edition of the truster's trust list that asserted this edge.
    pub truster_edition_at_assignment: u64,
    pub last_changed: u64,
    pub version_id: Option<VersionId>,
}

impl Trust {
    pub fn new(
        truster: IdentityId,
        trustee: IdentityId,
        value: i32,
        comment: String,
        truster_edition_at_assignment: u64,
    ) -> Result<Self, WotError> {
        if truster == trustee {
            return Err(WotError::self_trust(&truster));
        }
        if !(MIN_TRUST_VALUE..=MAX_TRUST_VALUE).contains(&value) {
            return Err(WotError::trust_value_out_of_range(value));
        }
        if comment.chars().count() > MAX_COMMENT_LEN {
            return Err(WotError::Validation(format!(
                "trust comment exceeds {MAX_COMMENT_LEN} characters"
            )));
        }
        Ok(Trust {
            truster,
            trustee,
            value,
            comment,
            truster_edition_at_assignment,
            last_changed: now_ts(),
            version_id: None,
        })
    }
}

/// Per-rank multiplier governing how much an identity's outgoing trust
/// contributes to another owner's score computation.
pub const CAPACITY_TABLE: [i32; 7] = [100, 40, 16, 6, 2, 1, 0];

/// Looks up the default capacity for a rank, clamping ranks `>= 6` to `0`.
pub fn capacity_for_rank(rank: u32) -> i32 {
    CAPACITY_TABLE[(rank as usize).min(CAPACITY_TABLE.len() - 1)]
}

/// A sentinel score value standing in for "infinite" (the owner's score of
/// itself).
pub const OWN_SCORE_SENTINEL: i64 = i64::MAX;

/// A derived `(owner, target)` score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub owner: IdentityId,
    pub target: IdentityId,
    pub value: i64,
    pub rank: u32,
    pub capacity: i32,
    pub version_id: Option<VersionId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trust_rejects_self_loops() {
        let a = IdentityId::from_public_key(b"a");
        let err = Trust::new(a, a, 10, String::new(), 0).unwrap_err();
        assert!(matches!(err, WotError::Validation(_)));
    }

    #[test]
    fn trust_rejects_out_of_range_values() {
        let a = IdentityId::from_public_key(b"a");
        let b = IdentityId::from_public_key(b"b");
        assert!(Trust::new(a, b, 101, String::new(), 0).is_err());
        assert!(Trust::new(a, b, -101, String::new(), 0).is_err());
        assert!(Trust::new(a, b, 100, String::new(), 0).is_ok());
        assert!(Trust::new(a, b, -100, String::new(), 0).is_ok());
    }

    #[test]
    fn nickname_boundaries() {
        let exactly_30 = "a".repeat(30);
        let exactly_31 = "a".repeat(31);
        assert!(validate_nickname(&exactly_30).is_ok());
        assert!(validate_nickname(&exactly_31).is_err());
        assert!(validate_nickname("").is_err());
    }

    #[test]
    fn generated_own_identities_get_distinct_ids() {
        let a = OwnIdentity::generate();
        let b = OwnIdentity::generate();
        assert_ne!(a.id(), b.id());
        assert!(!a.insert_key.is_empty());
    }

    #[test]
    fn capacity_table_matches_spec() {
        assert_eq!(capacity_for_rank(0), 100);
        assert_eq!(capacity_for_rank(1), 40);
        assert_eq!(capacity_for_rank(5), 1);
        assert_eq!(capacity_for_rank(6), 0);
        assert_eq!(capacity_for_rank(50), 0);
    }
}
