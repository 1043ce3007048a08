//! Identifiers: [`IdentityId`] (the base64 of an identity's 32-byte routing
//! key) and [`VersionId`] (a monotonic stamp used by the subscription
//! engine's mark-and-sweep synchronization).

use std::fmt;

use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::WotError;

/// Number of raw bytes backing an identity id: every identity id is
/// 43 base64 chars decoding to exactly 32 bytes.
pub const ROUTING_KEY_LEN: usize = 32;

/// The base64 text length of an encoded [`IdentityId`].
pub const IDENTITY_ID_LEN: usize = 43;

/// A stable identity id: the base64 of the routing key of the identity's
/// public key. Validated on construction so that once an `IdentityId`
/// exists, every invariant about its shape already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IdentityId([u8; ROUTING_KEY_LEN]);

impl IdentityId {
    /// Derives an identity id from raw public key bytes, the way
    /// `node_id_from_falcon_pk` derives a `NodeId` from a validator's
    /// public key: hash the key material down to a fixed-size routing key.
    pub fn from_public_key(pk_bytes: &[u8]) -> Self {
        let digest = Sha256::digest(pk_bytes);
        let mut routing_key = [0u8; ROUTING_KEY_LEN];
        routing_key.copy_from_slice(&digest[..ROUTING_KEY_LEN]);
        IdentityId(routing_key)
    }

    /// Builds an `IdentityId` directly from a 32-byte routing key.
    pub fn from_routing_key(routing_key: [u8; ROUTING_KEY_LEN]) -> Self {
        IdentityId(routing_key)
    }

    pub fn routing_key(&self) -> &[u8; ROUTING_KEY_LEN] {
        &self.0
    }

    /// Parses the canonical 43-character base64url-unpadded form.
    pub fn parse(s: &str) -> Result<Self, WotError> {
        if s.len() != IDENTITY_ID_LEN {
            return Err(WotError::invalid_identity_id(s));
        }
        let mut buf = [0u8; ROUTING_KEY_LEN];
        let decoded = Base64UrlUnpadded::decode(s, &mut buf)
            .map_err(|_| WotError::invalid_identity_id(s))?;
        if decoded.len() != ROUTING_KEY_LEN {
            return Err(WotError::invalid_identity_id(s));
        }
        Ok(IdentityId(buf))
    }

    pub fn to_base64(&self) -> String {
        Base64UrlUnpadded::encode_string(&self.0)
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl TryFrom<String> for IdentityId {
    type Error = WotError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        IdentityId::parse(&s)
    }
}

impl From<IdentityId> for String {
    fn from(id: IdentityId) -> Self {
        id.to_base64()
    }
}

/// A monotonic stamp the store assigns on every mutation of an entity —
/// never a fresh-random UUID invented on read; see `DESIGN.md` Open
/// Question 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VersionId(u64);

impl VersionId {
    pub(crate) fn new(raw: u64) -> Self {
        VersionId(raw)
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Monotonic counter shared by a store, assigning a fresh `VersionId` on
/// every staged mutation.
#[derive(Debug, Default)]
pub struct VersionCounter(u64);

impl VersionCounter {
    pub fn next(&mut self) -> VersionId {
        self.0 += 1;
        VersionId(self.0)
    }

    /// Restores a counter to a previously-observed high-water mark, e.g.
    /// when reloading a snapshot — the next `next()` call continues from
    /// here rather than restarting at zero and risking version reuse.
    pub fn restore(raw: u64) -> Self {
        VersionCounter(raw)
    }

    pub fn current(&self) -> u64 {
        self.0
    }
}
