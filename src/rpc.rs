//! The client-facing RPC surface. Plain, serializable request/response/
//! event types — the wire transport and FCP/CLI framing around them is
//! explicitly out of scope. Shape mirrors `src/consensus/types.rs`'s
//! plain `#[derive(Serialize, Deserialize)]` protocol structs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{IdentityId, VersionId};
use crate::model::{Identity, Score, Trust};
use crate::subscription::EventSourceKind;

/// A request a client sends to the kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    Subscribe { to: EventSourceKind },
    Unsubscribe { subscription: Uuid },
    GetIdentity { id: IdentityId },
    GetTrust { truster: IdentityId, trustee: IdentityId },
    GetScore { owner: IdentityId, target: IdentityId },
}

/// A reply the kernel sends back, one-to-one with a [`Request`] or as an
/// asynchronous event delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    /// First reply to `Subscribe`: announces how many entities the
    /// following BeginSync/ObjectChanged*/EndSync stream will carry.
    SubscribeSnapshot { count: usize },
    Subscribed { subscription: Uuid },
    Unsubscribed,
    UnknownSubscription,

    IdentityChanged { old: Option<Identity>, new: Option<Identity> },
    TrustChanged { old: Option<Trust>, new: Option<Trust> },
    ScoreChanged { old: Option<Score>, new: Option<Score> },
    BeginSync { kind: EventSourceKind, version: VersionId },
    EndSync { kind: EventSourceKind, version: VersionId },

    Identity(Identity),
    Trust(Trust),
    Score(Score),
    UnknownIdentity,
    NotTrusted,
    NotInTrustTree,
}
