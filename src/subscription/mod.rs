//! The subscription/notification engine: per-client ordered notification
//! queues, the BeginSync/ObjectChanged*/EndSync synchronization protocol,
//! and the retry/disconnect deployment pass.
//!
//! Grounded on `src/network/gossip.rs`'s rebroadcast loop filtered per
//! peer and `src/node/mod.rs`'s locked shared state touched from a
//! background task, generalized to per-client sequenced delivery.

mod manager;

pub use manager::SubscriptionManager;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::VersionId;
use crate::model::{Identity, Score, Trust};

/// A client's declared transport: a transport id (opaque UUID) and a
/// transport type. The UUID itself is the client id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Callback,
    Rpc,
}

/// The three kinds of entity a client may subscribe to. A client may not
/// hold two subscriptions of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventSourceKind {
    Identities,
    Trusts,
    Scores,
}

/// A binding of one client to one event source kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub id: Uuid,
    pub client_id: Uuid,
    pub kind: EventSourceKind,
}

/// One entity's before/after state, exactly one of which may be `None`
/// for create/delete, or both present with equal id for modify.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityChange {
    Identity {
        old: Option<Identity>,
        new: Option<Identity>,
    },
    Trust {
        old: Option<Trust>,
        new: Option<Trust>,
    },
    Score {
        old: Option<Score>,
        new: Option<Score>,
    },
}

impl EntityChange {
    pub fn kind(&self) -> EventSourceKind {
        match self {
            EntityChange::Identity { .. } => EventSourceKind::Identities,
            EntityChange::Trust { .. } => EventSourceKind::Trusts,
            EntityChange::Score { .. } => EventSourceKind::Scores,
        }
    }
}

/// An immutable record in a client's per-client ordered queue.
/// `BeginSync`/`EndSync` bracket a synchronization pass; `ObjectChanged`
/// carries one entity's before/after state.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    BeginSync { kind: EventSourceKind, version: VersionId },
    ObjectChanged(EntityChange),
    EndSync { kind: EventSourceKind, version: VersionId },
}

/// A notification stamped with its per-client monotonic delivery index:
/// strictly increasing with no gaps.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedNotification {
    pub index: u64,
    pub notification: Notification,
}

/// Outcome of attempting to deliver one notification to a client's
/// transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Client transport acknowledged success; advance the index.
    Acked,
    /// Client transport responded with an explicit failure; counts
    /// against the client's failure limit.
    Failed,
    /// Transport I/O error; abort this client's run for this pass, retry
    /// later, does not count against the failure limit.
    Disconnected,
}

/// The seam a concrete RPC/callback layer implements to actually deliver
/// a notification; out of scope for this crate.
pub trait ClientTransport: Send + Sync {
    fn deliver(&self, notification: &IndexedNotification) -> DeliveryOutcome;
}
