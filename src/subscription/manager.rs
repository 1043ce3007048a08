//! [`SubscriptionManager`]: owns every [`Client`](super)/[`Subscription`]
//! and drives the synchronization protocol and the deployment pass.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::WotConfig;
use crate::error::WotError;
use crate::ids::VersionCounter;
use crate::model::{Identity, Score, Trust};
use crate::store::{CommitDiff, MemoryStore};

use super::{
    ClientTransport, DeliveryOutcome, EntityChange, EventSourceKind, IndexedNotification,
    Notification, Subscription, TransportKind,
};

struct Client {
    transport_kind: TransportKind,
    queue: VecDeque<IndexedNotification>,
    next_index: u64,
    last_acked_index: u64,
    failure_count: u32,
}

impl Client {
    fn new(transport_kind: TransportKind) -> Self {
        Client {
            transport_kind,
            queue: VecDeque::new(),
            next_index: 0,
            last_acked_index: 0,
            failure_count: 0,
        }
    }

    fn enqueue(&mut self, notification: Notification) {
        let index = self.next_index;
        self.next_index += 1;
        self.queue.push_back(IndexedNotification { index, notification });
    }
}

struct ManagerState {
    clients: HashMap<Uuid, Client>,
    subscriptions: HashMap<Uuid, Subscription>,
    by_client_kind: HashMap<(Uuid, EventSourceKind), Uuid>,
}

impl Default for ManagerState {
    fn default() -> Self {
        ManagerState {
            clients: HashMap::new(),
            subscriptions: HashMap::new(),
            by_client_kind: HashMap::new(),
        }
    }
}

/// Owns every client and subscription and is the single place entity
/// changes get turned into notifications.
pub struct SubscriptionManager {
    state: Mutex<ManagerState>,
    sync_versions: Mutex<VersionCounter>,
    client_failure_limit: u32,
}

impl SubscriptionManager {
    pub fn new(config: &WotConfig) -> Self {
        SubscriptionManager {
            state: Mutex::new(ManagerState::default()),
            sync_versions: Mutex::new(VersionCounter::default()),
            client_failure_limit: config.client_failure_limit,
        }
    }

    /// Clears all clients, subscriptions and notifications: clients are
    /// not persisted across restarts.
    pub fn start(&self) {
        let mut state = self.state.lock().unwrap();
        state.clients.clear();
        state.subscriptions.clear();
        state.by_client_kind.clear();
    }

    pub fn add_client(&self, transport_kind: TransportKind) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().clients.insert(id, Client::new(transport_kind));
        id
    }

    /// Binds `client_id` to `kind`, performing the full synchronization
    /// protocol: BeginSync(v), one ObjectChanged per current entity of
    /// `kind` stamped with version `v`, then EndSync(v).
    /// Returns the new subscription id and the entity count (the RPC
    /// layer's "first reply: a snapshot message announcing count").
    pub fn subscribe(
        &self,
        client_id: Uuid,
        kind: EventSourceKind,
        store: &MemoryStore,
    ) -> Result<(Uuid, usize), WotError> {
        let mut state = self.state.lock().unwrap();
        if !state.clients.contains_key(&client_id) {
            return Err(WotError::UnknownClient(client_id));
        }
        if state.by_client_kind.contains_key(&(client_id, kind)) {
            return Err(WotError::DuplicateEntity {
                kind: "subscription",
                id: format!("{client_id}/{kind:?}"),
            });
        }

        // Hold the store's committed snapshot for the whole sync pass —
        // MemoryStore's enumeration methods already read a consistent,
        // lock-guarded view: acquire the store read lock first.
        let version = self.sync_versions.lock().unwrap().next();
        let subscription_id = Uuid::new_v4();

        let count = {
            let client = state.clients.get_mut(&client_id).expect("checked above");
            client.enqueue(Notification::BeginSync { kind, version });
            let count = match kind {
                EventSourceKind::Identities => {
                    let all = store.all_identities();
                    let count = all.len();
                    for identity in all {
                        client.enqueue(Notification::ObjectChanged(EntityChange::Identity {
                            old: None,
                            new: Some(stamp_identity(identity, version)),
                        }));
                    }
                    count
                }
                EventSourceKind::Trusts => {
                    let all = store.all_trusts();
                    let count = all.len();
                    for trust in all {
                        client.enqueue(Notification::ObjectChanged(EntityChange::Trust {
                            old: None,
                            new: Some(stamp_trust(trust, version)),
                        }));
                    }
                    count
                }
                EventSourceKind::Scores => {
                    let all = store.all_scores();
                    let count = all.len();
                    for score in all {
                        client.enqueue(Notification::ObjectChanged(EntityChange::Score {
                            old: None,
                            new: Some(stamp_score(score, version)),
                        }));
                    }
                    count
                }
            };
            client.enqueue(Notification::EndSync { kind, version });
            count
        };

        state.subscriptions.insert(
            subscription_id,
            Subscription {
                id: subscription_id,
                client_id,
                kind,
            },
        );
        state.by_client_kind.insert((client_id, kind), subscription_id);
        debug!(%client_id, ?kind, count, "subscription synchronized");
        Ok((subscription_id, count))
    }

    pub fn unsubscribe(&self, subscription_id: Uuid) -> Result<(), WotError> {
        let mut state = self.state.lock().unwrap();
        let sub = state
            .subscriptions
            .remove(&subscription_id)
            .ok_or(WotError::UnknownSubscription(subscription_id))?;
        state.by_client_kind.remove(&(sub.client_id, sub.kind));
        Ok(())
    }

    fn broadcast(&self, change: EntityChange) {
        let kind = change.kind();
        let mut state = self.state.lock().unwrap();
        let subscribed_clients: Vec<Uuid> = state
            .by_client_kind
            .iter()
            .filter(|((_, k), _)| *k == kind)
            .map(|((client_id, _), _)| *client_id)
            .collect();
        for client_id in subscribed_clients {
            if let Some(client) = state.clients.get_mut(&client_id) {
                client.enqueue(Notification::ObjectChanged(change.clone()));
            }
        }
    }

    pub fn notify_identity_changed(&self, old: Option<Identity>, new: Option<Identity>) {
        self.broadcast(EntityChange::Identity { old, new });
    }

    pub fn notify_trust_changed(&self, old: Option<Trust>, new: Option<Trust>) {
        self.broadcast(EntityChange::Trust { old, new });
    }

    pub fn notify_score_changed(&self, old: Option<Score>, new: Option<Score>) {
        self.broadcast(EntityChange::Score { old, new });
    }

    /// Turns a committed transaction's [`CommitDiff`] into notifications,
    /// in identities-then-trusts-then-scores order so that a `TrustChanged`
    /// referencing an identity is never delivered before that identity's
    /// own `IdentityChanged` (both land in the same commit when a trust
    /// edge creates a stub trustee).
    pub fn notify_diff(&self, diff: &CommitDiff) {
        for (old, new) in &diff.identities {
            self.notify_identity_changed(old.clone(), new.clone());
        }
        for (old, new) in &diff.trusts {
            self.notify_trust_changed(old.clone(), new.clone());
        }
        for (old, new) in &diff.scores {
            self.notify_score_changed(old.clone(), new.clone());
        }
    }

    /// One deployment pass over every client: for each client, deliver
    /// notifications from its last-acknowledged
    /// index onward, in index order, stopping at the first failure or
    /// disconnect. `transports` supplies the delivery seam per client;
    /// a client with no entry is skipped (not yet connected this pass).
    pub fn deploy_once(&self, transports: &HashMap<Uuid, Arc<dyn ClientTransport>>) {
        let client_ids: Vec<Uuid> = self.state.lock().unwrap().clients.keys().copied().collect();
        for client_id in client_ids {
            let Some(transport) = transports.get(&client_id) else {
                continue;
            };
            self.deploy_to_client(client_id, transport.as_ref());
        }
    }

    fn deploy_to_client(&self, client_id: Uuid, transport: &dyn ClientTransport) {
        loop {
            let next = {
                let state = self.state.lock().unwrap();
                let Some(client) = state.clients.get(&client_id) else {
                    return;
                };
                client
                    .queue
                    .iter()
                    .find(|n| n.index >= client.last_acked_index)
                    .cloned()
            };
            let Some(notification) = next else {
                return;
            };
            match transport.deliver(&notification) {
                DeliveryOutcome::Acked => {
                    let mut state = self.state.lock().unwrap();
                    if let Some(client) = state.clients.get_mut(&client_id) {
                        client.last_acked_index = notification.index + 1;
                        while client
                            .queue
                            .front()
                            .is_some_and(|n| n.index < client.last_acked_index)
                        {
                            client.queue.pop_front();
                        }
                    }
                }
                DeliveryOutcome::Disconnected => {
                    debug!(%client_id, "transport disconnected; retrying next pass");
                    return;
                }
                DeliveryOutcome::Failed => {
                    let should_delete = {
                        let mut state = self.state.lock().unwrap();
                        if let Some(client) = state.clients.get_mut(&client_id) {
                            client.failure_count += 1;
                            client.failure_count >= self.client_failure_limit
                        } else {
                            false
                        }
                    };
                    if should_delete {
                        warn!(%client_id, "client exceeded failure limit; deleting");
                        self.delete_client(client_id);
                    }
                    return;
                }
            }
        }
    }

    fn delete_client(&self, client_id: Uuid) {
        let mut state = self.state.lock().unwrap();
        state.clients.remove(&client_id);
        let stale: Vec<Uuid> = state
            .subscriptions
            .values()
            .filter(|s| s.client_id == client_id)
            .map(|s| s.id)
            .collect();
        for sub_id in stale {
            if let Some(sub) = state.subscriptions.remove(&sub_id) {
                state.by_client_kind.remove(&(sub.client_id, sub.kind));
            }
        }
    }

    pub fn client_failure_count(&self, client_id: Uuid) -> Option<u32> {
        self.state.lock().unwrap().clients.get(&client_id).map(|c| c.failure_count)
    }

    pub fn client_exists(&self, client_id: Uuid) -> bool {
        self.state.lock().unwrap().clients.contains_key(&client_id)
    }

    pub fn pending_notification_count(&self, client_id: Uuid) -> usize {
        self.state
            .lock()
            .unwrap()
            .clients
            .get(&client_id)
            .map(|c| c.queue.iter().filter(|n| n.index >= c.last_acked_index).count())
            .unwrap_or(0)
    }

    pub fn transport_kind(&self, client_id: Uuid) -> Option<TransportKind> {
        self.state.lock().unwrap().clients.get(&client_id).map(|c| c.transport_kind)
    }
}

fn stamp_identity(mut identity: Identity, version: crate::ids::VersionId) -> Identity {
    identity.version_id = Some(version);
    identity
}

fn stamp_trust(mut trust: Trust, version: crate::ids::VersionId) -> Trust {
    trust.version_id = Some(version);
    trust
}

fn stamp_score(mut score: Score, version: crate::ids::VersionId) -> Score {
    score.version_id = Some(version);
    score
}
