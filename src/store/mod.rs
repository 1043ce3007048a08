//! The graph store: typed lookups, enumeration, and a transactional
//! write boundary. Modeled on a top-level node wrapping its subsystems
//! behind `Arc<RwLock<_>>` — here a single [`MemoryStore`] plays that
//! role for the whole graph, and every mutation happens inside a
//! [`Transaction`] so that either all writes of the transaction become
//! visible together or none do.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::WotError;
use crate::ids::{IdentityId, VersionCounter, VersionId};
use crate::model::{Identity, OwnIdentity, Score, Trust};

/// The one concrete store implementation this crate ships. A persisted
/// store would sit behind the same shape of API; the kernel's other
/// subsystems only ever see `&MemoryStore`.
///
/// `tx_lock` is the "single global transaction lock" of §4.1: held for a
/// writer's *entire* transaction (not just its final swap), so two
/// overlapping transactions serialize instead of lost-updating each
/// other. `inner`'s `RwLock` is the much shorter-lived lock readers take
/// for a point lookup and a committing writer takes only to publish its
/// staged state.
pub struct MemoryStore {
    inner: RwLock<StoreState>,
    tx_lock: Mutex<()>,
}

#[derive(Clone, Default)]
struct StoreState {
    identities: HashMap<IdentityId, Identity>,
    own_identities: HashMap<IdentityId, OwnIdentity>,
    trusts: HashMap<(IdentityId, IdentityId), Trust>,
    scores: HashMap<(IdentityId, IdentityId), Score>,
    outgoing: HashMap<IdentityId, HashSet<IdentityId>>,
    incoming: HashMap<IdentityId, HashSet<IdentityId>>,
    scores_by_owner: HashMap<IdentityId, HashSet<IdentityId>>,
    scores_by_target: HashMap<IdentityId, HashSet<IdentityId>>,
    versions: VersionCounter,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore {
            inner: RwLock::new(StoreState::default()),
            tx_lock: Mutex::new(()),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- point lookups -----------------------------------------------

    pub fn get_identity(&self, id: &IdentityId) -> Option<Identity> {
        self.inner.read().unwrap().identities.get(id).cloned()
    }

    pub fn get_own_identity(&self, id: &IdentityId) -> Option<OwnIdentity> {
        self.inner.read().unwrap().own_identities.get(id).cloned()
    }

    pub fn get_trust(&self, truster: &IdentityId, trustee: &IdentityId) -> Option<Trust> {
        self.inner
            .read()
            .unwrap()
            .trusts
            .get(&(*truster, *trustee))
            .cloned()
    }

    pub fn get_score(&self, owner: &IdentityId, target: &IdentityId) -> Option<Score> {
        self.inner
            .read()
            .unwrap()
            .scores
            .get(&(*owner, *target))
            .cloned()
    }

    // ---- enumeration ---------------------------------------------------

    pub fn all_identities(&self) -> Vec<Identity> {
        self.inner.read().unwrap().identities.values().cloned().collect()
    }

    pub fn all_own_identities(&self) -> Vec<OwnIdentity> {
        self.inner
            .read()
            .unwrap()
            .own_identities
            .values()
            .cloned()
            .collect()
    }

    pub fn all_trusts(&self) -> Vec<Trust> {
        self.inner.read().unwrap().trusts.values().cloned().collect()
    }

    pub fn all_scores(&self) -> Vec<Score> {
        self.inner.read().unwrap().scores.values().cloned().collect()
    }

    pub fn trusts_outgoing(&self, truster: &IdentityId) -> Vec<Trust> {
        let state = self.inner.read().unwrap();
        state
            .outgoing
            .get(truster)
            .into_iter()
            .flatten()
            .filter_map(|trustee| state.trusts.get(&(*truster, *trustee)).cloned())
            .collect()
    }

    pub fn trusts_incoming(&self, trustee: &IdentityId) -> Vec<Trust> {
        let state = self.inner.read().unwrap();
        state
            .incoming
            .get(trustee)
            .into_iter()
            .flatten()
            .filter_map(|truster| state.trusts.get(&(*truster, *trustee)).cloned())
            .collect()
    }

    pub fn scores_by_owner(&self, owner: &IdentityId) -> Vec<Score> {
        let state = self.inner.read().unwrap();
        state
            .scores_by_owner
            .get(owner)
            .into_iter()
            .flatten()
            .filter_map(|target| state.scores.get(&(*owner, *target)).cloned())
            .collect()
    }

    pub fn scores_by_target(&self, target: &IdentityId) -> Vec<Score> {
        let state = self.inner.read().unwrap();
        state
            .scores_by_target
            .get(target)
            .into_iter()
            .flatten()
            .filter_map(|owner| state.scores.get(&(*owner, *target)).cloned())
            .collect()
    }

    /// Opens a transaction. Nothing staged inside it is visible to readers
    /// until [`Transaction::commit`] returns; dropping the transaction
    /// without committing discards every staged write.
    ///
    /// Blocks until any other in-flight transaction on this store commits
    /// or drops: `tx_lock` is held for the whole transaction, so a second
    /// writer starting before the first commits waits rather than staging
    /// against a snapshot the first writer is about to overwrite.
    pub fn transaction(&self) -> Transaction<'_> {
        let tx_guard = self.tx_lock.lock().unwrap();
        let committed = self.inner.read().unwrap().clone();
        Transaction {
            store: self,
            _tx_guard: tx_guard,
            before: committed.clone(),
            staged: committed,
        }
    }

    /// Writes the whole store out as one JSON file — the "single on-disk
    /// database file" persisted-state note in spec.md §6. This is a flat
    /// snapshot, not a transactional database: callers that need crash
    /// safety across individual writes must layer that on themselves.
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<(), WotError> {
        let snapshot = {
            let state = self.inner.read().unwrap();
            Snapshot::from_state(&state)
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| WotError::Internal(format!("snapshot serialization failed: {e}")))?;
        std::fs::write(path, bytes)
            .map_err(|e| WotError::Internal(format!("snapshot write failed: {e}")))
    }

    /// Rebuilds a store from a file written by [`MemoryStore::save_snapshot`],
    /// reconstructing the outgoing/incoming and scores-by-owner/target
    /// indices and restoring the version counter so subsequently-assigned
    /// `VersionId`s never collide with the ones in the snapshot.
    pub fn load_snapshot(path: impl AsRef<Path>) -> Result<Self, WotError> {
        let bytes = std::fs::read(path)
            .map_err(|e| WotError::Internal(format!("snapshot read failed: {e}")))?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)
            .map_err(|e| WotError::Internal(format!("snapshot deserialization failed: {e}")))?;
        Ok(MemoryStore {
            inner: RwLock::new(snapshot.into_state()),
            tx_lock: Mutex::new(()),
        })
    }
}

/// The serializable form of a [`StoreState`]: plain vecs rather than
/// tuple-keyed maps, since `serde_json` objects need string keys.
#[derive(Serialize, Deserialize)]
struct Snapshot {
    identities: Vec<Identity>,
    own_identities: Vec<OwnIdentity>,
    trusts: Vec<Trust>,
    scores: Vec<Score>,
    version_counter: u64,
}

impl Snapshot {
    fn from_state(state: &StoreState) -> Self {
        Snapshot {
            identities: state.identities.values().cloned().collect(),
            own_identities: state.own_identities.values().cloned().collect(),
            trusts: state.trusts.values().cloned().collect(),
            scores: state.scores.values().cloned().collect(),
            version_counter: state.versions.current(),
        }
    }

    fn into_state(self) -> StoreState {
        let mut state = StoreState {
            versions: VersionCounter::restore(self.version_counter),
            ..StoreState::default()
        };
        for identity in self.identities {
            state.identities.insert(identity.id, identity);
        }
        for own in self.own_identities {
            state.own_identities.insert(own.id(), own);
        }
        for trust in self.trusts {
            state.outgoing.entry(trust.truster).or_default().insert(trust.trustee);
            state.incoming.entry(trust.trustee).or_default().insert(trust.truster);
            state.trusts.insert((trust.truster, trust.trustee), trust);
        }
        for score in self.scores {
            state.scores_by_owner.entry(score.owner).or_default().insert(score.target);
            state.scores_by_target.entry(score.target).or_default().insert(score.owner);
            state.scores.insert((score.owner, score.target), score);
        }
        state
    }
}

/// A staged set of writes. All validation happens as writes are staged;
/// nothing reaches the store until [`Transaction::commit`]. Holds the
/// store's `tx_lock` for its entire lifetime, so at most one `Transaction`
/// is ever staging writes against a given store at a time.
pub struct Transaction<'s> {
    store: &'s MemoryStore,
    _tx_guard: MutexGuard<'s, ()>,
    before: StoreState,
    staged: StoreState,
}

impl<'s> Transaction<'s> {
    pub fn get_identity(&self, id: &IdentityId) -> Option<Identity> {
        self.staged.identities.get(id).cloned()
    }

    pub fn get_own_identity(&self, id: &IdentityId) -> Option<OwnIdentity> {
        self.staged.own_identities.get(id).cloned()
    }

    pub fn get_trust(&self, truster: &IdentityId, trustee: &IdentityId) -> Option<Trust> {
        self.staged.trusts.get(&(*truster, *trustee)).cloned()
    }

    pub fn trusts_outgoing(&self, truster: &IdentityId) -> Vec<Trust> {
        self.staged
            .outgoing
            .get(truster)
            .into_iter()
            .flatten()
            .filter_map(|trustee| self.staged.trusts.get(&(*truster, *trustee)).cloned())
            .collect()
    }

    pub fn trusts_incoming(&self, trustee: &IdentityId) -> Vec<Trust> {
        self.staged
            .incoming
            .get(trustee)
            .into_iter()
            .flatten()
            .filter_map(|truster| self.staged.trusts.get(&(*truster, *trustee)).cloned())
            .collect()
    }

    pub fn get_score(&self, owner: &IdentityId, target: &IdentityId) -> Option<Score> {
        self.staged.scores.get(&(*owner, *target)).cloned()
    }

    pub fn scores_by_owner(&self, owner: &IdentityId) -> Vec<Score> {
        self.staged
            .scores_by_owner
            .get(owner)
            .into_iter()
            .flatten()
            .filter_map(|target| self.staged.scores.get(&(*owner, *target)).cloned())
            .collect()
    }

    pub fn all_own_identity_ids(&self) -> Vec<IdentityId> {
        self.staged.own_identities.keys().copied().collect()
    }

    /// Creates or updates an `Identity` row. Validates §3's shape
    /// constraints and nickname immutability before staging the write.
    pub fn put_identity(&mut self, mut identity: Identity) -> Result<(), WotError> {
        identity.validate()?;
        if let Some(existing) = self.staged.identities.get(&identity.id) {
            if let (Some(old_nick), Some(new_nick)) = (&existing.nickname, &identity.nickname) {
                if old_nick != new_nick {
                    return Err(WotError::nickname_immutable(&identity.id));
                }
            } else if existing.nickname.is_some() && identity.nickname.is_none() {
                // Keep the previously-set nickname; it never regresses to null.
                identity.nickname = existing.nickname.clone();
            }
            if identity.edition < existing.edition {
                return Err(WotError::edition_not_increasing(existing.edition, identity.edition));
            }
        }
        identity.version_id = Some(self.staged.versions.next());
        debug!(identity = %identity.id, edition = identity.edition, "staged identity write");
        self.staged.identities.insert(identity.id, identity);
        Ok(())
    }

    pub fn put_own_identity(&mut self, mut own: OwnIdentity) -> Result<(), WotError> {
        own.identity.validate()?;
        own.identity.version_id = Some(self.staged.versions.next());
        let id = own.id();
        self.staged.identities.insert(id, own.identity.clone());
        self.staged.own_identities.insert(id, own);
        Ok(())
    }

    /// Creates or updates a trust edge, maintaining the outgoing/incoming
    /// indices. Implicitly creates a stub `Identity` for a previously
    /// unknown trustee.
    pub fn put_trust(&mut self, trust: Trust) -> Result<(), WotError> {
        if trust.truster == trust.trustee {
            return Err(WotError::self_trust(&trust.truster));
        }
        if !self.staged.identities.contains_key(&trust.truster) {
            return Err(WotError::UnknownIdentity(trust.truster));
        }
        if !self.staged.identities.contains_key(&trust.trustee) {
            self.put_identity(Identity::stub(trust.trustee))?;
        }
        let mut trust = trust;
        trust.version_id = Some(self.staged.versions.next());
        self.staged
            .outgoing
            .entry(trust.truster)
            .or_default()
            .insert(trust.trustee);
        self.staged
            .incoming
            .entry(trust.trustee)
            .or_default()
            .insert(trust.truster);
        self.staged
            .trusts
            .insert((trust.truster, trust.trustee), trust);
        Ok(())
    }

    pub fn delete_trust(&mut self, truster: &IdentityId, trustee: &IdentityId) -> Option<Trust> {
        let removed = self.staged.trusts.remove(&(*truster, *trustee));
        if removed.is_some() {
            if let Some(set) = self.staged.outgoing.get_mut(truster) {
                set.remove(trustee);
            }
            if let Some(set) = self.staged.incoming.get_mut(trustee) {
                set.remove(truster);
            }
        }
        removed
    }

    /// Used only by the score engine: scores are never written by anything
    /// else.
    pub(crate) fn put_score(&mut self, mut score: Score) {
        score.version_id = Some(self.staged.versions.next());
        self.staged
            .scores_by_owner
            .entry(score.owner)
            .or_default()
            .insert(score.target);
        self.staged
            .scores_by_target
            .entry(score.target)
            .or_default()
            .insert(score.owner);
        self.staged.scores.insert((score.owner, score.target), score);
    }

    pub(crate) fn delete_score(&mut self, owner: &IdentityId, target: &IdentityId) {
        if self.staged.scores.remove(&(*owner, *target)).is_some() {
            if let Some(set) = self.staged.scores_by_owner.get_mut(owner) {
                set.remove(target);
            }
            if let Some(set) = self.staged.scores_by_target.get_mut(target) {
                set.remove(owner);
            }
        }
    }

    /// Cascading delete of an `OwnIdentity`: its own trust edges (either
    /// direction) and its entire score tree disappear with it.
    pub fn delete_own_identity(&mut self, id: &IdentityId) -> Result<(), WotError> {
        if self.staged.own_identities.remove(id).is_none() {
            return Err(WotError::UnknownIdentity(*id));
        }
        self.staged.identities.remove(id);

        let outgoing: Vec<IdentityId> = self
            .staged
            .outgoing
            .get(id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();
        for trustee in outgoing {
            self.delete_trust(id, &trustee);
        }
        let incoming: Vec<IdentityId> = self
            .staged
            .incoming
            .get(id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();
        for truster in incoming {
            self.delete_trust(&truster, id);
        }

        let owned_targets: Vec<IdentityId> = self
            .staged
            .scores_by_owner
            .get(id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();
        for target in owned_targets {
            self.delete_score(id, &target);
        }
        Ok(())
    }

    /// Makes every staged write visible at once and returns the set of
    /// entity changes the commit produced — identities, then trusts, then
    /// scores, the order the subscription engine's cross-kind delivery
    /// relies on so a `TrustChanged` is never notified ahead of the
    /// `IdentityChanged` that introduced one of its endpoints (§4.4).
    /// Consumes the transaction, releasing `tx_lock` once this returns.
    pub fn commit(self) -> CommitDiff {
        let diff = diff_states(&self.before, &self.staged);
        let mut live = self.store.inner.write().unwrap();
        *live = self.staged;
        diff
    }
}

/// One committed transaction's entity-level changes, grouped by kind in
/// delivery order (identities, then trusts, then scores) and each entry a
/// `(old, new)` pair — exactly the shape `ObjectChanged` notifications
/// need. Empty vecs mean that kind had nothing to diff.
#[derive(Debug, Default, Clone)]
pub struct CommitDiff {
    pub identities: Vec<(Option<Identity>, Option<Identity>)>,
    pub trusts: Vec<(Option<Trust>, Option<Trust>)>,
    pub scores: Vec<(Option<Score>, Option<Score>)>,
}

impl CommitDiff {
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty() && self.trusts.is_empty() && self.scores.is_empty()
    }
}

/// Diffs two `StoreState`s key-by-key, in sorted key order for
/// determinism, keeping only the keys whose value actually changed.
fn diff_states(before: &StoreState, after: &StoreState) -> CommitDiff {
    let mut diff = CommitDiff::default();

    let mut identity_ids: Vec<IdentityId> = before
        .identities
        .keys()
        .chain(after.identities.keys())
        .copied()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    identity_ids.sort();
    for id in identity_ids {
        let old = before.identities.get(&id).cloned();
        let new = after.identities.get(&id).cloned();
        if old != new {
            diff.identities.push((old, new));
        }
    }

    let mut trust_keys: Vec<(IdentityId, IdentityId)> = before
        .trusts
        .keys()
        .chain(after.trusts.keys())
        .copied()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    trust_keys.sort();
    for key in trust_keys {
        let old = before.trusts.get(&key).cloned();
        let new = after.trusts.get(&key).cloned();
        if old != new {
            diff.trusts.push((old, new));
        }
    }

    let mut score_keys: Vec<(IdentityId, IdentityId)> = before
        .scores
        .keys()
        .chain(after.scores.keys())
        .copied()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    score_keys.sort();
    for key in score_keys {
        let old = before.scores.get(&key).cloned();
        let new = after.scores.get(&key).cloned();
        if old != new {
            diff.scores.push((old, new));
        }
    }

    diff
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.read().unwrap();
        f.debug_struct("MemoryStore")
            .field("identities", &state.identities.len())
            .field("own_identities", &state.own_identities.len())
            .field("trusts", &state.trusts.len())
            .field("scores", &state.scores.len())
            .finish()
    }
}

/// Pulled out so `Internal` errors raised mid-transaction have somewhere
/// consistent to be logged from before the caller drops the transaction.
pub fn log_internal_error(context: &str, err: &WotError) {
    error!(context, %err, "internal invariant violation; transaction rolled back");
}

/// Compatibility alias kept for call sites that want to name the store
/// port abstractly; there is exactly one implementation.
pub type Store = MemoryStore;
