//! The score engine: maintains, for every `OwnIdentity` O, the invariant
//! that `Score(O, T)` exists iff there is a trust path `O -> ... -> T`
//! through identities with positive capacity.
//!
//! Grounded on `src/consensus_weights.rs`'s deterministic, tie-broken
//! weight computation over a validator set; recomputes BFS from each
//! owner with a visited set and an explicit rank ceiling rather than
//! materializing parent pointers.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::CapacityTable;
use crate::error::WotError;
use crate::ids::IdentityId;
use crate::model::{Score, OWN_SCORE_SENTINEL};
use crate::store::Transaction;

/// Counters exposed as statistics on the score engine's recompute cost.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScoreEngineStats {
    pub full_recomputes: u64,
    pub full_recompute_micros: u64,
}

impl ScoreEngineStats {
    pub fn average_full_recompute_micros(&self) -> u64 {
        if self.full_recomputes == 0 {
            0
        } else {
            self.full_recompute_micros / self.full_recomputes
        }
    }
}

/// Resolved rank/capacity for one identity in one owner's tree, kept while
/// a recompute is in progress.
#[derive(Debug, Clone, Copy)]
struct Resolved {
    rank: u32,
    capacity: i32,
}

/// The score engine. Stateless beyond the statistics it accumulates — all
/// graph state lives in the [`crate::store::Transaction`] it is handed.
#[derive(Debug, Default)]
pub struct ScoreEngine {
    stats: ScoreEngineStats,
}

impl ScoreEngine {
    pub fn new() -> Self {
        ScoreEngine::default()
    }

    pub fn stats(&self) -> ScoreEngineStats {
        self.stats
    }

    /// Called once per committed trust-edge change. Bounded by a cheap
    /// necessity pre-check: an
    /// owner whose tree does not currently reach `truster` (and is not
    /// `truster` itself) cannot be affected by this edge at all, so most
    /// owners in a large mesh are skipped without touching the BFS at all.
    /// Owners that pass the pre-check get a scoped recompute of their
    /// whole tree (this reference engine does not patch individual
    /// sub-trees in place — see `DESIGN.md` for why that's a deliberate
    /// simplification) followed by an invariant check; a failed invariant
    /// check escalates to the explicit full-recompute fallback path.
    pub fn on_trust_committed(
        &mut self,
        tx: &mut Transaction<'_>,
        capacity_table: &CapacityTable,
        truster: IdentityId,
        trustee: IdentityId,
    ) -> Result<(), WotError> {
        let _ = trustee;
        let owners = tx.all_own_identity_ids();
        for owner in owners {
            let affected = owner == truster || tx.get_score(&owner, &truster).is_some();
            if !affected {
                continue;
            }
            self.recompute_owner_tree(tx, capacity_table, owner)?;
            if self.assert_invariants(tx, owner).is_err() {
                warn!(%owner, "score engine inconsistency detected; falling back to full recompute");
                self.full_recompute(tx, capacity_table, owner)?;
            }
        }
        Ok(())
    }

    /// Explicit full recompute of one owner's tree, counted and timed.
    pub fn full_recompute(
        &mut self,
        tx: &mut Transaction<'_>,
        capacity_table: &CapacityTable,
        owner: IdentityId,
    ) -> Result<(), WotError> {
        let start = Instant::now();
        self.recompute_owner_tree(tx, capacity_table, owner)?;
        self.stats.full_recomputes += 1;
        self.stats.full_recompute_micros += start.elapsed().as_micros() as u64;
        self.assert_invariants(tx, owner)
    }

    fn assert_invariants(&self, tx: &Transaction<'_>, owner: IdentityId) -> Result<(), WotError> {
        match tx.get_score(&owner, &owner) {
            Some(s) if s.rank == 0 && s.capacity == 100 => Ok(()),
            _ => Err(WotError::Internal(format!(
                "owner {owner} is missing its rank-0/capacity-100 self score"
            ))),
        }
    }

    /// BFS-based rank/capacity/value assignment, level by level from
    /// `owner`. Capacity-forcing and value contributions for a node at
    /// rank `r` only consider trusters already finalized at rank `< r` —
    /// a BFS with an explicit rank ceiling; treating same-rank or
    /// not-yet-discovered trusters as contributors would require a
    /// fixed-point pass this reference engine does not attempt —
    /// documented in `DESIGN.md`.
    fn recompute_owner_tree(
        &self,
        tx: &mut Transaction<'_>,
        capacity_table: &CapacityTable,
        owner: IdentityId,
    ) -> Result<(), WotError> {
        if tx.get_own_identity(&owner).is_none() {
            return Err(WotError::UnknownIdentity(owner));
        }

        let mut resolved: HashMap<IdentityId, Resolved> = HashMap::new();
        resolved.insert(owner, Resolved { rank: 0, capacity: 100 });

        let mut frontier = vec![owner];
        let mut current_rank: u32 = 0;

        while !frontier.is_empty() {
            let mut discovered: HashMap<IdentityId, ()> = HashMap::new();
            for u in &frontier {
                let cap_u = resolved[u].capacity;
                if cap_u <= 0 {
                    continue;
                }
                let mut edges = tx.trusts_outgoing(u);
                edges.sort_by_key(|t| t.trustee);
                for trust in edges {
                    let v = trust.trustee;
                    if resolved.contains_key(&v) {
                        continue;
                    }
                    if current_rank > 0 && trust.value < 0 {
                        // Negative trust never forwards reachability past the
                        // owner's own direct edges.
                        continue;
                    }
                    discovered.insert(v, ());
                }
            }
            if discovered.is_empty() {
                break;
            }
            let next_rank = current_rank + 1;
            let mut next_ids: Vec<IdentityId> = discovered.into_keys().collect();
            next_ids.sort();

            for v in &next_ids {
                let capacity = self.resolve_capacity(tx, capacity_table, &resolved, *v, next_rank);
                resolved.insert(*v, Resolved { rank: next_rank, capacity });
            }

            frontier = next_ids;
            current_rank = next_rank;
        }

        self.write_scores(tx, owner, &resolved)
    }

    /// `capacity(T)`: the rank-indexed default, forced to `0` if the
    /// summed trust value from trusters with strictly smaller rank and
    /// positive capacity is `<= 0`.
    fn resolve_capacity(
        &self,
        tx: &Transaction<'_>,
        capacity_table: &CapacityTable,
        resolved: &HashMap<IdentityId, Resolved>,
        target: IdentityId,
        target_rank: u32,
    ) -> i32 {
        let default_capacity = capacity_table.for_rank(target_rank);
        let incoming_sum: i64 = tx
            .trusts_incoming(&target)
            .into_iter()
            .filter_map(|trust| {
                resolved.get(&trust.truster).and_then(|r| {
                    if r.rank < target_rank && r.capacity > 0 {
                        Some(trust.value as i64)
                    } else {
                        None
                    }
                })
            })
            .sum();
        if incoming_sum <= 0 {
            0
        } else {
            default_capacity
        }
    }

    /// `value(T)`: the capacity-weighted sum of incoming trust from
    /// trusters with strictly smaller rank and positive capacity, unless
    /// the owner has a direct opinion on `T`, which overrides it outright.
    fn resolve_value(
        &self,
        tx: &Transaction<'_>,
        owner: IdentityId,
        resolved: &HashMap<IdentityId, Resolved>,
        target: IdentityId,
        target_rank: u32,
    ) -> i64 {
        if let Some(direct) = tx.get_trust(&owner, &target) {
            return direct.value as i64 * 100;
        }
        tx.trusts_incoming(&target)
            .into_iter()
            .filter_map(|trust| {
                resolved.get(&trust.truster).and_then(|r| {
                    if r.rank < target_rank && r.capacity > 0 {
                        Some(trust.value as i64 * r.capacity as i64 / 100)
                    } else {
                        None
                    }
                })
            })
            .sum()
    }

    fn write_scores(
        &self,
        tx: &mut Transaction<'_>,
        owner: IdentityId,
        resolved: &HashMap<IdentityId, Resolved>,
    ) -> Result<(), WotError> {
        let stale: Vec<IdentityId> = tx
            .scores_by_owner(&owner)
            .into_iter()
            .map(|s| s.target)
            .filter(|target| !resolved.contains_key(target))
            .collect();
        for target in stale {
            tx.delete_score(&owner, &target);
        }

        for (&target, info) in resolved {
            let value = if target == owner {
                OWN_SCORE_SENTINEL
            } else {
                self.resolve_value(tx, owner, resolved, target, info.rank)
            };
            tx.put_score(Score {
                owner,
                target,
                value,
                rank: info.rank,
                capacity: info.capacity,
                version_id: None,
            });
        }
        debug!(%owner, reachable = resolved.len(), "score tree recomputed");
        Ok(())
    }
}
