//! The importer: single-threaded, drains the import queue, reconciles
//! each parsed trust list into the store, and drives the score engine
//! over whatever edges changed — all inside one transaction per item.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::config::CapacityTable;
use crate::error::WotError;
use crate::ids::IdentityId;
use crate::model::{now_ts, FetchState, Identity, Trust};
use crate::score::ScoreEngine;
use crate::store::MemoryStore;
use crate::subscription::SubscriptionManager;

use super::{queue::ImportQueueStatsSnapshot, IdentityDescription, ImportQueue, Parser};

/// Drains the import queue against one store, one parser and one score
/// engine. Owns no thread itself — the delayed background job that
/// calls [`Importer::drain`] on a timer is wired up by the binary or
/// test harness embedding this crate.
pub struct Importer<P: Parser> {
    store: Arc<MemoryStore>,
    queue: Arc<ImportQueue>,
    parser: P,
    capacity_table: CapacityTable,
    engine: Mutex<ScoreEngine>,
    subscriptions: Arc<SubscriptionManager>,
}

impl<P: Parser> Importer<P> {
    pub fn new(
        store: Arc<MemoryStore>,
        queue: Arc<ImportQueue>,
        parser: P,
        capacity_table: CapacityTable,
        subscriptions: Arc<SubscriptionManager>,
    ) -> Self {
        Importer {
            store,
            queue,
            parser,
            capacity_table,
            engine: Mutex::new(ScoreEngine::new()),
            subscriptions,
        }
    }

    /// Drains the queue fully before returning to idle. Parse errors
    /// never halt the drain.
    pub fn drain(&self) {
        while let Some(payload) = self.queue.poll() {
            match self.parser.parse(&payload) {
                Ok(description) => match self.import_one(payload.id, description) {
                    Ok(()) => {
                        self.queue.record_finished(now_ts());
                    }
                    Err(err) => {
                        warn!(id = %payload.id, %err, "import rejected");
                        self.queue.record_failed();
                    }
                },
                Err(err) => {
                    debug!(id = %payload.id, %err, "payload failed to parse");
                    self.mark_parse_failure(payload.id, payload.edition);
                    self.queue.record_failed();
                }
            }
        }
    }

    fn mark_parse_failure(&self, id: IdentityId, edition: u64) {
        let mut tx = self.store.transaction();
        let mut identity = tx.get_identity(&id).unwrap_or_else(|| Identity::stub(id));
        identity.fetch_state = FetchState::ParsingFailed;
        // Advance edition so the bad edition is not refetched.
        identity.edition = identity.edition.max(edition);
        identity.last_fetched = Some(now_ts());
        identity.last_changed = now_ts();
        if tx.put_identity(identity).is_ok() {
            let diff = tx.commit();
            self.subscriptions.notify_diff(&diff);
        }
    }

    fn import_one(&self, truster: IdentityId, description: IdentityDescription) -> Result<(), WotError> {
        let mut tx = self.store.transaction();
        let mut identity = tx.get_identity(&truster).unwrap_or_else(|| Identity::stub(truster));

        if description.edition <= identity.edition && identity.fetch_state == FetchState::Fetched {
            // Importing the same (or older) edition again is a no-op:
            // nothing to write, nothing to notify.
            return Ok(());
        }

        identity.edition = description.edition;
        identity.fetch_state = FetchState::Fetched;
        identity.last_fetched = Some(now_ts());
        identity.last_changed = now_ts();
        identity.publishes_trust_list = description.publishes_trust_list;
        identity.contexts = description.contexts.clone();
        identity.properties = description.properties.clone();
        if identity.nickname.is_none() {
            identity.nickname = description.nickname.clone();
        }
        tx.put_identity(identity)?;

        let changed = reconcile_trust_list(&mut tx, truster, description.edition, &description.trust_list)?;

        let mut engine = self.engine.lock().unwrap();
        for trustee in changed {
            engine.on_trust_committed(&mut tx, &self.capacity_table, truster, trustee)?;
        }
        drop(engine);

        let diff = tx.commit();
        self.subscriptions.notify_diff(&diff);
        Ok(())
    }

    pub fn queue_stats(&self) -> ImportQueueStatsSnapshot {
        self.queue.stats_snapshot()
    }
}

/// Reconciles `truster`'s published trust list: stale edges are deleted,
/// existing edges are updated, new edges are created (implicitly stubbing
/// previously-unknown trustees). Returns the set of trustees whose edge
/// changed, for the score engine to react to.
fn reconcile_trust_list(
    tx: &mut crate::store::Transaction<'_>,
    truster: IdentityId,
    edition: u64,
    trust_list: &[super::ParsedTrust],
) -> Result<HashSet<IdentityId>, WotError> {
    let asserted: HashSet<IdentityId> = trust_list.iter().map(|t| t.trustee).collect();
    let mut changed = HashSet::new();

    for existing in tx.trusts_outgoing(&truster) {
        if existing.truster_edition_at_assignment < edition && !asserted.contains(&existing.trustee) {
            tx.delete_trust(&truster, &existing.trustee);
            changed.insert(existing.trustee);
        }
    }

    for parsed in trust_list {
        let trust = Trust::new(
            truster,
            parsed.trustee,
            parsed.value,
            parsed.comment.clone(),
            edition,
        )?;
        let unchanged = tx
            .get_trust(&truster, &parsed.trustee)
            .is_some_and(|existing| existing.value == trust.value && existing.comment == trust.comment);
        if !unchanged {
            tx.put_trust(trust)?;
            changed.insert(parsed.trustee);
        }
    }

    Ok(changed)
}
