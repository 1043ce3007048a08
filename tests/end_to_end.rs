//! Cross-module end-to-end scenarios that do not fit neatly inside any
//! one module's `#[cfg(test)]` block: the full fetch/import/score
//! pipeline wired together, and a larger randomized full-recompute vs.
//! incremental-maintenance equivalence check.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use wot_kernel::config::CapacityTable;
use wot_kernel::fetch::{FetchedPayload, IdentityDescription, ImportQueue, Importer, ParsedTrust, Parser};
use wot_kernel::ids::IdentityId;
use wot_kernel::model::{Identity, OwnIdentity, Trust};
use wot_kernel::score::ScoreEngine;
use wot_kernel::store::MemoryStore;
use wot_kernel::subscription::{
    ClientTransport, DeliveryOutcome, EntityChange, EventSourceKind, IndexedNotification, Notification,
    SubscriptionManager, TransportKind,
};
use wot_kernel::{WotError, WotConfig};
use std::sync::Mutex as StdMutex;

struct TableParser(HashMap<IdentityId, IdentityDescription>);

impl Parser for TableParser {
    fn parse(&self, payload: &FetchedPayload) -> Result<IdentityDescription, WotError> {
        self.0
            .get(&payload.id)
            .cloned()
            .ok_or_else(|| WotError::ParseFailure(format!("no fixture for {}", payload.id)))
    }
}

fn stub_description(edition: u64, trust_list: Vec<ParsedTrust>) -> IdentityDescription {
    IdentityDescription {
        edition,
        nickname: None,
        publishes_trust_list: true,
        contexts: HashSet::new(),
        properties: HashMap::new(),
        trust_list,
    }
}

/// Driven through the real fetch/import pipeline rather than by poking
/// the store directly: O trusts A, A's fetched trust list trusts B, then
/// O directly distrusts B and transitivity through B stops mattering.
#[test]
fn two_hop_then_distrust_through_the_import_pipeline() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let owner = OwnIdentity::generate();
    let owner_id = owner.id();
    let a_id = IdentityId::from_public_key(b"pipeline-a");
    let b_id = IdentityId::from_public_key(b"pipeline-b");

    let table = CapacityTable::default();
    let mut engine = ScoreEngine::new();

    let mut tx = store.transaction();
    tx.put_own_identity(owner)?;
    tx.put_trust(Trust::new(owner_id, a_id, 100, String::new(), 0)?)?;
    tx.commit();
    let mut tx = store.transaction();
    engine.full_recompute(&mut tx, &table, owner_id)?;
    tx.commit();

    let mut fixtures = HashMap::new();
    fixtures.insert(
        a_id,
        stub_description(
            1,
            vec![ParsedTrust {
                trustee: b_id,
                value: 50,
                comment: "two-hop".into(),
            }],
        ),
    );
    let queue = Arc::new(ImportQueue::new());
    let subscriptions = Arc::new(SubscriptionManager::new(&WotConfig::default()));
    let importer = Importer::new(store.clone(), queue.clone(), TableParser(fixtures), table.clone(), subscriptions);
    queue.push(FetchedPayload {
        id: a_id,
        edition: 1,
        bytes: vec![],
    });
    importer.drain();

    let score_b = store.get_score(&owner_id, &b_id).expect("b reachable at rank 2");
    assert_eq!(score_b.rank, 2);
    assert_eq!(score_b.capacity, 16);
    assert_eq!(score_b.value, 20); // 50 * 40 / 100

    // Owner directly distrusts B: overrides transitivity, B's own outgoing
    // trusts stop contributing to anyone's score.
    let mut tx = store.transaction();
    tx.put_trust(Trust::new(owner_id, b_id, -30, String::new(), 0)?)?;
    engine.on_trust_committed(&mut tx, &table, owner_id, b_id)?;
    tx.commit();

    let score_b = store.get_score(&owner_id, &b_id).unwrap();
    assert_eq!(score_b.value, -3000);
    assert_eq!(score_b.rank, 1);
    assert_eq!(score_b.capacity, 0);
    Ok(())
}

/// Two editions for the same identity arrive within the import delay;
/// only the newer one is ever handed to the importer.
#[test]
fn deduplication_drops_the_superseded_edition_before_import() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let truster_id = IdentityId::from_public_key(b"dedup-truster");

    let mut fixtures = HashMap::new();
    fixtures.insert(truster_id, stub_description(6, vec![]));
    let queue = Arc::new(ImportQueue::new());
    let table = CapacityTable::default();
    let subscriptions = Arc::new(SubscriptionManager::new(&WotConfig::default()));
    let importer = Importer::new(store.clone(), queue.clone(), TableParser(fixtures), table, subscriptions);

    queue.push(FetchedPayload {
        id: truster_id,
        edition: 5,
        bytes: vec![],
    });
    queue.push(FetchedPayload {
        id: truster_id,
        edition: 6,
        bytes: vec![],
    });
    assert_eq!(queue.size(), 1, "only the newest queued edition survives");

    importer.drain();

    let identity = store.get_identity(&truster_id).expect("stub created by import");
    assert_eq!(identity.edition, 6);
    let stats = queue.stats_snapshot();
    assert_eq!(stats.deduplicated, 1);
    assert_eq!(stats.finished, 1);
    Ok(())
}

/// A 100-identity, 500-edge random trust graph imported through the
/// pipeline must produce the same score set whether maintained
/// incrementally edge-by-edge or recomputed fresh from scratch.
#[test]
fn full_recompute_matches_incremental_maintenance_on_a_random_graph() -> Result<()> {
    let store = MemoryStore::new();
    let owner = OwnIdentity::generate();
    let owner_id = owner.id();
    let table = CapacityTable::default();
    let mut engine = ScoreEngine::new();

    let mut tx = store.transaction();
    tx.put_own_identity(owner)?;
    tx.commit();

    let nodes: Vec<IdentityId> = (0..100)
        .map(|i| IdentityId::from_public_key(format!("random-node-{i}").as_bytes()))
        .collect();

    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    let mut edges: Vec<(IdentityId, IdentityId, i32)> = Vec::new();
    edges.push((owner_id, nodes[0], 90));
    while edges.len() < 500 {
        let from = *nodes.get(rng.gen_range(0..nodes.len())).unwrap();
        let to = *nodes.get(rng.gen_range(0..nodes.len())).unwrap();
        if from == to {
            continue;
        }
        let value = rng.gen_range(-100..=100);
        edges.push((from, to, value));
    }

    // Maintain incrementally: one transaction per edge, scoring after each.
    for (from, to, value) in &edges {
        let mut tx = store.transaction();
        if tx.get_identity(from).is_none() {
            tx.put_identity(Identity::stub(*from))?;
        }
        if tx.get_identity(to).is_none() {
            tx.put_identity(Identity::stub(*to))?;
        }
        if tx.get_trust(from, to).is_some() {
            tx.delete_trust(from, to);
        }
        tx.put_trust(Trust::new(*from, *to, *value, String::new(), 0)?)?;
        engine.on_trust_committed(&mut tx, &table, *from, *to)?;
        tx.commit();
    }

    let mut incremental_scores = store.scores_by_owner(&owner_id);
    incremental_scores.sort_by_key(|s| s.target);

    // Fresh full recompute over the exact same committed trust graph.
    let mut tx = store.transaction();
    engine.full_recompute(&mut tx, &table, owner_id)?;
    tx.commit();
    let mut recomputed_scores = store.scores_by_owner(&owner_id);
    recomputed_scores.sort_by_key(|s| s.target);

    assert_eq!(incremental_scores, recomputed_scores);
    Ok(())
}

/// Every `Score(O, T)` implies a positive-capacity path from O to T.
/// Checked directly against the random graph above by walking outgoing
/// edges from the owner.
#[test]
fn every_score_implies_a_positive_capacity_path() -> Result<()> {
    let store = MemoryStore::new();
    let owner = OwnIdentity::generate();
    let owner_id = owner.id();
    let table = CapacityTable::default();
    let mut engine = ScoreEngine::new();

    let mut tx = store.transaction();
    tx.put_own_identity(owner)?;
    tx.commit();

    let a = IdentityId::from_public_key(b"invariant-a");
    let b = IdentityId::from_public_key(b"invariant-b");
    let c = IdentityId::from_public_key(b"invariant-c");
    let mut tx = store.transaction();
    tx.put_identity(Identity::stub(a))?;
    tx.put_identity(Identity::stub(b))?;
    tx.put_identity(Identity::stub(c))?;
    tx.put_trust(Trust::new(owner_id, a, 80, String::new(), 0)?)?;
    tx.put_trust(Trust::new(a, b, -90, String::new(), 0)?)?; // drives capacity(b) to 0
    tx.put_trust(Trust::new(b, c, 50, String::new(), 0)?)?; // c only reachable via b
    engine.full_recompute(&mut tx, &table, owner_id)?;
    tx.commit();

    // b is reachable only through a's negative edge, and a is at rank 1
    // (current_rank > 0): negative trust does not forward reachability
    // beyond the owner's own edges, so b is never discovered and gets no
    // Score row at all.
    assert!(store.get_score(&owner_id, &b).is_none());
    // c is unreachable through the undiscovered b: no Score row either.
    assert!(store.get_score(&owner_id, &c).is_none());
    Ok(())
}

struct CollectingTransport {
    received: StdMutex<Vec<IndexedNotification>>,
}

impl CollectingTransport {
    fn new() -> Self {
        CollectingTransport {
            received: StdMutex::new(Vec::new()),
        }
    }
}

impl ClientTransport for CollectingTransport {
    fn deliver(&self, notification: &IndexedNotification) -> DeliveryOutcome {
        self.received.lock().unwrap().push(notification.clone());
        DeliveryOutcome::Acked
    }
}

/// A client subscribed to `Trusts` before an import runs must see the
/// imported edge as an `ObjectChanged` once the importer's commit is
/// deployed — not just the initial BeginSync/EndSync sync bracket.
#[test]
fn importing_a_trust_list_notifies_subscribed_clients() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    let truster_id = IdentityId::from_public_key(b"notify-truster");
    let trustee_id = IdentityId::from_public_key(b"notify-trustee");

    let subscriptions = Arc::new(SubscriptionManager::new(&WotConfig::default()));
    let client_id = subscriptions.add_client(TransportKind::Callback);
    subscriptions.subscribe(client_id, EventSourceKind::Trusts, &store)?;

    let mut fixtures = HashMap::new();
    fixtures.insert(
        truster_id,
        stub_description(
            1,
            vec![ParsedTrust {
                trustee: trustee_id,
                value: 70,
                comment: "notify me".into(),
            }],
        ),
    );
    let queue = Arc::new(ImportQueue::new());
    let table = CapacityTable::default();
    let importer = Importer::new(
        store.clone(),
        queue.clone(),
        TableParser(fixtures),
        table,
        subscriptions.clone(),
    );
    queue.push(FetchedPayload {
        id: truster_id,
        edition: 1,
        bytes: vec![],
    });
    importer.drain();

    let transport = Arc::new(CollectingTransport::new());
    let mut transports: HashMap<uuid::Uuid, Arc<dyn ClientTransport>> = HashMap::new();
    transports.insert(client_id, transport.clone());
    subscriptions.deploy_once(&transports);

    let received = transport.received.lock().unwrap();
    // The initial BeginSync/EndSync bracket carries no trusts (the edge
    // didn't exist yet at subscribe time); the import must have appended
    // an ObjectChanged for the new edge afterward.
    let got_new_edge = received.iter().any(|n| {
        matches!(
            &n.notification,
            Notification::ObjectChanged(EntityChange::Trust {
                new: Some(t),
                ..
            }) if t.truster == truster_id && t.trustee == trustee_id && t.value == 70
        )
    });
    assert!(got_new_edge, "subscribed client never saw the imported trust edge");
    Ok(())
}

/// Sanity check on `WotConfig`'s documented defaults, since every other
/// test in this file builds its own `CapacityTable` rather than going
/// through `WotConfig`.
#[test]
fn default_config_matches_documented_defaults() {
    let cfg = WotConfig::default();
    assert_eq!(cfg.client_failure_limit, 5);
    assert_eq!(cfg.capacity_table.for_rank(0), 100);
    assert_eq!(cfg.capacity_table.for_rank(2), 16);
}
