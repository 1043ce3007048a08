//! The fetch scheduler: decides which known identities are "worth
//! fetching" — those with a positive score under at least one owned
//! identity — and at which edition to request them.

use crate::ids::IdentityId;
use crate::store::MemoryStore;

use super::FetchRequest;

/// Enumerates `(identity, edition-to-request)` for every identity with a
/// positive score under some owner. Identities with no positive score
/// under any owner are not fetched.
pub fn identities_worth_fetching(store: &MemoryStore) -> Vec<FetchRequest> {
    let mut requests = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for score in store.all_scores() {
        if score.value <= 0 || score.target == score.owner {
            continue;
        }
        if !seen.insert(score.target) {
            continue;
        }
        if let Some(identity) = store.get_identity(&score.target) {
            let edition = identity.edition.max(identity.edition_hint) + 1;
            requests.push(FetchRequest {
                id: identity.id,
                edition,
            });
        }
    }
    requests.sort_by_key(|r| r.id);
    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Identity, OwnIdentity, Score, Trust};

    #[test]
    fn only_positively_scored_identities_are_scheduled() {
        let store = MemoryStore::new();
        let owner_id = IdentityId::from_public_key(b"owner");
        let good = IdentityId::from_public_key(b"good");
        let bad = IdentityId::from_public_key(b"bad");

        let mut tx = store.transaction();
        tx.put_own_identity(OwnIdentity {
            identity: Identity::stub(owner_id),
            insert_key: vec![],
            last_insert: None,
        })
        .unwrap();
        let mut good_identity = Identity::stub(good);
        good_identity.edition = 3;
        good_identity.edition_hint = 5;
        tx.put_identity(good_identity).unwrap();
        tx.put_identity(Identity::stub(bad)).unwrap();
        tx.put_trust(Trust::new(owner_id, good, 10, String::new(), 0).unwrap())
            .unwrap();
        tx.put_score(Score {
            owner: owner_id,
            target: good,
            value: 100,
            rank: 1,
            capacity: 40,
            version_id: None,
        });
        tx.put_score(Score {
            owner: owner_id,
            target: bad,
            value: -50,
            rank: 1,
            capacity: 40,
            version_id: None,
        });
        tx.commit();

        let requests = identities_worth_fetching(&store);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].id, good);
        assert_eq!(requests[0].edition, 6);
    }
}
