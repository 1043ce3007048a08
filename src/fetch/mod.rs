//! The fetch/import pipeline: fetch scheduling, an import queue with
//! deduplication, and a single-threaded importer that reconciles a parsed
//! trust list into the store and hands the changed edges to the score
//! engine.
//!
//! Grounded on `src/network/peer.rs`'s `mpsc`-fed background loop reading
//! off the wire, generalized to the payload shape the fetcher/parser
//! ports need.

mod importer;
mod queue;
mod scheduler;

pub use importer::Importer;
pub use queue::{ImportQueue, ImportQueueStats};
pub use scheduler::identities_worth_fetching;

use std::collections::{HashMap, HashSet};

use crate::error::WotError;
use crate::ids::IdentityId;

/// A request to retrieve one identity's published document at a given
/// edition (the Fetcher port's input).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub id: IdentityId,
    pub edition: u64,
}

/// The raw bytes a fetcher retrieved, opaque until handed to a [`Parser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPayload {
    pub id: IdentityId,
    pub edition: u64,
    pub bytes: Vec<u8>,
}

/// On-network key retrieval is explicitly out of scope here; this trait
/// is the opaque seam the network layer implements.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchedPayload, WotError>;
}

/// One outgoing trust edge as parsed out of a published trust list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedTrust {
    pub trustee: IdentityId,
    pub value: i32,
    pub comment: String,
}

/// A fully parsed identity document (the Parser port's output).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityDescription {
    pub edition: u64,
    pub nickname: Option<String>,
    pub publishes_trust_list: bool,
    pub contexts: HashSet<String>,
    pub properties: HashMap<String, String>,
    pub trust_list: Vec<ParsedTrust>,
}

/// XML/whatever-wire-format parsing is explicitly out of scope here; this
/// trait is the opaque seam a concrete parser implements. Implementations
/// are required to validate nickname and trust values against the model's
/// constraints before returning — the importer does not re-validate
/// beyond what [`crate::model::Trust::new`] and
/// [`crate::model::Identity::validate`] already enforce on write.
pub trait Parser: Send + Sync {
    fn parse(&self, payload: &FetchedPayload) -> Result<IdentityDescription, WotError>;
}
