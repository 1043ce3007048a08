//! Trust graph kernel: identities, trusts and scores over a decentralized,
//! spam-resistant identity service. See `DESIGN.md` for the grounding
//! ledger behind each module.
//!
//! The kernel is transport- and storage-agnostic: network retrieval is the
//! [`fetch::Fetcher`] trait and document parsing is the [`fetch::Parser`]
//! trait. This crate ships one concrete [`store::MemoryStore`] (aliased as
//! [`store::Store`]) and leaves the rest to callers.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod fetch;
pub mod ids;
pub mod job;
pub mod logging;
pub mod model;
pub mod rpc;
pub mod score;
pub mod store;
pub mod subscription;

pub use config::WotConfig;
pub use error::WotError;
pub use ids::{IdentityId, VersionId};
pub use model::{Identity, OwnIdentity, Score, Trust};
pub use store::{MemoryStore, Store};

/// Library version, exposed for diagnostics the way nodes report their build.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
