//! Kernel-wide configuration.
//!
//! A plain struct with a literal `Default`, the way `PotParams`/
//! `TrustParams` (`src/consensus/types.rs`) are configured — no builder
//! macro, no file-format parser pulled in for it.

use std::path::PathBuf;
use std::time::Duration;

use crate::model::CAPACITY_TABLE;

/// The per-rank capacity lookup. Kept as its own type so a caller can
/// override it wholesale via [`WotConfig`] while the default stays the
/// standard table.
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityTable(pub [i32; 7]);

impl Default for CapacityTable {
    fn default() -> Self {
        CapacityTable(CAPACITY_TABLE)
    }
}

impl CapacityTable {
    pub fn for_rank(&self, rank: u32) -> i32 {
        self.0[(rank as usize).min(self.0.len() - 1)]
    }
}

/// Recognized kernel configuration options.
#[derive(Debug, Clone)]
pub struct WotConfig {
    /// Coalescing delay before the importer drains the import queue.
    pub import_delay: Duration,
    /// Coalescing delay before the subscription deployer drains notifications.
    pub subscription_delay: Duration,
    /// Consecutive notification failures before a client is deleted.
    pub client_failure_limit: u32,
    /// Per-rank capacity lookup.
    pub capacity_table: CapacityTable,
    /// Default directory for the optional JSON store snapshot (not a
    /// transactional database — persistence is deliberately out of scope
    /// for the kernel itself).
    pub snapshot_dir: PathBuf,
}

impl Default for WotConfig {
    fn default() -> Self {
        WotConfig {
            import_delay: Duration::from_millis(60_000),
            subscription_delay: Duration::from_millis(60_000),
            client_failure_limit: 5,
            capacity_table: CapacityTable::default(),
            snapshot_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("wot-kernel"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_spec_values() {
        let cfg = WotConfig::default();
        assert_eq!(cfg.import_delay, Duration::from_millis(60_000));
        assert_eq!(cfg.subscription_delay, Duration::from_millis(60_000));
        assert_eq!(cfg.client_failure_limit, 5);
        assert_eq!(cfg.capacity_table.for_rank(0), 100);
    }
}
