//! The import queue: a deduplicating FIFO sitting between the fetcher
//! and the importer.

use std::collections::VecDeque;
use std::sync::Mutex;

use tracing::debug;

use crate::ids::IdentityId;

use super::FetchedPayload;

const FINISH_HISTORY_CAPACITY: usize = 256;

/// Queue statistics: queued, deduplicated, failed, finished, and an
/// average/hour rate. `finished_at` is a bounded ring buffer of
/// timestamps (seconds since the epoch) the importer appends to after
/// each successful commit (`DESIGN.md` Open Question 1).
#[derive(Debug, Default)]
pub struct ImportQueueStats {
    pub queued: u64,
    pub deduplicated: u64,
    pub failed: u64,
    pub finished: u64,
    finished_at: VecDeque<u64>,
}

impl ImportQueueStats {
    fn record_finish(&mut self, now: u64) {
        self.finished += 1;
        self.finished_at.push_back(now);
        if self.finished_at.len() > FINISH_HISTORY_CAPACITY {
            self.finished_at.pop_front();
        }
    }

    /// Finishes recorded in the last hour, relative to `now`.
    pub fn finished_per_hour(&self, now: u64) -> u64 {
        let one_hour_ago = now.saturating_sub(3600);
        self.finished_at
            .iter()
            .filter(|&&t| t >= one_hour_ago)
            .count() as u64
    }
}

struct Item {
    identity_id: IdentityId,
    payload: FetchedPayload,
}

struct State {
    items: VecDeque<Item>,
    stats: ImportQueueStats,
}

/// A FIFO of fetched payloads awaiting import, deduplicated so that only
/// the newest queued edition per identity survives a burst of fetches.
pub struct ImportQueue {
    state: Mutex<State>,
    handler: Mutex<Option<Box<dyn Fn() + Send + Sync>>>,
}

impl Default for ImportQueue {
    fn default() -> Self {
        ImportQueue {
            state: Mutex::new(State {
                items: VecDeque::new(),
                stats: ImportQueueStats::default(),
            }),
            handler: Mutex::new(None),
        }
    }
}

impl ImportQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a callback invoked once whenever a push transitions the
    /// queue from empty to non-empty or deposits a newer edition — the
    /// importer's delayed job wires its `trigger()` here.
    pub fn register_handler(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.handler.lock().unwrap() = Some(Box::new(handler));
    }

    /// Enqueues a fetched payload. If an older edition for the same
    /// identity is already queued, it is dropped and counted as
    /// deduplicated. A payload older than or equal to one already queued
    /// is itself dropped as deduplicated instead.
    pub fn push(&self, payload: FetchedPayload) {
        let mut state = self.state.lock().unwrap();
        if let Some(existing) = state
            .items
            .iter_mut()
            .find(|item| item.identity_id == payload.id)
        {
            if payload.edition > existing.payload.edition {
                debug!(id = %payload.id, old_edition = existing.payload.edition, new_edition = payload.edition, "superseding queued edition");
                existing.payload = payload;
                state.stats.deduplicated += 1;
            } else {
                state.stats.deduplicated += 1;
            }
        } else {
            state.items.push_back(Item {
                identity_id: payload.id,
                payload,
            });
            state.stats.queued += 1;
        }
        drop(state);
        if let Some(handler) = self.handler.lock().unwrap().as_ref() {
            handler();
        }
    }

    /// Removes and returns the head of the queue, or `None` if empty.
    pub fn poll(&self) -> Option<FetchedPayload> {
        self.state.lock().unwrap().items.pop_front().map(|i| i.payload)
    }

    pub fn size(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn record_failed(&self) {
        self.state.lock().unwrap().stats.failed += 1;
    }

    pub fn record_finished(&self, now: u64) {
        self.state.lock().unwrap().stats.record_finish(now);
    }

    pub fn stats_snapshot(&self) -> ImportQueueStatsSnapshot {
        let state = self.state.lock().unwrap();
        ImportQueueStatsSnapshot {
            queued: state.stats.queued,
            deduplicated: state.stats.deduplicated,
            failed: state.stats.failed,
            finished: state.stats.finished,
        }
    }

    pub fn finished_per_hour(&self, now: u64) -> u64 {
        self.state.lock().unwrap().stats.finished_per_hour(now)
    }
}

/// A point-in-time copy of the counters, safe to hand out of the lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportQueueStatsSnapshot {
    pub queued: u64,
    pub deduplicated: u64,
    pub failed: u64,
    pub finished: u64,
}
