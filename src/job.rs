//! Delayed background jobs: a coalescing trigger the importer and the
//! subscription deployer both run on. Grounded on `src/network/peer.rs`'s
//! background loop — a task parked on `tokio::sync::Notify` woken by
//! whichever caller gets there first — generalized here to also carry a
//! minimum delay and a terminate switch.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

/// A handle to a running delayed background job. Cloning shares the same
/// underlying task; any clone can `trigger` or `terminate` it.
#[derive(Clone)]
pub struct DelayedBackgroundJob {
    inner: Arc<Inner>,
}

struct Inner {
    notify: Notify,
    terminated: AtomicBool,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl DelayedBackgroundJob {
    /// Spawns `run` on a loop: wait for a trigger (or the default `delay`
    /// if none arrives sooner — the deployer and importer both run with a
    /// generous default so the job is still self-driving even with no
    /// activity), debounce for `delay`, run `run` once, repeat, until
    /// `terminate` is called.
    ///
    /// Coalescing: multiple `trigger` calls that land before `run` starts
    /// collapse into a single execution — `Notify::notify_one` only wakes
    /// the task once per permit, so a burst of triggers while `run` is
    /// mid-flight is observed as exactly one more iteration, not one per
    /// trigger.
    pub fn spawn<F, Fut>(delay: Duration, mut run: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let inner = Arc::new(Inner {
            notify: Notify::new(),
            terminated: AtomicBool::new(false),
            handle: std::sync::Mutex::new(None),
        });
        let loop_inner = inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                loop_inner.notify.notified().await;
                if loop_inner.terminated.load(Ordering::SeqCst) {
                    break;
                }
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if loop_inner.terminated.load(Ordering::SeqCst) {
                    break;
                }
                run().await;
            }
            debug!("background job loop exited");
        });
        *inner.handle.lock().unwrap() = Some(handle);
        DelayedBackgroundJob { inner }
    }

    /// Requests the job run as soon as its delay allows. Coalesces with
    /// any pending trigger already waiting.
    pub fn trigger(&self) {
        self.inner.notify.notify_one();
    }

    /// Requests the job run, but no sooner than `min_delay` from now —
    /// used by callers that want to batch a burst of changes without
    /// waiting for the job's whole default delay.
    pub fn trigger_after(&self, min_delay: Duration) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if !min_delay.is_zero() {
                tokio::time::sleep(min_delay).await;
            }
            inner.notify.notify_one();
        });
    }

    /// Stops the loop after its current iteration (if any) finishes.
    pub fn terminate(&self) {
        self.inner.terminated.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::SeqCst)
    }

    /// Blocks (async) until the loop task has actually exited, or `timeout`
    /// elapses, whichever is first. Returns `true` if it exited in time.
    pub async fn wait_for_termination(&self, timeout: Duration) -> bool {
        let handle = self.inner.handle.lock().unwrap().take();
        match handle {
            None => true,
            Some(handle) => tokio::time::timeout(timeout, handle).await.is_ok(),
        }
    }
}

/// A test double that records triggers but never actually runs anything —
/// for unit tests that only want to assert "the importer asked to be
/// woken", not drive a real tokio runtime.
#[derive(Debug, Default)]
pub struct MockJob {
    triggers: std::sync::atomic::AtomicU64,
    terminated: AtomicBool,
}

impl MockJob {
    pub fn new() -> Self {
        MockJob::default()
    }

    pub fn trigger(&self) {
        self.triggers.fetch_add(1, Ordering::SeqCst);
    }

    pub fn trigger_count(&self) -> u64 {
        self.triggers.load(Ordering::SeqCst)
    }

    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread")]
    async fn trigger_runs_the_job_once() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let job = DelayedBackgroundJob::spawn(Duration::from_millis(1), move || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        job.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        job.terminate();
        assert!(job.wait_for_termination(Duration::from_secs(1)).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bursts_of_triggers_coalesce() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();
        let job = DelayedBackgroundJob::spawn(Duration::from_millis(20), move || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        for _ in 0..10 {
            job.trigger();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        // Ten triggers that all land before the debounce elapses collapse
        // into at most a couple of runs, never ten.
        assert!(counter.load(Ordering::SeqCst) <= 2);
        job.terminate();
    }

    #[test]
    fn mock_job_records_without_running_anything() {
        let job = MockJob::new();
        job.trigger();
        job.trigger();
        assert_eq!(job.trigger_count(), 2);
        assert!(!job.is_terminated());
        job.terminate();
        assert!(job.is_terminated());
    }
}
