//! Counters for queue, commit and cache activity.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Sink for transaction and cache counters.
///
/// Implementations must be cheap; every call happens on the hot path of a
/// queue, commit or lookup.
pub trait GraphMetrics: Send + Sync {
    /// A document entered the update queue.
    fn update_queued(&self);

    /// A document entered the remove queue.
    fn remove_queued(&self);

    /// A queued document was saved during commit.
    fn save_succeeded(&self);

    /// A queued document failed to save during commit.
    fn save_failed(&self);

    /// A queued document was permanently removed during commit.
    fn remove_applied(&self);

    /// A queued document was reverted by rollback or an aborted commit.
    fn element_reverted(&self);

    /// Acquiring a document lock on enqueue failed.
    fn lock_failed(&self);

    /// Element lookup served from the identity map.
    fn cache_hit(&self);

    /// Element lookup that went to the store.
    fn cache_miss(&self);

    /// Adjacency flush wrote `fields` document items.
    fn adjacency_written(&self, fields: usize);
}

/// Discards everything.
#[derive(Default)]
pub struct NoopMetrics;

impl GraphMetrics for NoopMetrics {
    fn update_queued(&self) {}
    fn remove_queued(&self) {}
    fn save_succeeded(&self) {}
    fn save_failed(&self) {}
    fn remove_applied(&self) {}
    fn element_reverted(&self) {}
    fn lock_failed(&self) {}
    fn cache_hit(&self) {}
    fn cache_miss(&self) {}
    fn adjacency_written(&self, _fields: usize) {}
}

/// Atomic counters, safe to read from any thread.
#[derive(Default)]
pub struct CounterMetrics {
    /// Documents queued for update.
    pub updates_queued: AtomicU64,
    /// Documents queued for removal.
    pub removes_queued: AtomicU64,
    /// Successful saves.
    pub saves_succeeded: AtomicU64,
    /// Failed saves.
    pub saves_failed: AtomicU64,
    /// Applied removals.
    pub removes_applied: AtomicU64,
    /// Reverted documents.
    pub elements_reverted: AtomicU64,
    /// Failed lock acquisitions.
    pub lock_failures: AtomicU64,
    /// Identity map hits.
    pub cache_hits: AtomicU64,
    /// Identity map misses.
    pub cache_misses: AtomicU64,
    /// Adjacency items written.
    pub adjacency_fields_written: AtomicU64,
}

impl CounterMetrics {
    /// Reads a counter.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

impl GraphMetrics for CounterMetrics {
    fn update_queued(&self) {
        self.updates_queued.fetch_add(1, Ordering::Relaxed);
    }

    fn remove_queued(&self) {
        self.removes_queued.fetch_add(1, Ordering::Relaxed);
    }

    fn save_succeeded(&self) {
        self.saves_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    fn save_failed(&self) {
        self.saves_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn remove_applied(&self) {
        self.removes_applied.fetch_add(1, Ordering::Relaxed);
    }

    fn element_reverted(&self) {
        self.elements_reverted.fetch_add(1, Ordering::Relaxed);
    }

    fn lock_failed(&self) {
        self.lock_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    fn adjacency_written(&self, fields: usize) {
        self.adjacency_fields_written
            .fetch_add(fields as u64, Ordering::Relaxed);
    }
}

/// Metrics used when none are configured.
pub fn default_metrics() -> Arc<dyn GraphMetrics> {
    Arc::new(NoopMetrics)
}
