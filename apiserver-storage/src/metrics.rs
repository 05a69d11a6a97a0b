//! Observability surface for a single `Store` (spec §6, "Observability surface").
use parking_lot::RwLock;
use std::sync::Arc;

/// Per-resource-kind counters, read by whatever exporter the embedding
/// server wires up; cheap enough to update on every call.
#[derive(Default, Debug)]
pub struct StoreMetrics {
    pub creates: u64,
    pub updates: u64,
    pub deletes: u64,
    pub conflicts: u64,
    pub watch_events_sent: u64,
    /// Last value observed by the resource-count poller; 0 until the first tick.
    pub object_count: u64,
}

/// Shared, lock-protected metrics a `Store` updates as it runs.
#[derive(Clone, Default)]
pub struct Metrics {
    inner: Arc<RwLock<StoreMetrics>>,
}

impl Metrics {
    pub fn snapshot(&self) -> StoreMetrics {
        let guard = self.inner.read();
        StoreMetrics {
            creates: guard.creates,
            updates: guard.updates,
            deletes: guard.deletes,
            conflicts: guard.conflicts,
            watch_events_sent: guard.watch_events_sent,
            object_count: guard.object_count,
        }
    }

    pub fn record_create(&self) {
        self.inner.write().creates += 1;
    }

    pub fn record_update(&self) {
        self.inner.write().updates += 1;
    }

    pub fn record_delete(&self) {
        self.inner.write().deletes += 1;
    }

    pub fn record_conflict(&self) {
        self.inner.write().conflicts += 1;
    }

    pub fn record_watch_event(&self) {
        self.inner.write().watch_events_sent += 1;
    }

    pub fn set_object_count(&self, count: u64) {
        self.inner.write().object_count = count;
    }
}
