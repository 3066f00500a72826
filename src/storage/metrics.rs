use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Trait for tracking allocator and relationship-maintenance activity.
///
/// Implementations collect statistics about record allocation, growable
/// array resizing and processed deletions. This information can be used for
/// monitoring, profiling, and tuning inline capacities.
pub trait StorageMetrics: Send + Sync {
    /// Records a block allocation of `bytes` (including its header).
    fn record_allocated(&self, bytes: u64);

    /// Records a block release of `bytes` (including its header).
    fn record_freed(&self, bytes: u64);

    /// Records a growable array capacity change.
    ///
    /// # Parameters
    /// * `old_capacity` - Total capacity (inline plus external) before.
    /// * `new_capacity` - Total capacity (inline plus external) after.
    fn growable_resized(&self, old_capacity: u64, new_capacity: u64);

    /// Records the physical removal of a node during a deletion batch.
    fn node_deleted(&self);
}

/// A no-op implementation of [`StorageMetrics`] that discards all recorded metrics.
#[derive(Default)]
pub struct NoopMetrics;

impl StorageMetrics for NoopMetrics {
    fn record_allocated(&self, _bytes: u64) {}
    fn record_freed(&self, _bytes: u64) {}
    fn growable_resized(&self, _old_capacity: u64, _new_capacity: u64) {}
    fn node_deleted(&self) {}
}

/// A thread-safe counter-based implementation of [`StorageMetrics`].
#[derive(Default)]
pub struct CounterMetrics {
    /// Number of blocks allocated.
    pub blocks_allocated: AtomicU64,

    /// Number of blocks freed.
    pub blocks_freed: AtomicU64,

    /// Bytes handed out by the allocator.
    pub bytes_allocated: AtomicU64,

    /// Bytes returned to the allocator.
    pub bytes_freed: AtomicU64,

    /// Number of growable array capacity increases.
    pub growable_grows: AtomicU64,

    /// Number of growable array capacity reductions.
    pub growable_shrinks: AtomicU64,

    /// Number of nodes physically deleted.
    pub nodes_deleted: AtomicU64,
}

impl StorageMetrics for CounterMetrics {
    fn record_allocated(&self, bytes: u64) {
        self.blocks_allocated.fetch_add(1, Ordering::Relaxed);
        self.bytes_allocated.fetch_add(bytes, Ordering::Relaxed);
    }

    fn record_freed(&self, bytes: u64) {
        self.blocks_freed.fetch_add(1, Ordering::Relaxed);
        self.bytes_freed.fetch_add(bytes, Ordering::Relaxed);
    }

    fn growable_resized(&self, old_capacity: u64, new_capacity: u64) {
        if new_capacity > old_capacity {
            self.growable_grows.fetch_add(1, Ordering::Relaxed);
        } else if new_capacity < old_capacity {
            self.growable_shrinks.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn node_deleted(&self) {
        self.nodes_deleted.fetch_add(1, Ordering::Relaxed);
    }
}

/// Returns the default metrics sink.
pub fn default_metrics() -> Arc<dyn StorageMetrics> {
    Arc::new(NoopMetrics)
}
