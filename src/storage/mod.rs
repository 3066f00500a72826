//! The raw storage medium underneath the node layer.
//!
//! A byte-addressable image with block allocation, typed reads and writes,
//! persistence to a single file, configuration and allocator metrics.

mod database;
mod metrics;
mod options;

/// Byte-addressable storage medium.
pub use database::{
    Database, DatabaseStats, BLOCK_ALIGN, BLOCK_HEADER_SIZE, IMAGE_PREFIX_SIZE, MAX_MALLOC_SIZE,
    MIN_BLOCK_SIZE, PTR_SIZE, ROOT_SLOTS,
};

/// Metrics and profiling.
pub use metrics::{default_metrics, CounterMetrics, NoopMetrics, StorageMetrics};

/// Storage configuration options.
pub use options::{DatabaseOptions, NdConfig, StorageSection, DEFAULT_INITIAL_CAPACITY};
