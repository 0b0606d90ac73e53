//! Construction-time configuration for the [`crate::cache::Cache`].
//!
//! There is no environment variable or CLI surface: every knob is a plain value passed to
//! [`crate::cache::Cache::new`], the same way `pbs-datastore::chunk_store::ChunkStore::create`
//! takes its sync level as a plain argument rather than reading it from the environment.

use std::sync::Arc;

/// Minimum chunk capacity, in bytes.
pub const MIN_CHUNK_SIZE: usize = 1024;

/// Invoked once per stored entry, at the moment its chunk is reclaimed by GC.
///
/// Arguments are `(collection_id, payload)`; the payload slice carries its own length.
/// The callback must not call back into the [`crate::cache::Cache`] that invoked it — doing
/// so is a reentrancy bug and the cache will panic rather than let it corrupt its lists.
///
/// The callback must not fail. If the upstream index cannot honour an eviction it must
/// panic and take the process down: silently leaking a pointer into freed memory is worse
/// than crashing.
pub type EvictionCallback = Arc<dyn Fn(u64, &[u8]) + Send + Sync>;

/// Constructor-time knobs for a [`crate::cache::Cache`].
#[derive(Clone)]
pub struct CacheConfig {
    /// Default capacity for newly allocated chunks, in bytes. Entries larger than this get
    /// a chunk sized to fit them instead.
    pub default_chunk_size: usize,
    /// Soft cap on the sum of chunk capacities. GC engages once `total_allocated` reaches
    /// or exceeds this value.
    pub total_target_size: usize,
}

impl CacheConfig {
    /// Builds a config, rejecting a `default_chunk_size` below [`MIN_CHUNK_SIZE`].
    pub fn new(default_chunk_size: usize, total_target_size: usize) -> Result<Self, String> {
        if default_chunk_size < MIN_CHUNK_SIZE {
            return Err(format!(
                "default_chunk_size must be >= {MIN_CHUNK_SIZE}, got {default_chunk_size}"
            ));
        }
        Ok(Self {
            default_chunk_size,
            total_target_size,
        })
    }
}
