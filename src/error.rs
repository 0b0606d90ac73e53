//! Classified error types for the chunk and cache layers.
//!
//! `ChunkError` is internal: the [`crate::cache::Cache`] retry loop consumes both variants
//! and never lets them escape. `CacheError` is the only error type a caller ever sees.

/// Signals returned by a single chunk's `store`/`store_and_lease` attempt.
///
/// Neither variant escapes [`crate::cache::Cache`]; both are converted into a retry with a
/// different chunk.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkError {
    /// The chunk cannot hold the entry; it has been sealed as a side effect.
    #[error("chunk is full")]
    Full,
    /// The chunk is currently being garbage collected.
    #[error("chunk is locked for garbage collection")]
    Locked,
}

/// The only error variant a caller of [`crate::cache::Cache`] can observe.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// No existing chunk could host the entry and a new chunk could not be allocated.
    #[error("out of memory: failed to allocate a chunk for a {requested} byte entry")]
    OutOfMemory {
        /// Size of the entry that could not be stored.
        requested: usize,
    },
}
