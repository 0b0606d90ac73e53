//! A concurrent, chunk-allocated read cache for immutable document payloads.
//!
//! # Data layout
//!
//! The cache is a collection of fixed-capacity [`chunk::Chunk`] slabs. Entries are appended
//! to the current chunk's bump pointer and are never moved or mutated once written; each
//! entry is length-prefixed so a chunk can be walked independently of any outside index (see
//! [`chunk`] for the exact byte layout). [`cache::Cache`] owns two chunk lists, `free`
//! (still accepting stores) and `used` (sealed, awaiting reclamation), and allocates a new
//! chunk whenever the current one fills up.
//!
//! [`position_map::PositionMap`] is a separate, independent index from a revision id to its
//! on-disk [`position_map::PositionRecord`] — the cache itself has no notion of revision ids,
//! only of entries and leases, and never touches this map.
//!
//! # Garbage collection
//!
//! A sealed chunk becomes reclaimable once it has no live [`reader::Reader`] leases and no
//! live [`chunk_ref::ChunkReference`] pins. `Cache::garbage_collect` reclaims at most one
//! chunk per call and is also run opportunistically whenever a new chunk allocation pushes
//! `total_allocated` over the configured budget. See [`cache`] for the exact locking
//! discipline this relies on to stay race-free against concurrent stores.
//!
//! # Locking
//!
//! Chunk-level operations (`store`, `store_and_lease`, lease release, GC) need no lock at
//! all — they are built entirely out of atomics. The cache-level `free`/`used` list
//! membership is guarded by a single `RwLock`, held only across `Vec` splices, never across
//! an allocation or a GC drain walk.

pub mod cache;
pub mod chunk;
pub mod chunk_ref;
pub mod config;
pub mod error;
pub mod managed_document_result;
pub mod position_map;
pub mod reader;
pub mod stats;

pub use cache::Cache;
pub use chunk::Chunk;
pub use chunk_ref::ChunkReference;
pub use config::{CacheConfig, EvictionCallback, MIN_CHUNK_SIZE};
pub use error::{CacheError, ChunkError};
pub use managed_document_result::{ManagedDocumentResult, ManagedMultiDocumentResult};
pub use position_map::{PositionMap, PositionRecord};
pub use reader::Reader;
pub use stats::CacheStats;
