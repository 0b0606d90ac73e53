//! The chunk-allocated cache: owns the `free`/`used` chunk lists and drives allocation,
//! leasing, and garbage collection.
//!
//! # Locking
//!
//! A single [`RwLock`] guards list membership (`free`/`used` and `total_allocated`
//! bookkeeping). Readers (the common case: finding the current free chunk) take a shared
//! lock; only `add_chunk` and `garbage_collect` take the exclusive lock, and only for the
//! duration of a `Vec` splice — never across an actual chunk allocation or the GC drain
//! walk itself, both of which happen outside the lock.
//!
//! # Garbage collection
//!
//! GC reclaims at most one chunk per call, chosen as the first `used` chunk with no live
//! readers and no live external references. It runs opportunistically: every `add_chunk`
//! call that pushes `total_allocated` at or above `total_target_size` also attempts one
//! reclamation in the same critical section that adds the new chunk.

use std::cell::Cell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::chunk::Chunk;
use crate::config::{CacheConfig, EvictionCallback};
use crate::error::{CacheError, ChunkError};
use crate::reader::Reader;
use crate::stats::CacheStats;

thread_local! {
    /// Set for the duration of an eviction callback invocation on this thread. Lets `Cache`
    /// detect a callback calling back into the cache that is collecting it.
    static IN_EVICTION: Cell<bool> = Cell::new(false);
}

struct ChunkLists {
    free: Vec<Arc<Chunk>>,
    used: Vec<Arc<Chunk>>,
}

/// A concurrent, chunk-allocated cache of immutable, length-prefixed byte entries.
pub struct Cache {
    config: CacheConfig,
    lists: RwLock<ChunkLists>,
    total_allocated: AtomicUsize,
    entries_evicted: AtomicUsize,
    chunks_reclaimed: AtomicUsize,
    eviction_callback: EvictionCallback,
}

impl Cache {
    pub fn new(config: CacheConfig, eviction_callback: EvictionCallback) -> Self {
        Cache {
            config,
            lists: RwLock::new(ChunkLists {
                free: Vec::new(),
                used: Vec::new(),
            }),
            total_allocated: AtomicUsize::new(0),
            entries_evicted: AtomicUsize::new(0),
            chunks_reclaimed: AtomicUsize::new(0),
            eviction_callback,
        }
    }

    fn assert_not_in_eviction(&self) {
        let reentrant = IN_EVICTION.with(Cell::get);
        assert!(
            !reentrant,
            "eviction callback re-entered the cache; this is forbidden"
        );
    }

    fn chunk_target_size(&self, data_len: usize) -> usize {
        let physical = crate::chunk::ENTRY_HEADER_LEN + data_len;
        self.config.default_chunk_size.max(physical)
    }

    /// Stores an entry, retrying against a fresh chunk whenever the current one reports
    /// `Full` or `Locked`.
    pub fn store(&self, collection_id: u64, data: &[u8]) -> Result<(), CacheError> {
        self.assert_not_in_eviction();
        loop {
            let candidate = {
                let lists = self.lists.read().unwrap();
                lists.free.last().cloned()
            };
            match candidate {
                Some(chunk) => match chunk.store(collection_id, data) {
                    Ok(_) => return Ok(()),
                    Err(ChunkError::Full) => self.add_chunk(data.len(), Some(chunk))?,
                    Err(ChunkError::Locked) => self.add_chunk(data.len(), None)?,
                },
                None => self.add_chunk(data.len(), None)?,
            }
        }
    }

    /// Stores an entry and returns a [`Reader`] holding a lease on it.
    pub fn store_and_lease(&self, collection_id: u64, data: &[u8]) -> Result<Reader, CacheError> {
        self.assert_not_in_eviction();
        loop {
            let candidate = {
                let lists = self.lists.read().unwrap();
                lists.free.last().cloned()
            };
            match candidate {
                Some(chunk) => match chunk.store_and_lease(collection_id, data) {
                    Ok(reader) => return Ok(reader),
                    Err(ChunkError::Full) => self.add_chunk(data.len(), Some(chunk))?,
                    Err(ChunkError::Locked) => self.add_chunk(data.len(), None)?,
                },
                None => self.add_chunk(data.len(), None)?,
            }
        }
    }

    /// Ensures a usable free chunk exists, sealing `full_chunk` into `used` first if given.
    ///
    /// `full_chunk` is `Some` when the caller observed `ChunkError::Full` (the chunk is
    /// still a normal sealed chunk, just full) and `None` when the caller observed
    /// `ChunkError::Locked` (the chunk is already being torn down by a concurrent GC and
    /// must not be touched again).
    fn add_chunk(&self, data_len: usize, full_chunk: Option<Arc<Chunk>>) -> Result<(), CacheError> {
        let target = self.chunk_target_size(data_len);
        let new_chunk = Chunk::try_new(target)
            .map(Arc::new)
            .ok_or(CacheError::OutOfMemory { requested: data_len })?;

        let gc_candidate = {
            let mut lists = self.lists.write().unwrap();

            if let Some(fc) = &full_chunk {
                if let Some(pos) = lists.free.iter().position(|c| Arc::ptr_eq(c, fc)) {
                    let sealed = lists.free.remove(pos);
                    log::trace!("chunk sealed and moved to used ({} bytes)", sealed.capacity());
                    lists.used.push(sealed);
                }
            }

            if !lists.free.is_empty() {
                // Another thread already raced us to add a usable chunk; drop ours.
                return Ok(());
            }

            let over_budget =
                self.total_allocated.load(Ordering::SeqCst) + target >= self.config.total_target_size;
            let candidate = if over_budget {
                lists
                    .used
                    .iter()
                    .position(|c| !c.has_readers() && !c.has_references())
                    .map(|pos| lists.used.remove(pos))
            } else {
                None
            };

            log::debug!(
                "allocated chunk of {target} bytes (total_allocated was {})",
                self.total_allocated.load(Ordering::SeqCst)
            );
            lists.free.push(new_chunk);
            self.total_allocated.fetch_add(target, Ordering::SeqCst);

            candidate
        };

        if let Some(chunk) = gc_candidate {
            self.reclaim(chunk);
        }

        Ok(())
    }

    fn reclaim(&self, chunk: Arc<Chunk>) {
        let capacity = chunk.capacity();
        let callback = Arc::clone(&self.eviction_callback);
        let evicted = chunk.garbage_collect(|collection_id, payload| {
            IN_EVICTION.with(|f| f.set(true));
            (callback)(collection_id, payload);
            IN_EVICTION.with(|f| f.set(false));
        });
        self.total_allocated.fetch_sub(capacity, Ordering::SeqCst);
        self.entries_evicted.fetch_add(evicted, Ordering::SeqCst);
        self.chunks_reclaimed.fetch_add(1, Ordering::SeqCst);
        log::debug!("reclaimed chunk: {capacity} bytes, {evicted} entries evicted");
        // `chunk` drops here; its last `Arc` goes away and its slab is deallocated.
    }

    /// Attempts to reclaim one chunk from `used`. Returns `true` if a chunk was reclaimed.
    ///
    /// This is the same reclamation `add_chunk` performs opportunistically; exposed directly
    /// so a caller can drive GC without also forcing a new allocation.
    pub fn garbage_collect(&self) -> bool {
        self.assert_not_in_eviction();
        if self.total_allocated.load(Ordering::SeqCst) < self.config.total_target_size {
            return false;
        }
        let candidate = {
            let mut lists = self.lists.write().unwrap();
            lists
                .used
                .iter()
                .position(|c| !c.has_readers() && !c.has_references())
                .map(|pos| lists.used.remove(pos))
        };
        match candidate {
            Some(chunk) => {
                self.reclaim(chunk);
                true
            }
            None => {
                log::trace!("garbage_collect: nothing reclaimable");
                false
            }
        }
    }

    /// Snapshot of the sum of capacities over both `free` and `used` chunks.
    pub fn total_allocated(&self) -> usize {
        self.total_allocated.load(Ordering::SeqCst)
    }

    /// Snapshot of cache-wide counters. See [`CacheStats`].
    pub fn stats(&self) -> CacheStats {
        let lists = self.lists.read().unwrap();
        CacheStats {
            free_chunks: lists.free.len(),
            used_chunks: lists.used.len(),
            total_allocated: self.total_allocated.load(Ordering::SeqCst),
            entries_evicted: self.entries_evicted.load(Ordering::SeqCst),
            chunks_reclaimed: self.chunks_reclaimed.load(Ordering::SeqCst),
        }
    }
}
