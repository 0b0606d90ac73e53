//! RAII lease handle returned by `Chunk::store_and_lease`/`Cache::store_and_lease`.

use std::sync::Arc;

use crate::chunk::Chunk;

/// A move-only handle proving a lease is held on one stored entry.
///
/// While a `Reader` is alive its chunk cannot be reclaimed by GC (`Chunk::has_readers`
/// reports `true`). Dropping the `Reader` releases the lease; there is no explicit
/// `release` call, the same shape as a `MutexGuard`.
pub struct Reader {
    chunk: Arc<Chunk>,
    offset: usize,
    length: usize,
    collection_id: u64,
}

impl Reader {
    pub(crate) fn new(chunk: Arc<Chunk>, offset: usize, length: usize, collection_id: u64) -> Self {
        Reader {
            chunk,
            offset,
            length,
            collection_id,
        }
    }

    /// Borrows the leased entry's payload bytes. The borrow cannot outlive this `Reader`.
    pub fn data(&self) -> &[u8] {
        self.chunk.payload_slice(self.offset, self.length)
    }

    pub fn collection_id(&self) -> u64 {
        self.collection_id
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub(crate) fn chunk(&self) -> &Arc<Chunk> {
        &self.chunk
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.chunk.drop_reader();
    }
}

#[cfg(test)]
mod tests {
    use crate::cache::Cache;
    use crate::config::CacheConfig;
    use std::sync::Arc;

    #[test]
    fn reader_borrows_the_stored_payload() {
        let config = CacheConfig::new(4096, 1 << 20).unwrap();
        let cache = Cache::new(config, Arc::new(|_, _: &[u8]| {}));
        let reader = cache.store_and_lease(42, b"payload").unwrap();
        assert_eq!(reader.data(), b"payload");
        assert_eq!(reader.collection_id(), 42);
        assert_eq!(reader.length(), 7);
    }
}
