//! Transaction-scoped result holders that pin the chunks backing the documents they carry.
//!
//! Each holds its "current" (or, for the multi-document variant, "current batch") lease plus
//! a separate, longer-lived pin on each distinct chunk involved, so the chunk cannot be
//! reclaimed even after the short-lived [`crate::reader::Reader`] lease for an individual
//! read is dropped. Re-pinning the same chunk on every document read is wasteful when a
//! query streams many consecutive documents out of the same chunk: [`ChunkCache`] is a fixed
//! 4-slot most-recently-used array — pinning a chunk already present just promotes its slot,
//! only a genuinely new chunk costs an atomic `add_reference`.

use std::sync::Arc;

use crate::chunk::Chunk;
use crate::chunk_ref::ChunkReference;
use crate::reader::Reader;

const CHUNK_CACHE_SLOTS: usize = 4;

/// Fixed-capacity, shift-based MRU array of chunk pins.
struct ChunkCache {
    slots: [Option<ChunkReference>; CHUNK_CACHE_SLOTS],
}

impl ChunkCache {
    fn new() -> Self {
        ChunkCache {
            slots: [None, None, None, None],
        }
    }

    /// Pins `chunk`, promoting it to the front if already present, otherwise evicting the
    /// least-recently-used slot.
    fn pin(&mut self, chunk: &Arc<Chunk>) {
        if let Some(pos) = self
            .slots
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|r| r.pins(chunk)))
        {
            self.move_to_front(pos);
            return;
        }
        let reference = ChunkReference::new(Arc::clone(chunk));
        self.shift_in(reference);
    }

    fn move_to_front(&mut self, pos: usize) {
        if pos == 0 {
            return;
        }
        let promoted = self.slots[pos].take();
        for i in (1..=pos).rev() {
            self.slots[i] = self.slots[i - 1].take();
        }
        self.slots[0] = promoted;
    }

    fn shift_in(&mut self, reference: ChunkReference) {
        for i in (1..CHUNK_CACHE_SLOTS).rev() {
            self.slots[i] = self.slots[i - 1].take();
        }
        self.slots[0] = Some(reference);
    }
}

/// Holds a single document's lease, plus a pin on its chunk that survives the lease itself.
pub struct ManagedDocumentResult {
    current: Option<Reader>,
    revision_id: Option<u64>,
    pins: ChunkCache,
}

impl Default for ManagedDocumentResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagedDocumentResult {
    pub fn new() -> Self {
        ManagedDocumentResult {
            current: None,
            revision_id: None,
            pins: ChunkCache::new(),
        }
    }

    /// Adopts a newly leased revision, pinning its chunk. Replaces any previously held lease.
    pub fn add(&mut self, reader: Reader, revision_id: u64) {
        self.pins.pin(reader.chunk());
        self.current = Some(reader);
        self.revision_id = Some(revision_id);
    }

    /// Same as [`Self::add`], for a revision already resident (e.g. a repeat lookup within
    /// the same transaction).
    pub fn add_existing(&mut self, reader: Reader, revision_id: u64) {
        self.add(reader, revision_id);
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.current.as_ref().map(Reader::data)
    }

    pub fn revision_id(&self) -> Option<u64> {
        self.revision_id
    }

    /// Drops the held lease. The chunk pin cache is left intact, since the next `add` call is
    /// likely to reuse the same chunk.
    pub fn reset(&mut self) {
        self.current = None;
        self.revision_id = None;
    }
}

/// Same idea as [`ManagedDocumentResult`] but for a batch of documents sharing one pin cache.
pub struct ManagedMultiDocumentResult {
    entries: Vec<(u64, Reader)>,
    pins: ChunkCache,
}

impl Default for ManagedMultiDocumentResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagedMultiDocumentResult {
    pub fn new() -> Self {
        ManagedMultiDocumentResult {
            entries: Vec::new(),
            pins: ChunkCache::new(),
        }
    }

    pub fn add(&mut self, reader: Reader, revision_id: u64) {
        self.pins.pin(reader.chunk());
        self.entries.push((revision_id, reader));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&[u8]> {
        self.entries.get(index).map(|(_, reader)| reader.data())
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::config::CacheConfig;

    fn cache() -> Cache {
        Cache::new(CacheConfig::new(4096, 1 << 20).unwrap(), Arc::new(|_, _| {}))
    }

    #[test]
    fn managed_document_result_exposes_current_data() {
        let cache = cache();
        let mut result = ManagedDocumentResult::new();
        assert!(result.data().is_none());

        let reader = cache.store_and_lease(7, b"hello").unwrap();
        result.add(reader, 42);
        assert_eq!(result.data(), Some(&b"hello"[..]));
        assert_eq!(result.revision_id(), Some(42));

        result.reset();
        assert!(result.data().is_none());
    }

    #[test]
    fn chunk_cache_does_not_repin_already_present_chunk() {
        let cache = cache();
        let reader_a = cache.store_and_lease(1, b"a").unwrap();
        let chunk = Arc::clone(reader_a.chunk());
        let reader_b = cache.store_and_lease(1, b"b").unwrap();

        let mut result = ManagedDocumentResult::new();
        result.add(reader_a, 1);
        assert!(chunk.has_references());
        result.add(reader_b, 2);
        // still pinned exactly once, via MRU promotion, not a second reference
        assert!(chunk.has_references());
    }

    #[test]
    fn multi_result_accumulates_and_clears() {
        let cache = cache();
        let mut result = ManagedMultiDocumentResult::new();
        result.add(cache.store_and_lease(1, b"one").unwrap(), 1);
        result.add(cache.store_and_lease(1, b"two").unwrap(), 2);
        assert_eq!(result.len(), 2);
        assert_eq!(result.get(0), Some(&b"one"[..]));
        result.clear();
        assert!(result.is_empty());
    }
}
