//! Fixed-capacity in-memory slab, the unit of both allocation and reclamation in the cache.
//!
//! A `Chunk` is a manually managed byte arena with a bump-pointer allocator. Each stored
//! entry is length-prefixed so that [`Chunk::garbage_collect`] can walk the slab without any
//! outside bookkeeping: `[4-byte LE length][8-byte LE collection id][payload]`. The pointer
//! handed back to callers always points at the payload, never at the header.
//!
//! Lease (`readers`) and external-reference (`refs`) counts are plain atomics; no per-chunk
//! lock is needed on the happy path. `sealed` and `gc_in_progress` are the two flags that
//! gate the chunk's irreversible lifecycle: `free` (unsealed) -> `used` (sealed) -> reclaimed.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::error::ChunkError;
use crate::reader::Reader;

/// `4` bytes length prefix + `8` bytes collection id.
pub(crate) const ENTRY_HEADER_LEN: usize = 12;

/// A fixed-capacity byte slab. See the module documentation for the entry layout.
pub struct Chunk {
    base: NonNull<u8>,
    layout: Layout,
    capacity: usize,
    write_offset: AtomicUsize,
    readers: AtomicUsize,
    refs: AtomicUsize,
    sealed: AtomicBool,
    gc_in_progress: AtomicBool,
}

// SAFETY: `base` is never aliased by a safe reference; all access goes through
// `copy_nonoverlapping` into disjoint, atomically-reserved byte ranges, or through
// `payload_slice`, whose caller (`Reader`) is only constructed once the write to its range
// has completed (see `store_and_lease`).
unsafe impl Send for Chunk {}
unsafe impl Sync for Chunk {}

impl Chunk {
    /// Allocates a zeroed slab of `capacity` bytes. Returns `None` if the allocator failed.
    pub(crate) fn try_new(capacity: usize) -> Option<Self> {
        assert!(capacity > 0, "chunk capacity must be non-zero");
        let layout = Layout::array::<u8>(capacity).ok()?;
        let base = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(base)?;
        Some(Chunk {
            base,
            layout,
            capacity,
            write_offset: AtomicUsize::new(0),
            readers: AtomicUsize::new(0),
            refs: AtomicUsize::new(0),
            sealed: AtomicBool::new(false),
            gc_in_progress: AtomicBool::new(false),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn has_readers(&self) -> bool {
        self.readers.load(Ordering::SeqCst) > 0
    }

    pub fn has_references(&self) -> bool {
        self.refs.load(Ordering::SeqCst) > 0
    }

    pub fn add_reference(&self) {
        self.refs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release_reference(&self) {
        let previous = self.refs.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "released a reference that was never held");
    }

    /// Reserves `ENTRY_HEADER_LEN + data_len` bytes from the bump pointer.
    ///
    /// Re-checks `gc_in_progress` and `sealed` on every retry of the CAS loop: either flag
    /// may flip while we are racing another store on the same chunk.
    fn reserve(&self, data_len: usize) -> Result<usize, ChunkError> {
        let entry_len = ENTRY_HEADER_LEN
            .checked_add(data_len)
            .expect("entry length overflow");

        let mut current = self.write_offset.load(Ordering::SeqCst);
        loop {
            if self.gc_in_progress.load(Ordering::SeqCst) {
                return Err(ChunkError::Locked);
            }
            if self.sealed.load(Ordering::SeqCst) {
                return Err(ChunkError::Full);
            }

            let new_offset = match current.checked_add(entry_len) {
                Some(v) if v <= self.capacity => v,
                _ => {
                    // Doesn't fit. Seal so no further store is attempted against this chunk.
                    self.sealed.store(true, Ordering::SeqCst);
                    return Err(ChunkError::Full);
                }
            };

            match self.write_offset.compare_exchange(
                current,
                new_offset,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Ok(current),
                Err(actual) => current = actual,
            }
        }
    }

    /// # Safety
    /// `offset` must be a range reserved by [`Chunk::reserve`] and not yet written.
    unsafe fn write_entry(&self, offset: usize, collection_id: u64, data: &[u8]) -> usize {
        let header = self.base.as_ptr().add(offset);
        header.copy_from_nonoverlapping((data.len() as u32).to_le_bytes().as_ptr(), 4);
        header
            .add(4)
            .copy_from_nonoverlapping(collection_id.to_le_bytes().as_ptr(), 8);
        header
            .add(ENTRY_HEADER_LEN)
            .copy_from_nonoverlapping(data.as_ptr(), data.len());
        offset + ENTRY_HEADER_LEN
    }

    /// Stores an entry without acquiring a lease. Does not create a [`Reader`].
    pub fn store(&self, collection_id: u64, data: &[u8]) -> Result<usize, ChunkError> {
        let offset = self.reserve(data.len())?;
        // SAFETY: `offset` was just reserved exclusively by `reserve`.
        Ok(unsafe { self.write_entry(offset, collection_id, data) })
    }

    /// Stores an entry and returns a [`Reader`] holding a lease on it.
    ///
    /// `readers` is incremented *before* the reservation succeeds, speculatively, and rolled
    /// back on failure. This guarantees that any thread which later observes the advanced
    /// `write_offset` (in particular the Cache's GC, scanning a chunk it just pulled out of
    /// `used`) also observes `readers >= 1` for this lease — the two must be jointly visible
    /// or a concurrent GC could reclaim a chunk out from under a lease in flight.
    pub fn store_and_lease(
        self: &Arc<Self>,
        collection_id: u64,
        data: &[u8],
    ) -> Result<Reader, ChunkError> {
        self.readers.fetch_add(1, Ordering::SeqCst);
        match self.reserve(data.len()) {
            Ok(offset) => {
                // SAFETY: `offset` was just reserved exclusively by `reserve`.
                let payload_offset = unsafe { self.write_entry(offset, collection_id, data) };
                Ok(Reader::new(
                    Arc::clone(self),
                    payload_offset,
                    data.len(),
                    collection_id,
                ))
            }
            Err(err) => {
                self.readers.fetch_sub(1, Ordering::SeqCst);
                Err(err)
            }
        }
    }

    /// Borrows the payload bytes of an entry previously returned by `store`/`store_and_lease`.
    pub(crate) fn payload_slice(&self, offset: usize, length: usize) -> &[u8] {
        debug_assert!(offset + length <= self.capacity);
        // SAFETY: entries are immutable once written and `offset`/`length` describe a range
        // that was fully written before being handed out.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(offset), length) }
    }

    pub(crate) fn drop_reader(&self) {
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }

    /// Walks every entry from offset `0` to the current write offset, invoking `callback` for
    /// each, then returns the number of entries visited.
    ///
    /// Must be called only by the Cache's GC path, only after the chunk has been removed from
    /// `used` under the exclusive list lock.
    pub(crate) fn garbage_collect<F: FnMut(u64, &[u8])>(&self, mut callback: F) -> usize {
        // Setting this first is what makes the Cache's authoritative zero-reader/zero-ref
        // check (taken right before removing this chunk from `used`) stick: any store that
        // had already grabbed this chunk and is mid-flight will observe this flag in
        // `reserve` and back out instead of completing. A speculative, immediately-reverted
        // `readers` bump from such a straggler can still land here for an instant — that is
        // expected and harmless, so there is no counter assertion below.
        self.gc_in_progress.store(true, Ordering::SeqCst);

        let end = self.write_offset.load(Ordering::SeqCst);
        let mut offset = 0;
        let mut count = 0;
        while offset < end {
            // SAFETY: every byte in `0..end` was written by a completed `write_entry` call;
            // no live Reader/reference can exist here (checked above).
            unsafe {
                let header = self.base.as_ptr().add(offset);
                let mut len_bytes = [0u8; 4];
                header.copy_to_nonoverlapping(len_bytes.as_mut_ptr(), 4);
                let len = u32::from_le_bytes(len_bytes) as usize;

                let mut id_bytes = [0u8; 8];
                header.add(4).copy_to_nonoverlapping(id_bytes.as_mut_ptr(), 8);
                let collection_id = u64::from_le_bytes(id_bytes);

                let payload = std::slice::from_raw_parts(header.add(ENTRY_HEADER_LEN), len);
                callback(collection_id, payload);

                offset += ENTRY_HEADER_LEN + len;
            }
            count += 1;
        }
        count
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // SAFETY: `base`/`layout` came from a matching `alloc_zeroed` call and are never
        // handed out past this point (the Cache only drops a chunk's last `Arc` once its
        // `garbage_collect` walk has completed).
        unsafe { dealloc(self.base.as_ptr(), self.layout) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_returns_payload_offset_past_header() {
        let chunk = Chunk::try_new(256).unwrap();
        let offset = chunk.store(7, b"hello").unwrap();
        assert_eq!(offset, ENTRY_HEADER_LEN);
        assert_eq!(chunk.payload_slice(offset, 5), b"hello");
    }

    #[test]
    fn store_and_lease_increments_and_drop_decrements_readers() {
        let chunk = Arc::new(Chunk::try_new(256).unwrap());
        assert!(!chunk.has_readers());
        let reader = chunk.store_and_lease(1, b"abc").unwrap();
        assert!(chunk.has_readers());
        drop(reader);
        assert!(!chunk.has_readers());
    }

    #[test]
    fn store_seals_chunk_on_overflow() {
        let chunk = Chunk::try_new(ENTRY_HEADER_LEN + 4).unwrap();
        chunk.store(1, b"abcd").unwrap();
        let err = chunk.store(1, b"e").unwrap_err();
        assert_eq!(err, ChunkError::Full);
        // a chunk that is full but not yet claimed for GC stays Full, not Locked
        let err = chunk.store(1, b"e").unwrap_err();
        assert_eq!(err, ChunkError::Full);
    }

    #[test]
    fn locked_chunk_rejects_store() {
        let chunk = Chunk::try_new(256).unwrap();
        chunk.garbage_collect(|_, _| {});
        let err = chunk.store(1, b"x").unwrap_err();
        assert_eq!(err, ChunkError::Locked);
    }

    #[test]
    fn garbage_collect_visits_entries_in_store_order() {
        let chunk = Chunk::try_new(256).unwrap();
        chunk.store(1, b"one").unwrap();
        chunk.store(2, b"two").unwrap();
        let mut seen = Vec::new();
        let count = chunk.garbage_collect(|cid, payload| seen.push((cid, payload.to_vec())));
        assert_eq!(count, 2);
        assert_eq!(seen, vec![(1, b"one".to_vec()), (2, b"two".to_vec())]);
    }

    #[test]
    fn add_reference_and_release_reference_track_refs() {
        let chunk = Chunk::try_new(64).unwrap();
        assert!(!chunk.has_references());
        chunk.add_reference();
        assert!(chunk.has_references());
        chunk.release_reference();
        assert!(!chunk.has_references());
    }
}
