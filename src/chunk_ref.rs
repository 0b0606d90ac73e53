//! RAII external-pin handle, used by [`crate::managed_document_result`] to keep a chunk
//! alive across a transaction without taking out a per-entry lease.

use std::sync::Arc;

use crate::chunk::Chunk;

/// A move-only handle that pins a chunk against reclamation.
///
/// Unlike [`crate::reader::Reader`], a `ChunkReference` does not point at a specific entry —
/// it just keeps the whole chunk off the GC's reclaimable list for as long as it lives.
pub struct ChunkReference {
    chunk: Arc<Chunk>,
}

impl ChunkReference {
    pub(crate) fn new(chunk: Arc<Chunk>) -> Self {
        chunk.add_reference();
        ChunkReference { chunk }
    }

    pub(crate) fn chunk(&self) -> &Arc<Chunk> {
        &self.chunk
    }

    /// Whether this reference pins the same chunk backing `other`.
    pub(crate) fn pins(&self, other: &Arc<Chunk>) -> bool {
        Arc::ptr_eq(&self.chunk, other)
    }
}

impl Drop for ChunkReference {
    fn drop(&mut self) {
        self.chunk.release_reference();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_pins_and_release_on_drop() {
        let chunk = Arc::new(Chunk::try_new(64).unwrap());
        assert!(!chunk.has_references());
        let pin = ChunkReference::new(Arc::clone(&chunk));
        assert!(chunk.has_references());
        assert!(pin.pins(&chunk));
        drop(pin);
        assert!(!chunk.has_references());
    }
}
