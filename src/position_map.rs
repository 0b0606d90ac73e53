//! Maps a 64-bit revision id to its on-disk position record.
//!
//! This is the `MMFilesRevisionsCache` collaborator: a plain concurrent map, independent of
//! [`crate::cache::Cache`] and its chunks. It is consulted on a cache miss to locate the raw
//! bytes that `Cache::store_and_lease` then copies in; it never holds chunk memory itself.
//! The on-disk data file / write-ahead log this position points into is an external
//! collaborator outside this crate's scope, so `data_pointer` stays an opaque offset.

use std::collections::HashMap;
use std::sync::RwLock;

/// Where a revision's raw bytes live on disk or in the write-ahead log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PositionRecord {
    pub data_pointer: u64,
    pub file_id: u64,
    pub in_write_ahead_log: bool,
}

impl PositionRecord {
    pub fn new(data_pointer: u64, file_id: u64, in_write_ahead_log: bool) -> Self {
        PositionRecord {
            data_pointer,
            file_id,
            in_write_ahead_log,
        }
    }
}

/// Concurrent `revisionId -> PositionRecord` index.
pub struct PositionMap {
    entries: RwLock<HashMap<u64, PositionRecord>>,
}

impl Default for PositionMap {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionMap {
    pub fn new() -> Self {
        PositionMap {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn lookup(&self, revision_id: u64) -> Option<PositionRecord> {
        self.entries.read().unwrap().get(&revision_id).copied()
    }

    pub fn insert(&self, revision_id: u64, record: PositionRecord) {
        self.entries.write().unwrap().insert(revision_id, record);
    }

    /// Unconditionally overwrites the record for `revision_id`.
    pub fn update(&self, revision_id: u64, record: PositionRecord) {
        self.entries.write().unwrap().insert(revision_id, record);
    }

    /// Replaces the record for `revision_id` only if its current `data_pointer` still equals
    /// `old_marker`. Used during compaction: a writer that relocated a revision's bytes must
    /// not clobber a newer relocation performed by someone else in the meantime.
    pub fn update_conditional(
        &self,
        revision_id: u64,
        old_marker: u64,
        new_marker: u64,
        new_file_id: u64,
        in_write_ahead_log: bool,
    ) -> bool {
        let mut entries = self.entries.write().unwrap();
        match entries.get(&revision_id) {
            Some(current) if current.data_pointer == old_marker => {
                entries.insert(
                    revision_id,
                    PositionRecord::new(new_marker, new_file_id, in_write_ahead_log),
                );
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, revision_id: u64) {
        self.entries.write().unwrap().remove(&revision_id);
    }

    /// Removes and returns the record for `revision_id`, if any.
    pub fn fetch_and_remove(&self, revision_id: u64) -> Option<PositionRecord> {
        self.entries.write().unwrap().remove(&revision_id)
    }
}
