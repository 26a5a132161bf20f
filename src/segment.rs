//! The partitioned lock table for the sharded skip list.
//!
//! Keys hash to one of N segments, each guarded by its own exclusive mutex,
//! so writers touching disjoint segments proceed in parallel. Reads and
//! writes currently share the same exclusive mutex per segment; swapping in
//! a shared/exclusive lock is a compatible upgrade, but callers must not
//! assume reads of one segment run concurrently.

use std::hash::{DefaultHasher, Hash, Hasher};

use parking_lot::{Mutex, MutexGuard};

/// Maps keys to lock segments and hands out per-segment guards.
pub struct SegmentLockTable {
    locks: Vec<Mutex<()>>,
}

impl SegmentLockTable {
    /// Default segment count; a power of two spreads hashes evenly.
    pub const DEFAULT_SEGMENT_COUNT: usize = 16;

    pub fn new(segment_count: usize) -> Self {
        assert!(segment_count > 0, "segment_count must be positive");
        SegmentLockTable {
            locks: (0..segment_count).map(|_| Mutex::new(())).collect(),
        }
    }

    /// The segment index a key belongs to, in `[0, segment_count)`.
    pub fn index_for<K: Hash>(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() as usize) % self.locks.len()
    }

    /// Acquires the read lock for one segment.
    pub fn read(&self, index: usize) -> MutexGuard<'_, ()> {
        self.locks[index].lock()
    }

    /// Acquires the write lock for one segment.
    pub fn write(&self, index: usize) -> MutexGuard<'_, ()> {
        self.locks[index].lock()
    }

    /// Acquires every segment's write lock, in ascending index order so two
    /// concurrent callers cannot deadlock against each other.
    pub fn write_all(&self) -> Vec<MutexGuard<'_, ()>> {
        self.locks.iter().map(|lock| lock.lock()).collect()
    }

    pub fn segment_count(&self) -> usize {
        self.locks.len()
    }
}
