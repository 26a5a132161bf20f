//! Per-key version chains: the storage half of the MVCC protocol.
//!
//! Every key in an [`MvccSkipList`](crate::MvccSkipList) owns a
//! [`VersionChain`], a singly linked list of [`VersionRecord`]s ordered
//! newest-first. A write prepends a record stamped with the writing
//! transaction's id; a delete tombstones the head record; commit flips the
//! `committed` flag on every record the transaction authored. Readers walk
//! the chain under the chain mutex and stop at the first record the
//! read-committed visibility predicate admits.
//!
//! Records are shared (`Arc`) because a reader may hand a record across the
//! mutex boundary while GC splices the chain; the mutable bits inside a
//! record (`delete_ts`, `committed`) are atomics so such a record is still
//! read without tearing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::transaction::TxId;

/// Sentinel for `delete_ts`: the version has not been tombstoned.
pub(crate) const NEVER_DELETED: u64 = u64::MAX;

/// One historical write of a key's value.
pub(crate) struct VersionRecord<V> {
    value: V,
    /// Id of the transaction that wrote this version.
    create_ts: TxId,
    /// Id of the transaction that tombstoned it; [`NEVER_DELETED`] while live.
    delete_ts: AtomicU64,
    /// Set once the authoring transaction commits.
    committed: AtomicBool,
    next: Mutex<Option<Arc<VersionRecord<V>>>>,
}

impl<V> VersionRecord<V> {
    fn new(value: V, create_ts: TxId, next: Option<Arc<VersionRecord<V>>>) -> Arc<Self> {
        Arc::new(VersionRecord {
            value,
            create_ts,
            delete_ts: AtomicU64::new(NEVER_DELETED),
            committed: AtomicBool::new(false),
            next: Mutex::new(next),
        })
    }

    pub(crate) fn value(&self) -> V
    where
        V: Clone,
    {
        self.value.clone()
    }

    /// The read-committed visibility predicate.
    ///
    /// A transaction sees its own writes (unless it tombstoned them itself)
    /// and versions committed by older transactions whose tombstone, if any,
    /// was placed by a newer transaction than the reader.
    pub(crate) fn is_visible(&self, ts: TxId) -> bool {
        let delete_ts = self.delete_ts.load(Ordering::Acquire);
        if self.create_ts == ts {
            return delete_ts > ts;
        }
        self.committed.load(Ordering::Acquire) && self.create_ts < ts && delete_ts > ts
    }
}

/// The newest-first chain of versions for a single key.
///
/// All walks and splices happen under the chain mutex, so a reader either
/// observes a version before commit flips its flag (and skips it) or after
/// (and may use it); there is no torn state in between.
pub(crate) struct VersionChain<V> {
    head: Mutex<Option<Arc<VersionRecord<V>>>>,
}

impl<V> VersionChain<V> {
    pub(crate) fn new() -> Self {
        VersionChain {
            head: Mutex::new(None),
        }
    }

    /// Prepends a new uncommitted version written by transaction `ts`.
    pub(crate) fn push(&self, value: V, ts: TxId) {
        let mut head = self.head.lock();
        let record = VersionRecord::new(value, ts, head.take());
        *head = Some(record);
    }

    /// Returns the newest version visible to transaction `ts`, if any.
    pub(crate) fn visible(&self, ts: TxId) -> Option<Arc<VersionRecord<V>>> {
        let guard = self.head.lock();
        let mut cursor = guard.clone();
        while let Some(record) = cursor {
            if record.is_visible(ts) {
                return Some(record);
            }
            cursor = record.next.lock().clone();
        }
        None
    }

    /// Tombstones the current head version with transaction `ts`.
    ///
    /// Returns `false` if the chain is empty.
    pub(crate) fn mark_deleted(&self, ts: TxId) -> bool {
        let guard = self.head.lock();
        match guard.as_ref() {
            Some(record) => {
                record.delete_ts.store(ts, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Flips `committed` on every version authored by transaction `ts`.
    pub(crate) fn commit(&self, ts: TxId) {
        let guard = self.head.lock();
        let mut cursor = guard.clone();
        while let Some(record) = cursor {
            if record.create_ts == ts {
                record.committed.store(true, Ordering::Release);
            }
            cursor = record.next.lock().clone();
        }
    }

    /// Splices out versions below the head that no current or future
    /// transaction can reach, returning how many were removed.
    ///
    /// The head is kept unconditionally. A record below it is dead when:
    ///
    /// 1. its tombstone predates every live reader (`delete_ts < min_active`);
    /// 2. it was authored by a transaction below the watermark that never
    ///    committed — ids below the watermark have all terminated, so the
    ///    record is an aborted leftover and invisible forever;
    /// 3. it lies below a committed, untombstoned record older than the
    ///    watermark. Such a record is visible to every transaction at or
    ///    above the watermark, and non-head records can never be tombstoned
    ///    afterwards (`mark_deleted` only touches the head), so every walk
    ///    stops at or above it.
    pub(crate) fn gc(&self, min_active: TxId) -> usize {
        let guard = self.head.lock();
        let Some(head) = guard.clone() else {
            return 0;
        };
        let mut removed = 0;
        let mut barrier_seen = false;
        let mut prev: Arc<VersionRecord<V>> = head;
        loop {
            let next = prev.next.lock().clone();
            let Some(record) = next else {
                break;
            };
            let delete_ts = record.delete_ts.load(Ordering::Acquire);
            let committed = record.committed.load(Ordering::Acquire);
            let dead = barrier_seen
                || delete_ts < min_active
                || (!committed && record.create_ts < min_active);
            if dead {
                let after = record.next.lock().clone();
                *prev.next.lock() = after;
                removed += 1;
            } else {
                if committed && record.create_ts < min_active && delete_ts == NEVER_DELETED {
                    barrier_seen = true;
                }
                prev = record;
            }
        }
        removed
    }

    /// Number of versions currently in the chain.
    #[cfg(test)]
    fn len(&self) -> usize {
        let guard = self.head.lock();
        let mut cursor = guard.clone();
        let mut count = 0;
        while let Some(record) = cursor {
            count += 1;
            cursor = record.next.lock().clone();
        }
        count
    }
}
