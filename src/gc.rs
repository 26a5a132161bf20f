//! Version garbage collection for the MVCC skip list.
//!
//! Old versions accumulate on every rewrite and delete; this pass walks the
//! base level once and prunes each key's chain against the watermark — the
//! smallest active transaction id. Nothing below the watermark can ever be
//! read again, so tombstoned, aborted, and superseded versions behind it
//! are spliced out in place. Node structure is untouched: a key whose chain
//! shrinks to its head keeps anchoring that head.

use std::sync::atomic::Ordering;

use crate::MvccSkipList;

impl<K, V> MvccSkipList<K, V> {
    /// Reclaims versions invisible to every current and future transaction.
    ///
    /// Runs under the index mutex, so no node is spliced in or out while the
    /// walk is in flight; each chain is pruned under its own chain mutex.
    /// Returns the number of versions reclaimed and subtracts it from the
    /// version counter.
    pub fn gc(&self) -> usize {
        let _guard = self.list_lock.lock();
        let min_active = self.tx_manager.min_active_id();

        let mut reclaimed = 0;
        let mut cursor = self.head.forward.read()[0].clone();
        while let Some(node) = cursor {
            reclaimed += node.chain.gc(min_active);
            cursor = node.forward.read()[0].clone();
        }

        self.total_versions
            .fetch_sub(reclaimed as u64, Ordering::Relaxed);
        if !self.silent {
            println!("[GC] Collected {} old versions", reclaimed);
        }
        log::debug!(
            "gc reclaimed {} versions below watermark {}",
            reclaimed,
            min_active
        );
        reclaimed
    }
}
