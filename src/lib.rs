#![doc = include_str!("../README.md")]
//! The core, transactional, multi-version skiplist implementation.
//!
//! This module provides [`MvccSkipList`], an ordered map from `K` to
//! versioned values under read-committed isolation.
//!
//! # Internals
//!
//! -   **Nodes:** The skiplist is composed of `Node`s, each representing a
//!     key and anchoring a chain of versions. A node is created on the first
//!     insert of its key and stays in the index for the lifetime of the
//!     list; deletes are logical tombstones in the version chain.
//! -   **Structure vs. versions:** Structural mutation (splicing nodes) is
//!     serialized under one index mutex. Reads never take it — they walk
//!     the forward towers under short per-node locks and then consult the
//!     key's version chain under its chain mutex.
//! -   **Transactions:** Writes are stamped with the writing transaction's
//!     id and stay invisible until commit flips their flags; see the
//!     [`transaction`] module.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::{Mutex, RwLock};

pub mod error;
mod gc;
pub mod persistence;
pub mod pool;
pub mod segment;
pub mod sharded;
pub mod transaction;
mod version;

pub use crate::error::VellumError;
pub use crate::pool::PoolStats;
pub use crate::segment::SegmentLockTable;
pub use crate::sharded::ShardedSkipList;
pub use crate::transaction::{Transaction, TransactionManager, TransactionStatus, TxId};

use crate::version::VersionChain;

/// Default cap on the number of levels a tower may reach.
pub const DEFAULT_MAX_LEVEL: usize = 12;

/// A node in the skiplist, representing a key and its chain of versions.
pub(crate) struct Node<K, V> {
    /// `None` only for the head sentinel, whose key is never read.
    key: Option<K>,
    /// The forward pointers for each level the node participates in.
    forward: RwLock<Vec<Option<Arc<Node<K, V>>>>>,
    pub(crate) chain: VersionChain<V>,
}

impl<K, V> Node<K, V> {
    /// Creates the head sentinel, which participates in every level.
    fn head(max_level: usize) -> Arc<Self> {
        Arc::new(Node {
            key: None,
            forward: RwLock::new(vec![None; max_level + 1]),
            chain: VersionChain::new(),
        })
    }

    /// Creates a data node with an empty version chain at the given level.
    fn new(key: K, level: usize) -> Arc<Self> {
        Arc::new(Node {
            key: Some(key),
            forward: RwLock::new(vec![None; level + 1]),
            chain: VersionChain::new(),
        })
    }
}

impl<K: Ord, V> Node<K, V> {
    fn key_less_than(&self, other: &K) -> bool {
        matches!(&self.key, Some(k) if k < other)
    }

    fn key_equals(&self, other: &K) -> bool {
        self.key.as_ref() == Some(other)
    }
}

/// A snapshot of the MVCC list's counters, as reported by
/// [`MvccSkipList::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MvccStats {
    /// Transactions committed so far.
    pub commits: u64,
    /// Transactions aborted so far.
    pub aborts: u64,
    /// Versions currently held across all chains.
    pub versions: u64,
    /// Transactions currently active.
    pub active_transactions: usize,
    /// Number of keys in the index (including tombstoned ones).
    pub size: usize,
}

/// A transactional, multi-version ordered map.
///
/// Structural mutations (insert of a new key, logical delete, GC, dump)
/// serialize on a single index mutex; version-level concurrency comes from
/// the per-node chain mutexes, which is where readers and committers meet.
pub struct MvccSkipList<K, V> {
    head: Arc<Node<K, V>>,
    max_level: usize,
    /// Highest level currently in use, only raised while holding the index
    /// mutex; readers snapshot it without one.
    level: CachePadded<AtomicUsize>,
    /// Serializes structural mutation of the index.
    list_lock: Mutex<()>,
    tx_manager: Arc<TransactionManager<K, V>>,
    total_versions: CachePadded<AtomicU64>,
    /// Suppresses the `[TXN ...]` progress lines on stdout.
    silent: bool,
    store_path: PathBuf,
}

impl<K, V> MvccSkipList<K, V>
where
    K: Ord + Clone + fmt::Display,
    V: Clone + fmt::Display,
{
    /// Creates an empty list whose towers are capped at `max_level`.
    pub fn new(max_level: usize) -> Self {
        Self::with_silent(max_level, false)
    }

    /// Creates an empty list, optionally suppressing diagnostic output.
    pub fn with_silent(max_level: usize, silent: bool) -> Self {
        assert!(max_level >= 1, "max_level must be positive");
        MvccSkipList {
            head: Node::head(max_level),
            max_level,
            level: CachePadded::new(AtomicUsize::new(0)),
            list_lock: Mutex::new(()),
            tx_manager: Arc::new(TransactionManager::new()),
            total_versions: CachePadded::new(AtomicU64::new(0)),
            silent,
            store_path: PathBuf::from(persistence::MVCC_STORE_PATH),
        }
    }

    /// Overrides the snapshot file location (defaults to
    /// [`persistence::MVCC_STORE_PATH`]).
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    /// Returns a reference to the associated [`TransactionManager`].
    pub fn transaction_manager(&self) -> &Arc<TransactionManager<K, V>> {
        &self.tx_manager
    }

    /// Begins a new transaction.
    pub fn begin_transaction(&self) -> Arc<Transaction<K, V>> {
        let txn = self.tx_manager.begin();
        if !self.silent {
            println!("[TXN {}] BEGIN", txn.id);
        }
        txn
    }

    /// Commits a transaction, making every version it wrote visible to
    /// transactions that begin afterwards.
    pub fn commit_transaction(&self, txn: &Arc<Transaction<K, V>>) -> Result<(), VellumError> {
        self.tx_manager.commit(txn)?;
        if !self.silent {
            println!("[TXN {}] COMMIT", txn.id);
        }
        Ok(())
    }

    /// Aborts a transaction. A no-op if it already finished.
    pub fn abort_transaction(&self, txn: &Arc<Transaction<K, V>>) {
        if self.tx_manager.abort(txn) && !self.silent {
            println!("[TXN {}] ABORT", txn.id);
        }
    }

    /// Draws the level for a new tower: a fair coin per level, capped.
    fn random_level(&self) -> usize {
        let mut level = 1;
        while fastrand::bool() && level < self.max_level {
            level += 1;
        }
        level
    }

    /// Top-down traversal to the node holding `key`, without the index
    /// mutex. Forward pointers are cloned under per-node tower locks, so a
    /// concurrent splice is observed either entirely or not at all.
    fn find_node(&self, key: &K) -> Option<Arc<Node<K, V>>> {
        let mut current = self.head.clone();
        let top = self.level.load(Ordering::Relaxed);
        for lvl in (0..=top).rev() {
            loop {
                let next = current.forward.read()[lvl].clone();
                match next {
                    Some(n) if n.key_less_than(key) => current = n,
                    _ => break,
                }
            }
        }
        let candidate = current.forward.read()[0].clone();
        candidate.filter(|n| n.key_equals(key))
    }

    /// Writes `(key, value)` within `txn`.
    ///
    /// If the key exists, a new version is prepended to its chain; otherwise
    /// a node is spliced into the index carrying the first version. Either
    /// way the version stays invisible to other transactions until `txn`
    /// commits.
    pub fn insert_element(
        &self,
        txn: &Arc<Transaction<K, V>>,
        key: K,
        value: V,
    ) -> Result<(), VellumError> {
        if !txn.is_active() {
            return Err(VellumError::TransactionNotActive);
        }
        let _guard = self.list_lock.lock();

        // Untouched slots keep the head sentinel, which is exactly the
        // predecessor for levels above the current top.
        let mut update: Vec<Arc<Node<K, V>>> = vec![self.head.clone(); self.max_level + 1];
        let mut current = self.head.clone();
        let top = self.level.load(Ordering::Relaxed);
        for lvl in (0..=top).rev() {
            loop {
                let next = current.forward.read()[lvl].clone();
                match next {
                    Some(n) if n.key_less_than(&key) => current = n,
                    _ => break,
                }
            }
            update[lvl] = current.clone();
        }

        let found = update[0].forward.read()[0].clone();
        if let Some(node) = found {
            if node.key_equals(&key) {
                if !self.silent {
                    println!("[TXN {}] UPDATE key:{}, value:{}", txn.id, key, value);
                }
                node.chain.push(value, txn.id);
                self.total_versions.fetch_add(1, Ordering::Relaxed);
                txn.record_write(node);
                return Ok(());
            }
        }

        let node_level = self.random_level();
        if node_level > top {
            self.level.store(node_level, Ordering::Relaxed);
        }

        if !self.silent {
            println!("[TXN {}] INSERT key:{}, value:{}", txn.id, key, value);
        }
        let node = Node::new(key, node_level);
        node.chain.push(value, txn.id);
        self.total_versions.fetch_add(1, Ordering::Relaxed);
        {
            let mut new_forward = node.forward.write();
            for lvl in 0..=node_level {
                let mut pred_forward = update[lvl].forward.write();
                new_forward[lvl] = pred_forward[lvl].take();
                pred_forward[lvl] = Some(node.clone());
            }
        }
        txn.record_write(node);
        Ok(())
    }

    /// Returns the value of `key` visible to `txn`, or `None` when the key
    /// is absent or every version is invisible (uncommitted by others,
    /// tombstoned, or newer than `txn`).
    pub fn search_element(
        &self,
        txn: &Arc<Transaction<K, V>>,
        key: &K,
    ) -> Result<Option<V>, VellumError> {
        if !txn.is_active() {
            return Err(VellumError::TransactionNotActive);
        }
        let result = self
            .find_node(key)
            .and_then(|node| node.chain.visible(txn.id))
            .map(|record| record.value());
        if !self.silent {
            match &result {
                Some(value) => println!("[TXN {}] FOUND key:{}, value:{}", txn.id, key, value),
                None => println!("[TXN {}] NOT FOUND key:{}", txn.id, key),
            }
        }
        Ok(result)
    }

    /// Logically deletes `key` within `txn` by tombstoning the head of its
    /// version chain. The node stays in the index anchoring past versions.
    ///
    /// Returns `Ok(false)` when the key is not in the index.
    pub fn delete_element(
        &self,
        txn: &Arc<Transaction<K, V>>,
        key: &K,
    ) -> Result<bool, VellumError> {
        if !txn.is_active() {
            return Err(VellumError::TransactionNotActive);
        }
        let _guard = self.list_lock.lock();
        match self.find_node(key) {
            Some(node) => {
                let marked = node.chain.mark_deleted(txn.id);
                if marked && !self.silent {
                    println!("[TXN {}] DELETE key:{}", txn.id, key);
                }
                Ok(marked)
            }
            None => Ok(false),
        }
    }

    /// Collects `(key, value)` for every key in `[start, end]` with a
    /// version visible to `txn`, in ascending key order.
    ///
    /// The walk takes no structural lock: under concurrent inserts it is
    /// memory-safe but best-effort — a key spliced mid-scan may or may not
    /// appear.
    pub fn range_query(
        &self,
        txn: &Arc<Transaction<K, V>>,
        start: &K,
        end: &K,
    ) -> Result<Vec<(K, V)>, VellumError> {
        if !txn.is_active() {
            return Err(VellumError::TransactionNotActive);
        }
        let mut results = Vec::new();
        if start > end {
            return Ok(results);
        }

        let mut current = self.head.clone();
        let top = self.level.load(Ordering::Relaxed);
        for lvl in (0..=top).rev() {
            loop {
                let next = current.forward.read()[lvl].clone();
                match next {
                    Some(n) if n.key_less_than(start) => current = n,
                    _ => break,
                }
            }
        }

        let mut cursor = current.forward.read()[0].clone();
        while let Some(node) = cursor {
            match &node.key {
                Some(k) if k <= end => {
                    if let Some(record) = node.chain.visible(txn.id) {
                        results.push((k.clone(), record.value()));
                    }
                }
                _ => break,
            }
            cursor = node.forward.read()[0].clone();
        }

        if !self.silent {
            println!(
                "[TXN {}] RANGE_QUERY [{}, {}] found {} elements",
                txn.id,
                start,
                end,
                results.len()
            );
        }
        Ok(results)
    }

    /// Prints every level's key sequence to stdout.
    pub fn display_list(&self) {
        let _guard = self.list_lock.lock();
        println!("\n*****Skip List (MVCC)*****");
        let top = self.level.load(Ordering::Relaxed);
        for lvl in 0..=top {
            print!("Level {}: ", lvl);
            let mut cursor = self.head.forward.read()[lvl].clone();
            while let Some(node) = cursor {
                if let Some(k) = &node.key {
                    print!("{};", k);
                }
                cursor = node.forward.read()[lvl].clone();
            }
            println!();
        }
    }

    /// Number of keys in the index, counted along level 0. Tombstoned keys
    /// still count: their nodes anchor past versions until shutdown.
    pub fn size(&self) -> usize {
        let _guard = self.list_lock.lock();
        let mut count = 0;
        let mut cursor = self.head.forward.read()[0].clone();
        while let Some(node) = cursor {
            count += 1;
            cursor = node.forward.read()[0].clone();
        }
        count
    }

    /// A snapshot of the list's counters.
    pub fn stats(&self) -> MvccStats {
        MvccStats {
            commits: self.tx_manager.total_commits(),
            aborts: self.tx_manager.total_aborts(),
            versions: self.total_versions.load(Ordering::Relaxed),
            active_transactions: self.tx_manager.active_count(),
            size: self.size(),
        }
    }

    /// Prints [`MvccStats`] in a human-readable block.
    pub fn print_stats(&self) {
        let stats = self.stats();
        println!("\n===== MVCC Statistics =====");
        println!("Total commits: {}", stats.commits);
        println!("Total aborts: {}", stats.aborts);
        println!("Total versions: {}", stats.versions);
        println!("Active transactions: {}", stats.active_transactions);
        println!("Skip list size: {}", stats.size);
        println!("==========================\n");
    }

    /// Writes the latest committed value of every key to the snapshot file,
    /// one `key:value` line each.
    ///
    /// Visibility is judged from the next unallocated transaction id, so
    /// every committed version qualifies and nothing uncommitted leaks out.
    pub fn dump_file(&self) -> Result<(), VellumError> {
        let _guard = self.list_lock.lock();
        let snapshot_ts = self.tx_manager.next_id();
        let mut records = Vec::new();
        let mut cursor = self.head.forward.read()[0].clone();
        while let Some(node) = cursor {
            if let Some(k) = &node.key {
                if let Some(record) = node.chain.visible(snapshot_ts) {
                    records.push((k.clone(), record.value()));
                }
            }
            cursor = node.forward.read()[0].clone();
        }
        persistence::write_records(&self.store_path, &records)?;
        log::debug!(
            "dumped {} records to {}",
            records.len(),
            self.store_path.display()
        );
        Ok(())
    }
}

impl<K, V> MvccSkipList<K, V>
where
    K: Ord + Clone + fmt::Display + FromStr,
    V: Clone + fmt::Display + FromStr,
{
    /// Loads the snapshot file written by [`MvccSkipList::dump_file`] as a
    /// single committed transaction. Malformed lines are skipped.
    pub fn load_file(&self) -> Result<(), VellumError> {
        let records: Vec<(K, V)> = persistence::read_records(&self.store_path)?;
        let txn = self.begin_transaction();
        for (key, value) in records {
            self.insert_element(&txn, key, value)?;
        }
        self.commit_transaction(&txn)
    }
}

impl<K, V> Default for MvccSkipList<K, V>
where
    K: Ord + Clone + fmt::Display,
    V: Clone + fmt::Display,
{
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LEVEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed_list(pairs: &[(i32, &str)]) -> MvccSkipList<i32, String> {
        let list = MvccSkipList::with_silent(6, true);
        let txn = list.begin_transaction();
        for (k, v) in pairs {
            list.insert_element(&txn, *k, v.to_string()).unwrap();
        }
        list.commit_transaction(&txn).unwrap();
        list
    }

    fn keys_at_level(list: &MvccSkipList<i32, String>, level: usize) -> Vec<i32> {
        let mut keys = Vec::new();
        let mut cursor = list.head.forward.read()[level].clone();
        while let Some(node) = cursor {
            keys.push(*node.key.as_ref().unwrap());
            cursor = node.forward.read()[level].clone();
        }
        keys
    }

    #[test]
    fn test_levels_stay_strictly_ordered() {
        fastrand::seed(7);
        let pairs: Vec<(i32, String)> = (0..200).map(|i| (i * 37 % 1000, format!("v{}", i))).collect();
        let list = MvccSkipList::with_silent(8, true);
        let txn = list.begin_transaction();
        for (k, v) in &pairs {
            list.insert_element(&txn, *k, v.clone()).unwrap();
        }
        list.commit_transaction(&txn).unwrap();

        let top = list.level.load(Ordering::Relaxed);
        for lvl in 0..=top {
            let keys = keys_at_level(&list, lvl);
            assert!(keys.windows(2).all(|w| w[0] < w[1]), "level {} not ordered", lvl);
        }
    }

    #[test]
    fn test_towers_are_contained_in_lower_levels() {
        fastrand::seed(11);
        let list = committed_list(
            &(0..100)
                .map(|i| (i, "x"))
                .collect::<Vec<_>>(),
        );
        let base: Vec<i32> = keys_at_level(&list, 0);
        let top = list.level.load(Ordering::Relaxed);
        for lvl in 1..=top {
            for key in keys_at_level(&list, lvl) {
                assert!(base.contains(&key), "key {} at level {} missing from level 0", key, lvl);
            }
        }
    }

    #[test]
    fn test_delete_keeps_node_anchored() {
        let list = committed_list(&[(1, "a"), (2, "b")]);
        let txn = list.begin_transaction();
        assert!(list.delete_element(&txn, &1).unwrap());
        list.commit_transaction(&txn).unwrap();
        // Logical delete: the key still occupies the index.
        assert_eq!(list.size(), 2);
        let reader = list.begin_transaction();
        assert_eq!(list.search_element(&reader, &1).unwrap(), None);
    }

    #[test]
    fn test_delete_missing_key() {
        let list = committed_list(&[(1, "a")]);
        let txn = list.begin_transaction();
        assert!(!list.delete_element(&txn, &9).unwrap());
    }
}
