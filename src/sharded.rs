//! The non-transactional, segment-locked skip list.
//!
//! Where [`MvccSkipList`](crate::MvccSkipList) serializes structural
//! mutation under one mutex and gets its concurrency from per-key version
//! chains, this variant goes the other way: no versions, and point
//! operations contend only on the lock segment their key hashes to (plus
//! the short level and count mutexes). Deletes are physical, and unlinked
//! nodes are recycled through a bounded [`pool`](crate::pool).

use std::fmt;
use std::hash::Hash;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::VellumError;
use crate::persistence;
use crate::pool::{NodePool, PoolStats};
use crate::segment::SegmentLockTable;
use crate::DEFAULT_MAX_LEVEL;

/// A node holding one `(key, value)` pair and its forward tower.
///
/// The head sentinel's slot is `None` and never read; traversal only
/// follows its forward pointers. Both fields sit behind locks so a pooled
/// node can be re-armed in place and so traversals stay safe alongside
/// writers in other segments.
pub(crate) struct ShardedNode<K, V> {
    pub(crate) slot: RwLock<Option<(K, V)>>,
    pub(crate) forward: RwLock<Vec<Option<Arc<ShardedNode<K, V>>>>>,
}

impl<K, V> ShardedNode<K, V> {
    pub(crate) fn new(key: K, value: V, level: usize) -> Arc<Self> {
        Arc::new(ShardedNode {
            slot: RwLock::new(Some((key, value))),
            forward: RwLock::new(vec![None; level + 1]),
        })
    }

    fn head(max_level: usize) -> Arc<Self> {
        Arc::new(ShardedNode {
            slot: RwLock::new(None),
            forward: RwLock::new(vec![None; max_level + 1]),
        })
    }
}

impl<K: Ord, V> ShardedNode<K, V> {
    fn key_less_than(&self, other: &K) -> bool {
        matches!(&*self.slot.read(), Some((k, _)) if k < other)
    }

    fn key_equals(&self, other: &K) -> bool {
        matches!(&*self.slot.read(), Some((k, _)) if k == other)
    }
}

/// An ordered map with hash-partitioned locking and pooled nodes.
pub struct ShardedSkipList<K, V> {
    head: Arc<ShardedNode<K, V>>,
    max_level: usize,
    /// Current top level; held across writes, snapshotted by reads.
    level: Mutex<usize>,
    element_count: Mutex<usize>,
    locks: SegmentLockTable,
    pool: NodePool<K, V>,
    /// Guards whole-list walks that bypass the segment locks.
    display_lock: Mutex<()>,
    store_path: PathBuf,
}

impl<K, V> ShardedSkipList<K, V>
where
    K: Ord + Hash + Clone + fmt::Display,
    V: Clone + fmt::Display,
{
    /// Creates an empty list with towers capped at `max_level` and the
    /// default segment count.
    pub fn with_max_level(max_level: usize) -> Self {
        Self::new(max_level, SegmentLockTable::DEFAULT_SEGMENT_COUNT)
    }

    /// Creates an empty list with towers capped at `max_level` and keys
    /// spread over `segment_count` lock segments.
    pub fn new(max_level: usize, segment_count: usize) -> Self {
        assert!(max_level >= 1, "max_level must be positive");
        ShardedSkipList {
            head: ShardedNode::head(max_level),
            max_level,
            level: Mutex::new(0),
            element_count: Mutex::new(0),
            locks: SegmentLockTable::new(segment_count),
            pool: NodePool::new(NodePool::<K, V>::DEFAULT_CAPACITY),
            display_lock: Mutex::new(()),
            store_path: PathBuf::from(persistence::SHARDED_STORE_PATH),
        }
    }

    /// Overrides the snapshot file location (defaults to
    /// [`persistence::SHARDED_STORE_PATH`]).
    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = path.into();
        self
    }

    fn random_level(&self) -> usize {
        let mut level = 1;
        while fastrand::bool() && level < self.max_level {
            level += 1;
        }
        level
    }

    /// Inserts `(key, value)`. Returns `false` without modifying anything
    /// when the key already exists — a status, not an error.
    pub fn insert_element(&self, key: K, value: V) -> bool {
        let segment = self.locks.index_for(&key);
        let _segment_guard = self.locks.write(segment);
        // The level lock is held for the whole splice so the traversal and
        // the top-level bookkeeping agree with concurrent writers.
        let mut level_guard = self.level.lock();

        let mut update: Vec<Arc<ShardedNode<K, V>>> =
            vec![self.head.clone(); self.max_level + 1];
        let mut current = self.head.clone();
        for lvl in (0..=*level_guard).rev() {
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
                println!("key: {}, exists", key);
                return false;
            }
        }

        let node_level = self.random_level();
        if node_level > *level_guard {
            *level_guard = node_level;
        }

        println!("Successfully inserted key:{}, value:{}", key, value);
        let node = self.pool.allocate(key, value, node_level);
        {
            let mut new_forward = node.forward.write();
            for lvl in 0..=node_level {
                let mut pred_forward = update[lvl].forward.write();
                new_forward[lvl] = pred_forward[lvl].take();
                pred_forward[lvl] = Some(node.clone());
            }
        }
        *self.element_count.lock() += 1;
        true
    }

    /// Looks up `key`, printing the outcome.
    pub fn search_element(&self, key: &K) -> Option<V> {
        let result = self.lookup(key);
        match &result {
            Some(value) => println!("Found key: {}, value: {}", key, value),
            None => println!("Not Found Key:{}", key),
        }
        result
    }

    /// Looks up `key` without any console output.
    pub fn search_element_silent(&self, key: &K) -> Option<V> {
        self.lookup(key)
    }

    fn lookup(&self, key: &K) -> Option<V> {
        let segment = self.locks.index_for(key);
        let _segment_guard = self.locks.read(segment);
        // Snapshot the top level; the lock is not held for the walk.
        let top = *self.level.lock();

        let mut current = self.head.clone();
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
        candidate.and_then(|node| {
            let slot = node.slot.read();
            match &*slot {
                Some((k, v)) if k == key => Some(v.clone()),
                _ => None,
            }
        })
    }

    /// Physically removes `key`, unlinking its node from every level it
    /// participates in and returning the node to the pool.
    ///
    /// Returns `false` when the key is missing.
    pub fn delete_element(&self, key: &K) -> bool {
        let segment = self.locks.index_for(key);
        let _segment_guard = self.locks.write(segment);
        let mut level_guard = self.level.lock();

        let mut update: Vec<Arc<ShardedNode<K, V>>> =
            vec![self.head.clone(); self.max_level + 1];
        let mut current = self.head.clone();
        for lvl in (0..=*level_guard).rev() {
            loop {
                let next = current.forward.read()[lvl].clone();
                match next {
                    Some(n) if n.key_less_than(key) => current = n,
                    _ => break,
                }
            }
            update[lvl] = current.clone();
        }

        let found = update[0].forward.read()[0].clone();
        let Some(node) = found else {
            return false;
        };
        if !node.key_equals(key) {
            return false;
        }

        for lvl in 0..=*level_guard {
            let mut pred_forward = update[lvl].forward.write();
            let points_at_node =
                matches!(&pred_forward[lvl], Some(next) if Arc::ptr_eq(next, &node));
            if !points_at_node {
                break;
            }
            pred_forward[lvl] = node.forward.read()[lvl].clone();
        }

        // Pop levels the delete emptied.
        while *level_guard > 0 && self.head.forward.read()[*level_guard].is_none() {
            *level_guard -= 1;
        }

        println!("Successfully deleted key {}", key);
        self.pool.deallocate(node);
        *self.element_count.lock() -= 1;
        true
    }

    /// Prints every level's `key:value` sequence to stdout.
    pub fn display_list(&self) {
        let _guard = self.display_lock.lock();
        let top = *self.level.lock();

        println!("\n*****Skip List (Sharded)*****");
        for lvl in 0..=top {
            print!("Level {}: ", lvl);
            let mut cursor = self.head.forward.read()[lvl].clone();
            while let Some(node) = cursor {
                if let Some((k, v)) = &*node.slot.read() {
                    print!("{}:{};", k, v);
                }
                cursor = node.forward.read()[lvl].clone();
            }
            println!();
        }
    }

    /// Writes every `key:value` pair to the snapshot file, holding all
    /// segment locks so the walk sees a settled list.
    pub fn dump_file(&self) -> Result<(), VellumError> {
        let _all_segments = self.locks.write_all();

        let mut records = Vec::new();
        let mut cursor = self.head.forward.read()[0].clone();
        while let Some(node) = cursor {
            if let Some((k, v)) = &*node.slot.read() {
                records.push((k.clone(), v.clone()));
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

    /// Number of elements, as maintained under the count mutex.
    pub fn size(&self) -> usize {
        *self.element_count.lock()
    }

    /// Free-list counters for the node pool.
    pub fn memory_pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Releases every node cached on the pool's free list.
    pub fn clear_memory_pool(&self) {
        self.pool.clear();
    }

    /// Prints [`PoolStats`] in a human-readable block.
    pub fn print_memory_pool_stats(&self) {
        let stats = self.memory_pool_stats();
        println!("\n===== Memory Pool Statistics =====");
        println!("Total allocations: {}", stats.allocated);
        println!("Reused allocations: {}", stats.reused);
        println!("Free list size: {}", stats.free_size);
        if stats.allocated > 0 {
            println!("Memory reuse rate: {}%", stats.reuse_rate());
        }
        println!("==================================\n");
    }
}

impl<K, V> ShardedSkipList<K, V>
where
    K: Ord + Hash + Clone + fmt::Display + FromStr,
    V: Clone + fmt::Display + FromStr,
{
    /// Loads the snapshot file written by [`ShardedSkipList::dump_file`].
    /// Malformed lines are skipped; duplicate keys keep the first value.
    pub fn load_file(&self) -> Result<(), VellumError> {
        let records: Vec<(K, V)> = persistence::read_records(&self.store_path)?;
        for (key, value) in records {
            self.insert_element(key, value);
        }
        Ok(())
    }
}

impl<K, V> Default for ShardedSkipList<K, V>
where
    K: Ord + Hash + Clone + fmt::Display,
    V: Clone + fmt::Display,
{
    fn default() -> Self {
        Self::with_max_level(DEFAULT_MAX_LEVEL)
    }
}
