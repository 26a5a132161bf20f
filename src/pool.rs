//! A bounded free-list allocator for sharded skip-list nodes.
//!
//! Nodes are short-lived under write-heavy workloads; recycling them avoids
//! allocator pressure and amortizes the forward-tower allocation. A
//! recycled node keeps its tower vector — it is reallocated only when the
//! requested level differs from the old one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::sharded::ShardedNode;

/// Counters reported by [`NodePool::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Nodes constructed fresh because the free list was empty.
    pub allocated: u64,
    /// Nodes handed out from the free list.
    pub reused: u64,
    /// Nodes currently waiting on the free list.
    pub free_size: usize,
}

impl PoolStats {
    /// Share of allocations served from the free list, as a percentage.
    pub fn reuse_rate(&self) -> f64 {
        let total = self.allocated + self.reused;
        if total == 0 {
            0.0
        } else {
            self.reused as f64 / total as f64 * 100.0
        }
    }
}

/// A bounded, mutex-protected free list of recyclable nodes.
pub(crate) struct NodePool<K, V> {
    free: Mutex<Vec<Arc<ShardedNode<K, V>>>>,
    /// Nodes returned beyond this bound are dropped instead of retained.
    max_free: usize,
    allocated: AtomicU64,
    reused: AtomicU64,
}

impl<K, V> NodePool<K, V> {
    pub(crate) const DEFAULT_CAPACITY: usize = 100;

    pub(crate) fn new(capacity: usize) -> Self {
        NodePool {
            free: Mutex::new(Vec::with_capacity(capacity)),
            max_free: capacity,
            allocated: AtomicU64::new(0),
            reused: AtomicU64::new(0),
        }
    }

    /// Hands out a node carrying `(key, value)` with a tower of
    /// `level + 1` slots, recycling from the free list when possible.
    pub(crate) fn allocate(&self, key: K, value: V, level: usize) -> Arc<ShardedNode<K, V>> {
        let recycled = self.free.lock().pop();
        match recycled {
            Some(node) => {
                {
                    let mut forward = node.forward.write();
                    if forward.len() != level + 1 {
                        *forward = vec![None; level + 1];
                    } else {
                        for slot in forward.iter_mut() {
                            *slot = None;
                        }
                    }
                }
                *node.slot.write() = Some((key, value));
                self.reused.fetch_add(1, Ordering::Relaxed);
                node
            }
            None => {
                self.allocated.fetch_add(1, Ordering::Relaxed);
                ShardedNode::new(key, value, level)
            }
        }
    }

    /// Returns an unlinked node to the free list, tower preserved for
    /// reuse. Beyond the capacity bound the node is simply dropped.
    pub(crate) fn deallocate(&self, node: Arc<ShardedNode<K, V>>) {
        node.slot.write().take();
        let mut free = self.free.lock();
        if free.len() < self.max_free {
            free.push(node);
        }
    }

    /// Drops every cached node.
    pub(crate) fn clear(&self) {
        self.free.lock().clear();
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.allocated.load(Ordering::Relaxed),
            reused: self.reused.load(Ordering::Relaxed),
            free_size: self.free.lock().len(),
        }
    }
}
