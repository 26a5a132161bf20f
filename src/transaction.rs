//! Transaction lifecycle management for the MVCC skip list.
//!
//! The [`TransactionManager`] is the single authority for transaction ids
//! and the active set. Ids are allocated by a sequentially consistent
//! fetch-and-add, so they never repeat and never decrease under any
//! interleaving. The active set doubles as the source of the GC watermark:
//! versions tombstoned below the smallest active id are unreachable and
//! collectable.
//!
//! A [`Transaction`] is a descriptor, not a workspace: writes go straight
//! into the version chains (uncommitted, hence invisible to everyone else),
//! and the descriptor remembers which nodes it touched so commit can flip
//! their `committed` flags in one pass.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_utils::CachePadded;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::VellumError;
use crate::Node;

/// A unique identifier for a transaction.
pub type TxId = u64;

/// The lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// The transaction is currently in progress.
    Active,
    /// The transaction has successfully committed.
    Committed,
    /// The transaction has been aborted; its versions stay in place but are
    /// never visible to anyone and are eventually reclaimed by GC.
    Aborted,
}

/// A single unit of transactional work against an
/// [`MvccSkipList`](crate::MvccSkipList).
///
/// Obtained from [`TransactionManager::begin`] (or the list's
/// `begin_transaction`) and finished with `commit` or `abort`. Operations
/// handed a descriptor that is no longer [`TransactionStatus::Active`]
/// reject with [`VellumError::TransactionNotActive`] without mutating
/// anything.
pub struct Transaction<K, V> {
    /// The unique id of this transaction, also used as the timestamp stamped
    /// onto every version it writes.
    pub id: TxId,
    state: Mutex<TransactionStatus>,
    started_at: Instant,
    /// Nodes whose chains this transaction wrote to; commit walks these.
    modified: Mutex<Vec<Arc<Node<K, V>>>>,
}

impl<K, V> Transaction<K, V> {
    fn new(id: TxId) -> Self {
        Transaction {
            id,
            state: Mutex::new(TransactionStatus::Active),
            started_at: Instant::now(),
            modified: Mutex::new(Vec::new()),
        }
    }

    /// The current lifecycle state.
    pub fn status(&self) -> TransactionStatus {
        *self.state.lock()
    }

    /// `true` while the transaction has neither committed nor aborted.
    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    /// When the transaction began. Diagnostic only.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Records a node whose chain received a version from this transaction.
    /// Called only after the version is linked, so a failed operation never
    /// leaves a dangling entry behind.
    pub(crate) fn record_write(&self, node: Arc<Node<K, V>>) {
        self.modified.lock().push(node);
    }
}

/// Allocates transaction ids, tracks the active set, and drives the
/// commit/abort protocol.
pub struct TransactionManager<K, V> {
    /// The next transaction id to be allocated. Ids start at 1.
    next_txn_id: CachePadded<AtomicU64>,
    /// Currently active transactions, keyed by id.
    active: DashMap<TxId, Arc<Transaction<K, V>>>,
    total_commits: CachePadded<AtomicU64>,
    total_aborts: CachePadded<AtomicU64>,
}

impl<K, V> TransactionManager<K, V> {
    pub fn new() -> Self {
        TransactionManager {
            next_txn_id: CachePadded::new(AtomicU64::new(1)),
            active: DashMap::new(),
            total_commits: CachePadded::new(AtomicU64::new(0)),
            total_aborts: CachePadded::new(AtomicU64::new(0)),
        }
    }

    /// Begins a new transaction: allocates the next id and registers the
    /// descriptor in the active set.
    pub fn begin(&self) -> Arc<Transaction<K, V>> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let txn = Arc::new(Transaction::new(id));
        self.active.insert(id, txn.clone());
        txn
    }

    /// Commits a transaction: flips the `committed` flag on every version it
    /// authored, then retires the descriptor.
    ///
    /// The flips happen while the descriptor's state lock is held, so the
    /// transition is a single observable step: a concurrent reader of any
    /// touched chain either sees the flag unset (and skips the version) or
    /// set (and may use it). Fails with
    /// [`VellumError::TransactionNotActive`] if the transaction already
    /// finished.
    pub fn commit(&self, txn: &Arc<Transaction<K, V>>) -> Result<(), VellumError> {
        let mut state = txn.state.lock();
        if *state != TransactionStatus::Active {
            return Err(VellumError::TransactionNotActive);
        }
        for node in txn.modified.lock().iter() {
            node.chain.commit(txn.id);
        }
        *state = TransactionStatus::Committed;
        self.active.remove(&txn.id);
        self.total_commits.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Aborts a transaction, retiring the descriptor. The versions it wrote
    /// stay in the chains with `committed` unset — no future transaction
    /// shares their timestamp, so they are invisible forever and GC removes
    /// them once the watermark passes.
    ///
    /// Returns `false` (and does nothing) if the transaction already
    /// finished.
    pub fn abort(&self, txn: &Arc<Transaction<K, V>>) -> bool {
        let mut state = txn.state.lock();
        if *state != TransactionStatus::Active {
            return false;
        }
        *state = TransactionStatus::Aborted;
        self.active.remove(&txn.id);
        self.total_aborts.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// The GC watermark: the smallest active transaction id, or the next id
    /// to be allocated when no transaction is active.
    pub fn min_active_id(&self) -> TxId {
        self.active
            .iter()
            .map(|entry| *entry.key())
            .min()
            .unwrap_or_else(|| self.next_txn_id.load(Ordering::SeqCst))
    }

    /// The next transaction id that `begin` would hand out.
    pub fn next_id(&self) -> TxId {
        self.next_txn_id.load(Ordering::SeqCst)
    }

    /// Number of currently active transactions.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Total transactions committed so far.
    pub fn total_commits(&self) -> u64 {
        self.total_commits.load(Ordering::Relaxed)
    }

    /// Total transactions aborted so far.
    pub fn total_aborts(&self) -> u64 {
        self.total_aborts.load(Ordering::Relaxed)
    }
}

impl<K, V> Default for TransactionManager<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
