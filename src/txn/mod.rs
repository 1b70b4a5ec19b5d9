//! Transaction manager.
//!
//! A [`DatabaseTransaction`] batches document mutations against one store.
//! Callers enqueue documents for saving or for permanent deletion; nothing
//! touches the store until [`DatabaseTransaction::commit`] drains the update
//! queue and then the remove queue, each strictly in enqueue order.
//! [`DatabaseTransaction::rollback`] drains the same queues but reverts every
//! document instead.
//!
//! # Locking
//!
//! When document locking is enabled, enqueueing locks the document.
//! A refused lock is logged and counted but never blocks the enqueue.
//! Every lock taken this way is released exactly once while its document
//! is processed, whether the save succeeds, fails or raises.
//!
//! # Concurrency
//!
//! Enqueue and drain share `&self`. Each queue sits behind its own mutex;
//! a poll takes the lock only long enough to pop one entry, so producers
//! may keep enqueueing while a single committer drains. An enqueue either
//! lands before the drain closes the transaction, and is processed by that
//! drain, or fails with [`GraphError::TransactionClosed`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::CommitPolicy;
use crate::error::{GraphError, Result};
use crate::metrics::GraphMetrics;
use crate::store::{DocumentRef, DocumentStore};
use crate::types::Unid;

mod report;

pub use report::{CommitReport, ElementOutcome, OutcomeStatus, QueueOp};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Accepting enqueues.
    Open,
    /// A commit or rollback is draining the queues.
    Draining,
    /// Commit finished.
    Committed,
    /// Rollback finished.
    RolledBack,
}

#[derive(Default)]
struct PendingQueue {
    order: VecDeque<DocumentRef>,
    members: HashSet<Unid>,
}

impl PendingQueue {
    fn push(&mut self, doc: DocumentRef) -> bool {
        if !self.members.insert(doc.unid()) {
            return false;
        }
        self.order.push_back(doc);
        true
    }

    fn poll(&mut self) -> Option<DocumentRef> {
        let doc = self.order.pop_front()?;
        self.members.remove(&doc.unid());
        Some(doc)
    }
}

/// Pending mutations against one document store.
pub struct DatabaseTransaction {
    id: u64,
    store: Arc<dyn DocumentStore>,
    policy: CommitPolicy,
    locking: bool,
    metrics: Arc<dyn GraphMetrics>,
    state: Mutex<TxState>,
    updates: Mutex<PendingQueue>,
    removes: Mutex<PendingQueue>,
    locks: Mutex<HashMap<Unid, DocumentRef>>,
}

impl DatabaseTransaction {
    /// Opens an empty transaction over `store`. Only documents of that
    /// store may be enqueued.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        policy: CommitPolicy,
        locking: bool,
        metrics: Arc<dyn GraphMetrics>,
    ) -> Self {
        let id = NEXT_TXN_ID.fetch_add(1, Ordering::Relaxed);
        debug!(txn = id, store = %store.store_id(), ?policy, locking, "txn.open");
        Self {
            id,
            store,
            policy,
            locking,
            metrics,
            state: Mutex::new(TxState::Open),
            updates: Mutex::new(PendingQueue::default()),
            removes: Mutex::new(PendingQueue::default()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Process-unique transaction number.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The owning store.
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxState {
        *self.state.lock()
    }

    /// True until commit or rollback has finished.
    pub fn is_open(&self) -> bool {
        matches!(self.state(), TxState::Open | TxState::Draining)
    }

    /// Failure policy applied by [`commit`](Self::commit).
    pub fn policy(&self) -> CommitPolicy {
        self.policy
    }

    /// Whether enqueueing locks documents.
    pub fn locking_enabled(&self) -> bool {
        self.locking
    }

    /// Number of documents waiting to be saved.
    pub fn pending_updates(&self) -> usize {
        self.updates.lock().order.len()
    }

    /// Number of documents waiting to be deleted.
    pub fn pending_removes(&self) -> usize {
        self.removes.lock().order.len()
    }

    /// Number of locks currently held on behalf of this transaction.
    pub fn held_locks(&self) -> usize {
        self.locks.lock().len()
    }

    /// Queues `doc` to be saved at commit. A document already waiting in
    /// the update queue keeps its first position.
    pub fn queue_update(&self, doc: DocumentRef) -> Result<()> {
        self.enqueue(doc, QueueOp::Update)
    }

    /// Queues `doc` to be deleted permanently at commit.
    pub fn queue_remove(&self, doc: DocumentRef) -> Result<()> {
        self.enqueue(doc, QueueOp::Remove)
    }

    // The state lock is held until the entry is queued so a drain cannot
    // close the transaction in between.
    fn enqueue(&self, doc: DocumentRef, op: QueueOp) -> Result<()> {
        let state = self.state.lock();
        if matches!(*state, TxState::Committed | TxState::RolledBack) {
            return Err(GraphError::TransactionClosed);
        }
        let unid = doc.unid();
        if doc.store_id() != self.store.store_id() {
            warn!(txn = self.id, %unid, store = %doc.store_id(), "txn.queue.foreign");
            return Err(GraphError::InvalidArgument(format!(
                "{unid} belongs to {}, not {}",
                doc.store_id(),
                self.store.store_id()
            )));
        }
        self.acquire_lock(&doc);
        let queued = match op {
            QueueOp::Update => self.updates.lock().push(doc),
            QueueOp::Remove => self.removes.lock().push(doc),
        };
        drop(state);
        if queued {
            match op {
                QueueOp::Update => self.metrics.update_queued(),
                QueueOp::Remove => self.metrics.remove_queued(),
            }
            debug!(txn = self.id, %unid, ?op, "txn.queue");
        }
        Ok(())
    }

    /// Drains both queues, saving every queued update and then deleting
    /// every queued removal. Failed saves are reported per element; under
    /// [`CommitPolicy::AbortOnFailure`] the first failure turns everything
    /// still queued into a revert.
    pub fn commit(&self) -> Result<CommitReport> {
        self.begin_drain()?;
        let mut report = CommitReport::default();

        loop {
            self.drain_updates(&mut report);
            self.drain_removes(&mut report);
            if self.close(TxState::Committed) {
                break;
            }
        }

        self.release_stragglers();
        info!(
            txn = self.id,
            elements = report.outcomes.len(),
            failed = report.failures().count(),
            aborted = report.aborted,
            "txn.commit"
        );
        Ok(report)
    }

    /// Drains both queues, reverting every queued document to its last
    /// persisted state and releasing its lock.
    pub fn rollback(&self) -> Result<CommitReport> {
        self.begin_drain()?;
        let mut report = CommitReport::default();
        loop {
            while let Some(doc) = self.poll(QueueOp::Update) {
                self.revert(doc, QueueOp::Update, &mut report);
            }
            while let Some(doc) = self.poll(QueueOp::Remove) {
                self.revert(doc, QueueOp::Remove, &mut report);
            }
            if self.close(TxState::RolledBack) {
                break;
            }
        }
        self.release_stragglers();
        info!(txn = self.id, elements = report.outcomes.len(), "txn.rollback");
        Ok(report)
    }

    fn drain_updates(&self, report: &mut CommitReport) {
        while let Some(doc) = self.poll(QueueOp::Update) {
            if report.aborted {
                self.revert(doc, QueueOp::Update, report);
                continue;
            }
            let _release = LockRelease::new(self, &doc);
            let unid = doc.unid();
            let status = match doc.save() {
                Ok(true) => {
                    self.metrics.save_succeeded();
                    OutcomeStatus::Saved
                }
                Ok(false) => {
                    self.metrics.save_failed();
                    warn!(txn = self.id, %unid, "txn.save.failed");
                    OutcomeStatus::SaveFailed("store reported an unsuccessful save".into())
                }
                Err(err) => {
                    self.metrics.save_failed();
                    warn!(txn = self.id, %unid, error = %err, "txn.save.failed");
                    OutcomeStatus::SaveFailed(err.to_string())
                }
            };
            if status.is_failure() && self.policy == CommitPolicy::AbortOnFailure {
                report.aborted = true;
                warn!(txn = self.id, %unid, "txn.commit.abort");
            }
            report.push(unid, QueueOp::Update, status);
        }
    }

    fn drain_removes(&self, report: &mut CommitReport) {
        while let Some(doc) = self.poll(QueueOp::Remove) {
            if report.aborted {
                self.revert(doc, QueueOp::Remove, report);
                continue;
            }
            let _release = LockRelease::new(self, &doc);
            let unid = doc.unid();
            let status = match doc.remove_permanently(true) {
                Ok(()) => {
                    self.metrics.remove_applied();
                    OutcomeStatus::Removed
                }
                Err(err) => {
                    warn!(txn = self.id, %unid, error = %err, "txn.remove.failed");
                    OutcomeStatus::RemoveFailed(err.to_string())
                }
            };
            report.push(unid, QueueOp::Remove, status);
        }
    }

    /// Moves to `done` if both queues are empty. Returns false when a
    /// producer slipped an entry in after the last poll.
    fn close(&self, done: TxState) -> bool {
        let mut state = self.state.lock();
        if !self.updates.lock().order.is_empty() || !self.removes.lock().order.is_empty() {
            return false;
        }
        *state = done;
        true
    }

    fn begin_drain(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != TxState::Open {
            return Err(GraphError::TransactionClosed);
        }
        *state = TxState::Draining;
        Ok(())
    }

    fn poll(&self, op: QueueOp) -> Option<DocumentRef> {
        match op {
            QueueOp::Update => self.updates.lock().poll(),
            QueueOp::Remove => self.removes.lock().poll(),
        }
    }

    fn revert(&self, doc: DocumentRef, op: QueueOp, report: &mut CommitReport) {
        let _release = LockRelease::new(self, &doc);
        let unid = doc.unid();
        let status = match doc.revert() {
            Ok(()) => {
                self.metrics.element_reverted();
                OutcomeStatus::Reverted
            }
            Err(err) => {
                warn!(txn = self.id, %unid, error = %err, "txn.revert.failed");
                OutcomeStatus::RevertFailed(err.to_string())
            }
        };
        report.push(unid, op, status);
    }

    fn acquire_lock(&self, doc: &DocumentRef) {
        if !self.locking {
            return;
        }
        let unid = doc.unid();
        if self.locks.lock().contains_key(&unid) {
            return;
        }
        match doc.lock() {
            Ok(true) => {
                self.locks.lock().insert(unid, Arc::clone(doc));
            }
            Ok(false) => {
                self.metrics.lock_failed();
                warn!(txn = self.id, %unid, "txn.lock.failed");
            }
            Err(err) => {
                self.metrics.lock_failed();
                warn!(txn = self.id, %unid, error = %err, "txn.lock.failed");
            }
        }
    }

    fn release_lock(&self, unid: &Unid) {
        let Some(doc) = self.locks.lock().remove(unid) else {
            return;
        };
        if let Err(err) = doc.unlock() {
            warn!(txn = self.id, %unid, error = %err, "txn.unlock.failed");
        }
    }

    // A document locked for the update queue and then also queued for
    // removal is released by whichever drain reaches it first; anything
    // left here was locked but never drained.
    fn release_stragglers(&self) {
        let leftovers: Vec<Unid> = self.locks.lock().keys().cloned().collect();
        for unid in leftovers {
            self.release_lock(&unid);
        }
    }
}

impl Drop for DatabaseTransaction {
    fn drop(&mut self) {
        if self.state() != TxState::Open {
            return;
        }
        warn!(txn = self.id, "txn.dropped_open");
        if let Err(err) = self.rollback() {
            warn!(txn = self.id, error = %err, "txn.rollback.failed");
        }
    }
}

impl std::fmt::Debug for DatabaseTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseTransaction")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("policy", &self.policy)
            .field("pending_updates", &self.pending_updates())
            .field("pending_removes", &self.pending_removes())
            .finish()
    }
}

/// Releases the lock held for one document when dropped.
struct LockRelease<'a> {
    txn: &'a DatabaseTransaction,
    unid: Unid,
}

impl<'a> LockRelease<'a> {
    fn new(txn: &'a DatabaseTransaction, doc: &DocumentRef) -> Self {
        Self {
            txn,
            unid: doc.unid(),
        }
    }
}

impl Drop for LockRelease<'_> {
    fn drop(&mut self) {
        self.txn.release_lock(&self.unid);
    }
}
