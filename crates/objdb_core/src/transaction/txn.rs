//! Transaction handle and buffered writes.

use crate::error::{CoreError, CoreResult};
use crate::table::Body;
use crate::transaction::{TransactionManager, WriteGuard};
use crate::types::{CollectionIndex, InstanceId, SequenceNumber, TransactionId};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting operations.
    Active,
    /// Committed; no further operations.
    Committed,
    /// Aborted explicitly or by a failed operation.
    Aborted,
}

/// Buffered changes to one collection.
#[derive(Debug, Default)]
pub(crate) struct PendingCollection {
    /// Every committed object is deleted before `writes` apply.
    pub cleared: bool,
    /// New bodies by id; `None` deletes.
    pub writes: BTreeMap<i64, Option<Body>>,
    /// Unique keys held by pending bodies, one map per unique index.
    pub claims: HashMap<usize, HashMap<Vec<u8>, i64>>,
}

impl PendingCollection {
    /// Drops the unique claims held by `id`.
    pub fn release_claims(&mut self, id: i64) {
        for keys in self.claims.values_mut() {
            keys.retain(|_, owner| *owner != id);
        }
    }
}

/// State only write transactions carry.
#[derive(Debug)]
pub(crate) struct WriteState {
    _guard: WriteGuard,
    pub pending: BTreeMap<CollectionIndex, PendingCollection>,
}

impl WriteState {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// A transaction bound to one instance.
///
/// Read transactions see the state committed when they began. A write
/// transaction additionally sees its own uncommitted changes and holds the
/// instance's writer slot until it ends. Dropping an active transaction
/// aborts it.
#[derive(Debug)]
pub struct Txn {
    id: TransactionId,
    instance_id: InstanceId,
    snapshot: SequenceNumber,
    snapshot_held: bool,
    state: TxnState,
    write_mode: bool,
    write: Option<WriteState>,
    manager: Arc<TransactionManager>,
}

impl Txn {
    /// Starts a transaction. Blocks while another writer is active if
    /// `write` is set.
    pub(crate) fn begin(
        manager: &Arc<TransactionManager>,
        instance_id: InstanceId,
        write: bool,
    ) -> Self {
        let write = write.then(|| WriteState {
            _guard: manager.acquire_writer(),
            pending: BTreeMap::new(),
        });
        let snapshot = manager.acquire_snapshot();
        let id = manager.next_txid();
        debug!(txn = %id, snapshot = %snapshot, write = write.is_some(), "transaction started");
        Self {
            id,
            instance_id,
            snapshot,
            snapshot_held: true,
            state: TxnState::Active,
            write_mode: write.is_some(),
            write,
            manager: Arc::clone(manager),
        }
    }

    /// Transaction id.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Instance this transaction belongs to.
    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Commit sequence number this transaction reads at.
    #[must_use]
    pub fn snapshot(&self) -> SequenceNumber {
        self.snapshot
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TxnState {
        self.state
    }

    /// Whether the transaction may still be used.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == TxnState::Active
    }

    /// Whether this is a write transaction.
    #[must_use]
    pub fn is_write(&self) -> bool {
        self.write_mode
    }

    pub(crate) fn check_instance(&self, instance_id: InstanceId) -> CoreResult<()> {
        if self.instance_id == instance_id {
            Ok(())
        } else {
            Err(CoreError::InstanceMismatch {
                expected: instance_id,
                actual: self.instance_id,
            })
        }
    }

    pub(crate) fn check_active(&self) -> CoreResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(CoreError::TransactionClosed)
        }
    }

    /// Buffered writes of an active write transaction.
    pub(crate) fn write_state(&mut self) -> CoreResult<&mut WriteState> {
        self.check_active()?;
        self.write.as_mut().ok_or(CoreError::WriteTxnRequired)
    }

    /// Buffered writes to `collection`, if any.
    pub(crate) fn pending(&self, collection: CollectionIndex) -> Option<&PendingCollection> {
        self.write.as_ref()?.pending.get(&collection)
    }

    /// Buffered writes to `collection`, created on first use.
    pub(crate) fn pending_mut(
        &mut self,
        collection: CollectionIndex,
    ) -> CoreResult<&mut PendingCollection> {
        Ok(self.write_state()?.pending.entry(collection).or_default())
    }

    /// Passes `result` through, aborting the transaction if the error ends
    /// it.
    pub(crate) fn settle<T>(&mut self, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(err) = &result {
            if err.aborts_transaction() && self.is_active() {
                debug!(txn = %self.id, error = %err, "transaction aborted by failed write");
                self.end(TxnState::Aborted);
            }
        }
        result
    }

    pub(crate) fn release_snapshot(&mut self) {
        if std::mem::take(&mut self.snapshot_held) {
            self.manager.release_snapshot(self.snapshot);
        }
    }

    /// Ends the transaction, returning the buffered writes. Dropping them
    /// releases the writer slot.
    pub(crate) fn end(&mut self, state: TxnState) -> Option<WriteState> {
        self.state = state;
        self.release_snapshot();
        self.write.take()
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        self.release_snapshot();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<TransactionManager> {
        Arc::new(TransactionManager::new(SequenceNumber(0)))
    }

    #[test]
    fn read_txn_rejects_writes() {
        let manager = manager();
        let mut txn = Txn::begin(&manager, 1, false);
        assert!(matches!(txn.write_state(), Err(CoreError::WriteTxnRequired)));
        assert!(txn.is_active());
    }

    #[test]
    fn aborting_errors_end_the_txn() {
        let manager = manager();
        let mut txn = Txn::begin(&manager, 1, true);
        let result: CoreResult<()> = txn.settle(Err(CoreError::ObjectLimitReached {
            size: 10,
            limit: 1,
        }));
        assert!(result.is_err());
        assert_eq!(txn.state(), TxnState::Aborted);
        assert!(!manager.writer_active());
        assert!(matches!(txn.write_state(), Err(CoreError::TransactionClosed)));

        let mut other = Txn::begin(&manager, 1, true);
        let _ = other.settle::<()>(Err(CoreError::WriteTxnRequired));
        assert!(other.is_active());
    }

    #[test]
    fn drop_releases_snapshot_and_writer() {
        let manager = manager();
        {
            let _txn = Txn::begin(&manager, 1, true);
            assert_eq!(manager.active_snapshots(), 1);
        }
        assert_eq!(manager.active_snapshots(), 0);
        assert!(!manager.writer_active());
    }

    #[test]
    fn instance_is_checked() {
        let manager = manager();
        let txn = Txn::begin(&manager, 1, false);
        assert!(txn.check_instance(1).is_ok());
        assert!(matches!(
            txn.check_instance(2),
            Err(CoreError::InstanceMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }
}
