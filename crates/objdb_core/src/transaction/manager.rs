//! Writer gate and snapshot bookkeeping.

use crate::types::{SequenceNumber, TransactionId};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hands out transaction ids and snapshots and serializes writers.
///
/// Snapshot registration and publication of a new commit happen under the
/// same lock, so the oldest snapshot returned by [`Self::publish`] is a
/// lower bound for every snapshot taken afterwards.
#[derive(Debug)]
pub struct TransactionManager {
    next_txid: AtomicU64,
    committed: AtomicU64,
    writer_active: Mutex<bool>,
    writer_done: Condvar,
    /// Live snapshots and how many transactions hold each.
    snapshots: Mutex<BTreeMap<u64, usize>>,
}

impl TransactionManager {
    /// Creates a manager whose latest commit is `committed`.
    #[must_use]
    pub fn new(committed: SequenceNumber) -> Self {
        Self {
            next_txid: AtomicU64::new(1),
            committed: AtomicU64::new(committed.as_u64()),
            writer_active: Mutex::new(false),
            writer_done: Condvar::new(),
            snapshots: Mutex::new(BTreeMap::new()),
        }
    }

    /// Sequence number of the latest commit.
    #[must_use]
    pub fn committed(&self) -> SequenceNumber {
        SequenceNumber(self.committed.load(Ordering::Acquire))
    }

    pub(crate) fn next_txid(&self) -> TransactionId {
        TransactionId(self.next_txid.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a snapshot at the latest commit.
    pub(crate) fn acquire_snapshot(&self) -> SequenceNumber {
        let mut snapshots = self.snapshots.lock();
        let seq = self.committed.load(Ordering::Acquire);
        *snapshots.entry(seq).or_insert(0) += 1;
        SequenceNumber(seq)
    }

    pub(crate) fn release_snapshot(&self, seq: SequenceNumber) {
        let mut snapshots = self.snapshots.lock();
        if let Some(count) = snapshots.get_mut(&seq.as_u64()) {
            *count -= 1;
            if *count == 0 {
                snapshots.remove(&seq.as_u64());
            }
        }
    }

    /// Number of registered snapshots.
    #[must_use]
    pub fn active_snapshots(&self) -> usize {
        self.snapshots.lock().values().sum()
    }

    /// Makes `seq` the latest commit and returns the oldest sequence number
    /// any transaction can still read at.
    pub(crate) fn publish(&self, seq: SequenceNumber) -> SequenceNumber {
        let snapshots = self.snapshots.lock();
        self.committed.store(seq.as_u64(), Ordering::Release);
        let oldest = snapshots
            .keys()
            .next()
            .copied()
            .unwrap_or(seq.as_u64())
            .min(seq.as_u64());
        SequenceNumber(oldest)
    }

    /// Blocks until no other writer is active and claims the writer slot.
    pub(crate) fn acquire_writer(self: &Arc<Self>) -> WriteGuard {
        let mut active = self.writer_active.lock();
        while *active {
            self.writer_done.wait(&mut active);
        }
        *active = true;
        WriteGuard {
            manager: Arc::clone(self),
        }
    }

    /// Whether a write transaction is running.
    #[must_use]
    pub fn writer_active(&self) -> bool {
        *self.writer_active.lock()
    }
}

/// The writer slot; released on drop.
#[derive(Debug)]
pub(crate) struct WriteGuard {
    manager: Arc<TransactionManager>,
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        *self.manager.writer_active.lock() = false;
        self.manager.writer_done.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn oldest_snapshot_bounds_pruning() {
        let manager = TransactionManager::new(SequenceNumber(4));
        let held = manager.acquire_snapshot();
        assert_eq!(held, SequenceNumber(4));
        assert_eq!(manager.publish(SequenceNumber(5)), SequenceNumber(4));

        manager.release_snapshot(held);
        assert_eq!(manager.active_snapshots(), 0);
        assert_eq!(manager.publish(SequenceNumber(6)), SequenceNumber(6));
        assert_eq!(manager.committed(), SequenceNumber(6));
    }

    #[test]
    fn second_writer_waits() {
        let manager = Arc::new(TransactionManager::new(SequenceNumber(0)));
        let first = manager.acquire_writer();
        assert!(manager.writer_active());

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&manager);
        let handle = thread::spawn(move || {
            let _second = other.acquire_writer();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(first);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
        assert!(!manager.writer_active());
    }

    #[test]
    fn txids_increase() {
        let manager = TransactionManager::new(SequenceNumber(0));
        assert!(manager.next_txid() < manager.next_txid());
    }
}
