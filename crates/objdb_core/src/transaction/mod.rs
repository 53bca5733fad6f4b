//! Transactions.
//!
//! - Read transactions see the committed state at their begin and run
//!   concurrently with everything.
//! - One write transaction per instance at a time; a second `begin`
//!   blocks until the first ends. Writes are buffered in the transaction
//!   and become visible atomically at commit.

mod manager;
mod txn;

pub use manager::TransactionManager;
pub(crate) use manager::WriteGuard;
pub use txn::{Txn, TxnState};
pub(crate) use txn::{PendingCollection, WriteState};
