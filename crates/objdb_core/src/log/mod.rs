//! Commit log.
//!
//! Every committed write transaction is appended as one batch:
//!
//! ```text
//! Put | Delete | Clear ... Commit(seq)
//! ```
//!
//! The whole batch goes to the backend in a single `append`, so an
//! encrypted backend seals it as one frame. On open the log is replayed
//! batch by batch.
//!
//! ## Recovery policy
//!
//! - A short or magic-less tail, or a checksum failure in the final record,
//!   is an interrupted append. Everything after the last complete `Commit`
//!   is truncated.
//! - A checksum failure with more data behind it is corruption and fails
//!   the open.
//! - A record from a newer format version fails the open with `Version`.

mod record;

pub(crate) use record::PUT_OVERHEAD;
pub use record::{LogRecord, RecordKind, LOG_MAGIC, LOG_VERSION};

use crate::config::StorageKind;
use crate::error::{CoreError, CoreResult};
use crate::types::SequenceNumber;
use objdb_storage::{
    EncryptedBackend, EncryptionKey, FileBackend, InMemoryBackend, StorageBackend,
};
use record::Decoded;
use std::path::Path;
use tracing::{debug, warn};

/// What a replay found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Committed batches applied.
    pub commits: u64,
    /// Mutation records applied.
    pub records: u64,
    /// Bytes cut off the end of the log.
    pub truncated_bytes: u64,
    /// Sequence number of the last committed batch.
    pub last_sequence: SequenceNumber,
}

/// Append-only log of committed batches over a [`StorageBackend`].
pub struct CommitLog {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
}

impl CommitLog {
    /// Wraps a backend.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend,
            sync_on_commit,
        }
    }

    /// Bytes a batch of `records` plus its commit marker will occupy.
    #[must_use]
    pub fn batch_len(records: &[LogRecord]) -> u64 {
        let commit = LogRecord::Commit {
            sequence: SequenceNumber(0),
        };
        records
            .iter()
            .chain(std::iter::once(&commit))
            .map(|r| r.encoded_len() as u64)
            .sum()
    }

    /// Appends `records` followed by a commit marker for `sequence`.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Fails if the backend rejects the write or the flush.
    pub fn append_batch(
        &mut self,
        records: &[LogRecord],
        sequence: SequenceNumber,
    ) -> CoreResult<u64> {
        let mut buf = Vec::with_capacity(Self::batch_len(records) as usize);
        for record in records {
            record.encode_into(&mut buf);
        }
        LogRecord::Commit { sequence }.encode_into(&mut buf);

        self.backend.append(&buf)?;
        if self.sync_on_commit {
            self.backend.sync()?;
        } else {
            self.backend.flush()?;
        }
        Ok(buf.len() as u64)
    }

    /// Current size in bytes.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot report its size.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Feeds every committed batch to `apply` in log order and truncates
    /// an interrupted tail.
    ///
    /// # Errors
    ///
    /// [`CoreError::Corrupted`] for damage before the tail,
    /// [`CoreError::Version`] for records from a newer format, or whatever
    /// `apply` returns.
    pub fn replay<F>(&mut self, mut apply: F) -> CoreResult<ReplayStats>
    where
        F: FnMut(SequenceNumber, Vec<LogRecord>) -> CoreResult<()>,
    {
        let bytes = self.backend.read_all()?;
        let mut stats = ReplayStats::default();
        let mut pending = Vec::new();
        let mut pos = 0usize;
        let mut committed_end = 0usize;

        while pos < bytes.len() {
            match LogRecord::decode(&bytes[pos..]) {
                Decoded::Record(LogRecord::Commit { sequence }, used) => {
                    pos += used;
                    committed_end = pos;
                    stats.commits += 1;
                    stats.records += pending.len() as u64;
                    stats.last_sequence = sequence;
                    apply(sequence, std::mem::take(&mut pending))?;
                }
                Decoded::Record(record, used) => {
                    pos += used;
                    pending.push(record);
                }
                Decoded::Torn => break,
                Decoded::Damaged(len) if pos + len == bytes.len() => break,
                Decoded::Damaged(_) => {
                    return Err(CoreError::corrupted(format!(
                        "checksum mismatch at log offset {pos}"
                    )));
                }
                Decoded::Invalid(err) => return Err(err),
            }
        }

        if committed_end < bytes.len() {
            stats.truncated_bytes = (bytes.len() - committed_end) as u64;
            warn!(
                offset = committed_end,
                bytes = stats.truncated_bytes,
                "discarding incomplete commit at end of log"
            );
            self.backend.truncate(committed_end as u64)?;
            self.backend.sync()?;
        }
        debug!(
            commits = stats.commits,
            records = stats.records,
            last = %stats.last_sequence,
            "log replayed"
        );
        Ok(stats)
    }

    /// Writes `records` as a single batch into an empty `backend` and
    /// returns the resulting log. Used for compaction and backups.
    ///
    /// # Errors
    ///
    /// Fails if `backend` is not empty or rejects the write.
    pub fn write_snapshot(
        backend: Box<dyn StorageBackend>,
        records: &[LogRecord],
        sequence: SequenceNumber,
        sync_on_commit: bool,
    ) -> CoreResult<Self> {
        if backend.size()? != 0 {
            return Err(CoreError::illegal_argument("snapshot target is not empty"));
        }
        let mut log = Self::new(backend, sync_on_commit);
        log.append_batch(records, sequence)?;
        log.backend.sync()?;
        Ok(log)
    }

    /// Forces appended data to durable storage.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot sync.
    pub fn sync(&mut self) -> CoreResult<()> {
        Ok(self.backend.sync()?)
    }

    /// Swaps in another backend, returning the old one.
    pub fn replace_backend(&mut self, backend: Box<dyn StorageBackend>) -> Box<dyn StorageBackend> {
        std::mem::replace(&mut self.backend, backend)
    }

    /// Detaches the backend.
    #[must_use]
    pub fn into_backend(self) -> Box<dyn StorageBackend> {
        self.backend
    }
}

impl std::fmt::Debug for CommitLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitLog")
            .field("size", &self.backend.size().ok())
            .field("sync_on_commit", &self.sync_on_commit)
            .finish()
    }
}

/// Opens the log backend of `kind` at `path`.
///
/// `fresh` replaces any existing file.
///
/// # Errors
///
/// [`CoreError::IllegalArgument`] for an encrypted store without a key,
/// otherwise whatever the backend reports (a wrong key included).
pub fn open_backend(
    kind: StorageKind,
    path: &Path,
    key: Option<&EncryptionKey>,
    fresh: bool,
) -> CoreResult<Box<dyn StorageBackend>> {
    let file = || {
        if fresh {
            FileBackend::create(path)
        } else {
            FileBackend::open(path)
        }
    };
    Ok(match kind {
        StorageKind::Memory => Box::new(InMemoryBackend::new()),
        StorageKind::Native => Box::new(file()?),
        StorageKind::Encrypted => {
            let key = key.ok_or_else(|| {
                CoreError::illegal_argument("encrypted instance requires an encryption key")
            })?;
            Box::new(EncryptedBackend::open(Box::new(file()?), key)?)
        }
    })
}
