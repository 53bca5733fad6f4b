//! Storage errors.

use std::io;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a [`crate::StorageBackend`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// The underlying file failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read reached past the last appended byte.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Current size.
        size: u64,
    },

    /// A truncation asked to grow the store.
    #[error("cannot truncate to {requested} bytes, store holds {size}")]
    TruncateBeyondEnd {
        /// Requested size.
        requested: u64,
        /// Current size.
        size: u64,
    },

    /// Stored bytes do not have the expected shape.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// Sealing or opening an encrypted frame failed.
    #[error("encryption error: {0}")]
    Encryption(String),
}
