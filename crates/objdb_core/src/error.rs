//! Error types for the objdb engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Stable numeric discriminant of a [`CoreError`], as returned across the
/// C ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// Directory missing or unusable.
    Path = 1,
    /// Unique index or id collision.
    UniqueViolated = 2,
    /// A mutation was attempted in a read transaction.
    WriteTxnRequired = 3,
    /// Schema or on-disk format mismatch.
    Version = 4,
    /// An encoded object is larger than allowed.
    ObjectLimitReached = 5,
    /// A handle was used against the wrong instance.
    InstanceMismatch = 6,
    /// The store reached its size limit.
    DbFull = 7,
    /// The transaction already ended.
    TransactionClosed = 8,
    /// The instance was closed.
    InstanceClosed = 9,
    /// Invalid argument.
    IllegalArgument = 10,
    /// Another process holds the store.
    Locked = 11,
    /// JSON input does not match the schema.
    Json = 12,
    /// Stored data is damaged.
    Corrupted = 13,
    /// Backend I/O failed.
    Storage = 14,
    /// Encoding failed.
    Codec = 15,
}

/// Errors raised by the engine.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The store directory is missing or cannot be created.
    #[error("path error at {}: {message}", path.display())]
    Path {
        /// Offending path.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// A write would give two live objects the same unique key.
    #[error("unique constraint '{index}' violated in collection '{collection}'")]
    UniqueViolated {
        /// Collection name.
        collection: String,
        /// Index name, or `id` for id collisions within one insert batch.
        index: String,
    },

    /// A mutation ran under a read transaction.
    #[error("write transaction required")]
    WriteTxnRequired,

    /// The store was written by an incompatible format or schema.
    #[error("version mismatch: {message}")]
    Version {
        /// Description of the mismatch.
        message: String,
    },

    /// An encoded object exceeds the configured maximum.
    #[error("object of {size} bytes exceeds the limit of {limit}")]
    ObjectLimitReached {
        /// Encoded size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// A transaction or query was used with an instance it does not belong to.
    #[error("handle belongs to instance {actual}, not {expected}")]
    InstanceMismatch {
        /// Instance the call went to.
        expected: u32,
        /// Instance the handle was created by.
        actual: u32,
    },

    /// The commit would grow the store past its limit.
    #[error("database full: limit is {limit_mib} MiB")]
    DbFull {
        /// Configured limit.
        limit_mib: u32,
    },

    /// The transaction was committed or aborted.
    #[error("transaction is closed")]
    TransactionClosed,

    /// The instance was closed.
    #[error("instance is closed")]
    InstanceClosed,

    /// An argument is out of range or inconsistent.
    #[error("illegal argument: {message}")]
    IllegalArgument {
        /// Description.
        message: String,
    },

    /// Another process holds the store lock.
    #[error("database locked: another process has exclusive access")]
    Locked,

    /// JSON text could not be parsed.
    #[error("json error: {message}")]
    Json {
        /// Parser message.
        message: String,
    },

    /// Log or manifest content is damaged.
    #[error("corrupted store: {message}")]
    Corrupted {
        /// Description.
        message: String,
    },

    /// Backend failure.
    #[error("storage error: {0}")]
    Storage(#[from] objdb_storage::StorageError),

    /// Encoding failure.
    #[error("codec error: {0}")]
    Codec(#[from] objdb_codec::CodecError),

    /// Filesystem failure outside a backend.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CoreError {
    /// Creates an illegal argument error.
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument {
            message: message.into(),
        }
    }

    /// Creates a version error.
    pub fn version(message: impl Into<String>) -> Self {
        Self::Version {
            message: message.into(),
        }
    }

    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a path error.
    pub fn path(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Path {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Numeric discriminant.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Path { .. } => ErrorCode::Path,
            Self::UniqueViolated { .. } => ErrorCode::UniqueViolated,
            Self::WriteTxnRequired => ErrorCode::WriteTxnRequired,
            Self::Version { .. } => ErrorCode::Version,
            Self::ObjectLimitReached { .. } => ErrorCode::ObjectLimitReached,
            Self::InstanceMismatch { .. } => ErrorCode::InstanceMismatch,
            Self::DbFull { .. } => ErrorCode::DbFull,
            Self::TransactionClosed => ErrorCode::TransactionClosed,
            Self::InstanceClosed => ErrorCode::InstanceClosed,
            Self::IllegalArgument { .. } => ErrorCode::IllegalArgument,
            Self::Locked => ErrorCode::Locked,
            Self::Json { .. } | Self::Codec(objdb_codec::CodecError::Json(_)) => ErrorCode::Json,
            Self::Corrupted { .. } => ErrorCode::Corrupted,
            Self::Storage(_) | Self::Io(_) => ErrorCode::Storage,
            Self::Codec(objdb_codec::CodecError::TooLarge) => ErrorCode::ObjectLimitReached,
            Self::Codec(_) => ErrorCode::Codec,
        }
    }

    /// Whether this error ends the write transaction it occurred in.
    #[must_use]
    pub(crate) fn aborts_transaction(&self) -> bool {
        matches!(
            self,
            Self::UniqueViolated { .. } | Self::ObjectLimitReached { .. }
        )
    }
}
