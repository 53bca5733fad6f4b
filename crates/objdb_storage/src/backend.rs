//! The backend trait.

use crate::error::StorageResult;

/// An append-only byte store.
///
/// Offsets are logical: `append` returns the offset its bytes can later be
/// read back from with `read_at`, whatever the backend does physically.
///
/// # Invariants
///
/// - `size()` is the offset the next `append` writes to
/// - `read_at` returns exactly the bytes appended at that range
/// - after `flush` the appended bytes survive a process exit, after `sync`
///   they also survive a power loss
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// [`crate::StorageError::ReadPastEnd`] if the range is not fully stored.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data`, returning the offset it was written at.
    ///
    /// # Errors
    ///
    /// Fails if the underlying medium rejects the write.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Pushes buffered writes to the operating system.
    ///
    /// # Errors
    ///
    /// Fails if the underlying medium rejects the flush.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the logical size in bytes.
    ///
    /// # Errors
    ///
    /// Fails if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Flushes data and metadata to stable storage.
    ///
    /// # Errors
    ///
    /// Fails if the underlying medium rejects the sync.
    fn sync(&mut self) -> StorageResult<()>;

    /// Drops everything after `new_size`.
    ///
    /// # Errors
    ///
    /// [`crate::StorageError::TruncateBeyondEnd`] if `new_size` exceeds the
    /// current size.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads the whole store.
    ///
    /// # Errors
    ///
    /// Propagates `size` and `read_at` failures.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| {
            crate::StorageError::Corrupted(format!("store of {size} bytes does not fit in memory"))
        })?;
        self.read_at(0, len)
    }
}
