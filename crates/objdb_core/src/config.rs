//! Instance configuration.

use objdb_storage::EncryptionKey;
use std::path::PathBuf;

/// Storage variant of an instance. The integer forms are what the C ABI
/// accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StorageKind {
    /// Plain log file in a store directory.
    Native = 0,
    /// Nothing on disk; contents vanish at close.
    Memory = 1,
    /// AES-256-GCM sealed log file in a store directory.
    Encrypted = 2,
}

impl StorageKind {
    /// Parses the integer form.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Native),
            1 => Some(Self::Memory),
            2 => Some(Self::Encrypted),
            _ => None,
        }
    }

    /// Suffix of the store directory, `None` for memory instances.
    #[must_use]
    pub const fn dir_suffix(self) -> Option<&'static str> {
        match self {
            Self::Native => Some("objdb"),
            Self::Encrypted => Some("objdb-enc"),
            Self::Memory => None,
        }
    }
}

/// Thresholds that make a log worth rewriting at open.
///
/// All three must be met.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompactCondition {
    /// Minimum log size in bytes.
    pub min_file_size: u64,
    /// Minimum reclaimable bytes.
    pub min_bytes: u64,
    /// Minimum reclaimable fraction of the log, `0.0..=1.0`.
    pub min_ratio: f32,
}

impl CompactCondition {
    /// Whether a log of `file_size` bytes holding `live_size` bytes of
    /// current data qualifies.
    #[must_use]
    pub fn is_met(&self, file_size: u64, live_size: u64) -> bool {
        if file_size == 0 || file_size < self.min_file_size {
            return false;
        }
        let reclaimable = file_size.saturating_sub(live_size);
        let ratio = reclaimable as f64 / file_size as f64;
        reclaimable >= self.min_bytes && ratio >= f64::from(self.min_ratio)
    }
}

impl Default for CompactCondition {
    fn default() -> Self {
        Self {
            min_file_size: 8 * 1024 * 1024,
            min_bytes: 4 * 1024 * 1024,
            min_ratio: 0.5,
        }
    }
}

/// Parameters for opening an instance.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    /// Instance name; names the store directory.
    pub name: String,

    /// Directory the store directory lives in. Ignored for memory instances.
    pub dir: Option<PathBuf>,

    /// Storage variant.
    pub kind: StorageKind,

    /// Size limit of the log, `None` for unlimited.
    pub max_size_mib: Option<u32>,

    /// Compaction thresholds checked at open, `None` to never compact.
    pub compact_condition: Option<CompactCondition>,

    /// Whether every commit is fsynced.
    pub sync_on_commit: bool,

    /// Largest encoded object accepted, in bytes.
    pub max_object_size: usize,

    /// Key for [`StorageKind::Encrypted`].
    pub encryption_key: Option<EncryptionKey>,
}

impl InstanceConfig {
    /// Default object size limit (16 MiB).
    pub const DEFAULT_MAX_OBJECT_SIZE: usize = 16 * 1024 * 1024;

    /// A file-backed instance called `name` inside `dir`.
    pub fn new(name: impl Into<String>, dir: impl Into<PathBuf>, kind: StorageKind) -> Self {
        Self {
            name: name.into(),
            dir: Some(dir.into()),
            kind,
            max_size_mib: None,
            compact_condition: None,
            sync_on_commit: true,
            max_object_size: Self::DEFAULT_MAX_OBJECT_SIZE,
            encryption_key: None,
        }
    }

    /// A memory instance called `name`.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            dir: None,
            kind: StorageKind::Memory,
            ..Self::new(name, PathBuf::new(), StorageKind::Memory)
        }
    }

    /// Sets the size limit.
    #[must_use]
    pub fn with_max_size_mib(mut self, mib: u32) -> Self {
        self.max_size_mib = Some(mib);
        self
    }

    /// Sets the compaction thresholds.
    #[must_use]
    pub fn with_compact_condition(mut self, condition: CompactCondition) -> Self {
        self.compact_condition = Some(condition);
        self
    }

    /// Sets whether commits are fsynced.
    #[must_use]
    pub fn with_sync_on_commit(mut self, sync: bool) -> Self {
        self.sync_on_commit = sync;
        self
    }

    /// Sets the object size limit.
    #[must_use]
    pub fn with_max_object_size(mut self, bytes: usize) -> Self {
        self.max_object_size = bytes;
        self
    }

    /// Sets the key of an encrypted instance.
    #[must_use]
    pub fn with_encryption_key(mut self, key: EncryptionKey) -> Self {
        self.encryption_key = Some(key);
        self
    }

    /// Size limit in bytes.
    #[must_use]
    pub fn max_size_bytes(&self) -> Option<u64> {
        self.max_size_mib.map(|mib| u64::from(mib) * 1024 * 1024)
    }
}
