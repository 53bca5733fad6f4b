//! Opening a store directory from the command line.

use objdb_core::{
    manifest_file, CollectionIndex, CoreError, Instance, InstanceConfig, Manifest, StorageKind,
};
use objdb_storage::{EncryptionKey, StorageError};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reported by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// The path is not a store directory.
    #[error("no store found at {0}")]
    NotAStore(PathBuf),

    /// An encrypted store was given without a key.
    #[error("store at {0} is encrypted, pass --key-file")]
    KeyRequired(PathBuf),

    /// No collection of that name, or an embedded one.
    #[error("unknown collection: {0}")]
    UnknownCollection(String),

    /// Engine error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Key material error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type for CLI commands.
pub type CliResult<T> = Result<T, CliError>;

/// An instance opened from its store directory, plus the manifest it was
/// opened with.
pub struct Store {
    /// The store directory.
    pub path: PathBuf,
    /// Manifest read before opening.
    pub manifest: Manifest,
    /// The open instance.
    pub instance: Instance,
}

/// Storage kind and instance name encoded in a store directory's name.
pub fn parse_store_path(path: &Path) -> Option<(StorageKind, String)> {
    let file_name = path.file_name()?.to_str()?;
    let (name, suffix) = file_name.rsplit_once('.')?;
    let kind = [StorageKind::Native, StorageKind::Encrypted]
        .into_iter()
        .find(|kind| kind.dir_suffix() == Some(suffix))?;
    (!name.is_empty()).then(|| (kind, name.to_string()))
}

impl Store {
    /// Opens the store directory at `path` with the schema from its
    /// manifest. Compaction at open is disabled so read-only commands
    /// leave the log untouched.
    pub fn open(path: &Path, key_file: Option<&Path>) -> CliResult<Self> {
        let not_a_store = || CliError::NotAStore(path.to_path_buf());
        let (kind, name) = parse_store_path(path).ok_or_else(not_a_store)?;
        let manifest_path = manifest_file(path);
        if !manifest_path.is_file() {
            return Err(not_a_store());
        }
        let manifest = Manifest::decode(&fs::read(&manifest_path)?)?;

        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        let mut config = InstanceConfig::new(name, parent, kind);
        config.compact_condition = None;
        if kind == StorageKind::Encrypted {
            let key_file = key_file.ok_or_else(|| CliError::KeyRequired(path.to_path_buf()))?;
            let key = EncryptionKey::from_bytes(&fs::read(key_file)?)?;
            config = config.with_encryption_key(key);
        }

        tracing::debug!(path = %path.display(), ?kind, "opening store");
        let instance = Instance::open(0, manifest.schema.clone(), config)?;
        Ok(Self {
            path: path.to_path_buf(),
            manifest,
            instance,
        })
    }

    /// Index of the top-level collection called `name`.
    pub fn collection(&self, name: &str) -> CliResult<CollectionIndex> {
        self.instance
            .collection_index(name)
            .filter(|index| {
                self.manifest
                    .schema
                    .collection(usize::from(*index))
                    .is_ok_and(|c| !c.embedded)
            })
            .ok_or_else(|| CliError::UnknownCollection(name.to_string()))
    }

    /// Closes the instance.
    pub fn close(self) -> CliResult<()> {
        self.instance.close(false)?;
        Ok(())
    }
}
