//! Store directory management.
//!
//! ```text
//! <path>/<name>.objdb/
//! ├─ MANIFEST    # format version and schema
//! ├─ LOCK        # held exclusively while the store is open
//! └─ data.log    # commit log
//! ```

use crate::config::StorageKind;
use crate::error::{CoreError, CoreResult};
use crate::manifest::Manifest;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TEMP: &str = "MANIFEST.tmp";
const LOCK_FILE: &str = "LOCK";
const LOG_FILE: &str = "data.log";
const COMPACT_FILE: &str = "data.log.compact";

/// Directory of the store called `name` of `kind` inside `parent`;
/// `None` for memory instances.
#[must_use]
pub fn store_path(parent: &Path, name: &str, kind: StorageKind) -> Option<PathBuf> {
    kind.dir_suffix()
        .map(|suffix| parent.join(format!("{name}.{suffix}")))
}

/// An open store directory. Holds the exclusive lock until dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates the store directory at `path`.
    ///
    /// # Errors
    ///
    /// [`CoreError::Path`] if the parent directory is missing or `path` is
    /// not a directory, [`CoreError::Locked`] if another process holds it.
    pub fn open(path: &Path) -> CoreResult<Self> {
        let parent_ok = path
            .parent()
            .is_some_and(|p| p.as_os_str().is_empty() || p.is_dir());
        if !parent_ok {
            return Err(CoreError::path(path, "parent directory does not exist"));
        }
        if !path.exists() {
            fs::create_dir(path).map_err(|e| CoreError::path(path, e.to_string()))?;
        }
        if !path.is_dir() {
            return Err(CoreError::path(path, "not a directory"));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::Locked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Root of the store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The commit log file.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.path.join(LOG_FILE)
    }

    /// Scratch file a compaction writes before it replaces the log.
    #[must_use]
    pub fn compact_path(&self) -> PathBuf {
        self.path.join(COMPACT_FILE)
    }

    /// Loads the manifest; `None` for a new store.
    ///
    /// # Errors
    ///
    /// See [`Manifest::decode`].
    pub fn load_manifest(&self) -> CoreResult<Option<Manifest>> {
        let path = manifest_file(&self.path);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read(&path)?;
        if data.is_empty() {
            return Ok(None);
        }
        Manifest::decode(&data).map(Some)
    }

    /// Saves the manifest atomically.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    pub fn save_manifest(&self, manifest: &Manifest) -> CoreResult<()> {
        write_manifest(&self.path, manifest)
    }

    /// Moves the finished compaction file over the log.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    pub fn install_compacted_log(&self) -> CoreResult<()> {
        fs::rename(self.compact_path(), self.log_path())?;
        sync_directory(&self.path)
    }

    /// Releases the lock and deletes the directory.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be removed.
    pub fn remove(self) -> CoreResult<()> {
        let path = self.path.clone();
        drop(self);
        fs::remove_dir_all(&path)?;
        Ok(())
    }
}

/// Writes `MANIFEST` into `dir` with write-then-rename.
///
/// # Errors
///
/// Fails on I/O errors.
pub fn write_manifest(dir: &Path, manifest: &Manifest) -> CoreResult<()> {
    let temp = dir.join(MANIFEST_TEMP);
    let mut file = File::create(&temp)?;
    file.write_all(&manifest.encode())?;
    file.sync_all()?;
    drop(file);
    fs::rename(&temp, dir.join(MANIFEST_FILE))?;
    sync_directory(dir)
}

/// Name of the manifest file inside a store directory.
#[must_use]
pub fn manifest_file(dir: &Path) -> PathBuf {
    dir.join(MANIFEST_FILE)
}

/// Name of the log file inside a store directory.
#[must_use]
pub fn log_file(dir: &Path) -> PathBuf {
    dir.join(LOG_FILE)
}

#[cfg(unix)]
fn sync_directory(dir: &Path) -> CoreResult<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_dir: &Path) -> CoreResult<()> {
    Ok(())
}
