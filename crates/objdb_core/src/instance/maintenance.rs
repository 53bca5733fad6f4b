//! Compaction and backups.

use super::Instance;
use crate::config::StorageKind;
use crate::dir::{log_file, write_manifest};
use crate::error::{CoreError, CoreResult};
use crate::log::{open_backend, CommitLog, LogRecord};
use crate::manifest::Manifest;
use crate::transaction::Txn;
use crate::types::SequenceNumber;
use objdb_storage::InMemoryBackend;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

impl Instance {
    /// One `Put` per object live at `seq`, collection by collection.
    fn live_records(&self, seq: SequenceNumber) -> Vec<LogRecord> {
        self.collections
            .iter()
            .flat_map(|c| c.snapshot_records(seq))
            .collect()
    }

    /// Rewrites the log to hold only the latest version of every live
    /// object. Commits wait while it runs; readers do not.
    ///
    /// File-backed logs are written next to the old log and renamed over
    /// it, so a crash leaves either the old or the new log in place.
    ///
    /// # Errors
    ///
    /// [`CoreError::InstanceClosed`] after close, otherwise I/O errors. On
    /// failure the old log stays in use, unless the installed log cannot be
    /// reopened: the instance is then closed.
    pub fn compact(&self) -> CoreResult<()> {
        self.ensure_open()?;
        let mut log = self.log.lock();
        self.ensure_open()?;
        let before = log.size()?;
        let seq = self.manager.committed();
        let records = self.live_records(seq);
        let sync = self.config.sync_on_commit;

        if self.kind == StorageKind::Memory {
            let fresh = CommitLog::write_snapshot(Box::new(InMemoryBackend::new()), &records, seq, sync)?;
            *log = fresh;
        } else {
            let dir_guard = self.dir.lock();
            let dir = dir_guard.as_ref().ok_or(CoreError::InstanceClosed)?;
            let key = self.config.encryption_key.as_ref();

            let target = open_backend(self.kind, &dir.compact_path(), key, true)?;
            match CommitLog::write_snapshot(target, &records, seq, sync) {
                Ok(written) => drop(written),
                Err(err) => {
                    if let Err(cleanup) = fs::remove_file(dir.compact_path()) {
                        warn!(error = %cleanup, "could not remove unfinished compaction");
                    }
                    return Err(err);
                }
            }

            log.replace_backend(Box::new(InMemoryBackend::new()));
            let installed = dir.install_compacted_log();
            match open_backend(self.kind, &dir.log_path(), key, false) {
                Ok(reopened) => drop(log.replace_backend(reopened)),
                Err(err) => {
                    drop(dir_guard);
                    self.poison(&err);
                    return Err(err);
                }
            }
            installed?;
        }

        info!(
            instance = self.id,
            before,
            after = log.size()?,
            objects = records.len(),
            "log compacted"
        );
        Ok(())
    }

    /// Writes a consistent snapshot of the instance into the new store
    /// directory `target`.
    ///
    /// Encrypted instances produce an encrypted copy under the same key;
    /// all others produce a native store.
    ///
    /// # Errors
    ///
    /// [`CoreError::Path`] if `target` exists or its parent does not.
    pub fn copy(&self, target: &Path) -> CoreResult<()> {
        self.ensure_open()?;
        if target.exists() {
            return Err(CoreError::path(target, "backup target already exists"));
        }
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                return Err(CoreError::path(parent, "backup parent directory does not exist"));
            }
        }

        let txn = Txn::begin(&self.manager, self.id, false);
        let seq = txn.snapshot();
        let records = self.live_records(seq);
        drop(txn);

        let kind = match self.kind {
            StorageKind::Encrypted => StorageKind::Encrypted,
            StorageKind::Native | StorageKind::Memory => StorageKind::Native,
        };
        fs::create_dir(target)?;
        write_manifest(target, &Manifest::new((*self.schema).clone()))?;
        let backend = open_backend(kind, &log_file(target), self.config.encryption_key.as_ref(), true)?;
        CommitLog::write_snapshot(backend, &records, seq, true)?;

        info!(
            instance = self.id,
            target = %target.display(),
            %seq,
            objects = records.len(),
            "instance copied"
        );
        Ok(())
    }
}
