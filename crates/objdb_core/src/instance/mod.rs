//! Open instances.
//!
//! An [`Instance`] is one open database: the schema, one [`Collection`] per
//! schema collection, the commit log, the transaction manager and the
//! watches. Opening replays the log into memory; every commit appends one
//! batch to the log before it becomes visible.
//!
//! # Commit protocol
//!
//! 1. Encode the buffered writes of the transaction as log records.
//! 2. Under the log lock, check the size limit and append the batch.
//! 3. Apply the writes to the collections at the new sequence number and
//!    publish it.
//! 4. Release the writer slot and hand the changes to the watches.
//!
//! A failure in step 2 aborts the transaction and leaves committed state
//! untouched.

mod maintenance;
mod ops;
mod registry;

pub use ops::Patch;
pub use registry::InstanceRegistry;

use crate::collection::Collection;
use crate::config::{InstanceConfig, StorageKind};
use crate::dir::{store_path, StoreDir};
use crate::error::{CoreError, CoreResult};
use crate::log::{open_backend, CommitLog, LogRecord};
use crate::manifest::Manifest;
use crate::transaction::{PendingCollection, TransactionManager, Txn, TxnState};
use crate::types::{CollectionIndex, InstanceId, SequenceNumber};
use crate::watch::Watches;
use objdb_codec::InstanceSchema;
use objdb_storage::InMemoryBackend;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// One open database.
pub struct Instance {
    id: InstanceId,
    name: String,
    kind: StorageKind,
    schema: Arc<InstanceSchema>,
    collections: Vec<Collection>,
    manager: Arc<TransactionManager>,
    log: Mutex<CommitLog>,
    dir: Mutex<Option<StoreDir>>,
    watches: Watches,
    config: InstanceConfig,
    open: AtomicBool,
}

impl Instance {
    /// Opens or creates the instance described by `config`.
    ///
    /// File-backed stores live in `<dir>/<name>.objdb` (or `.objdb-enc`).
    /// An existing store is recovered from its log, truncating an
    /// interrupted final commit, and compacted if `compact_condition` says
    /// so.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Path`] if the directory cannot be used.
    /// - [`CoreError::Locked`] if another process has the store open.
    /// - [`CoreError::Version`] if the store was written by an incompatible
    ///   format or schema.
    /// - [`CoreError::Corrupted`] for damage inside the log.
    pub fn open(id: InstanceId, schema: InstanceSchema, config: InstanceConfig) -> CoreResult<Self> {
        let schema = Arc::new(schema);

        let dir = match config.kind {
            StorageKind::Memory => None,
            kind => {
                let parent = config.dir.as_deref().ok_or_else(|| {
                    CoreError::illegal_argument("file-backed instance needs a directory")
                })?;
                let path = store_path(parent, &config.name, kind).ok_or_else(|| {
                    CoreError::illegal_argument("storage kind has no directory")
                })?;
                let dir = StoreDir::open(&path)?;
                if let Some(manifest) = dir.load_manifest()? {
                    manifest.check_schema(&schema)?;
                }
                if dir.compact_path().exists() {
                    warn!(path = %dir.compact_path().display(), "removing unfinished compaction");
                    fs::remove_file(dir.compact_path())?;
                }
                Some(dir)
            }
        };
        let log_path = dir.as_ref().map(StoreDir::log_path).unwrap_or_else(PathBuf::new);
        let backend = open_backend(
            config.kind,
            &log_path,
            config.encryption_key.as_ref(),
            false,
        )?;
        let mut log = CommitLog::new(backend, config.sync_on_commit);

        let collections = (0..schema.collections().len())
            .map(|index| {
                let index = CollectionIndex::try_from(index)
                    .map_err(|_| CoreError::illegal_argument("too many collections"))?;
                Ok(Collection::new(Arc::clone(&schema), index))
            })
            .collect::<CoreResult<Vec<_>>>()?;

        let stats = log.replay(|seq, records| Self::replay_batch(&collections, seq, records))?;
        for collection in &collections {
            collection.prune(stats.last_sequence);
        }

        let compact = config.compact_condition.is_some_and(|condition| {
            let live = collections.iter().map(Collection::live_log_bytes).sum::<u64>()
                + CommitLog::batch_len(&[]);
            log.size().is_ok_and(|size| condition.is_met(size, live))
        });

        if let Some(dir) = &dir {
            dir.save_manifest(&Manifest::new((*schema).clone()))?;
        }

        let instance = Self {
            id,
            name: config.name.clone(),
            kind: config.kind,
            watches: Watches::new(id, Arc::clone(&schema)),
            schema,
            collections,
            manager: Arc::new(TransactionManager::new(stats.last_sequence)),
            log: Mutex::new(log),
            dir: Mutex::new(dir),
            config,
            open: AtomicBool::new(true),
        };
        info!(
            instance = id,
            name = %instance.name,
            kind = ?instance.kind,
            commits = stats.commits,
            truncated = stats.truncated_bytes,
            "instance opened"
        );
        if compact {
            if let Err(err) = instance.compact() {
                warn!(instance = id, error = %err, "compaction on open failed");
            }
        }
        Ok(instance)
    }

    fn replay_batch(
        collections: &[Collection],
        seq: SequenceNumber,
        records: Vec<LogRecord>,
    ) -> CoreResult<()> {
        let mut batch: BTreeMap<CollectionIndex, PendingCollection> = BTreeMap::new();
        for record in records {
            let (collection, id, body) = match record {
                LogRecord::Put {
                    collection,
                    id,
                    body,
                } => (collection, Some(id), Some(body)),
                LogRecord::Delete { collection, id } => (collection, Some(id), None),
                LogRecord::Clear { collection } => (collection, None, None),
                LogRecord::Commit { .. } => continue,
            };
            let known = collections
                .get(usize::from(collection))
                .is_some_and(|c| !c.schema().embedded);
            if !known {
                return Err(CoreError::corrupted(format!(
                    "log refers to unknown collection {collection}"
                )));
            }
            let pending = batch.entry(collection).or_default();
            match id {
                Some(id) => {
                    pending.writes.insert(id, body);
                }
                None => {
                    pending.cleared = true;
                    pending.writes.clear();
                }
            }
        }
        let mut changes = Vec::new();
        for (collection, pending) in batch {
            collections[usize::from(collection)].apply(seq, pending, &mut changes);
            changes.clear();
        }
        Ok(())
    }

    /// Caller-chosen instance id.
    #[must_use]
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Instance name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Storage variant.
    #[must_use]
    pub fn kind(&self) -> StorageKind {
        self.kind
    }

    /// Schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<InstanceSchema> {
        &self.schema
    }

    /// Configuration the instance was opened with.
    #[must_use]
    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    /// Position of the collection called `name`.
    #[must_use]
    pub fn collection_index(&self, name: &str) -> Option<CollectionIndex> {
        self.schema.collection_index(name)
    }

    /// Sequence number of the latest commit.
    #[must_use]
    pub fn committed_sequence(&self) -> SequenceNumber {
        self.manager.committed()
    }

    /// Current size of the commit log in bytes.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot report its size.
    pub fn log_size(&self) -> CoreResult<u64> {
        self.log.lock().size()
    }

    /// Store directory, `None` for memory instances or after close.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        self.dir.lock().as_ref().map(|d| d.path().to_path_buf())
    }

    /// Whether [`Self::close`] has not been called yet.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoreError::InstanceClosed)
        }
    }

    /// Starts a transaction.
    ///
    /// A write transaction blocks until the previous writer of this
    /// instance has committed or aborted. Beginning a second write
    /// transaction on the thread that holds the first deadlocks.
    ///
    /// # Errors
    ///
    /// [`CoreError::InstanceClosed`] after close.
    pub fn begin_txn(&self, write: bool) -> CoreResult<Txn> {
        self.ensure_open()?;
        Ok(Txn::begin(&self.manager, self.id, write))
    }

    /// Commits `txn`. Read transactions simply end.
    ///
    /// # Errors
    ///
    /// - [`CoreError::InstanceMismatch`] for a transaction of another instance.
    /// - [`CoreError::TransactionClosed`] if it already ended.
    /// - [`CoreError::DbFull`] if the commit would grow the log past
    ///   `max_size_mib`; the transaction is aborted.
    /// - Storage errors from the append, which also abort it.
    pub fn commit_txn(&self, mut txn: Txn) -> CoreResult<()> {
        self.ensure_open()?;
        txn.check_instance(self.id)?;
        txn.check_active()?;
        if !txn.is_write() {
            txn.end(TxnState::Committed);
            return Ok(());
        }

        let records = Self::batch_records(&mut txn)?;
        if records.is_empty() {
            txn.end(TxnState::Committed);
            return Ok(());
        }

        let mut log = self.log.lock();
        // close() swaps the backend out under this lock
        let appended = self
            .ensure_open()
            .and_then(|()| self.append(&mut log, &records));
        if let Err(err) = appended {
            drop(log);
            warn!(instance = self.id, txn = %txn.id(), error = %err, "commit failed; transaction aborted");
            txn.end(TxnState::Aborted);
            return Err(err);
        }

        let seq = self.manager.committed().next();
        let mut changes = Vec::new();
        // Holding the writer slot until publish keeps the next writer's
        // snapshot at or after this commit.
        let mut write = txn.end(TxnState::Committed);
        if let Some(write) = &mut write {
            for (collection, pending) in std::mem::take(&mut write.pending) {
                self.collections[usize::from(collection)].apply(seq, pending, &mut changes);
            }
        }
        let oldest = self.manager.publish(seq);
        drop(write);
        for collection in &self.collections {
            collection.prune(oldest);
        }
        drop(log);

        debug!(instance = self.id, %seq, records = records.len(), "committed");
        self.watches.notify(changes);
        Ok(())
    }

    /// Appends `records` as the next commit after checking the size limit.
    fn append(&self, log: &mut CommitLog, records: &[LogRecord]) -> CoreResult<()> {
        let grows = records.iter().any(|r| matches!(r, LogRecord::Put { .. }));
        if let (Some(limit), true) = (self.config.max_size_bytes(), grows) {
            if log.size()? + CommitLog::batch_len(records) > limit {
                return Err(CoreError::DbFull {
                    limit_mib: self.config.max_size_mib.unwrap_or_default(),
                });
            }
        }
        log.append_batch(records, self.manager.committed().next())?;
        Ok(())
    }

    /// Log records for the buffered writes of `txn`, clears first.
    fn batch_records(txn: &mut Txn) -> CoreResult<Vec<LogRecord>> {
        let write = txn.write_state()?;
        let mut records = Vec::new();
        for (&collection, pending) in &write.pending {
            if pending.cleared {
                records.push(LogRecord::Clear { collection });
            }
            for (&id, body) in &pending.writes {
                records.push(match body {
                    Some(body) => LogRecord::Put {
                        collection,
                        id,
                        body: Arc::clone(body),
                    },
                    None => LogRecord::Delete { collection, id },
                });
            }
        }
        Ok(records)
    }

    /// Discards the buffered writes of `txn`. Ending an already ended
    /// transaction is a no-op.
    ///
    /// # Errors
    ///
    /// [`CoreError::InstanceMismatch`] for a transaction of another instance.
    pub fn abort_txn(&self, mut txn: Txn) -> CoreResult<()> {
        txn.check_instance(self.id)?;
        if txn.is_active() {
            debug!(instance = self.id, txn = %txn.id(), "transaction aborted");
            txn.end(TxnState::Aborted);
        }
        Ok(())
    }

    /// Collection `index` for an operation under `txn`.
    fn collection_for(&self, txn: &Txn, index: CollectionIndex) -> CoreResult<&Collection> {
        self.ensure_open()?;
        txn.check_instance(self.id)?;
        txn.check_active()?;
        self.collection(index)
    }

    /// Collection `index`; embedded collections are not addressable.
    fn collection(&self, index: CollectionIndex) -> CoreResult<&Collection> {
        let collection = self
            .collections
            .get(usize::from(index))
            .ok_or_else(|| CoreError::illegal_argument(format!("no collection {index}")))?;
        if collection.schema().embedded {
            return Err(CoreError::illegal_argument(format!(
                "embedded collection '{}' has no objects of its own",
                collection.schema().name
            )));
        }
        Ok(collection)
    }

    /// Closes the instance, stopping its watches. With `delete_files` the
    /// store directory is removed. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Fails if the log cannot be synced or the files cannot be removed.
    pub fn close(&self, delete_files: bool) -> CoreResult<()> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.watches.close();
        let synced = {
            let mut log = self.log.lock();
            let synced = log.sync();
            log.replace_backend(Box::new(InMemoryBackend::new()));
            synced
        };
        let dir = self.dir.lock().take();
        match (dir, delete_files) {
            (Some(dir), true) => dir.remove()?,
            (dir, _) => drop(dir),
        }
        info!(instance = self.id, name = %self.name, delete_files, "instance closed");
        synced
    }

    /// Closes the instance after a failure left its log unusable. The
    /// store directory is released so the files can be reopened and
    /// recovered.
    pub(crate) fn poison(&self, cause: &CoreError) {
        self.open.store(false, Ordering::Release);
        self.watches.close();
        drop(self.dir.lock().take());
        error!(instance = self.id, name = %self.name, error = %cause, "instance closed after failure");
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("open", &self.is_open())
            .field("committed", &self.manager.committed())
            .finish_non_exhaustive()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        if let Err(err) = self.close(false) {
            warn!(instance = self.id, error = %err, "error while closing instance");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompactCondition;
    use crate::filter::Filter;
    use crate::query::{AggregationKind, Sort};
    use objdb_codec::Value;
    use std::sync::mpsc;
    use std::time::Duration;

    const PERSON: &str = r#"[{
        "name": "Person",
        "autoIncrement": true,
        "properties": [
            {"name": "name", "type": "String"},
            {"name": "age", "type": "Int"}
        ],
        "indexes": [{"name": "name_unique", "properties": ["name"], "unique": true}]
    }]"#;

    fn schema() -> InstanceSchema {
        InstanceSchema::from_json(PERSON).unwrap()
    }

    fn put(db: &Instance, name: &str, age: i32) -> i64 {
        let mut txn = db.begin_txn(true).unwrap();
        let id = {
            let mut session = db.insert(&mut txn, 0, 1).unwrap();
            let mut writer = session.writer().unwrap();
            writer.write_string(0, name).unwrap();
            writer.write_int(1, age).unwrap();
            writer.save(None).unwrap()
        };
        db.commit_txn(txn).unwrap();
        id
    }

    fn names(db: &Instance) -> Vec<String> {
        let txn = db.begin_txn(false).unwrap();
        let query = db.query(0).unwrap().build().unwrap();
        db.cursor(&txn, &query, 0, None)
            .unwrap()
            .map(|o| {
                let o = o.unwrap();
                let reader = o.reader().unwrap();
                reader.read_string(0).unwrap().0.to_owned()
            })
            .collect()
    }

    #[test]
    fn commits_survive_reopen() {
        let temp = tempfile::tempdir().unwrap();
        let config = InstanceConfig::new("people", temp.path(), StorageKind::Native);
        {
            let db = Instance::open(1, schema(), config.clone()).unwrap();
            put(&db, "ada", 36);
            put(&db, "alan", 41);
            let mut txn = db.begin_txn(true).unwrap();
            assert!(db.delete(&mut txn, 0, 1).unwrap());
            db.commit_txn(txn).unwrap();
            assert_eq!(db.committed_sequence(), SequenceNumber(3));
        }
        let db = Instance::open(1, schema(), config).unwrap();
        assert_eq!(names(&db), ["alan"]);
        assert_eq!(db.committed_sequence(), SequenceNumber(3));
        assert_eq!(put(&db, "grace", 85), 3);
    }

    #[test]
    fn aborted_and_read_transactions_leave_no_trace() {
        let db = Instance::open(1, schema(), InstanceConfig::in_memory("t")).unwrap();
        let before = db.log_size().unwrap();

        let mut txn = db.begin_txn(true).unwrap();
        db.import_json(&mut txn, 0, r#"[{"name": "x"}]"#).unwrap();
        db.abort_txn(txn).unwrap();

        let txn = db.begin_txn(false).unwrap();
        db.commit_txn(txn).unwrap();

        assert_eq!(db.log_size().unwrap(), before);
        assert!(names(&db).is_empty());
    }

    #[test]
    fn unique_violation_aborts_and_keeps_committed_state() {
        let db = Instance::open(1, schema(), InstanceConfig::in_memory("t")).unwrap();
        put(&db, "ada", 36);

        let mut txn = db.begin_txn(true).unwrap();
        let err = db
            .import_json(&mut txn, 0, r#"[{"name": "bob"}, {"name": "ADA"}, {"name": "ada"}]"#)
            .unwrap_err();
        assert!(matches!(err, CoreError::UniqueViolated { .. }));
        assert!(matches!(
            db.count(&txn, 0),
            Err(CoreError::TransactionClosed)
        ));
        assert!(matches!(
            db.commit_txn(txn),
            Err(CoreError::TransactionClosed)
        ));
        assert_eq!(names(&db), ["ada"]);
    }

    #[test]
    fn writes_need_a_write_transaction() {
        let db = Instance::open(1, schema(), InstanceConfig::in_memory("t")).unwrap();
        let id = put(&db, "ada", 36);
        let mut txn = db.begin_txn(false).unwrap();
        assert!(matches!(
            db.delete(&mut txn, 0, id),
            Err(CoreError::WriteTxnRequired)
        ));
        assert!(matches!(db.clear(&mut txn, 0), Err(CoreError::WriteTxnRequired)));
        assert!(txn.is_active());
        assert_eq!(db.count(&txn, 0).unwrap(), 1);
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let a = Instance::open(1, schema(), InstanceConfig::in_memory("a")).unwrap();
        let b = Instance::open(2, schema(), InstanceConfig::in_memory("b")).unwrap();
        let txn = b.begin_txn(false).unwrap();
        assert!(matches!(
            a.count(&txn, 0),
            Err(CoreError::InstanceMismatch { expected: 1, actual: 2 })
        ));
        let query = b.query(0).unwrap().build().unwrap();
        let txn = a.begin_txn(false).unwrap();
        assert!(matches!(
            a.cursor(&txn, &query, 0, None),
            Err(CoreError::InstanceMismatch { expected: 1, actual: 2 })
        ));
        assert!(matches!(
            a.abort_txn(b.begin_txn(false).unwrap()),
            Err(CoreError::InstanceMismatch { .. })
        ));
    }

    #[test]
    fn size_limit_rejects_growth_but_allows_deletes() {
        let db = Instance::open(
            1,
            schema(),
            InstanceConfig::in_memory("t").with_max_size_mib(1),
        )
        .unwrap();
        let big = "x".repeat(700 * 1024);
        put(&db, &big, 1);

        let mut txn = db.begin_txn(true).unwrap();
        {
            let mut session = db.insert(&mut txn, 0, 1).unwrap();
            let mut writer = session.writer().unwrap();
            writer.write_string(0, &format!("{big}2")).unwrap();
            writer.save(None).unwrap();
        }
        assert!(matches!(
            db.commit_txn(txn),
            Err(CoreError::DbFull { limit_mib: 1 })
        ));
        assert!(!db.manager.writer_active());

        let mut txn = db.begin_txn(true).unwrap();
        assert!(db.delete(&mut txn, 0, 1).unwrap());
        db.commit_txn(txn).unwrap();
        assert!(names(&db).is_empty());
    }

    #[test]
    fn query_operations_work_on_the_window() {
        let db = Instance::open(1, schema(), InstanceConfig::in_memory("t")).unwrap();
        for (name, age) in [("a", 20), ("b", 30), ("c", 25), ("d", 40)] {
            put(&db, name, age);
        }
        let mut builder = db.query(0).unwrap();
        builder
            .set_filter(Filter::greater(1, 20))
            .sort_by(1, Sort::Asc, true);
        let query = builder.build().unwrap();

        let mut txn = db.begin_txn(true).unwrap();
        let updated = db
            .query_update(&mut txn, &query, 0, Some(2), &[(1, Some(Value::Integer(99)))])
            .unwrap();
        assert_eq!(updated, 2);
        let json = db.query_export_json(&txn, &query, 0, None).unwrap();
        let exported: serde_json::Value = serde_json::from_str(&json).unwrap();
        let ids: Vec<i64> = exported
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["id"].as_i64().unwrap())
            .collect();
        assert_eq!(ids, [4, 2, 3]);

        assert_eq!(db.query_delete(&mut txn, &query, 1, None).unwrap(), 2);
        db.commit_txn(txn).unwrap();
        assert_eq!(names(&db), ["a", "d"]);

        let txn = db.begin_txn(false).unwrap();
        let all = db.query(0).unwrap().build().unwrap();
        assert_eq!(
            db.aggregate(&txn, &all, AggregationKind::Sum, Some(1)).unwrap(),
            Some(Value::Integer(60))
        );
    }

    #[test]
    fn watches_fire_after_commit() {
        let db = Instance::open(1, schema(), InstanceConfig::in_memory("t")).unwrap();
        let (tx, rx) = mpsc::channel();
        let handle = db.watch_collection(0, 7, Box::new(tx)).unwrap();
        let id = put(&db, "ada", 36);
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!((event.port, event.collection, event.ids), (7, 0, vec![id]));

        db.stop_watching(handle).unwrap();
        put(&db, "alan", 41);
        db.close(false).unwrap();
        assert!(rx.try_recv().is_err());
        assert!(db.stop_watching(handle).is_ok());
    }

    #[test]
    fn closed_instances_refuse_work() {
        let db = Instance::open(1, schema(), InstanceConfig::in_memory("t")).unwrap();
        db.close(false).unwrap();
        db.close(false).unwrap();
        assert!(matches!(db.begin_txn(false), Err(CoreError::InstanceClosed)));
        assert!(matches!(db.compact(), Err(CoreError::InstanceClosed)));
    }

    #[test]
    fn compaction_shrinks_the_log_and_keeps_data() {
        let temp = tempfile::tempdir().unwrap();
        let config = InstanceConfig::new("c", temp.path(), StorageKind::Native);
        let db = Instance::open(1, schema(), config.clone()).unwrap();
        for round in 0..20 {
            let mut txn = db.begin_txn(true).unwrap();
            db.clear(&mut txn, 0).unwrap();
            db.import_json(&mut txn, 0, &format!(r#"[{{"id": 1, "name": "v{round}"}}]"#))
                .unwrap();
            db.commit_txn(txn).unwrap();
        }
        let before = db.log_size().unwrap();
        db.compact().unwrap();
        assert!(db.log_size().unwrap() < before);
        assert_eq!(names(&db), ["v19"]);
        drop(db);

        let condition = CompactCondition {
            min_file_size: 0,
            min_bytes: 0,
            min_ratio: 0.0,
        };
        let db = Instance::open(1, schema(), config.with_compact_condition(condition)).unwrap();
        assert_eq!(names(&db), ["v19"]);
        assert_eq!(db.committed_sequence(), SequenceNumber(20));
    }

    #[test]
    fn copies_open_as_native_stores() {
        let temp = tempfile::tempdir().unwrap();
        let db = Instance::open(1, schema(), InstanceConfig::in_memory("mem")).unwrap();
        put(&db, "ada", 36);
        let target = temp.path().join("backup.objdb");
        db.copy(&target).unwrap();
        assert!(matches!(db.copy(&target), Err(CoreError::Path { .. })));

        let copy = Instance::open(
            2,
            schema(),
            InstanceConfig::new("backup", temp.path(), StorageKind::Native),
        )
        .unwrap();
        assert_eq!(names(&copy), ["ada"]);
    }

    #[test]
    fn mismatched_schema_fails_open() {
        let temp = tempfile::tempdir().unwrap();
        let config = InstanceConfig::new("s", temp.path(), StorageKind::Native);
        drop(Instance::open(1, schema(), config.clone()).unwrap());
        let other = InstanceSchema::from_json(
            r#"[{"name": "Person", "properties": [{"name": "name", "type": "Long"}]}]"#,
        )
        .unwrap();
        assert!(matches!(
            Instance::open(1, other, config),
            Err(CoreError::Version { .. })
        ));
    }

    #[test]
    fn failed_import_commits_nothing() {
        let db = Instance::open(1, schema(), InstanceConfig::in_memory("t")).unwrap();
        let mut txn = db.begin_txn(true).unwrap();
        let err = db
            .import_json(&mut txn, 0, r#"[{"name": "a"}, {"name": "b"}, 7]"#)
            .unwrap_err();
        assert!(matches!(err, CoreError::Json { .. }));
        assert!(!txn.is_active());
        assert!(matches!(
            db.commit_txn(txn),
            Err(CoreError::TransactionClosed)
        ));
        assert!(names(&db).is_empty());

        // nothing staged yet, so the transaction stays usable
        let mut txn = db.begin_txn(true).unwrap();
        assert!(db.import_json(&mut txn, 0, "{").is_err());
        assert!(txn.is_active());
        assert_eq!(db.import_json(&mut txn, 0, r#"[{"name": "c"}]"#).unwrap(), 1);
        db.commit_txn(txn).unwrap();
        assert_eq!(names(&db), ["c"]);
    }

    #[test]
    fn concurrent_writers_do_not_lose_updates() {
        const THREADS: i32 = 8;
        const ROUNDS: i32 = 200;
        let db = Instance::open(1, schema(), InstanceConfig::in_memory("t")).unwrap();
        let id = put(&db, "counter", 0);

        std::thread::scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..ROUNDS {
                        let mut txn = db.begin_txn(true).unwrap();
                        let age = db
                            .get(&txn, 0, id)
                            .unwrap()
                            .unwrap()
                            .reader()
                            .unwrap()
                            .read_int(1)
                            .unwrap();
                        let patch = [(1, Some(Value::Integer(i64::from(age) + 1)))];
                        assert!(db.update(&mut txn, 0, id, &patch).unwrap());
                        db.commit_txn(txn).unwrap();
                    }
                });
            }
        });

        let txn = db.begin_txn(false).unwrap();
        let object = db.get(&txn, 0, id).unwrap().unwrap();
        assert_eq!(object.reader().unwrap().read_int(1), Some(THREADS * ROUNDS));
    }

    #[test]
    fn commits_racing_close_are_durable_or_refused() {
        let temp = tempfile::tempdir().unwrap();
        let config = InstanceConfig::new("race", temp.path(), StorageKind::Native);
        let db = Instance::open(1, schema(), config.clone()).unwrap();

        let committed = std::thread::scope(|s| {
            let writer = s.spawn(|| {
                let mut committed = Vec::new();
                for i in 0.. {
                    let name = format!("p{i}");
                    let result = db.begin_txn(true).and_then(|mut txn| {
                        {
                            let mut session = db.insert(&mut txn, 0, 1)?;
                            let mut writer = session.writer()?;
                            writer.write_string(0, &name)?;
                            writer.save(None)?;
                        }
                        db.commit_txn(txn)
                    });
                    match result {
                        Ok(()) => committed.push(name),
                        Err(CoreError::InstanceClosed) => break,
                        Err(err) => panic!("unexpected error: {err}"),
                    }
                }
                committed
            });
            while db.committed_sequence() < SequenceNumber(20) {
                std::thread::yield_now();
            }
            db.close(false).unwrap();
            writer.join().unwrap()
        });

        let reopened = Instance::open(1, schema(), config).unwrap();
        let mut stored = names(&reopened);
        stored.sort();
        let mut expected = committed;
        expected.sort();
        assert!(expected.len() >= 20);
        assert_eq!(stored, expected);
    }

    #[test]
    fn poisoned_instance_refuses_commits_and_releases_the_store() {
        let temp = tempfile::tempdir().unwrap();
        let config = InstanceConfig::new("p", temp.path(), StorageKind::Native);
        let db = Instance::open(1, schema(), config.clone()).unwrap();
        put(&db, "ada", 36);

        let mut txn = db.begin_txn(true).unwrap();
        db.import_json(&mut txn, 0, r#"[{"name": "alan"}]"#).unwrap();
        db.poison(&CoreError::corrupted("log could not be reopened"));

        assert!(!db.is_open());
        assert!(matches!(db.commit_txn(txn), Err(CoreError::InstanceClosed)));
        assert!(matches!(db.begin_txn(false), Err(CoreError::InstanceClosed)));
        assert!(matches!(db.compact(), Err(CoreError::InstanceClosed)));
        db.close(false).unwrap();

        let reopened = Instance::open(1, schema(), config).unwrap();
        assert_eq!(names(&reopened), ["ada"]);
    }
}
