//! Collection store.
//!
//! A [`Collection`] owns the versioned table of one collection plus the
//! owner maps of its unique indexes. Reads merge the committed table with
//! the transaction's buffered writes; writes only touch the buffer until
//! commit hands it to [`Collection::apply`].

mod insert;
mod patch;

pub use insert::{InsertSession, InsertWriter};
pub use patch::apply_patch;

use crate::error::{CoreError, CoreResult};
use crate::key::object_key;
use crate::log::{LogRecord, PUT_OVERHEAD};
use crate::object::ObjectRef;
use crate::table::{Body, VersionedTable};
use crate::transaction::{PendingCollection, Txn};
use crate::types::{CollectionIndex, SequenceNumber};
use crate::watch::Change;
use objdb_codec::{CollectionSchema, InstanceSchema, ObjectReader, ObjectWriter, Value};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Owners of the keys of one unique index at the newest commit.
#[derive(Debug)]
struct UniqueIndex {
    name: String,
    properties: Vec<(u16, bool)>,
    owners: HashMap<Vec<u8>, i64>,
}

/// Stored objects of one collection.
#[derive(Debug)]
pub struct Collection {
    index: CollectionIndex,
    schema: Arc<InstanceSchema>,
    table: RwLock<VersionedTable>,
    uniques: RwLock<Vec<UniqueIndex>>,
    /// Highest id allocated or seen.
    last_id: AtomicI64,
}

impl Collection {
    pub(crate) fn new(schema: Arc<InstanceSchema>, index: CollectionIndex) -> Self {
        let uniques = schema
            .collections()
            .get(usize::from(index))
            .map(|c| {
                c.indexes
                    .iter()
                    .filter(|i| i.unique)
                    .map(|i| UniqueIndex {
                        name: i.name.clone(),
                        properties: i
                            .property_indices()
                            .iter()
                            .map(|p| (*p, i.case_sensitive))
                            .collect(),
                        owners: HashMap::new(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            index,
            schema,
            table: RwLock::new(VersionedTable::new()),
            uniques: RwLock::new(uniques),
            last_id: AtomicI64::new(0),
        }
    }

    /// Position in the instance schema.
    #[must_use]
    pub fn index(&self) -> CollectionIndex {
        self.index
    }

    /// Schema of this collection.
    #[must_use]
    pub fn schema(&self) -> &CollectionSchema {
        &self.schema.collections()[usize::from(self.index)]
    }

    /// Instance schema the collection belongs to.
    #[must_use]
    pub fn instance_schema(&self) -> &Arc<InstanceSchema> {
        &self.schema
    }

    pub(crate) fn object(&self, id: i64, body: Body) -> ObjectRef {
        ObjectRef::new(id, self.index, body, Arc::clone(&self.schema))
    }

    pub(crate) fn reader<'b>(&'b self, id: i64, body: &'b [u8]) -> CoreResult<ObjectReader<'b>> {
        Ok(ObjectReader::new(
            id,
            body,
            &self.schema,
            usize::from(self.index),
        )?)
    }

    /// Body of `id` as seen by `txn`.
    pub(crate) fn lookup(&self, txn: &Txn, id: i64) -> Option<Body> {
        if let Some(pending) = txn.pending(self.index) {
            if let Some(write) = pending.writes.get(&id) {
                return write.clone();
            }
            if pending.cleared {
                return None;
            }
        }
        self.table.read().get(id, txn.snapshot()).cloned()
    }

    /// First object after `after` as seen by `txn`, in id order.
    pub(crate) fn next(&self, txn: &Txn, after: Option<i64>) -> Option<(i64, Body)> {
        let pending = txn.pending(self.index);
        let cleared = pending.is_some_and(|p| p.cleared);
        let table = self.table.read();
        let mut cursor = after;
        loop {
            let committed = if cleared {
                None
            } else {
                table.next_visible(cursor, txn.snapshot())
            };
            let lower = cursor.map_or(Bound::Unbounded, Bound::Excluded);
            let staged = pending.and_then(|p| p.writes.range((lower, Bound::Unbounded)).next());

            match (committed, staged) {
                (None, None) => return None,
                (Some((id, body)), None) => return Some((id, Arc::clone(body))),
                (Some((id, body)), Some((staged_id, _))) if id < *staged_id => {
                    return Some((id, Arc::clone(body)));
                }
                (_, Some((id, write))) => match write {
                    Some(body) => return Some((*id, Arc::clone(body))),
                    None => cursor = Some(*id),
                },
            }
        }
    }

    /// Number of objects visible to `txn`.
    pub(crate) fn count(&self, txn: &Txn) -> usize {
        let mut count = 0;
        let mut cursor = None;
        while let Some((id, _)) = self.next(txn, cursor) {
            count += 1;
            cursor = Some(id);
        }
        count
    }

    /// Bytes the objects visible to `txn` occupy: bodies and ids, plus one
    /// key and id per index entry with `include_indexes`.
    pub(crate) fn footprint(&self, txn: &Txn, include_indexes: bool) -> CoreResult<i64> {
        let indexes: Vec<Vec<(u16, bool)>> = self
            .schema()
            .indexes
            .iter()
            .map(|i| {
                i.property_indices()
                    .iter()
                    .map(|p| (*p, i.case_sensitive))
                    .collect()
            })
            .collect();
        let mut total = 0i64;
        let mut cursor = None;
        while let Some((id, body)) = self.next(txn, cursor) {
            cursor = Some(id);
            total += body.len() as i64 + 8;
            if include_indexes {
                let reader = self.reader(id, &body)?;
                for properties in &indexes {
                    total += object_key(&reader, properties).len() as i64 + 8;
                }
            }
        }
        Ok(total)
    }

    /// Unique keys of `reader`, one per unique index; `None` where a key
    /// property is null.
    fn unique_keys(uniques: &[UniqueIndex], reader: &ObjectReader<'_>) -> Vec<Option<Vec<u8>>> {
        uniques
            .iter()
            .map(|u| {
                if u.properties.iter().any(|(p, _)| reader.is_null(*p)) {
                    None
                } else {
                    Some(object_key(reader, &u.properties))
                }
            })
            .collect()
    }

    /// Buffers `body` as the new version of `id`.
    ///
    /// # Errors
    ///
    /// [`CoreError::ObjectLimitReached`] above `max_object_size`,
    /// [`CoreError::UniqueViolated`] if a unique key is taken by another
    /// object visible to `txn`.
    pub(crate) fn stage_put(
        &self,
        txn: &mut Txn,
        id: i64,
        body: Body,
        max_object_size: usize,
    ) -> CoreResult<()> {
        txn.write_state()?;
        if body.len() > max_object_size {
            return Err(CoreError::ObjectLimitReached {
                size: body.len(),
                limit: max_object_size,
            });
        }

        let keys = {
            let reader = self.reader(id, &body)?;
            let uniques = self.uniques.read();
            let keys = Self::unique_keys(&uniques, &reader);
            let pending = txn.pending(self.index);
            for (slot, (unique, key)) in uniques.iter().zip(&keys).enumerate() {
                let Some(key) = key else { continue };
                let claimed = pending
                    .and_then(|p| p.claims.get(&slot))
                    .and_then(|claims| claims.get(key))
                    .is_some_and(|owner| *owner != id);
                let owned = unique.owners.get(key).is_some_and(|owner| {
                    *owner != id
                        && !pending.is_some_and(|p| p.cleared || p.writes.contains_key(owner))
                });
                if claimed || owned {
                    return Err(CoreError::UniqueViolated {
                        collection: self.schema().name.clone(),
                        index: unique.name.clone(),
                    });
                }
            }
            keys
        };

        let pending = txn.pending_mut(self.index)?;
        pending.release_claims(id);
        for (slot, key) in keys.into_iter().enumerate() {
            if let Some(key) = key {
                pending.claims.entry(slot).or_default().insert(key, id);
            }
        }
        pending.writes.insert(id, Some(body));
        Ok(())
    }

    /// Buffers `id` re-encoded with `patch` applied; `false` if `txn` does
    /// not see it.
    pub(crate) fn stage_update(
        &self,
        txn: &mut Txn,
        id: i64,
        patch: &[(u16, Option<Value>)],
        max_object_size: usize,
    ) -> CoreResult<bool> {
        txn.write_state()?;
        let Some(body) = self.lookup(txn, id) else {
            return Ok(false);
        };
        let updated = {
            let reader = self.reader(id, &body)?;
            let mut writer = ObjectWriter::from_reader(&reader);
            apply_patch(&mut writer, patch)?;
            writer.finish()?
        };
        self.stage_put(txn, id, Arc::from(updated), max_object_size)?;
        Ok(true)
    }

    /// Buffers the deletion of `id`; `false` if `txn` does not see it.
    pub(crate) fn stage_delete(&self, txn: &mut Txn, id: i64) -> CoreResult<bool> {
        txn.write_state()?;
        if self.lookup(txn, id).is_none() {
            return Ok(false);
        }
        let pending = txn.pending_mut(self.index)?;
        pending.release_claims(id);
        pending.writes.insert(id, None);
        Ok(true)
    }

    /// Buffers the deletion of every object.
    pub(crate) fn stage_clear(&self, txn: &mut Txn) -> CoreResult<()> {
        let pending = txn.pending_mut(self.index)?;
        pending.cleared = true;
        pending.writes.clear();
        pending.claims.clear();
        Ok(())
    }

    /// Next auto-increment id.
    ///
    /// # Errors
    ///
    /// [`CoreError::IllegalArgument`] once `i64::MAX` is taken.
    pub(crate) fn allocate_id(&self) -> CoreResult<i64> {
        self.last_id
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |last| last.checked_add(1))
            .map(|last| last + 1)
            .map_err(|_| {
                CoreError::illegal_argument(format!(
                    "collection '{}' has no ids left to allocate",
                    self.schema().name
                ))
            })
    }

    /// Keeps allocation ahead of an explicitly used id.
    pub(crate) fn observe_id(&self, id: i64) {
        self.last_id.fetch_max(id, Ordering::Relaxed);
    }

    /// Applies committed writes at `seq`, recording what changed.
    pub(crate) fn apply(
        &self,
        seq: SequenceNumber,
        pending: PendingCollection,
        changes: &mut Vec<Change>,
    ) {
        let mut table = self.table.write();
        let mut uniques = self.uniques.write();

        if pending.cleared {
            let ids: Vec<i64> = table.live_ids().collect();
            for id in ids {
                if let Some(old) = table.apply(id, seq, None) {
                    changes.push(Change {
                        collection: self.index,
                        id,
                        old: Some(old),
                        new: None,
                    });
                }
            }
            for unique in uniques.iter_mut() {
                unique.owners.clear();
            }
        }

        for (id, body) in pending.writes {
            let old = table.apply(id, seq, body.clone());
            if old.is_none() && body.is_none() {
                continue;
            }
            self.observe_id(id);
            self.reindex(&mut uniques, id, old.as_deref(), body.as_deref());
            changes.push(Change {
                collection: self.index,
                id,
                old,
                new: body,
            });
        }
    }

    fn reindex(&self, uniques: &mut [UniqueIndex], id: i64, old: Option<&[u8]>, new: Option<&[u8]>) {
        if uniques.is_empty() {
            return;
        }
        let keys = |body: Option<&[u8]>| match body.map(|b| self.reader(id, b)) {
            Some(Ok(reader)) => Self::unique_keys(uniques, &reader),
            Some(Err(err)) => {
                warn!(collection = self.index, id, error = %err, "unreadable body skipped by unique index");
                Vec::new()
            }
            None => Vec::new(),
        };
        let old_keys = keys(old);
        let new_keys = keys(new);
        for (unique, key) in uniques.iter_mut().zip(old_keys) {
            if let Some(key) = key {
                if unique.owners.get(&key) == Some(&id) {
                    unique.owners.remove(&key);
                }
            }
        }
        for (unique, key) in uniques.iter_mut().zip(new_keys) {
            if let Some(key) = key {
                unique.owners.insert(key, id);
            }
        }
    }

    /// Drops versions older than `oldest` that nobody can read.
    pub(crate) fn prune(&self, oldest: SequenceNumber) {
        self.table.write().prune(oldest);
    }

    /// One `Put` per object live at `snapshot`.
    pub(crate) fn snapshot_records(&self, snapshot: SequenceNumber) -> Vec<LogRecord> {
        self.table
            .read()
            .iter(snapshot)
            .map(|(id, body)| LogRecord::Put {
                collection: self.index,
                id,
                body: Arc::clone(body),
            })
            .collect()
    }

    /// Log bytes the newest objects would take after compaction.
    pub(crate) fn live_log_bytes(&self) -> u64 {
        let table = self.table.read();
        table.live_count() as u64 * PUT_OVERHEAD + table.live_bytes()
    }

    /// Objects live at the newest commit.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.table.read().live_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TransactionManager, TxnState};

    const SCHEMA: &str = r#"[{
        "name": "User",
        "autoIncrement": true,
        "properties": [
            {"name": "email", "type": "String"},
            {"name": "age", "type": "Int"}
        ],
        "indexes": [{"name": "email", "properties": ["email"], "unique": true, "caseSensitive": false}]
    }]"#;

    struct Fixture {
        manager: Arc<TransactionManager>,
        collection: Collection,
    }

    impl Fixture {
        fn new() -> Self {
            let schema = Arc::new(InstanceSchema::from_json(SCHEMA).unwrap());
            Self {
                manager: Arc::new(TransactionManager::new(SequenceNumber(0))),
                collection: Collection::new(schema, 0),
            }
        }

        fn body(&self, email: Option<&str>, age: i32) -> Body {
            let schema = self.collection.instance_schema();
            let mut writer = ObjectWriter::for_collection(schema, 0).unwrap();
            if let Some(email) = email {
                writer.write_string(0, email).unwrap();
            }
            writer.write_int(1, age).unwrap();
            Arc::from(writer.finish().unwrap())
        }

        fn begin(&self, write: bool) -> Txn {
            Txn::begin(&self.manager, 1, write)
        }

        fn commit(&self, mut txn: Txn) -> Vec<Change> {
            let write = txn.end(TxnState::Committed).unwrap();
            let seq = self.manager.committed().next();
            let mut changes = Vec::new();
            for (_, pending) in write.pending {
                self.collection.apply(seq, pending, &mut changes);
            }
            let oldest = self.manager.publish(seq);
            self.collection.prune(oldest);
            changes
        }
    }

    #[test]
    fn reads_merge_pending_writes() {
        let f = Fixture::new();
        let mut txn = f.begin(true);
        for id in [1, 3, 5] {
            f.collection.stage_put(&mut txn, id, f.body(None, id as i32), 1024).unwrap();
        }
        f.commit(txn);

        let mut txn = f.begin(true);
        f.collection.stage_put(&mut txn, 2, f.body(None, 2), 1024).unwrap();
        assert!(f.collection.stage_delete(&mut txn, 3).unwrap());
        assert!(!f.collection.stage_delete(&mut txn, 4).unwrap());

        let mut ids = Vec::new();
        let mut cursor = None;
        while let Some((id, _)) = f.collection.next(&txn, cursor) {
            ids.push(id);
            cursor = Some(id);
        }
        assert_eq!(ids, vec![1, 2, 5]);
        assert_eq!(f.collection.count(&txn), 3);
        assert!(f.collection.lookup(&txn, 3).is_none());

        let reader = f.begin(false);
        assert_eq!(f.collection.count(&reader), 3);
        assert!(f.collection.lookup(&reader, 3).is_some());
    }

    #[test]
    fn clear_hides_committed_objects() {
        let f = Fixture::new();
        let mut txn = f.begin(true);
        f.collection.stage_put(&mut txn, 1, f.body(None, 1), 1024).unwrap();
        f.commit(txn);

        let mut txn = f.begin(true);
        f.collection.stage_clear(&mut txn).unwrap();
        f.collection.stage_put(&mut txn, 9, f.body(None, 9), 1024).unwrap();
        assert_eq!(f.collection.count(&txn), 1);
        let changes = f.commit(txn);
        assert_eq!(changes.len(), 2);
        assert_eq!(f.collection.live_count(), 1);
    }

    #[test]
    fn unique_keys_conflict_case_insensitively() {
        let f = Fixture::new();
        let mut txn = f.begin(true);
        f.collection
            .stage_put(&mut txn, 1, f.body(Some("a@x"), 1), 1024)
            .unwrap();
        let err = f
            .collection
            .stage_put(&mut txn, 2, f.body(Some("A@X"), 2), 1024)
            .unwrap_err();
        assert!(matches!(err, CoreError::UniqueViolated { ref index, .. } if index == "email"));

        f.collection.stage_put(&mut txn, 3, f.body(None, 3), 1024).unwrap();
        f.collection.stage_put(&mut txn, 4, f.body(None, 4), 1024).unwrap();
        f.commit(txn);

        let mut txn = f.begin(true);
        assert!(f
            .collection
            .stage_put(&mut txn, 5, f.body(Some("a@x"), 5), 1024)
            .is_err());
        f.collection.stage_delete(&mut txn, 1).unwrap();
        f.collection
            .stage_put(&mut txn, 5, f.body(Some("a@x"), 5), 1024)
            .unwrap();
        f.collection
            .stage_put(&mut txn, 1, f.body(Some("b@x"), 1), 1024)
            .unwrap();
        f.commit(txn);
    }

    #[test]
    fn oversized_objects_are_rejected() {
        let f = Fixture::new();
        let mut txn = f.begin(true);
        let body = f.body(Some("long address"), 1);
        let err = f.collection.stage_put(&mut txn, 1, body, 4).unwrap_err();
        assert!(matches!(err, CoreError::ObjectLimitReached { limit: 4, .. }));
    }

    #[test]
    fn ids_allocate_past_observed() {
        let f = Fixture::new();
        assert_eq!(f.collection.allocate_id().unwrap(), 1);
        f.collection.observe_id(10);
        assert_eq!(f.collection.allocate_id().unwrap(), 11);
        f.collection.observe_id(3);
        assert_eq!(f.collection.allocate_id().unwrap(), 12);
    }

    #[test]
    fn ids_run_out_instead_of_wrapping() {
        let f = Fixture::new();
        f.collection.observe_id(i64::MAX - 1);
        assert_eq!(f.collection.allocate_id().unwrap(), i64::MAX);
        assert!(matches!(
            f.collection.allocate_id(),
            Err(CoreError::IllegalArgument { .. })
        ));

        let f = Fixture::new();
        f.collection.observe_id(i64::MAX);
        assert!(f.collection.allocate_id().is_err());
        assert!(f.collection.allocate_id().is_err());
    }

    #[test]
    fn updates_patch_visible_objects() {
        let f = Fixture::new();
        let mut txn = f.begin(true);
        f.collection.stage_put(&mut txn, 1, f.body(Some("a@x"), 30), 1024).unwrap();
        let patch = [(1u16, Some(Value::Integer(31)))];
        assert!(f.collection.stage_update(&mut txn, 1, &patch, 1024).unwrap());
        assert!(!f.collection.stage_update(&mut txn, 2, &patch, 1024).unwrap());

        let body = f.collection.lookup(&txn, 1).unwrap();
        let reader = f.collection.reader(1, &body).unwrap();
        assert_eq!(reader.read_int(1), Some(31));
        assert_eq!(reader.read_string(0), Some(("a@x", true)));
    }
}
