//! Collection, query and watch operations of an open instance.

use super::Instance;
use crate::collection::{Collection, InsertSession};
use crate::error::{CoreError, CoreResult};
use crate::object::ObjectRef;
use crate::query::{self, AggregationKind, Cursor, Query, QueryBuilder};
use crate::transaction::{Txn, TxnState};
use crate::types::CollectionIndex;
use crate::watch::{WatchHandle, WatchScope, WatchSink};
use objdb_codec::{json_id, Value};
use serde_json::Value as Json;
use std::sync::Arc;
use tracing::debug;

/// A partial update: property positions and their new values, `None`
/// writing null.
pub type Patch = [(u16, Option<Value>)];

impl Instance {
    /// Object `id` as seen by `txn`.
    ///
    /// # Errors
    ///
    /// Fails for an unknown collection or an ended transaction.
    pub fn get(&self, txn: &Txn, collection: CollectionIndex, id: i64) -> CoreResult<Option<ObjectRef>> {
        let collection = self.collection_for(txn, collection)?;
        Ok(collection
            .lookup(txn, id)
            .map(|body| collection.object(id, body)))
    }

    /// Opens an insert session for up to `count` objects.
    ///
    /// # Errors
    ///
    /// [`CoreError::WriteTxnRequired`] under a read transaction.
    pub fn insert<'i>(
        &'i self,
        txn: &'i mut Txn,
        collection: CollectionIndex,
        count: u32,
    ) -> CoreResult<InsertSession<'i>> {
        let collection = self.collection_for(txn, collection)?;
        InsertSession::new(collection, txn, count, self.config.max_object_size)
    }

    /// Deletes `id`; `false` if `txn` does not see it.
    ///
    /// # Errors
    ///
    /// [`CoreError::WriteTxnRequired`] under a read transaction.
    pub fn delete(&self, txn: &mut Txn, collection: CollectionIndex, id: i64) -> CoreResult<bool> {
        let collection = self.collection_for(txn, collection)?;
        collection.stage_delete(txn, id)
    }

    /// Overwrites the properties named in `patch`, keeping the rest;
    /// `false` if `txn` does not see `id`.
    ///
    /// # Errors
    ///
    /// [`CoreError::UniqueViolated`] and [`CoreError::ObjectLimitReached`]
    /// abort the transaction. Values that do not fit their property fail
    /// with [`CoreError::IllegalArgument`].
    pub fn update(
        &self,
        txn: &mut Txn,
        collection: CollectionIndex,
        id: i64,
        patch: &Patch,
    ) -> CoreResult<bool> {
        let collection = self.collection_for(txn, collection)?;
        let result = collection.stage_update(txn, id, patch, self.config.max_object_size);
        txn.settle(result)
    }

    /// Number of objects `txn` sees.
    ///
    /// # Errors
    ///
    /// Fails for an unknown collection or an ended transaction.
    pub fn count(&self, txn: &Txn, collection: CollectionIndex) -> CoreResult<u32> {
        let collection = self.collection_for(txn, collection)?;
        Ok(u32::try_from(collection.count(txn)).unwrap_or(u32::MAX))
    }

    /// Deletes every object of the collection.
    ///
    /// # Errors
    ///
    /// [`CoreError::WriteTxnRequired`] under a read transaction.
    pub fn clear(&self, txn: &mut Txn, collection: CollectionIndex) -> CoreResult<()> {
        let collection = self.collection_for(txn, collection)?;
        collection.stage_clear(txn)
    }

    /// Bytes the visible objects occupy, optionally counting index entries.
    ///
    /// # Errors
    ///
    /// Fails for an unknown collection or an ended transaction.
    pub fn size(&self, txn: &Txn, collection: CollectionIndex, include_indexes: bool) -> CoreResult<i64> {
        let collection = self.collection_for(txn, collection)?;
        collection.footprint(txn, include_indexes)
    }

    /// Inserts every object of a JSON array and returns how many were
    /// stored. Objects carrying the id property keep their id.
    ///
    /// # Errors
    ///
    /// [`CoreError::Json`] for malformed text, non-object elements or
    /// values that do not fit the schema. Once objects have been staged,
    /// any failure aborts the transaction so none of them can be committed.
    pub fn import_json(&self, txn: &mut Txn, collection: CollectionIndex, json: &str) -> CoreResult<u32> {
        let parsed: Json = serde_json::from_str(json).map_err(|e| CoreError::Json {
            message: e.to_string(),
        })?;
        let Json::Array(items) = parsed else {
            return Err(CoreError::Json {
                message: "expected an array of objects".into(),
            });
        };
        let count = u32::try_from(items.len())
            .map_err(|_| CoreError::illegal_argument("too many objects"))?;

        let staged = {
            let mut session = self.insert(txn, collection, count)?;
            Self::stage_json(&mut session, &items)
        };
        if let Err(err) = staged {
            debug!(instance = self.id, collection, error = %err, "import failed, transaction aborted");
            txn.end(TxnState::Aborted);
            return Err(err);
        }
        debug!(instance = self.id, collection, count, "imported json");
        Ok(count)
    }

    fn stage_json(session: &mut InsertSession<'_>, items: &[Json]) -> CoreResult<()> {
        for item in items {
            let Json::Object(map) = item else {
                return Err(CoreError::Json {
                    message: format!("expected an object, got {item}"),
                });
            };
            let mut writer = session.writer()?;
            let id = json_id(writer.collection(), map)?;
            writer.write_json(map)?;
            writer.save(id)?;
        }
        Ok(())
    }

    /// Every visible object of the collection as a JSON array, in id order.
    ///
    /// # Errors
    ///
    /// Fails for an unknown collection or an ended transaction.
    pub fn export_json(&self, txn: &Txn, collection: CollectionIndex) -> CoreResult<String> {
        let query = self.query(collection)?.build()?;
        self.query_export_json(txn, &query, 0, None)
    }

    /// Starts a query over `collection`.
    ///
    /// # Errors
    ///
    /// [`CoreError::IllegalArgument`] for unknown or embedded collections.
    pub fn query(&self, collection: CollectionIndex) -> CoreResult<QueryBuilder> {
        self.ensure_open()?;
        self.collection(collection)?;
        Ok(QueryBuilder::new(self.id, Arc::clone(&self.schema), collection))
    }

    /// Collection `query` runs over, after checking it belongs here.
    fn query_collection(&self, txn: &Txn, query: &Query) -> CoreResult<&Collection> {
        if query.instance_id() != self.id {
            return Err(CoreError::InstanceMismatch {
                expected: self.id,
                actual: query.instance_id(),
            });
        }
        self.collection_for(txn, query.collection())
    }

    /// Iterates the `offset`/`limit` window of the results of `query`.
    ///
    /// # Errors
    ///
    /// [`CoreError::InstanceMismatch`] if `query` or `txn` belongs to
    /// another instance.
    pub fn cursor<'t>(
        &'t self,
        txn: &'t Txn,
        query: &Query,
        offset: u32,
        limit: Option<u32>,
    ) -> CoreResult<Cursor<'t>> {
        let collection = self.query_collection(txn, query)?;
        Cursor::open(collection, txn, query, offset, limit)
    }

    /// Aggregates over every result of `query`.
    ///
    /// # Errors
    ///
    /// [`CoreError::IllegalArgument`] for a missing or unsuitable property.
    pub fn aggregate(
        &self,
        txn: &Txn,
        query: &Query,
        kind: AggregationKind,
        property: Option<u16>,
    ) -> CoreResult<Option<Value>> {
        let collection = self.query_collection(txn, query)?;
        query::aggregate(collection, txn, query, kind, property)
    }

    /// Ids in the `offset`/`limit` window of `query`.
    fn window_ids(&self, txn: &Txn, query: &Query, offset: u32, limit: Option<u32>) -> CoreResult<Vec<i64>> {
        self.cursor(txn, query, offset, limit)?
            .map(|object| object.map(|o| o.id()))
            .collect()
    }

    /// Deletes the `offset`/`limit` window of the results of `query` and
    /// returns how many objects were removed.
    ///
    /// # Errors
    ///
    /// [`CoreError::WriteTxnRequired`] under a read transaction.
    pub fn query_delete(
        &self,
        txn: &mut Txn,
        query: &Query,
        offset: u32,
        limit: Option<u32>,
    ) -> CoreResult<u32> {
        txn.write_state()?;
        let ids = self.window_ids(txn, query, offset, limit)?;
        let collection = self.query_collection(txn, query)?;
        let mut deleted = 0;
        for id in ids {
            if collection.stage_delete(txn, id)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Applies `patch` to the `offset`/`limit` window of the results of
    /// `query` and returns how many objects changed.
    ///
    /// # Errors
    ///
    /// As [`Self::update`].
    pub fn query_update(
        &self,
        txn: &mut Txn,
        query: &Query,
        offset: u32,
        limit: Option<u32>,
        patch: &Patch,
    ) -> CoreResult<u32> {
        txn.write_state()?;
        let ids = self.window_ids(txn, query, offset, limit)?;
        let collection = self.query_collection(txn, query)?;
        let max = self.config.max_object_size;
        let result = ids.into_iter().try_fold(0u32, |updated, id| {
            Ok(updated + u32::from(collection.stage_update(txn, id, patch, max)?))
        });
        txn.settle(result)
    }

    /// The `offset`/`limit` window of the results of `query` as a JSON
    /// array.
    ///
    /// # Errors
    ///
    /// Fails if an object body is damaged.
    pub fn query_export_json(
        &self,
        txn: &Txn,
        query: &Query,
        offset: u32,
        limit: Option<u32>,
    ) -> CoreResult<String> {
        let objects = self
            .cursor(txn, query, offset, limit)?
            .map(|object| object?.to_json())
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Json::Array(objects).to_string())
    }

    /// Delivers an event to `sink` after every commit that changes the
    /// collection.
    ///
    /// # Errors
    ///
    /// Fails for unknown collections, after close, or if the dispatcher
    /// thread cannot start.
    pub fn watch_collection(
        &self,
        collection: CollectionIndex,
        port: i64,
        sink: Box<dyn WatchSink>,
    ) -> CoreResult<WatchHandle> {
        self.ensure_open()?;
        self.collection(collection)?;
        self.watches
            .register(WatchScope::Collection(collection), port, sink)
    }

    /// Delivers an event to `sink` after every commit that changes object
    /// `id`.
    ///
    /// # Errors
    ///
    /// As [`Self::watch_collection`].
    pub fn watch_object(
        &self,
        collection: CollectionIndex,
        id: i64,
        port: i64,
        sink: Box<dyn WatchSink>,
    ) -> CoreResult<WatchHandle> {
        self.ensure_open()?;
        self.collection(collection)?;
        self.watches
            .register(WatchScope::Object(collection, id), port, sink)
    }

    /// Delivers an event to `sink` after every commit that changes an
    /// object matching the filter of `query`, before or after the change.
    ///
    /// # Errors
    ///
    /// [`CoreError::InstanceMismatch`] for a query of another instance.
    pub fn watch_query(&self, query: &Query, port: i64, sink: Box<dyn WatchSink>) -> CoreResult<WatchHandle> {
        self.ensure_open()?;
        if query.instance_id() != self.id {
            return Err(CoreError::InstanceMismatch {
                expected: self.id,
                actual: query.instance_id(),
            });
        }
        self.watches
            .register(WatchScope::Query(Arc::new(query.clone())), port, sink)
    }

    /// Removes a watch. Nothing is delivered to it once this returns.
    /// Stopping after close succeeds, since close already removed every
    /// watch.
    ///
    /// # Errors
    ///
    /// [`CoreError::InstanceMismatch`] for a handle of another instance.
    pub fn stop_watching(&self, handle: WatchHandle) -> CoreResult<()> {
        self.watches.stop(handle)
    }

    /// Number of registered watches.
    #[must_use]
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }
}
