//! Bulk insert sessions.

use crate::collection::Collection;
use crate::error::{CoreError, CoreResult};
use crate::transaction::Txn;
use objdb_codec::ObjectWriter;
use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Inserts up to `count` objects into one collection.
///
/// Each [`InsertWriter`] handed out by [`Self::writer`] stores one object
/// when saved; dropping it unsaved discards only that object.
#[derive(Debug)]
pub struct InsertSession<'i> {
    collection: &'i Collection,
    txn: &'i mut Txn,
    remaining: u32,
    max_object_size: usize,
    batch: HashSet<i64>,
}

impl<'i> InsertSession<'i> {
    pub(crate) fn new(
        collection: &'i Collection,
        txn: &'i mut Txn,
        count: u32,
        max_object_size: usize,
    ) -> CoreResult<Self> {
        txn.write_state()?;
        Ok(Self {
            collection,
            txn,
            remaining: count,
            max_object_size,
            batch: HashSet::new(),
        })
    }

    /// Writers still available.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Ids saved so far.
    #[must_use]
    pub fn saved(&self) -> usize {
        self.batch.len()
    }

    /// Starts the next object.
    ///
    /// # Errors
    ///
    /// [`CoreError::IllegalArgument`] once `count` writers were handed out,
    /// [`CoreError::TransactionClosed`] if the transaction ended.
    pub fn writer(&mut self) -> CoreResult<InsertWriter<'_, 'i>> {
        self.txn.check_active()?;
        if self.remaining == 0 {
            return Err(CoreError::illegal_argument(
                "insert session has no writers left",
            ));
        }
        self.remaining -= 1;
        let collection = self.collection;
        Ok(InsertWriter {
            writer: ObjectWriter::new(collection.instance_schema(), collection.schema())
                .with_max_size(self.max_object_size),
            session: self,
        })
    }

    fn save(&mut self, writer: ObjectWriter<'i>, id: Option<i64>) -> CoreResult<i64> {
        self.txn.write_state()?;
        let collection = self.collection;
        let id = match id {
            Some(id) => id,
            None if collection.schema().auto_increment => collection.allocate_id()?,
            None => {
                return Err(CoreError::illegal_argument(format!(
                    "collection '{}' does not allocate ids",
                    collection.schema().name
                )));
            }
        };
        if self.batch.contains(&id) {
            return Err(CoreError::UniqueViolated {
                collection: collection.schema().name.clone(),
                index: collection.schema().id_name.clone(),
            });
        }
        let body = writer.finish()?;
        collection.stage_put(self.txn, id, Arc::from(body), self.max_object_size)?;
        collection.observe_id(id);
        self.batch.insert(id);
        Ok(id)
    }
}

/// Writer for one object of an [`InsertSession`]. Dereferences to the
/// underlying [`ObjectWriter`].
#[derive(Debug)]
pub struct InsertWriter<'s, 'i> {
    session: &'s mut InsertSession<'i>,
    writer: ObjectWriter<'i>,
}

impl InsertWriter<'_, '_> {
    /// Stores the object under `id`, or a freshly allocated id for
    /// auto-increment collections.
    ///
    /// # Errors
    ///
    /// [`CoreError::UniqueViolated`] if `id` was already saved in this
    /// session or a unique key is taken, [`CoreError::ObjectLimitReached`]
    /// for oversized objects (both abort the transaction), codec errors
    /// for missing required properties.
    pub fn save(self, id: Option<i64>) -> CoreResult<i64> {
        let Self { session, writer } = self;
        let result = session.save(writer, id);
        session.txn.settle(result)
    }
}

impl<'i> Deref for InsertWriter<'_, 'i> {
    type Target = ObjectWriter<'i>;

    fn deref(&self) -> &Self::Target {
        &self.writer
    }
}

impl DerefMut for InsertWriter<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.writer
    }
}
