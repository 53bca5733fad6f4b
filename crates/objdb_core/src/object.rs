//! Owned handles to committed or pending objects.

use crate::error::CoreResult;
use crate::table::Body;
use crate::types::CollectionIndex;
use objdb_codec::{InstanceSchema, ObjectReader};
use std::sync::Arc;

/// An object as seen by a transaction. Holds its encoded body, so it stays
/// readable after the transaction ends.
#[derive(Clone)]
pub struct ObjectRef {
    id: i64,
    collection: CollectionIndex,
    body: Body,
    schema: Arc<InstanceSchema>,
}

impl ObjectRef {
    pub(crate) fn new(
        id: i64,
        collection: CollectionIndex,
        body: Body,
        schema: Arc<InstanceSchema>,
    ) -> Self {
        Self {
            id,
            collection,
            body,
            schema,
        }
    }

    /// Object id.
    #[must_use]
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Collection the object belongs to.
    #[must_use]
    pub fn collection(&self) -> CollectionIndex {
        self.collection
    }

    /// Encoded body.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Reader over the body.
    ///
    /// # Errors
    ///
    /// Fails if the body header is damaged.
    pub fn reader(&self) -> CoreResult<ObjectReader<'_>> {
        Ok(ObjectReader::new(
            self.id,
            &self.body,
            &self.schema,
            usize::from(self.collection),
        )?)
    }

    /// JSON form, see [`ObjectReader::to_json`].
    ///
    /// # Errors
    ///
    /// Fails if the body header is damaged.
    pub fn to_json(&self) -> CoreResult<serde_json::Value> {
        Ok(self.reader()?.to_json())
    }
}

impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRef")
            .field("id", &self.id)
            .field("collection", &self.collection)
            .field("len", &self.body.len())
            .finish()
    }
}
