//! Queries.
//!
//! A [`QueryBuilder`] collects a filter, sort keys and distinct keys for one
//! collection and freezes them into an immutable [`Query`]. Queries run
//! against a transaction through a [`Cursor`], an aggregation or a bulk
//! delete/update.
//!
//! Results are ordered by the sort keys, ties falling back to id order.
//! Distinct keys keep the first object of each group in that order. The
//! offset/limit window applies last.

mod aggregate;
mod cursor;

pub use aggregate::AggregationKind;
pub use cursor::Cursor;

pub(crate) use aggregate::aggregate;

use crate::error::{CoreError, CoreResult};
use crate::filter::Filter;
use crate::types::{CollectionIndex, InstanceId};
use objdb_codec::InstanceSchema;
use std::sync::Arc;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sort {
    /// Smallest first; nulls first.
    Asc,
    /// Largest first; nulls last.
    Desc,
}

/// One sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SortSpec {
    /// Property position.
    pub property: u16,
    /// Direction.
    pub order: Sort,
    /// Whether strings compare case-sensitively.
    pub case_sensitive: bool,
}

/// One distinct key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DistinctSpec {
    /// Property position.
    pub property: u16,
    /// Whether strings are compared case-sensitively.
    pub case_sensitive: bool,
}

/// A frozen query over one collection. Cheap to share between threads.
#[derive(Debug, Clone)]
pub struct Query {
    instance_id: InstanceId,
    collection: CollectionIndex,
    filter: Option<Arc<Filter>>,
    sort: Vec<SortSpec>,
    distinct: Vec<DistinctSpec>,
}

impl Query {
    /// Instance the query was built for.
    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    /// Collection the query runs over.
    #[must_use]
    pub fn collection(&self) -> CollectionIndex {
        self.collection
    }

    /// Filter, if any.
    #[must_use]
    pub fn filter(&self) -> Option<&Filter> {
        self.filter.as_deref()
    }

    /// Sort keys in priority order.
    #[must_use]
    pub fn sort(&self) -> &[SortSpec] {
        &self.sort
    }

    /// Distinct keys.
    #[must_use]
    pub fn distinct(&self) -> &[DistinctSpec] {
        &self.distinct
    }

    /// Whether results must be materialized before the first one is known.
    pub(crate) fn is_ordered(&self) -> bool {
        !self.sort.is_empty() || !self.distinct.is_empty()
    }

    pub(crate) fn distinct_key(&self) -> Vec<(u16, bool)> {
        self.distinct
            .iter()
            .map(|d| (d.property, d.case_sensitive))
            .collect()
    }

    /// Whether the object read by `reader` passes the filter.
    pub(crate) fn accepts(&self, reader: &objdb_codec::ObjectReader<'_>) -> bool {
        self.filter.as_ref().map_or(true, |f| f.evaluate(reader))
    }
}

/// Assembles a [`Query`].
#[derive(Debug)]
pub struct QueryBuilder {
    instance_id: InstanceId,
    schema: Arc<InstanceSchema>,
    collection: CollectionIndex,
    filter: Option<Filter>,
    sort: Vec<SortSpec>,
    distinct: Vec<DistinctSpec>,
}

impl QueryBuilder {
    /// Starts a query over `collection`.
    pub fn new(instance_id: InstanceId, schema: Arc<InstanceSchema>, collection: CollectionIndex) -> Self {
        Self {
            instance_id,
            schema,
            collection,
            filter: None,
            sort: Vec::new(),
            distinct: Vec::new(),
        }
    }

    /// Sets the filter, replacing any earlier one.
    pub fn set_filter(&mut self, filter: Filter) -> &mut Self {
        self.filter = Some(filter);
        self
    }

    /// Appends a sort key.
    pub fn sort_by(&mut self, property: u16, order: Sort, case_sensitive: bool) -> &mut Self {
        self.sort.push(SortSpec {
            property,
            order,
            case_sensitive,
        });
        self
    }

    /// Appends a distinct key.
    pub fn distinct_by(&mut self, property: u16, case_sensitive: bool) -> &mut Self {
        self.distinct.push(DistinctSpec {
            property,
            case_sensitive,
        });
        self
    }

    /// Validates and freezes the query.
    ///
    /// # Errors
    ///
    /// [`CoreError::IllegalArgument`] for unknown or embedded collections,
    /// unknown properties, or filters that do not fit the schema.
    pub fn build(&self) -> CoreResult<Query> {
        let collection = self.schema.collection(usize::from(self.collection))?;
        if collection.embedded {
            return Err(CoreError::illegal_argument(format!(
                "embedded collection '{}' cannot be queried",
                collection.name
            )));
        }
        let properties = self
            .sort
            .iter()
            .map(|s| s.property)
            .chain(self.distinct.iter().map(|d| d.property));
        for property in properties {
            if collection.property(property).is_none() {
                return Err(CoreError::illegal_argument(format!(
                    "collection '{}' has no property {property}",
                    collection.name
                )));
            }
        }
        if let Some(filter) = &self.filter {
            filter.validate(&self.schema, usize::from(self.collection))?;
        }
        Ok(Query {
            instance_id: self.instance_id,
            collection: self.collection,
            filter: self.filter.clone().map(Arc::new),
            sort: self.sort.clone(),
            distinct: self.distinct.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> QueryBuilder {
        let schema = InstanceSchema::from_json(
            r#"[
                {"name": "User", "properties": [
                    {"name": "name", "type": "String"},
                    {"name": "age", "type": "Int"}
                ]},
                {"name": "Tag", "embedded": true, "properties": [
                    {"name": "label", "type": "String"}
                ]}
            ]"#,
        )
        .unwrap();
        QueryBuilder::new(3, Arc::new(schema), 0)
    }

    #[test]
    fn last_filter_wins() {
        let mut b = builder();
        b.set_filter(Filter::equal(1, 1))
            .set_filter(Filter::equal(1, 2))
            .sort_by(1, Sort::Desc, true)
            .sort_by(0, Sort::Asc, false)
            .distinct_by(0, false);
        let query = b.build().unwrap();
        assert_eq!(query.filter(), Some(&Filter::equal(1, 2)));
        assert_eq!(query.sort().len(), 2);
        assert_eq!(query.sort()[0].order, Sort::Desc);
        assert_eq!(query.distinct_key(), vec![(0, false)]);
        assert_eq!(query.instance_id(), 3);
        assert!(query.is_ordered());
    }

    #[test]
    fn build_validates() {
        let mut b = builder();
        b.sort_by(7, Sort::Asc, true);
        assert!(b.build().is_err());

        let mut b = builder();
        b.set_filter(Filter::greater(0, 1));
        assert!(b.build().is_err());

        let schema = Arc::clone(&builder().schema);
        assert!(QueryBuilder::new(3, schema, 1).build().is_err());
    }
}
