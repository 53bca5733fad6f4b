use super::{Query, Sort};
use crate::collection::Collection;
use crate::error::CoreResult;
use crate::filter::Filter;
use crate::key::{compare_fields, object_key};
use crate::object::ObjectRef;
use crate::transaction::Txn;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

enum Source {
    /// Walks the collection in id order, filtering and windowing on the fly.
    Scan {
        filter: Option<Arc<Filter>>,
        after: Option<i64>,
        skip: u32,
        remaining: Option<u32>,
        done: bool,
    },
    /// Results materialized for sorting or distinct.
    Buffered(std::vec::IntoIter<ObjectRef>),
}

/// Iterator over the results of a query in one transaction.
///
/// Borrows the transaction, so it cannot outlive it. Yields owned
/// [`ObjectRef`]s.
pub struct Cursor<'t> {
    collection: &'t Collection,
    txn: &'t Txn,
    source: Source,
}

impl<'t> Cursor<'t> {
    /// Opens a cursor over the `offset`/`limit` window of `query`.
    ///
    /// Filter-only queries stream; sorted or distinct queries collect every
    /// match up front.
    pub(crate) fn open(
        collection: &'t Collection,
        txn: &'t Txn,
        query: &Query,
        offset: u32,
        limit: Option<u32>,
    ) -> CoreResult<Self> {
        txn.check_active()?;
        let source = if query.is_ordered() {
            let results = Self::collect_ordered(collection, txn, query)?;
            let window: Vec<ObjectRef> = results
                .into_iter()
                .skip(offset as usize)
                .take(limit.map_or(usize::MAX, |l| l as usize))
                .collect();
            Source::Buffered(window.into_iter())
        } else {
            Source::Scan {
                filter: query.filter.clone(),
                after: None,
                skip: offset,
                remaining: limit,
                done: false,
            }
        };
        Ok(Self {
            collection,
            txn,
            source,
        })
    }

    /// Every match of `query`, sorted and deduplicated.
    pub(crate) fn collect_ordered(
        collection: &Collection,
        txn: &Txn,
        query: &Query,
    ) -> CoreResult<Vec<ObjectRef>> {
        let mut matches = Vec::new();
        let mut after = None;
        while let Some((id, body)) = collection.next(txn, after) {
            after = Some(id);
            if query.accepts(&collection.reader(id, &body)?) {
                matches.push(collection.object(id, body));
            }
        }

        let readers = matches
            .iter()
            .map(|o| collection.reader(o.id(), o.body()))
            .collect::<CoreResult<Vec<_>>>()?;
        let mut order: Vec<usize> = (0..matches.len()).collect();
        if !query.sort.is_empty() {
            order.sort_by(|&a, &b| {
                for spec in &query.sort {
                    let left = readers[a].read_field(spec.property);
                    let right = readers[b].read_field(spec.property);
                    let ordering = compare_fields(&left, &right, spec.case_sensitive);
                    let ordering = match spec.order {
                        Sort::Asc => ordering,
                        Sort::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }
        if !query.distinct.is_empty() {
            let key = query.distinct_key();
            let mut seen = HashSet::new();
            order.retain(|&i| seen.insert(object_key(&readers[i], &key)));
        }
        drop(readers);

        let mut slots: Vec<Option<ObjectRef>> = matches.into_iter().map(Some).collect();
        Ok(order.into_iter().filter_map(|i| slots[i].take()).collect())
    }

    fn next_scanned(&mut self) -> Option<CoreResult<ObjectRef>> {
        let Source::Scan {
            filter,
            after,
            skip,
            remaining,
            done,
        } = &mut self.source
        else {
            return None;
        };
        loop {
            if *done || *remaining == Some(0) {
                return None;
            }
            let Some((id, body)) = self.collection.next(self.txn, *after) else {
                *done = true;
                return None;
            };
            *after = Some(id);
            if let Some(filter) = filter {
                match self.collection.reader(id, &body) {
                    Ok(reader) if filter.evaluate(&reader) => {}
                    Ok(_) => continue,
                    Err(err) => {
                        *done = true;
                        return Some(Err(err));
                    }
                }
            }
            if *skip > 0 {
                *skip -= 1;
                continue;
            }
            if let Some(remaining) = remaining {
                *remaining -= 1;
            }
            return Some(Ok(self.collection.object(id, body)));
        }
    }
}

impl Iterator for Cursor<'_> {
    type Item = CoreResult<ObjectRef>;

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.source {
            Source::Buffered(results) => results.next().map(Ok),
            Source::Scan { .. } => self.next_scanned(),
        }
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match &self.source {
            Source::Scan { .. } => "scan",
            Source::Buffered(_) => "buffered",
        };
        f.debug_struct("Cursor")
            .field("collection", &self.collection.index())
            .field("txn", &self.txn.id())
            .field("mode", &mode)
            .finish()
    }
}
