//! Multi-version object table of one collection.
//!
//! Every id maps to its versions in commit order. A reader at snapshot `s`
//! sees the newest version with `seq <= s`; a version without a body is a
//! tombstone. Old versions are pruned once no snapshot can see them.

use crate::types::SequenceNumber;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;

/// Encoded object body shared between the table, cursors and the log.
pub type Body = Arc<[u8]>;

#[derive(Debug, Clone)]
struct Version {
    seq: SequenceNumber,
    body: Option<Body>,
}

/// Versioned rows ordered by id.
#[derive(Debug, Default)]
pub struct VersionedTable {
    rows: BTreeMap<i64, Vec<Version>>,
    /// Ids holding more than one version or a tombstone.
    dirty: BTreeSet<i64>,
    live: usize,
    live_bytes: u64,
}

fn visible(versions: &[Version], snapshot: SequenceNumber) -> Option<&Body> {
    versions
        .iter()
        .rev()
        .find(|v| v.seq <= snapshot)
        .and_then(|v| v.body.as_ref())
}

impl VersionedTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Body of `id` as seen at `snapshot`.
    #[must_use]
    pub fn get(&self, id: i64, snapshot: SequenceNumber) -> Option<&Body> {
        self.rows.get(&id).and_then(|v| visible(v, snapshot))
    }

    /// Newest body of `id`.
    #[must_use]
    pub fn latest(&self, id: i64) -> Option<&Body> {
        self.rows
            .get(&id)
            .and_then(|v| v.last())
            .and_then(|v| v.body.as_ref())
    }

    /// First object after `after` (or from the start) visible at `snapshot`.
    #[must_use]
    pub fn next_visible(
        &self,
        after: Option<i64>,
        snapshot: SequenceNumber,
    ) -> Option<(i64, &Body)> {
        let lower = after.map_or(Bound::Unbounded, Bound::Excluded);
        self.rows
            .range((lower, Bound::Unbounded))
            .find_map(|(id, versions)| visible(versions, snapshot).map(|b| (*id, b)))
    }

    /// Records a new version of `id` committed at `seq`; `None` deletes.
    ///
    /// Returns the body it replaced.
    pub fn apply(&mut self, id: i64, seq: SequenceNumber, body: Option<Body>) -> Option<Body> {
        let previous = self.latest(id).cloned();
        if previous.is_none() && body.is_none() {
            return None;
        }
        if let Some(old) = &previous {
            self.live -= 1;
            self.live_bytes -= old.len() as u64;
        }
        if let Some(new) = &body {
            self.live += 1;
            self.live_bytes += new.len() as u64;
        }

        let versions = self.rows.entry(id).or_default();
        versions.push(Version { seq, body });
        if versions.len() > 1 || versions[0].body.is_none() {
            self.dirty.insert(id);
        }
        previous
    }

    /// Drops versions no snapshot at or after `oldest` can see.
    pub fn prune(&mut self, oldest: SequenceNumber) {
        let mut settled = Vec::new();
        for id in &self.dirty {
            let Some(versions) = self.rows.get_mut(id) else {
                settled.push(*id);
                continue;
            };
            if let Some(keep_from) = versions.iter().rposition(|v| v.seq <= oldest) {
                versions.drain(..keep_from);
            }
            match versions.as_slice() {
                [only] if only.body.is_none() && only.seq <= oldest => {
                    self.rows.remove(id);
                    settled.push(*id);
                }
                [only] if only.body.is_some() => settled.push(*id),
                _ => {}
            }
        }
        for id in settled {
            self.dirty.remove(&id);
        }
    }

    /// Live objects at `snapshot`, in id order.
    pub fn iter(&self, snapshot: SequenceNumber) -> impl Iterator<Item = (i64, &Body)> + '_ {
        self.rows
            .iter()
            .filter_map(move |(id, versions)| visible(versions, snapshot).map(|b| (*id, b)))
    }

    /// Ids live at the newest version.
    pub fn live_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.rows
            .iter()
            .filter(|(_, v)| v.last().is_some_and(|v| v.body.is_some()))
            .map(|(id, _)| *id)
    }

    /// Number of objects live at the newest version.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live
    }

    /// Encoded bytes of the objects live at the newest version.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    /// Largest id that has ever been stored and not pruned.
    #[must_use]
    pub fn max_id(&self) -> Option<i64> {
        self.rows.keys().next_back().copied()
    }
}
