//! Change notifications.
//!
//! Watches subscribe a sink to changes of a collection, a single object or
//! the results of a query. Commits hand their change set to a per-instance
//! dispatcher thread, which works out which watches fire and delivers one
//! [`WatchEvent`] per fired watch and collection. Committers never wait for
//! delivery.
//!
//! Query watches re-run the query filter against the old and the new
//! version of every changed object and fire if either matches.
//!
//! [`Watches::stop`] waits for a delivery in progress, so a stopped watch
//! receives nothing once `stop` has returned. Sinks run without the
//! registry locked and may stop watches, their own included; such a stop
//! does not wait and takes effect before the next event is handed out.

mod dispatcher;

use crate::error::{CoreError, CoreResult};
use crate::query::Query;
use crate::table::Body;
use crate::types::{CollectionIndex, InstanceId};
use dispatcher::Dispatcher;
use objdb_codec::InstanceSchema;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use tracing::debug;

/// One committed change.
#[derive(Debug, Clone)]
pub(crate) struct Change {
    pub collection: CollectionIndex,
    pub id: i64,
    pub old: Option<Body>,
    pub new: Option<Body>,
}

/// Notification that a watched scope changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    /// Port the watch was registered with.
    pub port: i64,
    /// Collection that changed.
    pub collection: CollectionIndex,
    /// Ids that changed, ascending.
    pub ids: Vec<i64>,
}

/// Receives watch events on the dispatcher thread.
///
/// A sink may stop watches or close the instance from `deliver`.
pub trait WatchSink: Send + Sync {
    /// Delivers `event`. Returning `false` removes the watch.
    fn deliver(&self, event: WatchEvent) -> bool;
}

impl WatchSink for Sender<WatchEvent> {
    fn deliver(&self, event: WatchEvent) -> bool {
        self.send(event).is_ok()
    }
}

/// What a watch observes.
#[derive(Debug, Clone)]
pub(crate) enum WatchScope {
    Collection(CollectionIndex),
    Object(CollectionIndex, i64),
    Query(Arc<Query>),
}

/// A registered watch.
pub(crate) struct Watch {
    scope: WatchScope,
    port: i64,
    sink: Box<dyn WatchSink>,
    /// Set when the watch is removed; checked before every delivery.
    stopped: AtomicBool,
}

/// Identifies a registered watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchHandle {
    id: u64,
    instance_id: InstanceId,
}

impl WatchHandle {
    /// Registration number, unique per instance.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Instance the watch belongs to.
    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }
}

/// Registered watches, shared with the dispatcher.
#[derive(Default)]
struct Registry {
    watches: RwLock<HashMap<u64, Arc<Watch>>>,
    /// Held while a change set is handed to sinks.
    delivering: Mutex<()>,
}

/// The watches of one instance and their dispatcher.
pub(crate) struct Watches {
    instance_id: InstanceId,
    schema: Arc<InstanceSchema>,
    registry: Arc<Registry>,
    next_id: AtomicU64,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl Watches {
    pub fn new(instance_id: InstanceId, schema: Arc<InstanceSchema>) -> Self {
        Self {
            instance_id,
            schema,
            registry: Arc::default(),
            next_id: AtomicU64::new(1),
            dispatcher: Mutex::new(None),
        }
    }

    /// Registers a watch, starting the dispatcher on first use.
    pub fn register(
        &self,
        scope: WatchScope,
        port: i64,
        sink: Box<dyn WatchSink>,
    ) -> CoreResult<WatchHandle> {
        {
            let mut dispatcher = self.dispatcher.lock();
            if dispatcher.is_none() {
                *dispatcher = Some(Dispatcher::spawn(
                    self.instance_id,
                    Arc::clone(&self.schema),
                    Arc::clone(&self.registry),
                )?);
            }
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(instance = self.instance_id, watch = id, ?scope, port, "watch registered");
        let watch = Watch {
            scope,
            port,
            sink,
            stopped: AtomicBool::new(false),
        };
        self.registry.watches.write().insert(id, Arc::new(watch));
        Ok(WatchHandle {
            id,
            instance_id: self.instance_id,
        })
    }

    /// Removes a watch. Unknown handles are ignored.
    ///
    /// Waits for a delivery in progress unless called from a sink.
    ///
    /// # Errors
    ///
    /// [`CoreError::InstanceMismatch`] for a handle of another instance.
    pub fn stop(&self, handle: WatchHandle) -> CoreResult<()> {
        if handle.instance_id != self.instance_id {
            return Err(CoreError::InstanceMismatch {
                expected: self.instance_id,
                actual: handle.instance_id,
            });
        }
        let Some(watch) = self.registry.watches.write().remove(&handle.id) else {
            return Ok(());
        };
        watch.stopped.store(true, Ordering::Release);
        if !dispatcher::on_dispatcher() {
            drop(self.registry.delivering.lock());
        }
        debug!(instance = self.instance_id, watch = handle.id, "watch stopped");
        Ok(())
    }

    /// Number of registered watches.
    pub fn len(&self) -> usize {
        self.registry.watches.read().len()
    }

    /// Queues the changes of one commit for delivery.
    pub fn notify(&self, changes: Vec<Change>) {
        if changes.is_empty() || self.registry.watches.read().is_empty() {
            return;
        }
        if let Some(dispatcher) = self.dispatcher.lock().as_ref() {
            dispatcher.send(changes);
        }
    }

    /// Drops every watch and stops the dispatcher.
    pub fn close(&self) {
        for (_, watch) in self.registry.watches.write().drain() {
            watch.stopped.store(true, Ordering::Release);
        }
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.shutdown();
        }
    }
}

impl std::fmt::Debug for Watches {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watches")
            .field("instance_id", &self.instance_id)
            .field("watches", &self.len())
            .field("dispatching", &self.dispatcher.lock().is_some())
            .finish()
    }
}

impl Drop for Watches {
    fn drop(&mut self) {
        self.close();
    }
}

impl WatchScope {
    /// Ids of `changes` this scope observes, grouped by collection.
    fn matching(&self, schema: &InstanceSchema, changes: &[Change]) -> Vec<(CollectionIndex, Vec<i64>)> {
        let mut ids: Vec<i64> = match self {
            Self::Collection(collection) => changes
                .iter()
                .filter(|c| c.collection == *collection)
                .map(|c| c.id)
                .collect(),
            Self::Object(collection, id) => changes
                .iter()
                .filter(|c| c.collection == *collection && c.id == *id)
                .map(|c| c.id)
                .collect(),
            Self::Query(query) => changes
                .iter()
                .filter(|c| c.collection == query.collection())
                .filter(|c| {
                    [&c.old, &c.new]
                        .into_iter()
                        .flatten()
                        .any(|body| matches_query(schema, query, c.id, body))
                })
                .map(|c| c.id)
                .collect(),
        };
        if ids.is_empty() {
            return Vec::new();
        }
        let collection = match self {
            Self::Collection(c) | Self::Object(c, _) => *c,
            Self::Query(q) => q.collection(),
        };
        ids.sort_unstable();
        ids.dedup();
        vec![(collection, ids)]
    }
}

/// Whether `body` passes the filter of `query`. Unreadable bodies count as
/// matches.
fn matches_query(schema: &InstanceSchema, query: &Query, id: i64, body: &[u8]) -> bool {
    match objdb_codec::ObjectReader::new(id, body, schema, usize::from(query.collection())) {
        Ok(reader) => query.accepts(&reader),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Filter;
    use crate::query::QueryBuilder;
    use objdb_codec::ObjectWriter;
    use std::sync::mpsc;
    use std::time::Duration;

    fn schema() -> Arc<InstanceSchema> {
        Arc::new(
            InstanceSchema::from_json(
                r#"[{"name": "Item", "properties": [{"name": "n", "type": "Long"}]},
                    {"name": "Other", "properties": [{"name": "n", "type": "Long"}]}]"#,
            )
            .unwrap(),
        )
    }

    fn body(schema: &InstanceSchema, n: i64) -> Body {
        let mut w = ObjectWriter::for_collection(schema, 0).unwrap();
        w.write_long(0, n).unwrap();
        Arc::from(w.finish().unwrap())
    }

    fn change(schema: &InstanceSchema, collection: u16, id: i64, old: Option<i64>, new: Option<i64>) -> Change {
        Change {
            collection,
            id,
            old: old.map(|n| body(schema, n)),
            new: new.map(|n| body(schema, n)),
        }
    }

    #[test]
    fn scopes_select_changes() {
        let schema = schema();
        let changes = vec![
            change(&schema, 0, 2, None, Some(5)),
            change(&schema, 0, 1, Some(50), None),
            change(&schema, 1, 1, None, Some(5)),
        ];
        assert_eq!(
            WatchScope::Collection(0).matching(&schema, &changes),
            vec![(0, vec![1, 2])]
        );
        assert_eq!(
            WatchScope::Object(1, 1).matching(&schema, &changes),
            vec![(1, vec![1])]
        );
        assert!(WatchScope::Object(1, 2).matching(&schema, &changes).is_empty());

        let mut builder = QueryBuilder::new(1, Arc::clone(&schema), 0);
        builder.set_filter(Filter::greater(0, 10));
        let query = Arc::new(builder.build().unwrap());
        assert_eq!(
            WatchScope::Query(query).matching(&schema, &changes),
            vec![(0, vec![1])]
        );
    }

    #[test]
    fn events_reach_sinks_until_stopped() {
        let schema = schema();
        let watches = Watches::new(1, Arc::clone(&schema));
        let (tx, rx) = mpsc::channel();
        let handle = watches
            .register(WatchScope::Collection(0), 42, Box::new(tx))
            .unwrap();

        watches.notify(vec![change(&schema, 0, 7, None, Some(1))]);
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            event,
            WatchEvent {
                port: 42,
                collection: 0,
                ids: vec![7]
            }
        );

        watches.stop(handle).unwrap();
        assert_eq!(watches.len(), 0);
        watches.notify(vec![change(&schema, 0, 8, None, Some(1))]);
        watches.close();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let schema = schema();
        let mine = Watches::new(1, Arc::clone(&schema));
        let theirs = Watches::new(2, schema);
        let (tx, _rx) = mpsc::channel();
        let handle = theirs
            .register(WatchScope::Collection(0), 1, Box::new(tx))
            .unwrap();
        assert!(matches!(
            mine.stop(handle),
            Err(CoreError::InstanceMismatch {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn disconnected_sinks_are_dropped() {
        let schema = schema();
        let watches = Watches::new(1, Arc::clone(&schema));
        let (tx, rx) = mpsc::channel();
        watches
            .register(WatchScope::Collection(0), 1, Box::new(tx))
            .unwrap();
        drop(rx);
        watches.notify(vec![change(&schema, 0, 1, None, Some(1))]);
        for _ in 0..500 {
            if watches.len() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(watches.len(), 0);
    }

    /// Stops its own watch from inside `deliver`.
    struct StopsItself {
        watches: std::sync::Weak<Watches>,
        handle: Arc<std::sync::OnceLock<WatchHandle>>,
        events: mpsc::Sender<WatchEvent>,
    }

    impl WatchSink for StopsItself {
        fn deliver(&self, event: WatchEvent) -> bool {
            if let (Some(watches), Some(handle)) = (self.watches.upgrade(), self.handle.get()) {
                watches.stop(*handle).unwrap();
            }
            self.events.send(event).is_ok()
        }
    }

    #[test]
    fn sinks_can_stop_their_own_watch() {
        let schema = schema();
        let watches = Arc::new(Watches::new(1, Arc::clone(&schema)));
        let handle = Arc::new(std::sync::OnceLock::new());
        let (tx, rx) = mpsc::channel();
        let sink = StopsItself {
            watches: Arc::downgrade(&watches),
            handle: Arc::clone(&handle),
            events: tx,
        };
        let registered = watches
            .register(WatchScope::Collection(0), 3, Box::new(sink))
            .unwrap();
        handle.set(registered).unwrap();

        watches.notify(vec![change(&schema, 0, 1, None, Some(1))]);
        watches.notify(vec![change(&schema, 0, 2, None, Some(1))]);
        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event.ids, vec![1]);
        assert_eq!(watches.len(), 0);

        watches.close();
        assert!(rx.try_recv().is_err());
    }
}
