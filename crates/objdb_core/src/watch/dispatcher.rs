//! Delivery thread.

use super::{Change, Registry, WatchEvent};
use crate::error::CoreResult;
use crate::types::InstanceId;
use objdb_codec::InstanceSchema;
use std::sync::mpsc::{self, Receiver, Sender};
use std::cell::Cell;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

thread_local! {
    static ON_DISPATCHER: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling thread is a watch dispatcher, i.e. a sink is
/// calling back into the instance.
pub(super) fn on_dispatcher() -> bool {
    ON_DISPATCHER.with(Cell::get)
}

/// Drains committed change sets and fans them out to the registered
/// watches.
pub(super) struct Dispatcher {
    sender: Sender<Vec<Change>>,
    thread: JoinHandle<()>,
}

impl Dispatcher {
    pub fn spawn(
        instance_id: InstanceId,
        schema: Arc<InstanceSchema>,
        registry: Arc<Registry>,
    ) -> CoreResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let thread = thread::Builder::new()
            .name(format!("objdb-watch-{instance_id}"))
            .spawn(move || run(instance_id, &receiver, &schema, &registry))?;
        debug!(instance = instance_id, "watch dispatcher started");
        Ok(Self { sender, thread })
    }

    /// Queues a change set. Never blocks.
    pub fn send(&self, changes: Vec<Change>) {
        if self.sender.send(changes).is_err() {
            warn!("watch dispatcher is gone; change set dropped");
        }
    }

    /// Delivers what is queued, then stops the thread. Called from a sink,
    /// the thread finishes on its own once the sink returns.
    pub fn shutdown(self) {
        drop(self.sender);
        if self.thread.thread().id() == thread::current().id() {
            return;
        }
        if self.thread.join().is_err() {
            warn!("watch dispatcher panicked");
        }
    }
}

fn run(
    instance_id: InstanceId,
    receiver: &Receiver<Vec<Change>>,
    schema: &InstanceSchema,
    registry: &Registry,
) {
    ON_DISPATCHER.with(|flag| flag.set(true));
    while let Ok(changes) = receiver.recv() {
        deliver(schema, registry, &changes);
    }
    debug!(instance = instance_id, "watch dispatcher stopped");
}

/// Hands the events of one change set to the sinks. The registry is not
/// locked while sinks run, so a sink may stop watches.
fn deliver(schema: &InstanceSchema, registry: &Registry, changes: &[Change]) {
    let _delivering = registry.delivering.lock();
    let watches: Vec<_> = registry
        .watches
        .read()
        .iter()
        .map(|(id, watch)| (*id, Arc::clone(watch)))
        .collect();

    let mut dead = Vec::new();
    for (id, watch) in watches {
        for (collection, ids) in watch.scope.matching(schema, changes) {
            if watch.stopped.load(Ordering::Acquire) {
                break;
            }
            let event = WatchEvent {
                port: watch.port,
                collection,
                ids,
            };
            if !watch.sink.deliver(event) {
                dead.push(id);
                break;
            }
        }
    }
    if !dead.is_empty() {
        let mut watches = registry.watches.write();
        for id in dead {
            watches.remove(&id);
            debug!(watch = id, "watch removed after its sink disconnected");
        }
    }
}
