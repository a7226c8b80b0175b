//! Event sinks: where dispatched events go
//!
//! The dispatch loop calls every installed [`EventSink`] synchronously, in
//! installation order, on the dispatch thread. Two sinks ship with the
//! crate: [`ListenerSink`] fans out to [`WatchListener`] callbacks and
//! [`StreamSink`] feeds channel-backed [`EventStream`] subscribers.

use crate::event::{EventKind, PathWatchEvent};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Receiver of dispatched events
pub trait EventSink: Send + Sync {
    /// A buffered change was dispatched
    fn on_event(&self, event: &PathWatchEvent);

    /// A directory was added to the watched set
    fn on_path_watched(&self, _path: &Path) {}

    /// The dispatch loop exited
    fn on_stop(&self) {}
}

impl<F> EventSink for F
where
    F: Fn(&PathWatchEvent) + Send + Sync,
{
    fn on_event(&self, event: &PathWatchEvent) {
        self(event)
    }
}

/// Identifies an installed sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

/// Ordered collection of sinks owned by a watcher
#[derive(Default)]
pub(crate) struct SinkList {
    sinks: RwLock<Vec<(SinkId, Arc<dyn EventSink>)>>,
    next_id: AtomicU64,
}

impl SinkList {
    pub(crate) fn add(&self, sink: Arc<dyn EventSink>) -> SinkId {
        let id = SinkId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sinks.write().push((id, sink));
        id
    }

    pub(crate) fn remove(&self, id: SinkId) -> bool {
        let mut sinks = self.sinks.write();
        let before = sinks.len();
        sinks.retain(|(sink_id, _)| *sink_id != id);
        before != sinks.len()
    }

    pub(crate) fn emit(&self, event: &PathWatchEvent) {
        for sink in self.snapshot() {
            sink.on_event(event);
        }
    }

    pub(crate) fn path_watched(&self, path: &Path) {
        for sink in self.snapshot() {
            sink.on_path_watched(path);
        }
    }

    pub(crate) fn stopped(&self) {
        for sink in self.snapshot() {
            sink.on_stop();
        }
    }

    // Sinks run without the list lock held so they may add or remove sinks
    fn snapshot(&self) -> Vec<Arc<dyn EventSink>> {
        self.sinks.read().iter().map(|(_, s)| s.clone()).collect()
    }
}

/// Callbacks for changes in watched directories
///
/// All methods default to doing nothing.
pub trait WatchListener: Send + Sync {
    /// A directory was added to the watched set
    fn path_watched(&self, _path: &Path) {}

    /// Any change under `registered`; fired before the kind-specific callback
    ///
    /// `path` is `None` when `overflow` is set.
    fn path_changed(&self, _registered: &Path, _path: Option<&Path>, _overflow: bool) {}

    /// `created` appeared in `registered`
    fn created(&self, _registered: &Path, _created: &Path) {}

    /// `deleted` disappeared from `registered`
    fn deleted(&self, _registered: &Path, _deleted: &Path) {}

    /// `modified` changed in `registered`
    fn modified(&self, _registered: &Path, _modified: &Path) {}
}

/// Fans events out to a list of listeners
#[derive(Default)]
pub struct ListenerSink {
    listeners: RwLock<Vec<Arc<dyn WatchListener>>>,
}

impl ListenerSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Arc<dyn WatchListener>) {
        self.listeners.write().push(listener);
    }

    /// Remove a listener previously added (compared by identity)
    pub fn remove(&self, listener: &Arc<dyn WatchListener>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
        before != listeners.len()
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<dyn WatchListener>> {
        self.listeners.read().clone()
    }
}

impl EventSink for ListenerSink {
    fn on_event(&self, event: &PathWatchEvent) {
        let listeners = self.snapshot();
        let registered = event.registered_path.as_path();
        let path = event.path.as_deref();

        for l in &listeners {
            l.path_changed(registered, path, event.overflow);
        }

        let Some(path) = path else {
            return;
        };
        match event.kind {
            EventKind::Create => listeners.iter().for_each(|l| l.created(registered, path)),
            EventKind::Delete => listeners.iter().for_each(|l| l.deleted(registered, path)),
            EventKind::Modify => listeners.iter().for_each(|l| l.modified(registered, path)),
            EventKind::Overflow => {}
        }
    }

    fn on_path_watched(&self, path: &Path) {
        for l in self.snapshot() {
            l.path_watched(path);
        }
    }
}

/// Publishes events to stream subscribers
///
/// Each subscriber gets an unbounded channel. Subscribers whose stream was
/// dropped are pruned on the next event; all streams end when the watcher
/// stops.
#[derive(Default)]
pub struct StreamSink {
    subscribers: Mutex<Vec<Sender<PathWatchEvent>>>,
}

impl StreamSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new stream of events
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        EventStream { rx }
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// End every open stream
    pub fn complete(&self) {
        self.subscribers.lock().clear();
    }
}

impl EventSink for StreamSink {
    fn on_event(&self, event: &PathWatchEvent) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn on_stop(&self) {
        self.complete();
    }
}

/// Stream of dispatched events
///
/// Iteration blocks for the next event and ends once the watcher stops.
#[derive(Debug)]
pub struct EventStream {
    rx: Receiver<PathWatchEvent>,
}

impl EventStream {
    /// Block for the next event; `None` once the stream completed
    pub fn recv(&self) -> Option<PathWatchEvent> {
        self.rx.recv().ok()
    }

    /// Wait up to `timeout` for the next event
    pub fn recv_timeout(&self, timeout: Duration) -> Option<PathWatchEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Next event if one is already available
    pub fn try_recv(&self) -> Option<PathWatchEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Number of events waiting to be received
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Iterator for EventStream {
    type Item = PathWatchEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}
