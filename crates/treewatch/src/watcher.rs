//! The watcher façade

use crate::config::WatcherConfig;
use crate::correlate::{Correlator, EventFeed};
use crate::detector::{Detector, DetectorKind, ManualDetector, NativeDetector, PollingDetector};
use crate::dispatch::DispatchLoop;
use crate::error::{Result, WatchError};
use crate::filter::PathFilter;
use crate::key::WatchKey;
use crate::lifecycle::{Lifecycle, RunState};
use crate::queue::SignalQueue;
use crate::registry::Registry;
use crate::sink::{EventSink, EventStream, ListenerSink, SinkId, SinkList, StreamSink, WatchListener};
use crate::tree::{DetectorSlot, TreeRegistrar};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Watches directory trees and dispatches their changes to sinks
///
/// Usage: create a detector, register paths, then `start`. Registration
/// keeps working while running; directories created under a recursively
/// registered path are picked up automatically.
///
/// ```no_run
/// use treewatch::{FileSystemWatcher, WatcherConfig};
///
/// # fn main() -> treewatch::Result<()> {
/// let watcher = FileSystemWatcher::new(WatcherConfig::default())?;
/// watcher.create_native()?;
/// watcher.register_path_with("/tmp/project", true, false)?;
/// let events = watcher.subscribe();
/// watcher.start()?;
///
/// for event in events {
///     println!("{} {:?}", event.kind, event.path);
/// }
/// # Ok(())
/// # }
/// ```
pub struct FileSystemWatcher {
    config: WatcherConfig,
    registry: Arc<Registry>,
    queue: Arc<SignalQueue>,
    correlator: Arc<Correlator>,
    detector: Arc<DetectorSlot>,
    registrar: Arc<TreeRegistrar>,
    sinks: Arc<SinkList>,
    listeners: Arc<ListenerSink>,
    streams: Arc<StreamSink>,
    lifecycle: Arc<Lifecycle>,
}

impl FileSystemWatcher {
    pub fn new(config: WatcherConfig) -> Result<Self> {
        config.validate()?;
        let filter = Arc::new(PathFilter::new(&config.ignore_patterns)?);

        let queue = Arc::new(SignalQueue::new());
        let registry = Arc::new(Registry::new(queue.clone()));
        let correlator = Arc::new(Correlator::new(
            registry.clone(),
            queue.clone(),
            filter.clone(),
        ));
        let detector: Arc<DetectorSlot> = Arc::new(RwLock::new(None));

        let sinks = Arc::new(SinkList::default());
        let listeners = Arc::new(ListenerSink::new());
        let streams = Arc::new(StreamSink::new());
        sinks.add(listeners.clone());
        sinks.add(streams.clone());

        let registrar = Arc::new(TreeRegistrar::new(
            registry.clone(),
            detector.clone(),
            filter,
            sinks.clone(),
        ));

        Ok(Self {
            config,
            registry,
            queue,
            correlator,
            detector,
            registrar,
            sinks,
            listeners,
            streams,
            lifecycle: Arc::new(Lifecycle::new()),
        })
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Install a native notification detector
    pub fn create_native(&self) -> Result<Arc<NativeDetector>> {
        self.create_with(NativeDetector::new)
    }

    /// Install a polling detector scanning every `interval`
    pub fn create_polling(&self, interval: Duration) -> Result<Arc<PollingDetector>> {
        self.create_with(|feed| PollingDetector::new(feed, interval))
    }

    /// Install a detector fed by the caller
    pub fn create_manual(&self) -> Result<Arc<ManualDetector>> {
        self.create_with(|feed| Ok(ManualDetector::new(feed)))
    }

    /// Install the detector named by the configuration
    pub fn create_from_config(&self) -> Result<Arc<dyn Detector>> {
        let detector: Arc<dyn Detector> = match self.config.detector {
            DetectorKind::Native => self.create_native()?,
            DetectorKind::Polling => self.create_polling(self.config.poll_interval())?,
            DetectorKind::Manual => self.create_manual()?,
        };
        Ok(detector)
    }

    /// Install a detector built by `factory`
    ///
    /// Replaces any previous detector, which is closed after its
    /// registrations are dropped. Fails while the watcher is running.
    pub fn create_with<D, F>(&self, factory: F) -> Result<Arc<D>>
    where
        D: Detector + 'static,
        F: FnOnce(EventFeed) -> Result<D>,
    {
        if self.lifecycle.state() != RunState::Stopped {
            return Err(WatchError::AlreadyRunning);
        }

        let detector = Arc::new(factory(EventFeed::new(self.correlator.clone()))?);
        let previous = self
            .detector
            .write()
            .replace(detector.clone() as Arc<dyn Detector>);

        // Keys left from an earlier run belong to the old detector
        self.registrar.clear_all_with(previous.as_deref());
        if let Some(previous) = previous {
            if let Err(e) = previous.close() {
                warn!("Failed to close previous detector: {}", e);
            }
        }
        self.queue.reopen();

        info!("Installed {:?} detector", detector.kind());
        Ok(detector)
    }

    /// Register a single path; a file registers its parent directory
    ///
    /// Returns false if the path does not exist.
    pub fn register_path(&self, path: impl AsRef<Path>) -> Result<bool> {
        self.register_path_with(path, false, false)
    }

    /// Register a path, optionally with all its subdirectories and ancestors
    ///
    /// Subdirectory and ancestor walks are best effort: directories that
    /// cannot be registered are logged and skipped.
    pub fn register_path_with(
        &self,
        path: impl AsRef<Path>,
        recursive: bool,
        parents: bool,
    ) -> Result<bool> {
        self.registrar.register_path(path.as_ref(), recursive, parents)
    }

    /// Register exactly one directory and return its key
    ///
    /// Re-registering returns the existing key with the recursive flag
    /// refreshed. Unlike [`register_path`](Self::register_path), a missing
    /// path or a file is an error.
    pub fn register(&self, path: impl AsRef<Path>, recursive: bool) -> Result<Arc<WatchKey>> {
        self.registrar.register(path.as_ref(), recursive)
    }

    /// Stop watching a directory; returns false if it was not registered
    pub fn unregister(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        self.registrar.unregister(&canonical)
    }

    /// Registered directories, sorted
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.registry.paths()
    }

    pub fn is_watched(&self, path: impl AsRef<Path>) -> bool {
        self.watch_key(path).is_some()
    }

    /// Key registered for the directory at `path`
    pub fn watch_key(&self, path: impl AsRef<Path>) -> Option<Arc<WatchKey>> {
        let path = path.as_ref();
        self.registry.get(path).or_else(|| {
            std::fs::canonicalize(path)
                .ok()
                .and_then(|p| self.registry.get(&p))
        })
    }

    /// Whether the installed detector polls
    pub fn is_polling(&self) -> bool {
        self.detector
            .read()
            .as_ref()
            .is_some_and(|d| d.kind() == DetectorKind::Polling)
    }

    /// Whether a detector has been installed
    pub fn has_detector(&self) -> bool {
        self.detector.read().is_some()
    }

    /// Start the detector and the dispatch thread
    pub fn start(&self) -> Result<()> {
        let detector = self.registrar.detector()?;
        if self.lifecycle.state() != RunState::Stopped {
            return Err(WatchError::AlreadyRunning);
        }

        detector.start()?;

        let dispatch = DispatchLoop {
            queue: self.queue.clone(),
            registrar: self.registrar.clone(),
            sinks: self.sinks.clone(),
            lifecycle: self.lifecycle.clone(),
            clear_on_exit: self.config.clear_on_exit,
        };
        self.lifecycle.start(
            &self.config.thread_name,
            self.config.thread_stack_size,
            move || dispatch.run(),
        )?;

        info!(
            "Watcher started ({:?} detector, {} directories)",
            detector.kind(),
            self.registry.len()
        );
        Ok(())
    }

    /// Stop watching, waiting up to the configured stop timeout
    ///
    /// Without a configured timeout this blocks until the dispatch thread
    /// exits. Returns whether it exited within the wait.
    pub fn stop(&self) -> Result<bool> {
        self.stop_inner(self.config.stop_timeout())
    }

    /// Stop watching, waiting at most `timeout` for the dispatch thread
    pub fn stop_timeout(&self, timeout: Duration) -> Result<bool> {
        self.stop_inner(Some(timeout))
    }

    fn stop_inner(&self, timeout: Option<Duration>) -> Result<bool> {
        self.lifecycle.begin_stop()?;

        let detector = self.detector.write().take();
        if let Some(detector) = detector {
            if let Err(e) = detector.close() {
                warn!("Failed to close detector: {}", e);
            }
        }
        self.queue.close();

        let exited = self.lifecycle.wait(timeout);
        if exited {
            info!("Watcher stopped");
        } else {
            warn!("Dispatch thread still running after {:?}", timeout);
        }
        Ok(exited)
    }

    pub fn state(&self) -> RunState {
        self.lifecycle.state()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Cancel every registration
    pub fn clear_all_registered_paths(&self) -> usize {
        self.registrar.clear_all()
    }

    /// Add a callback listener
    pub fn add_listener(&self, listener: Arc<dyn WatchListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn WatchListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Install a sink after the built-in listener and stream sinks
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) -> SinkId {
        self.sinks.add(sink)
    }

    pub fn remove_sink(&self, id: SinkId) -> bool {
        self.sinks.remove(id)
    }

    /// Stream of every dispatched event, ending when the watcher stops
    pub fn subscribe(&self) -> EventStream {
        self.streams.subscribe()
    }
}

impl Drop for FileSystemWatcher {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop_inner(self.config.stop_timeout());
        }
    }
}
