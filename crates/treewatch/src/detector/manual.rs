//! Detector driven by the caller

use super::{Detector, DetectorHandle, DetectorKind, EventFeed};
use crate::error::{Result, WatchError};
use crate::event::EventKind;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Detector whose events are pushed by hand
///
/// Nothing is observed on the filesystem; [`emit`](Self::emit) and friends
/// inject changes straight into the correlation engine. Useful to bridge
/// an external event source or to drive the watcher deterministically.
pub struct ManualDetector {
    feed: EventFeed,
    state: Mutex<ManualState>,
}

#[derive(Default)]
struct ManualState {
    watched: HashMap<u64, PathBuf>,
    invalid: HashSet<PathBuf>,
    closed: bool,
}

impl ManualDetector {
    pub fn new(feed: EventFeed) -> Self {
        Self {
            feed,
            state: Mutex::new(ManualState::default()),
        }
    }

    /// Report a single change of `path`
    ///
    /// Returns the number of watch keys that buffered it.
    pub fn emit(&self, path: impl AsRef<Path>, kind: EventKind) -> usize {
        self.emit_count(path, kind, 1)
    }

    /// Report `count` coalesced identical changes of `path`
    pub fn emit_count(&self, path: impl AsRef<Path>, kind: EventKind, count: u32) -> usize {
        self.feed.deliver(path.as_ref(), kind, count)
    }

    /// Report possible event loss for `dir`, or everywhere
    pub fn emit_overflow(&self, dir: Option<&Path>) -> usize {
        self.feed.overflow(dir)
    }

    /// Mark `path` as no longer watchable
    ///
    /// Its key is dropped the next time the dispatch loop resets it.
    pub fn invalidate(&self, path: impl Into<PathBuf>) {
        self.state.lock().invalid.insert(path.into());
    }

    /// Directories currently registered, sorted
    pub fn registered(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.state.lock().watched.values().cloned().collect();
        paths.sort();
        paths
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl Detector for ManualDetector {
    fn register_directory(&self, path: &Path) -> Result<DetectorHandle> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(WatchError::DetectorClosed);
        }
        let handle = DetectorHandle::new(path);
        state.watched.insert(handle.id(), path.to_path_buf());
        state.invalid.remove(path);
        Ok(handle)
    }

    fn cancel(&self, handle: &DetectorHandle) {
        self.state.lock().watched.remove(&handle.id());
    }

    fn is_valid(&self, handle: &DetectorHandle) -> bool {
        let state = self.state.lock();
        !state.closed
            && state.watched.contains_key(&handle.id())
            && !state.invalid.contains(handle.path())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        state.watched.clear();
        Ok(())
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Manual
    }
}
