//! Correlation of raw detector events with watch keys

use crate::event::{ChangeEvent, EventKind};
use crate::filter::PathFilter;
use crate::queue::SignalQueue;
use crate::registry::Registry;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{trace, warn};

/// Routes raw events to the keys watching them
pub(crate) struct Correlator {
    registry: Arc<Registry>,
    queue: Arc<SignalQueue>,
    filter: Arc<PathFilter>,
}

impl Correlator {
    pub(crate) fn new(
        registry: Arc<Registry>,
        queue: Arc<SignalQueue>,
        filter: Arc<PathFilter>,
    ) -> Self {
        Self {
            registry,
            queue,
            filter,
        }
    }

    /// Buffer a change on every key registered for `path` or its parent
    ///
    /// `is_dir` is the entry kind when the detector knows it. Returns the
    /// number of keys the event was appended to.
    pub(crate) fn on_raw_event(
        &self,
        path: &Path,
        kind: EventKind,
        count: u32,
        is_dir: Option<bool>,
    ) -> usize {
        if kind == EventKind::Overflow {
            return self.on_overflow(Some(path));
        }

        if self.is_ignored(path, kind, is_dir) {
            trace!("Ignoring {} event for {}", kind, path.display());
            return 0;
        }

        let keys = self.registry.lookup(path);
        if keys.is_empty() {
            trace!("No watch key for {} ({})", path.display(), kind);
            return 0;
        }

        for key in &keys {
            let queued = key.signal(ChangeEvent::with_count(path, kind, count), &self.queue);
            trace!(
                "Buffered {} {} on {} (queued: {})",
                kind,
                path.display(),
                key.path().display(),
                queued
            );
        }
        keys.len()
    }

    fn is_ignored(&self, path: &Path, kind: EventKind, is_dir: Option<bool>) -> bool {
        if self.filter.is_empty() {
            return false;
        }
        match is_dir {
            Some(is_dir) => self.filter.is_ignored(path, is_dir),
            // A deleted entry cannot be stat'ed; match it either way
            None if kind == EventKind::Delete => {
                self.filter.is_ignored(path, false) || self.filter.is_ignored(path, true)
            }
            None => self.filter.is_ignored(path, path.is_dir()),
        }
    }

    /// Flag possible event loss
    ///
    /// With a directory, the keys for that directory (or its parent) get the
    /// overflow; otherwise, or when nothing matches, every key does.
    pub(crate) fn on_overflow(&self, dir: Option<&Path>) -> usize {
        let mut keys = dir.map(|d| self.registry.lookup(d)).unwrap_or_default();
        if keys.is_empty() {
            keys = self.registry.keys();
        }

        warn!(
            "Detector overflow ({}), {} watch keys affected",
            dir.map(|d| d.display().to_string())
                .unwrap_or_else(|| "all directories".to_string()),
            keys.len()
        );

        for key in &keys {
            key.signal(ChangeEvent::overflow(), &self.queue);
        }
        keys.len()
    }
}

/// Handle through which a detector reports changes
///
/// Cheap to clone; safe to use from any thread.
#[derive(Clone)]
pub struct EventFeed {
    correlator: Arc<Correlator>,
}

impl EventFeed {
    pub(crate) fn new(correlator: Arc<Correlator>) -> Self {
        Self { correlator }
    }

    /// Report a change of `path`, coalesced from `count` identical reports
    ///
    /// Returns the number of watch keys the change was buffered on.
    pub fn deliver(&self, path: &Path, kind: EventKind, count: u32) -> usize {
        self.correlator.on_raw_event(path, kind, count, None)
    }

    /// Like [`deliver`](Self::deliver), for a detector that knows whether
    /// the entry is a directory
    ///
    /// Ignore patterns are matched against that kind instead of the
    /// current state of the filesystem.
    pub fn deliver_entry(&self, path: &Path, kind: EventKind, count: u32, is_dir: bool) -> usize {
        self.correlator.on_raw_event(path, kind, count, Some(is_dir))
    }

    /// Report that events may have been lost, for `dir` or for everything
    pub fn overflow(&self, dir: Option<&Path>) -> usize {
        self.correlator.on_overflow(dir)
    }
}

impl fmt::Debug for EventFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventFeed").finish_non_exhaustive()
    }
}
