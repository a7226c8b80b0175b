//! Registration of directory trees
//!
//! Registers single directories, whole subtrees (pre-order walk) and
//! ancestor chains. Tree walks are best effort: a directory that fails to
//! register is logged and skipped, the walk carries on.

use crate::detector::Detector;
use crate::error::{Result, WatchError};
use crate::filter::PathFilter;
use crate::key::WatchKey;
use crate::registry::Registry;
use crate::sink::SinkList;
use parking_lot::RwLock;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Slot holding the active detector, if one was created
pub(crate) type DetectorSlot = RwLock<Option<Arc<dyn Detector>>>;

/// Registers directories with the detector and the registry
pub(crate) struct TreeRegistrar {
    registry: Arc<Registry>,
    detector: Arc<DetectorSlot>,
    filter: Arc<PathFilter>,
    sinks: Arc<SinkList>,
}

impl TreeRegistrar {
    pub(crate) fn new(
        registry: Arc<Registry>,
        detector: Arc<DetectorSlot>,
        filter: Arc<PathFilter>,
        sinks: Arc<SinkList>,
    ) -> Self {
        Self {
            registry,
            detector,
            filter,
            sinks,
        }
    }

    /// Active detector
    pub(crate) fn detector(&self) -> Result<Arc<dyn Detector>> {
        self.detector.read().clone().ok_or(WatchError::NoDetector)
    }

    /// Register a path, optionally with its subtree and its ancestors
    ///
    /// A file is replaced by its parent directory. Returns `Ok(false)`
    /// without side effects if the path does not exist.
    pub(crate) fn register_path(&self, path: &Path, recursive: bool, parents: bool) -> Result<bool> {
        let detector = self.detector()?;

        let Some(dir) = resolve_directory(path) else {
            debug!("Not registering missing path {}", path.display());
            return Ok(false);
        };

        if !recursive && !parents {
            self.register_with(detector.as_ref(), &dir, false)?;
            return Ok(true);
        }

        if recursive {
            let count = self.walk_children(detector.as_ref(), &dir);
            debug!("Registered {} directories under {}", count, dir.display());
        }

        if parents {
            // Keep the recursive flag on `dir` if the walk above registered it
            let start = if recursive { dir.parent() } else { Some(dir.as_path()) };
            let count = self.walk_ancestors(detector.as_ref(), start);
            debug!("Registered {} ancestors of {}", count, dir.display());
        }

        Ok(true)
    }

    /// Register exactly one directory
    ///
    /// Idempotent: an already registered directory keeps its key and gets
    /// its recursive flag refreshed.
    pub(crate) fn register(&self, path: &Path, recursive: bool) -> Result<Arc<WatchKey>> {
        let detector = self.detector()?;
        self.register_with(detector.as_ref(), path, recursive)
    }

    /// Register `root` and every directory below it, flagged recursive
    ///
    /// Returns the number of directories registered.
    pub(crate) fn register_all_children(&self, root: &Path) -> usize {
        match self.detector() {
            Ok(detector) => self.walk_children(detector.as_ref(), root),
            Err(e) => {
                warn!("Cannot register children of {}: {}", root.display(), e);
                0
            }
        }
    }

    /// Remove a directory from the watched set
    pub(crate) fn unregister(&self, path: &Path) -> bool {
        let Some(key) = self.registry.remove(path) else {
            return false;
        };
        if let Ok(detector) = self.detector() {
            detector.cancel(key.handle());
        }
        debug!("Stopped watching {}", path.display());
        true
    }

    /// Whether the detector still considers `key` watchable
    pub(crate) fn is_valid(&self, key: &WatchKey) -> bool {
        match self.detector() {
            Ok(detector) => detector.is_valid(key.handle()),
            Err(_) => true,
        }
    }

    /// Drop a key that can no longer be watched
    pub(crate) fn invalidate(&self, key: &Arc<WatchKey>) {
        if self.registry.remove_key(key) {
            debug!("Watch key for {} is no longer valid", key.path().display());
        }
        if let Ok(detector) = self.detector() {
            detector.cancel(key.handle());
        }
    }

    /// Cancel every key and empty the registry
    pub(crate) fn clear_all(&self) -> usize {
        let detector = self.detector().ok();
        self.clear_all_with(detector.as_deref())
    }

    /// Like [`clear_all`](Self::clear_all) with an explicit detector
    pub(crate) fn clear_all_with(&self, detector: Option<&dyn Detector>) -> usize {
        let keys = self.registry.drain_all();
        if let Some(detector) = detector {
            for key in &keys {
                detector.cancel(key.handle());
            }
        }
        if !keys.is_empty() {
            info!("Cleared {} registered directories", keys.len());
        }
        keys.len()
    }

    fn register_with(
        &self,
        detector: &dyn Detector,
        path: &Path,
        recursive: bool,
    ) -> Result<Arc<WatchKey>> {
        let dir = fs::canonicalize(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => WatchError::NotFound(path.to_path_buf()),
            _ => WatchError::register(path, e.into()),
        })?;
        if !dir.is_dir() {
            return Err(WatchError::NotADirectory(dir));
        }

        let (key, created) = self.registry.insert_with(&dir, recursive, |p| {
            detector
                .register_directory(p)
                .map_err(|e| WatchError::register(p, e))
        })?;

        if created {
            debug!("Watching {} (recursive: {})", dir.display(), recursive);
            self.sinks.path_watched(&dir);
        }
        Ok(key)
    }

    fn walk_children(&self, detector: &dyn Detector, root: &Path) -> usize {
        // The walk never follows links, its root included
        match fs::symlink_metadata(root) {
            Ok(meta) if meta.file_type().is_symlink() => {
                debug!("Not walking symlink {}", root.display());
                return 0;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Failed to walk directory tree of {}: {}", root.display(), e);
                return 0;
            }
        }

        let mut registered = 0;

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                e.file_type().is_dir() && (e.depth() == 0 || !self.filter.is_ignored(e.path(), true))
            });

        for entry in walker {
            match entry {
                Ok(entry) => match self.register_with(detector, entry.path(), true) {
                    Ok(_) => registered += 1,
                    Err(e) => warn!(
                        "Failed to recursively register child path {}: {}",
                        entry.path().display(),
                        e
                    ),
                },
                Err(e) => warn!("Failed to walk directory tree of {}: {}", root.display(), e),
            }
        }

        registered
    }

    fn walk_ancestors(&self, detector: &dyn Detector, start: Option<&Path>) -> usize {
        let mut registered = 0;
        let mut current = start;

        while let Some(dir) = current {
            match self.register_with(detector, dir, false) {
                Ok(_) => registered += 1,
                Err(e) => warn!("Failed to register parent path {}: {}", dir.display(), e),
            }
            current = dir.parent();
        }

        registered
    }
}

/// Directory to watch for `path`: itself, or its parent for a file
fn resolve_directory(path: &Path) -> Option<PathBuf> {
    let canonical = fs::canonicalize(path).ok()?;
    if canonical.is_dir() {
        Some(canonical)
    } else {
        canonical.parent().map(Path::to_path_buf)
    }
}
