//! Registry of watched directories

use crate::detector::DetectorHandle;
use crate::error::Result;
use crate::key::WatchKey;
use crate::queue::SignalQueue;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Mapping from watched directory to its key
///
/// A single lock guards the map. Removing a key also purges it from the
/// signal queue so a queued key always has a registry entry.
pub struct Registry {
    keys: Mutex<HashMap<PathBuf, Arc<WatchKey>>>,
    queue: Arc<SignalQueue>,
}

impl Registry {
    pub fn new(queue: Arc<SignalQueue>) -> Self {
        Self {
            keys: Mutex::new(HashMap::new()),
            queue,
        }
    }

    /// Key registered for exactly `path`
    pub fn get(&self, path: &Path) -> Option<Arc<WatchKey>> {
        self.keys.lock().get(path).cloned()
    }

    /// Keys an event on `path` is reported against
    ///
    /// Checks `path` itself (the directory's own identity changed) and its
    /// parent (an entry inside a watched directory changed).
    pub fn lookup(&self, path: &Path) -> Vec<Arc<WatchKey>> {
        let keys = self.keys.lock();
        let mut found = Vec::with_capacity(1);

        if let Some(key) = keys.get(path) {
            found.push(key.clone());
        }
        if let Some(parent) = path.parent() {
            if let Some(key) = keys.get(parent) {
                found.push(key.clone());
            }
        }
        found
    }

    /// Insert a key for `path`, or refresh the existing one
    ///
    /// `watch` is only invoked when no live key exists; it runs under the
    /// registry lock so concurrent registrations of one path yield a single
    /// key. Returns the key and whether it was newly created.
    pub(crate) fn insert_with<F>(
        &self,
        path: &Path,
        recursive: bool,
        watch: F,
    ) -> Result<(Arc<WatchKey>, bool)>
    where
        F: FnOnce(&Path) -> Result<DetectorHandle>,
    {
        let mut keys = self.keys.lock();

        if let Some(existing) = keys.get(path) {
            if existing.is_valid() {
                existing.set_recursive(recursive);
                return Ok((existing.clone(), false));
            }
        }

        let handle = watch(path)?;
        let key = Arc::new(WatchKey::new(path.to_path_buf(), recursive, handle));
        if let Some(stale) = keys.insert(path.to_path_buf(), key.clone()) {
            self.queue.remove(&stale);
        }
        Ok((key, true))
    }

    /// Remove and cancel the key for `path`
    pub fn remove(&self, path: &Path) -> Option<Arc<WatchKey>> {
        let key = self.keys.lock().remove(path)?;
        self.retire(&key);
        Some(key)
    }

    /// Remove `key` if it is still the one registered for its path
    pub(crate) fn remove_key(&self, key: &Arc<WatchKey>) -> bool {
        let mut keys = self.keys.lock();
        let registered = keys
            .get(key.path())
            .is_some_and(|current| Arc::ptr_eq(current, key));
        if registered {
            keys.remove(key.path());
        }
        drop(keys);

        self.retire(key);
        registered
    }

    /// Remove and cancel every key
    pub fn drain_all(&self) -> Vec<Arc<WatchKey>> {
        let drained: Vec<_> = self.keys.lock().drain().map(|(_, key)| key).collect();
        for key in &drained {
            self.retire(key);
        }
        drained
    }

    /// Registered directories, sorted
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<_> = self.keys.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Snapshot of all keys
    pub fn keys(&self) -> Vec<Arc<WatchKey>> {
        self.keys.lock().values().cloned().collect()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.keys.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn retire(&self, key: &Arc<WatchKey>) {
        key.cancel();
        self.queue.remove(key);
    }
}
