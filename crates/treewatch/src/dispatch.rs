//! The dispatch loop
//!
//! Single consumer of the signal queue. For every signalled key it drains
//! the buffered events, hands them to the sinks in arrival order, extends
//! recursive coverage to newly created subdirectories and resets the key.

use crate::event::{EventKind, PathWatchEvent};
use crate::key::WatchKey;
use crate::lifecycle::Lifecycle;
use crate::queue::SignalQueue;
use crate::sink::SinkList;
use crate::tree::TreeRegistrar;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub(crate) struct DispatchLoop {
    pub(crate) queue: Arc<SignalQueue>,
    pub(crate) registrar: Arc<TreeRegistrar>,
    pub(crate) sinks: Arc<SinkList>,
    pub(crate) lifecycle: Arc<Lifecycle>,
    pub(crate) clear_on_exit: bool,
}

impl DispatchLoop {
    /// Run until the queue closes or a stop is requested
    pub(crate) fn run(self) {
        info!("Dispatch loop started");

        while let Some(key) = self.queue.take() {
            if !self.lifecycle.is_running() {
                break;
            }
            self.process(&key);
        }

        if self.clear_on_exit {
            self.registrar.clear_all();
        }
        self.sinks.stopped();
        info!("Dispatch loop exited");
    }

    /// Dispatch one drained batch of `key`
    pub(crate) fn process(&self, key: &Arc<WatchKey>) {
        if !key.is_valid() {
            return;
        }

        let events = key.drain();
        let recursive = key.watches_children_recursively();
        let mut new_dirs = Vec::new();
        debug!("Dispatching {} events for {}", events.len(), key.path().display());

        for change in events {
            if recursive && change.kind() == EventKind::Create {
                if let Some(path) = change.path() {
                    if path != key.path() && is_real_dir(path) {
                        new_dirs.push(path.to_path_buf());
                    }
                }
            }
            self.sinks.emit(&PathWatchEvent::from_change(key.path(), change));
        }

        self.extend(new_dirs);

        let valid = self.registrar.is_valid(key);
        if !key.reset(valid, &self.queue) {
            self.registrar.invalidate(key);
        }
    }

    /// Register subtrees of directories created in the last batch
    ///
    /// Shallowest first; a directory inside a subtree already walked in this
    /// batch is skipped.
    fn extend(&self, mut dirs: Vec<PathBuf>) {
        if dirs.is_empty() {
            return;
        }
        dirs.sort_by_key(|p| p.components().count());

        let mut walked: Vec<PathBuf> = Vec::with_capacity(dirs.len());
        for dir in dirs {
            if walked.iter().any(|w| dir.starts_with(w)) {
                continue;
            }
            let registered = self.registrar.register_all_children(&dir);
            debug!("Extended watch to {} ({} directories)", dir.display(), registered);
            walked.push(dir);
        }
    }
}

/// Directory check that does not follow symlinks
fn is_real_dir(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|m| m.is_dir())
}
