//! Push detector backed by OS notifications

use super::{Detector, DetectorHandle, DetectorKind, EventFeed};
use crate::error::{Result, WatchError};
use crate::event::EventKind;
use crossbeam_channel::{Receiver, Sender};
use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

type RawEvent = notify::Result<notify::Event>;

/// Detector using the platform's native notification API
///
/// Each registered directory is watched non-recursively. The `notify`
/// callback only forwards raw events into a channel; a pump thread
/// translates them and feeds the correlation engine, so no watcher lock is
/// ever taken from inside the backend's event loop.
pub struct NativeDetector {
    state: Mutex<NativeState>,
    pump: Mutex<Option<Pump>>,
}

struct NativeState {
    watcher: Option<RecommendedWatcher>,
    /// Watched directory to the id of its current handle
    watched: HashMap<PathBuf, u64>,
}

struct Pump {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

impl NativeDetector {
    pub fn new(feed: EventFeed) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded::<RawEvent>();
        let watcher = notify::recommended_watcher(move |res: RawEvent| {
            let _ = tx.send(res);
        })?;

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(0);
        let handle = thread::Builder::new()
            .name("treewatch-notify".to_string())
            .spawn(move || pump_events(rx, shutdown_rx, feed))?;

        info!("Created native detector");
        Ok(Self {
            state: Mutex::new(NativeState {
                watcher: Some(watcher),
                watched: HashMap::new(),
            }),
            pump: Mutex::new(Some(Pump {
                shutdown: shutdown_tx,
                handle,
            })),
        })
    }
}

impl Detector for NativeDetector {
    fn register_directory(&self, path: &Path) -> Result<DetectorHandle> {
        let mut state = self.state.lock();
        let watcher = state.watcher.as_mut().ok_or(WatchError::DetectorClosed)?;

        watcher.watch(path, RecursiveMode::NonRecursive)?;

        let handle = DetectorHandle::new(path);
        state.watched.insert(path.to_path_buf(), handle.id());
        Ok(handle)
    }

    fn cancel(&self, handle: &DetectorHandle) {
        let mut state = self.state.lock();
        if state.watched.get(handle.path()) != Some(&handle.id()) {
            return;
        }
        state.watched.remove(handle.path());

        if let Some(watcher) = state.watcher.as_mut() {
            if let Err(e) = watcher.unwatch(handle.path()) {
                // Deleted directories are already gone from the backend
                debug!("Unwatch {} failed: {}", handle.path().display(), e);
            }
        }
    }

    fn is_valid(&self, handle: &DetectorHandle) -> bool {
        let watched = self.state.lock().watched.get(handle.path()) == Some(&handle.id());
        watched && handle.path().is_dir()
    }

    fn close(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.watched.clear();
            state.watcher = None;
        }

        if let Some(pump) = self.pump.lock().take() {
            drop(pump.shutdown);
            if pump.handle.join().is_err() {
                warn!("Native event pump panicked");
            }
        }
        info!("Closed native detector");
        Ok(())
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Native
    }
}

impl Drop for NativeDetector {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            drop(pump.shutdown);
            let _ = pump.handle.join();
        }
    }
}

fn pump_events(events: Receiver<RawEvent>, shutdown: Receiver<()>, feed: EventFeed) {
    loop {
        crossbeam_channel::select! {
            recv(events) -> msg => match msg {
                Ok(Ok(event)) => {
                    let is_dir = entry_is_dir(&event.kind);
                    for (path, kind) in translate(&event) {
                        match (kind, path) {
                            (EventKind::Overflow, dir) => {
                                feed.overflow(dir.as_deref());
                            }
                            (kind, Some(path)) => match is_dir {
                                Some(is_dir) => {
                                    feed.deliver_entry(&path, kind, 1, is_dir);
                                }
                                None => {
                                    feed.deliver(&path, kind, 1);
                                }
                            },
                            (_, None) => {}
                        }
                    }
                }
                Ok(Err(e)) => warn!("Native watcher error: {}", e),
                Err(_) => break,
            },
            recv(shutdown) -> _ => break,
        }
    }
    debug!("Native event pump exited");
}

/// Map a `notify` event onto watcher event kinds
///
/// Renames become a delete of the old name and a create of the new one.
/// Access notifications carry no change and are dropped.
fn translate(event: &notify::Event) -> Vec<(Option<PathBuf>, EventKind)> {
    if event.need_rescan() {
        return vec![(event.paths.first().cloned(), EventKind::Overflow)];
    }

    let all = |kind: EventKind| -> Vec<(Option<PathBuf>, EventKind)> {
        event.paths.iter().map(|p| (Some(p.clone()), kind)).collect()
    };

    match &event.kind {
        notify::EventKind::Create(_) => all(EventKind::Create),
        notify::EventKind::Remove(_) => all(EventKind::Delete),
        notify::EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(EventKind::Delete),
        notify::EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(EventKind::Create),
        notify::EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut out = Vec::with_capacity(2);
            if let Some(from) = event.paths.first() {
                out.push((Some(from.clone()), EventKind::Delete));
            }
            if let Some(to) = event.paths.get(1) {
                out.push((Some(to.clone()), EventKind::Create));
            }
            out
        }
        notify::EventKind::Modify(_) => all(EventKind::Modify),
        notify::EventKind::Access(_) | notify::EventKind::Any | notify::EventKind::Other => {
            vec![]
        }
    }
}

/// Entry kind carried by creations and removals, when the backend reports it
fn entry_is_dir(kind: &notify::EventKind) -> Option<bool> {
    match kind {
        notify::EventKind::Create(CreateKind::Folder)
        | notify::EventKind::Remove(RemoveKind::Folder) => Some(true),
        notify::EventKind::Create(CreateKind::File)
        | notify::EventKind::Remove(RemoveKind::File) => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange, Flag};

    fn event(kind: notify::EventKind, paths: &[&str]) -> notify::Event {
        paths
            .iter()
            .fold(notify::Event::new(kind), |e, p| e.add_path(PathBuf::from(p)))
    }

    fn some(path: &str, kind: EventKind) -> (Option<PathBuf>, EventKind) {
        (Some(PathBuf::from(path)), kind)
    }

    #[test]
    fn test_translate_basic_kinds() {
        assert_eq!(
            translate(&event(notify::EventKind::Create(CreateKind::File), &["/d/a"])),
            vec![some("/d/a", EventKind::Create)]
        );
        assert_eq!(
            translate(&event(notify::EventKind::Remove(RemoveKind::Folder), &["/d/sub"])),
            vec![some("/d/sub", EventKind::Delete)]
        );
        assert_eq!(
            translate(&event(
                notify::EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["/d/a"]
            )),
            vec![some("/d/a", EventKind::Modify)]
        );
    }

    #[test]
    fn test_translate_renames() {
        assert_eq!(
            translate(&event(
                notify::EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                &["/d/old", "/d/new"]
            )),
            vec![some("/d/old", EventKind::Delete), some("/d/new", EventKind::Create)]
        );
        assert_eq!(
            translate(&event(
                notify::EventKind::Modify(ModifyKind::Name(RenameMode::From)),
                &["/d/old"]
            )),
            vec![some("/d/old", EventKind::Delete)]
        );
        assert_eq!(
            translate(&event(
                notify::EventKind::Modify(ModifyKind::Name(RenameMode::To)),
                &["/d/new"]
            )),
            vec![some("/d/new", EventKind::Create)]
        );
    }

    #[test]
    fn test_translate_ignores_access() {
        let access = event(notify::EventKind::Access(AccessKind::Any), &["/d/a"]);
        assert!(translate(&access).is_empty());
    }

    #[test]
    fn test_translate_rescan_is_overflow() {
        let rescan = event(notify::EventKind::Any, &["/d"]).set_flag(Flag::Rescan);
        assert_eq!(translate(&rescan), vec![some("/d", EventKind::Overflow)]);

        let bare = notify::Event::new(notify::EventKind::Other).set_flag(Flag::Rescan);
        assert_eq!(translate(&bare), vec![(None, EventKind::Overflow)]);
    }

    #[test]
    fn test_entry_kind_from_event() {
        use notify::EventKind as N;

        assert_eq!(entry_is_dir(&N::Create(CreateKind::Folder)), Some(true));
        assert_eq!(entry_is_dir(&N::Remove(RemoveKind::Folder)), Some(true));
        assert_eq!(entry_is_dir(&N::Create(CreateKind::File)), Some(false));
        assert_eq!(entry_is_dir(&N::Remove(RemoveKind::File)), Some(false));
        assert_eq!(entry_is_dir(&N::Remove(RemoveKind::Any)), None);
        assert_eq!(
            entry_is_dir(&N::Modify(ModifyKind::Name(RenameMode::Both))),
            None
        );
    }
}
