//! Poll detector diffing directory listings

use super::{Detector, DetectorHandle, DetectorKind, EventFeed};
use crate::error::{Result, WatchError};
use crate::event::EventKind;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, trace, warn};

/// Metadata compared between two listings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntryMeta {
    is_dir: bool,
    len: u64,
    modified: Option<SystemTime>,
}

type Snapshot = BTreeMap<PathBuf, EntryMeta>;

/// Detector that periodically lists every registered directory
///
/// Each directory keeps a snapshot of its direct entries. A cycle compares
/// a fresh listing against it: new entries are created, vanished entries
/// deleted, files whose size or mtime changed modified. A registered
/// directory that disappears reports the deletion of everything it held
/// and turns invalid. Its own deletion comes from its parent's listing, or
/// from itself when the parent is not polled.
pub struct PollingDetector {
    shared: Arc<PollShared>,
    interval: Duration,
    worker: Mutex<Option<PollWorker>>,
}

struct PollShared {
    feed: EventFeed,
    dirs: Mutex<HashMap<u64, PolledDir>>,
    ready: AtomicBool,
    closed: AtomicBool,
}

struct PolledDir {
    path: PathBuf,
    snapshot: Snapshot,
    valid: bool,
}

struct PollWorker {
    shutdown: Sender<()>,
    done: Receiver<()>,
    handle: JoinHandle<()>,
}

impl PollingDetector {
    pub fn new(feed: EventFeed, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(WatchError::Config("poll interval must be greater than zero".into()));
        }

        info!("Created polling detector (interval: {:?})", interval);
        Ok(Self {
            shared: Arc::new(PollShared {
                feed,
                dirs: Mutex::new(HashMap::new()),
                ready: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
            interval,
            worker: Mutex::new(None),
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether at least one full polling cycle completed
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::Acquire)
    }

    /// Run one polling cycle on the calling thread
    ///
    /// Returns the number of distinct changes reported.
    pub fn poll_now(&self) -> usize {
        self.shared.poll_once()
    }

    /// Close, waiting at most `timeout` for the polling thread
    ///
    /// Returns false if the thread did not exit in time; it is left to
    /// finish its current cycle on its own.
    pub fn close_timeout(&self, timeout: Duration) -> bool {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.dirs.lock().clear();

        let Some(worker) = self.worker.lock().take() else {
            return true;
        };
        drop(worker.shutdown);

        match worker.done.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!("Polling thread did not exit within {:?}", timeout);
                false
            }
            _ => {
                if worker.handle.join().is_err() {
                    warn!("Polling thread panicked");
                }
                true
            }
        }
    }
}

impl Detector for PollingDetector {
    fn register_directory(&self, path: &Path) -> Result<DetectorHandle> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(WatchError::DetectorClosed);
        }

        let snapshot = read_snapshot(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => WatchError::NotFound(path.to_path_buf()),
            _ => WatchError::Io(e),
        })?;

        let handle = DetectorHandle::new(path);
        self.shared.dirs.lock().insert(
            handle.id(),
            PolledDir {
                path: path.to_path_buf(),
                snapshot,
                valid: true,
            },
        );
        Ok(handle)
    }

    fn cancel(&self, handle: &DetectorHandle) {
        self.shared.dirs.lock().remove(&handle.id());
    }

    fn is_valid(&self, handle: &DetectorHandle) -> bool {
        self.shared
            .dirs
            .lock()
            .get(&handle.id())
            .is_some_and(|dir| dir.valid)
    }

    fn start(&self) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(WatchError::DetectorClosed);
        }

        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<()>(0);
        let shared = self.shared.clone();
        let interval = self.interval;

        let handle = thread::Builder::new()
            .name("treewatch-poll".to_string())
            .spawn(move || {
                let _done = done_tx;
                loop {
                    shared.poll_once();
                    match shutdown_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
                debug!("Polling thread exited");
            })?;

        *worker = Some(PollWorker {
            shutdown: shutdown_tx,
            done: done_rx,
            handle,
        });
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.dirs.lock().clear();

        if let Some(worker) = self.worker.lock().take() {
            drop(worker.shutdown);
            if worker.handle.join().is_err() {
                warn!("Polling thread panicked");
            }
        }
        info!("Closed polling detector");
        Ok(())
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Polling
    }
}

impl Drop for PollingDetector {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            drop(worker.shutdown);
            let _ = worker.handle.join();
        }
    }
}

impl PollShared {
    fn poll_once(&self) -> usize {
        let mut batch = CycleBatch::default();

        // Diff under the lock, report after releasing it
        {
            let mut dirs = self.dirs.lock();
            let mut vanished = Vec::new();
            for dir in dirs.values_mut().filter(|d| d.valid) {
                match read_snapshot(&dir.path) {
                    Ok(next) => {
                        diff_snapshots(&dir.snapshot, &next, &mut batch);
                        dir.snapshot = next;
                    }
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        debug!("Polled directory {} disappeared", dir.path.display());
                        diff_snapshots(&dir.snapshot, &Snapshot::new(), &mut batch);
                        dir.valid = false;
                        dir.snapshot.clear();
                        vanished.push(dir.path.clone());
                    }
                    Err(e) => warn!("Failed to poll {}: {}", dir.path.display(), e),
                }
            }

            // One DELETE per directory, whichever listing noticed it
            for path in vanished {
                if !batch.contains(&path, EventKind::Delete) {
                    batch.push(path, EventKind::Delete, true);
                }
            }
        }

        if !self.ready.swap(true, Ordering::AcqRel) {
            debug!("Polling detector ready");
        }

        let changes = batch.into_changes();
        let reported = changes.len();
        for change in changes {
            trace!("Polled {} {} (x{})", change.kind, change.path.display(), change.count);
            self.feed
                .deliver_entry(&change.path, change.kind, change.count, change.is_dir);
        }
        reported
    }
}

/// Changes found in one cycle, identical reports coalesced
#[derive(Default)]
struct CycleBatch {
    order: Vec<(PathBuf, EventKind)>,
    entries: HashMap<(PathBuf, EventKind), (u32, bool)>,
}

#[derive(Debug, PartialEq, Eq)]
struct PolledChange {
    path: PathBuf,
    kind: EventKind,
    count: u32,
    is_dir: bool,
}

impl CycleBatch {
    fn push(&mut self, path: PathBuf, kind: EventKind, is_dir: bool) {
        let key = (path, kind);
        match self.entries.get_mut(&key) {
            Some((count, _)) => *count += 1,
            None => {
                self.entries.insert(key.clone(), (1, is_dir));
                self.order.push(key);
            }
        }
    }

    fn contains(&self, path: &Path, kind: EventKind) -> bool {
        self.entries.contains_key(&(path.to_path_buf(), kind))
    }

    fn into_changes(mut self) -> Vec<PolledChange> {
        self.order
            .into_iter()
            .map(|key| {
                let (count, is_dir) = self.entries.remove(&key).unwrap_or((1, false));
                PolledChange {
                    path: key.0,
                    kind: key.1,
                    count,
                    is_dir,
                }
            })
            .collect()
    }
}

fn read_snapshot(dir: &Path) -> io::Result<Snapshot> {
    let mut snapshot = Snapshot::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            // Removed between listing and stat; the next cycle sees it gone
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        snapshot.insert(
            entry.path(),
            EntryMeta {
                is_dir: meta.is_dir(),
                len: meta.len(),
                modified: meta.modified().ok(),
            },
        );
    }
    Ok(snapshot)
}

fn diff_snapshots(old: &Snapshot, new: &Snapshot, batch: &mut CycleBatch) {
    for (path, meta) in new {
        match old.get(path) {
            None => batch.push(path.clone(), EventKind::Create, meta.is_dir),
            Some(prev) if prev.is_dir != meta.is_dir => {
                batch.push(path.clone(), EventKind::Delete, prev.is_dir);
                batch.push(path.clone(), EventKind::Create, meta.is_dir);
            }
            Some(prev) if !meta.is_dir && (prev.len != meta.len || prev.modified != meta.modified) => {
                batch.push(path.clone(), EventKind::Modify, false);
            }
            Some(_) => {}
        }
    }

    for (path, prev) in old.iter().filter(|(p, _)| !new.contains_key(*p)) {
        batch.push(path.clone(), EventKind::Delete, prev.is_dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlate::Correlator;
    use crate::filter::PathFilter;
    use crate::queue::SignalQueue;
    use crate::registry::Registry;
    use filetime::FileTime;
    use tempfile::TempDir;

    struct Fixture {
        detector: PollingDetector,
        registry: Arc<Registry>,
        queue: Arc<SignalQueue>,
        dir: TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            let queue = Arc::new(SignalQueue::new());
            let registry = Arc::new(Registry::new(queue.clone()));
            let correlator =
                Correlator::new(registry.clone(), queue.clone(), Arc::new(PathFilter::empty()));
            let detector =
                PollingDetector::new(EventFeed::new(Arc::new(correlator)), Duration::from_millis(10))
                    .unwrap();
            Self {
                detector,
                registry,
                queue,
                dir: TempDir::new().unwrap(),
            }
        }

        fn root(&self) -> PathBuf {
            fs::canonicalize(self.dir.path()).unwrap()
        }

        fn watch(&self, path: &Path) {
            self.registry
                .insert_with(path, false, |p| self.detector.register_directory(p))
                .unwrap();
        }

        fn drained(&self) -> Vec<(PathBuf, EventKind, u32)> {
            let Some(key) = self.queue.poll() else {
                return vec![];
            };
            let events = key
                .drain()
                .into_iter()
                .map(|e| (e.path().unwrap().to_path_buf(), e.kind(), e.count()))
                .collect();
            key.reset(true, &self.queue);
            events
        }
    }

    #[test]
    fn test_existing_entries_not_reported() {
        let fx = Fixture::new();
        let root = fx.root();
        fs::write(root.join("old.txt"), b"x").unwrap();
        fx.watch(&root);

        assert_eq!(fx.detector.poll_now(), 0);
        assert!(fx.queue.is_empty());
    }

    #[test]
    fn test_create_modify_delete() {
        let fx = Fixture::new();
        let root = fx.root();
        let file = root.join("a.txt");
        fx.watch(&root);

        fs::write(&file, b"one").unwrap();
        fx.detector.poll_now();
        assert_eq!(fx.drained(), vec![(file.clone(), EventKind::Create, 1)]);

        filetime::set_file_mtime(&file, FileTime::from_unix_time(1_000_000, 0)).unwrap();
        fx.detector.poll_now();
        assert_eq!(fx.drained(), vec![(file.clone(), EventKind::Modify, 1)]);

        fs::remove_file(&file).unwrap();
        fx.detector.poll_now();
        assert_eq!(fx.drained(), vec![(file, EventKind::Delete, 1)]);
    }

    #[test]
    fn test_directory_entries_never_modified() {
        let fx = Fixture::new();
        let root = fx.root();
        let sub = root.join("sub");
        fs::create_dir(&sub).unwrap();
        fx.watch(&root);

        fs::write(sub.join("inner"), b"x").unwrap();
        filetime::set_file_mtime(&sub, FileTime::from_unix_time(1_000_000, 0)).unwrap();
        assert_eq!(fx.detector.poll_now(), 0);
    }

    #[test]
    fn test_vanished_directory_is_invalid() {
        let fx = Fixture::new();
        let root = fx.root();
        let sub = root.join("sub");
        fs::create_dir(&sub).unwrap();
        let handle = fx.detector.register_directory(&sub).unwrap();

        fs::remove_dir(&sub).unwrap();
        fx.detector.poll_now();
        assert!(!fx.detector.is_valid(&handle));
    }

    #[test]
    fn test_removed_subtree_reported_once() {
        let fx = Fixture::new();
        let root = fx.root();
        let sub = root.join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("a"), b"x").unwrap();
        fs::create_dir(sub.join("b")).unwrap();
        fx.watch(&root);
        fx.watch(&sub);

        fs::remove_dir_all(&sub).unwrap();
        assert_eq!(fx.detector.poll_now(), 3);

        let mut seen = Vec::new();
        while let Some(key) = fx.queue.poll() {
            for event in key.drain() {
                let path = event.path().unwrap().to_path_buf();
                seen.push((key.path().to_path_buf(), path, event.kind(), event.count()));
            }
        }
        seen.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
        assert_eq!(
            seen,
            vec![
                (root.clone(), sub.clone(), EventKind::Delete, 1),
                (sub.clone(), sub.clone(), EventKind::Delete, 1),
                (sub.clone(), sub.join("a"), EventKind::Delete, 1),
                (sub.clone(), sub.join("b"), EventKind::Delete, 1),
            ]
        );
    }

    #[test]
    fn test_vanished_directory_reports_itself_without_parent() {
        let fx = Fixture::new();
        let sub = fx.root().join("sub");
        fs::create_dir(&sub).unwrap();
        fx.watch(&sub);

        fs::remove_dir(&sub).unwrap();
        fx.detector.poll_now();
        assert_eq!(fx.drained(), vec![(sub, EventKind::Delete, 1)]);
    }

    #[test]
    fn test_ready_after_first_cycle() {
        let fx = Fixture::new();
        assert!(!fx.detector.is_ready());
        fx.detector.poll_now();
        assert!(fx.detector.is_ready());
    }

    #[test]
    fn test_cycle_batch_coalesces() {
        let mut batch = CycleBatch::default();
        batch.push(PathBuf::from("/d/a"), EventKind::Delete, true);
        batch.push(PathBuf::from("/d/b"), EventKind::Create, false);
        batch.push(PathBuf::from("/d/a"), EventKind::Delete, true);
        batch.push(PathBuf::from("/d/a"), EventKind::Create, false);
        assert!(batch.contains(Path::new("/d/a"), EventKind::Delete));
        assert!(!batch.contains(Path::new("/d/b"), EventKind::Delete));

        let changes: Vec<_> = batch
            .into_changes()
            .into_iter()
            .map(|c| (c.path, c.kind, c.count, c.is_dir))
            .collect();
        assert_eq!(
            changes,
            vec![
                (PathBuf::from("/d/a"), EventKind::Delete, 2, true),
                (PathBuf::from("/d/b"), EventKind::Create, 1, false),
                (PathBuf::from("/d/a"), EventKind::Create, 1, false),
            ]
        );
    }

    #[test]
    fn test_background_thread_polls() {
        let fx = Fixture::new();
        let root = fx.root();
        fx.watch(&root);
        fx.detector.start().unwrap();

        fs::write(root.join("bg.txt"), b"x").unwrap();
        let key = fx.queue.poll_timeout(Duration::from_secs(5)).expect("polled change");
        assert_eq!(key.path(), root);

        assert!(fx.detector.close_timeout(Duration::from_secs(5)));
        assert!(matches!(fx.detector.start(), Err(WatchError::DetectorClosed)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let queue = Arc::new(SignalQueue::new());
        let registry = Arc::new(Registry::new(queue.clone()));
        let correlator = Correlator::new(registry, queue, Arc::new(PathFilter::empty()));
        let feed = EventFeed::new(Arc::new(correlator));
        assert!(matches!(
            PollingDetector::new(feed, Duration::ZERO),
            Err(WatchError::Config(_))
        ));
    }
}
