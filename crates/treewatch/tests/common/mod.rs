//! Common utilities for integration tests

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use treewatch::{EventKind, EventStream, PathWatchEvent};

/// Upper bound for anything that happens on another thread
pub const WAIT: Duration = Duration::from_secs(5);

/// Scratch directory with a canonical root path
pub struct TestTree {
    _dir: TempDir,
    root: PathBuf,
}

impl TestTree {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let root = fs::canonicalize(dir.path()).unwrap();
        Self { _dir: dir, root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    pub fn mkdir(&self, rel: &str) -> PathBuf {
        let path = self.path(rel);
        fs::create_dir_all(&path).unwrap();
        path
    }

    pub fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.path(rel);
        fs::write(&path, contents).unwrap();
        path
    }
}

/// Next event on `stream`, failing the test after [`WAIT`]
pub fn next_event(stream: &EventStream) -> PathWatchEvent {
    stream
        .recv_timeout(WAIT)
        .expect("timed out waiting for an event")
}

/// Receive until an event matching `pred` arrives
pub fn wait_for_event<F>(stream: &EventStream, pred: F) -> PathWatchEvent
where
    F: Fn(&PathWatchEvent) -> bool,
{
    let deadline = Instant::now() + WAIT;
    while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
        match stream.recv_timeout(remaining) {
            Some(event) if pred(&event) => return event,
            Some(_) => continue,
            None => break,
        }
    }
    panic!("timed out waiting for a matching event");
}

/// Shorthand predicate: `kind` reported for `path`
pub fn is(kind: EventKind, path: &Path) -> impl Fn(&PathWatchEvent) -> bool + '_ {
    move |e| e.kind == kind && e.path.as_deref() == Some(path)
}

/// Poll `cond` until it holds or [`WAIT`] elapses
pub fn eventually<F: Fn() -> bool>(cond: F) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}
