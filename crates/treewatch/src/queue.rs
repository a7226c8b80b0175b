//! Signal queue of watch keys with pending events
//!
//! FIFO with blocking `take`, non-blocking `poll` and timed `poll_timeout`.
//! A key is pushed only on its READY -> SIGNALLED transition, so it is never
//! queued twice at once. Closing the queue wakes every blocked consumer.

use crate::key::WatchKey;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// FIFO of signalled watch keys
#[derive(Default)]
pub struct SignalQueue {
    inner: Mutex<QueueInner>,
    available: Condvar,
}

#[derive(Default)]
struct QueueInner {
    keys: VecDeque<Arc<WatchKey>>,
    closed: bool,
}

impl SignalQueue {
    /// Create an open, empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a key; returns false if the queue is closed
    pub(crate) fn push(&self, key: Arc<WatchKey>) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return false;
        }

        debug_assert!(
            !inner.keys.iter().any(|k| Arc::ptr_eq(k, &key)),
            "key queued twice: {}",
            key.path().display()
        );
        inner.keys.push_back(key);
        drop(inner);

        self.available.notify_one();
        true
    }

    /// Block until a key is signalled
    ///
    /// Returns `None` once the queue is closed, even if keys remain.
    pub fn take(&self) -> Option<Arc<WatchKey>> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(key) = inner.keys.pop_front() {
                return Some(key);
            }
            self.available.wait(&mut inner);
        }
    }

    /// Next signalled key, if any, without blocking
    pub fn poll(&self) -> Option<Arc<WatchKey>> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return None;
        }
        inner.keys.pop_front()
    }

    /// Wait up to `timeout` for a signalled key
    pub fn poll_timeout(&self, timeout: Duration) -> Option<Arc<WatchKey>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(key) = inner.keys.pop_front() {
                return Some(key);
            }
            if self.available.wait_until(&mut inner, deadline).timed_out() {
                return if inner.closed { None } else { inner.keys.pop_front() };
            }
        }
    }

    /// Purge a key, e.g. after it was removed from the registry
    pub(crate) fn remove(&self, key: &Arc<WatchKey>) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.keys.len();
        inner.keys.retain(|k| !Arc::ptr_eq(k, key));
        before != inner.keys.len()
    }

    /// Close the queue and wake all waiters
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.available.notify_all();
    }

    /// Discard queued keys and accept pushes again
    pub(crate) fn reopen(&self) {
        let mut inner = self.inner.lock();
        inner.keys.clear();
        inner.closed = false;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of queued keys
    pub fn len(&self) -> usize {
        self.inner.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
