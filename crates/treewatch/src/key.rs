//! Watch keys: one per registered directory

use crate::detector::DetectorHandle;
use crate::event::ChangeEvent;
use crate::queue::SignalQueue;
use parking_lot::Mutex;
use std::fmt;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle state of a watch key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Registered, no pending events
    Ready,
    /// Queued exactly once in the signal queue
    Signalled,
    /// No longer watchable (terminal)
    Invalid,
}

/// Handle for one registered directory
///
/// Identity is by reference. Events are buffered under a per-key lock that
/// is independent of the registry lock.
pub struct WatchKey {
    path: PathBuf,
    recursive: AtomicBool,
    handle: DetectorHandle,
    inner: Mutex<KeyInner>,
}

struct KeyInner {
    state: KeyState,
    pending: Vec<ChangeEvent>,
}

impl WatchKey {
    pub(crate) fn new(path: PathBuf, recursive: bool, handle: DetectorHandle) -> Self {
        Self {
            path,
            recursive: AtomicBool::new(recursive),
            handle,
            inner: Mutex::new(KeyInner {
                state: KeyState::Ready,
                pending: Vec::new(),
            }),
        }
    }

    /// Registered directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether directories created below this one get registered too
    pub fn watches_children_recursively(&self) -> bool {
        self.recursive.load(Ordering::Acquire)
    }

    pub(crate) fn set_recursive(&self, recursive: bool) {
        self.recursive.store(recursive, Ordering::Release);
    }

    pub fn state(&self) -> KeyState {
        self.inner.lock().state
    }

    pub fn is_valid(&self) -> bool {
        self.state() != KeyState::Invalid
    }

    /// Number of buffered, not yet dispatched events
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub(crate) fn handle(&self) -> &DetectorHandle {
        &self.handle
    }

    /// Buffer an event and queue the key if it was READY
    ///
    /// Returns true when this call queued the key.
    pub(crate) fn signal(self: &Arc<Self>, event: ChangeEvent, queue: &SignalQueue) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            KeyState::Invalid => false,
            KeyState::Signalled => {
                inner.pending.push(event);
                false
            }
            KeyState::Ready => {
                inner.pending.push(event);
                // Queue push happens under the key lock so cancel() can't
                // interleave between the state change and the push.
                if queue.push(self.clone()) {
                    inner.state = KeyState::Signalled;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Take every buffered event, leaving an empty buffer
    pub(crate) fn drain(&self) -> Vec<ChangeEvent> {
        mem::take(&mut self.inner.lock().pending)
    }

    /// Return the key to READY after dispatch
    ///
    /// A still-valid key with events buffered since the drain is queued
    /// again right away. Returns false if the key is (now) invalid.
    pub(crate) fn reset(self: &Arc<Self>, valid: bool, queue: &SignalQueue) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == KeyState::Invalid {
            return false;
        }
        if !valid {
            inner.state = KeyState::Invalid;
            inner.pending.clear();
            return false;
        }

        if !inner.pending.is_empty() && queue.push(self.clone()) {
            inner.state = KeyState::Signalled;
        } else {
            inner.state = KeyState::Ready;
        }
        true
    }

    /// Mark invalid and drop buffered events
    pub(crate) fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.state = KeyState::Invalid;
        inner.pending.clear();
    }
}

impl fmt::Debug for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchKey")
            .field("path", &self.path)
            .field("recursive", &self.watches_children_recursively())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn key(path: &str) -> Arc<WatchKey> {
        Arc::new(WatchKey::new(path.into(), true, DetectorHandle::new(path)))
    }

    #[test]
    fn test_signal_queues_once() {
        let queue = SignalQueue::new();
        let key = key("/d");

        assert!(key.signal(ChangeEvent::new("/d/a", EventKind::Create), &queue));
        assert!(!key.signal(ChangeEvent::new("/d/a", EventKind::Modify), &queue));
        assert!(!key.signal(ChangeEvent::new("/d/b", EventKind::Create), &queue));

        assert_eq!(key.state(), KeyState::Signalled);
        assert_eq!(key.pending_len(), 3);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_preserves_order() {
        let queue = SignalQueue::new();
        let key = key("/d");
        for name in ["/d/1", "/d/2", "/d/3"] {
            key.signal(ChangeEvent::new(name, EventKind::Modify), &queue);
        }

        let drained: Vec<_> = key
            .drain()
            .iter()
            .map(|e| e.path().unwrap().to_path_buf())
            .collect();
        assert_eq!(drained, vec![PathBuf::from("/d/1"), "/d/2".into(), "/d/3".into()]);
        assert_eq!(key.pending_len(), 0);
    }

    #[test]
    fn test_reset_requeues_late_events() {
        let queue = SignalQueue::new();
        let key = key("/d");
        key.signal(ChangeEvent::new("/d/a", EventKind::Create), &queue);
        let taken = queue.take().unwrap();
        taken.drain();

        // Arrives between drain and reset
        key.signal(ChangeEvent::new("/d/b", EventKind::Create), &queue);
        assert_eq!(queue.len(), 0);

        assert!(taken.reset(true, &queue));
        assert_eq!(key.state(), KeyState::Signalled);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_reset_idle_key_is_ready() {
        let queue = SignalQueue::new();
        let key = key("/d");
        key.signal(ChangeEvent::new("/d/a", EventKind::Create), &queue);
        queue.take().unwrap().drain();

        assert!(key.reset(true, &queue));
        assert_eq!(key.state(), KeyState::Ready);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_invalid_key_is_terminal() {
        let queue = SignalQueue::new();
        let key = key("/d");
        assert!(!key.reset(false, &queue));
        assert_eq!(key.state(), KeyState::Invalid);

        assert!(!key.signal(ChangeEvent::new("/d/a", EventKind::Create), &queue));
        assert!(!key.reset(true, &queue));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_closed_queue_keeps_key_ready() {
        let queue = SignalQueue::new();
        queue.close();
        let key = key("/d");

        assert!(!key.signal(ChangeEvent::new("/d/a", EventKind::Create), &queue));
        assert_eq!(key.state(), KeyState::Ready);
        assert_eq!(key.pending_len(), 1);
    }
}
