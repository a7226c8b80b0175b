//! Run state of the dispatch thread

use crate::error::{Result, WatchError};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// State of the dispatch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
    /// Stop requested, dispatch thread not yet exited
    Stopping,
}

/// Owns the dispatch thread and its state
///
/// The state moves Stopped -> Running on `start`, Running -> Stopping on
/// `begin_stop`, and back to Stopped when the thread exits.
pub(crate) struct Lifecycle {
    state: Mutex<RunState>,
    worker: Mutex<Option<Worker>>,
}

struct Worker {
    handle: JoinHandle<()>,
    /// Disconnects when the thread exits
    done: Receiver<()>,
}

/// Marks the lifecycle stopped when the dispatch thread finishes
struct ExitGuard {
    lifecycle: Arc<Lifecycle>,
    _done: Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        *self.lifecycle.state.lock() = RunState::Stopped;
    }
}

impl Lifecycle {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(RunState::Stopped),
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> RunState {
        *self.state.lock()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == RunState::Running
    }

    /// Spawn the dispatch thread running `body`
    pub(crate) fn start<F>(self: &Arc<Self>, name: &str, stack_size: Option<usize>, body: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        // Worker lock serializes concurrent starts; the exit guard only
        // touches the state lock.
        let mut worker = self.worker.lock();
        {
            let mut state = self.state.lock();
            if *state != RunState::Stopped {
                return Err(WatchError::AlreadyRunning);
            }
            *state = RunState::Running;
        }

        if let Some(previous) = worker.take() {
            if previous.handle.join().is_err() {
                warn!("Previous dispatch thread panicked");
            }
        }

        let (done_tx, done_rx) = crossbeam_channel::bounded(0);
        let guard = ExitGuard {
            lifecycle: self.clone(),
            _done: done_tx,
        };

        let mut builder = thread::Builder::new().name(name.to_string());
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }

        // On spawn failure the closure is dropped and the guard resets the state
        let handle = builder.spawn(move || {
            let _guard = guard;
            body();
        })?;

        *worker = Some(Worker {
            handle,
            done: done_rx,
        });
        Ok(())
    }

    /// Move Running -> Stopping
    pub(crate) fn begin_stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != RunState::Running {
            return Err(WatchError::NotRunning);
        }
        *state = RunState::Stopping;
        Ok(())
    }

    /// Wait for the dispatch thread to exit, at most `timeout` if given
    ///
    /// Returns false if the thread was still running when the wait ended.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> bool {
        let Some(worker) = self.worker.lock().take() else {
            return true;
        };

        if worker.handle.thread().id() == thread::current().id() {
            // Stop requested from a sink; the loop exits after this batch
            debug!("Stop requested from the dispatch thread");
            *self.worker.lock() = Some(worker);
            return false;
        }

        let exited = match timeout {
            None => {
                let _ = worker.done.recv();
                true
            }
            Some(timeout) => !matches!(
                worker.done.recv_timeout(timeout),
                Err(RecvTimeoutError::Timeout)
            ),
        };

        if exited {
            if worker.handle.join().is_err() {
                warn!("Dispatch thread panicked");
            }
        } else {
            *self.worker.lock() = Some(worker);
        }
        exited
    }
}
