//! Change detectors feeding the correlation engine
//!
//! A detector watches individual directories and reports raw
//! `(path, kind, count)` tuples through an [`EventFeed`]. Three backends:
//! - [`NativeDetector`]: OS push notifications via `notify`
//! - [`PollingDetector`]: periodic directory listing diff
//! - [`ManualDetector`]: events pushed by the caller

mod manual;
mod native;
mod polling;

pub use manual::ManualDetector;
pub use native::NativeDetector;
pub use polling::PollingDetector;

pub use crate::correlate::EventFeed;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Which detector backend to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    /// OS push notifications
    #[default]
    Native,
    /// Periodic directory diff
    Polling,
    /// Caller-supplied events
    Manual,
}

/// Detector-side identity of one watched directory
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DetectorHandle {
    id: u64,
    path: PathBuf,
}

impl DetectorHandle {
    /// Allocate a fresh handle for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT.fetch_add(1, Ordering::Relaxed),
            path: path.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Backend that detects changes in registered directories
///
/// Implementations deliver every detected change through the [`EventFeed`]
/// they were constructed with. Each registered directory is watched on its
/// own, without descending into subdirectories.
pub trait Detector: Send + Sync {
    /// Start watching a single directory
    fn register_directory(&self, path: &Path) -> Result<DetectorHandle>;

    /// Stop watching the directory behind `handle`
    fn cancel(&self, handle: &DetectorHandle);

    /// Whether the directory behind `handle` can still be watched
    fn is_valid(&self, handle: &DetectorHandle) -> bool;

    /// Begin producing events
    fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Stop producing events and release resources
    fn close(&self) -> Result<()>;

    fn kind(&self) -> DetectorKind;
}
