//! Error types for the watcher

use std::path::PathBuf;
use thiserror::Error;

/// Result type for watcher operations
pub type Result<T> = std::result::Result<T, WatchError>;

/// Errors raised by the watcher and its detectors
#[derive(Error, Debug)]
pub enum WatchError {
    /// Registration or start attempted before a detector was created
    #[error("no detector created yet")]
    NoDetector,

    /// `start` called while the dispatch loop is running
    #[error("watcher is already running")]
    AlreadyRunning,

    /// `stop` called while the dispatch loop is not running
    #[error("watcher is not running")]
    NotRunning,

    /// The detector was closed and cannot accept new work
    #[error("detector has been closed")]
    DetectorClosed,

    /// Path does not exist
    #[error("path not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Only directories can be registered with a detector
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// The detector refused to watch a directory
    #[error("failed to register {}: {source}", path.display())]
    Register {
        path: PathBuf,
        #[source]
        source: Box<WatchError>,
    },

    /// Native notification backend error
    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid ignore pattern
    #[error("invalid ignore pattern: {0}")]
    InvalidPattern(String),

    /// Configuration file could not be parsed
    #[error("failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

impl WatchError {
    /// Whether this error is a misuse of the watcher lifecycle rather than
    /// an I/O failure
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            WatchError::NoDetector
                | WatchError::AlreadyRunning
                | WatchError::NotRunning
                | WatchError::DetectorClosed
        )
    }

    pub(crate) fn register(path: impl Into<PathBuf>, source: WatchError) -> Self {
        WatchError::Register {
            path: path.into(),
            source: Box::new(source),
        }
    }
}
