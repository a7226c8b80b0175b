//! Directory tree watching with pluggable change detectors
//!
//! This crate provides the registration and signalling engine of a
//! directory watcher:
//! - Per-directory watch keys with buffered, ordered events
//! - A signal queue holding each signalled key at most once
//! - Recursive and ancestor registration, extended as directories appear
//! - Native (OS push) and polling detectors behind one trait
//! - Listener and stream sinks fed by a single dispatch thread

pub mod config;
pub mod detector;
pub mod error;
pub mod event;
pub mod filter;
pub mod key;
pub mod queue;
pub mod registry;
pub mod sink;

mod correlate;
mod dispatch;
mod lifecycle;
mod tree;
mod watcher;

pub use config::WatcherConfig;
pub use detector::{
    Detector, DetectorHandle, DetectorKind, EventFeed, ManualDetector, NativeDetector,
    PollingDetector,
};
pub use error::{Result, WatchError};
pub use event::{ChangeEvent, EventKind, PathWatchEvent};
pub use filter::PathFilter;
pub use key::{KeyState, WatchKey};
pub use lifecycle::RunState;
pub use queue::SignalQueue;
pub use registry::Registry;
pub use sink::{EventSink, EventStream, ListenerSink, SinkId, StreamSink, WatchListener};
pub use watcher::FileSystemWatcher;
