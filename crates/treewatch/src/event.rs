//! Raw change notifications and dispatched events

use std::fmt;
use std::path::{Path, PathBuf};

/// Type of file system change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Entry created
    Create,
    /// Entry deleted
    Delete,
    /// Entry modified
    Modify,
    /// Events may have been lost
    Overflow,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Create => "create",
            EventKind::Delete => "delete",
            EventKind::Modify => "modify",
            EventKind::Overflow => "overflow",
        };
        f.write_str(name)
    }
}

/// Raw notification buffered on a watch key
///
/// `path` is `None` only for [`EventKind::Overflow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    path: Option<PathBuf>,
    kind: EventKind,
    count: u32,
}

impl ChangeEvent {
    /// Change of `path`, reported once
    pub fn new(path: impl Into<PathBuf>, kind: EventKind) -> Self {
        Self::with_count(path, kind, 1)
    }

    /// Change of `path` coalesced from `count` identical reports
    pub fn with_count(path: impl Into<PathBuf>, kind: EventKind, count: u32) -> Self {
        Self {
            path: Some(path.into()),
            kind,
            count: count.max(1),
        }
    }

    /// Possible loss of events
    pub fn overflow() -> Self {
        Self {
            path: None,
            kind: EventKind::Overflow,
            count: 1,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_overflow(&self) -> bool {
        self.kind == EventKind::Overflow
    }
}

/// Event handed to sinks by the dispatch loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathWatchEvent {
    /// Directory the event was reported against
    pub registered_path: PathBuf,
    /// Changed path, same as or directly within `registered_path`
    ///
    /// `None` when `overflow` is set.
    pub path: Option<PathBuf>,
    /// Kind of change
    pub kind: EventKind,
    /// Number of coalesced detector reports
    pub count: u32,
    /// Events for `registered_path` may have been lost
    pub overflow: bool,
}

impl PathWatchEvent {
    pub(crate) fn from_change(registered_path: &Path, change: ChangeEvent) -> Self {
        let overflow = change.is_overflow();
        Self {
            registered_path: registered_path.to_path_buf(),
            path: change.path,
            kind: change.kind,
            count: change.count,
            overflow,
        }
    }
}
