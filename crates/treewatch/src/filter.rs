//! Ignore patterns for watched trees
//!
//! Patterns use gitignore syntax and are matched against absolute paths:
//! patterns without a slash match a file name at any depth, patterns with a
//! slash are anchored at the filesystem root. A path is ignored when it or
//! any of its ancestors matches, unless a later `!pattern` whitelists it.

use crate::error::{Result, WatchError};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::path::Path;

/// Compiled ignore patterns
pub struct PathFilter {
    /// None when no patterns are configured
    matcher: Option<Gitignore>,
}

impl PathFilter {
    /// Compile a set of gitignore-style patterns
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = GitignoreBuilder::new("/");
        let mut count = 0;

        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() || pattern.starts_with('#') {
                continue;
            }
            builder
                .add_line(None, pattern)
                .map_err(|e| WatchError::InvalidPattern(format!("{pattern}: {e}")))?;
            count += 1;
        }

        if count == 0 {
            return Ok(Self::empty());
        }

        let matcher = builder
            .build()
            .map_err(|e| WatchError::InvalidPattern(e.to_string()))?;
        Ok(Self {
            matcher: Some(matcher),
        })
    }

    /// Filter that ignores nothing
    pub fn empty() -> Self {
        Self { matcher: None }
    }

    /// Check if `path` should be ignored
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        let Some(matcher) = &self.matcher else {
            return false;
        };

        let matched = matcher.matched(path, is_dir);
        if matched.is_ignore() {
            return true;
        }
        if matched.is_whitelist() {
            return false;
        }

        // Anything below an ignored directory is ignored too
        path.ancestors()
            .skip(1)
            .filter(|a| a.parent().is_some())
            .any(|ancestor| matcher.matched(ancestor, true).is_ignore())
    }

    /// Number of active patterns
    pub fn len(&self) -> usize {
        self.matcher.as_ref().map_or(0, Gitignore::num_ignores) as usize
            + self.matcher.as_ref().map_or(0, Gitignore::num_whitelists) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.matcher.is_none()
    }
}

impl Default for PathFilter {
    fn default() -> Self {
        Self::empty()
    }
}
