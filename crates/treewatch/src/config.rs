//! Watcher configuration

use crate::detector::DetectorKind;
use crate::error::{Result, WatchError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Watcher configuration
///
/// Every field has a default, so an empty TOML document is a valid
/// configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Detector built by `create_from_config` (default: native)
    #[serde(default)]
    pub detector: DetectorKind,

    /// Polling detector scan interval in milliseconds (default: 1000)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Name of the dispatch thread
    #[serde(default = "default_thread_name")]
    pub thread_name: String,

    /// Stack size of the dispatch thread in bytes (default: platform)
    #[serde(default)]
    pub thread_stack_size: Option<usize>,

    /// Upper bound for `stop` to wait for the dispatch thread (default: none)
    #[serde(default)]
    pub stop_timeout_ms: Option<u64>,

    /// Unregister every directory when the dispatch loop exits (default: true)
    #[serde(default = "default_true")]
    pub clear_on_exit: bool,

    /// Gitignore-style patterns for paths that never produce events
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            detector: DetectorKind::default(),
            poll_interval_ms: default_poll_interval_ms(),
            thread_name: default_thread_name(),
            thread_stack_size: None,
            stop_timeout_ms: None,
            clear_on_exit: true,
            ignore_patterns: vec![],
        }
    }
}

impl WatcherConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    /// Check values that deserialize fine but cannot be used
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(WatchError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.thread_name.is_empty() || self.thread_name.contains('\0') {
            return Err(WatchError::Config(format!(
                "invalid thread_name {:?}",
                self.thread_name
            )));
        }
        if self.thread_stack_size == Some(0) {
            return Err(WatchError::Config(
                "thread_stack_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Option<Duration> {
        self.stop_timeout_ms.map(Duration::from_millis)
    }

    pub fn with_detector(mut self, detector: DetectorKind) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = millis(interval).max(1);
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout_ms = Some(millis(timeout));
        self
    }

    pub fn with_clear_on_exit(mut self, clear: bool) -> Self {
        self.clear_on_exit = clear;
        self
    }

    pub fn with_ignore_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_thread_name() -> String {
    "treewatch-dispatch".to_string()
}

fn default_true() -> bool {
    true
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_document_is_default() {
        let config = WatcherConfig::from_toml_str("").unwrap();
        assert_eq!(config, WatcherConfig::default());
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert!(config.clear_on_exit);
        assert!(config.stop_timeout().is_none());
    }

    #[test]
    fn test_parse_all_fields() {
        let config = WatcherConfig::from_toml_str(
            r#"
            detector = "polling"
            poll_interval_ms = 250
            thread_name = "watch"
            thread_stack_size = 262144
            stop_timeout_ms = 5000
            clear_on_exit = false
            ignore_patterns = ["*.swp", "target/"]
            "#,
        )
        .unwrap();

        assert_eq!(config.detector, DetectorKind::Polling);
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.thread_name, "watch");
        assert_eq!(config.thread_stack_size, Some(262_144));
        assert_eq!(config.stop_timeout(), Some(Duration::from_secs(5)));
        assert!(!config.clear_on_exit);
        assert_eq!(config.ignore_patterns, vec!["*.swp", "target/"]);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            WatcherConfig::from_toml_str("poll_interval_ms = 0"),
            Err(WatchError::Config(_))
        ));
        assert!(matches!(
            WatcherConfig::from_toml_str("thread_name = \"\""),
            Err(WatchError::Config(_))
        ));
        assert!(matches!(
            WatcherConfig::from_toml_str("detector = \"carrier-pigeon\""),
            Err(WatchError::Toml(_))
        ));
    }

    #[test]
    fn test_load_from_file() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("watch.toml");
        fs::write(&path, "detector = \"manual\"\n")?;

        let config = WatcherConfig::load(&path)?;
        assert_eq!(config.detector, DetectorKind::Manual);
        Ok(())
    }

    #[test]
    fn test_builders() {
        let config = WatcherConfig::default()
            .with_detector(DetectorKind::Polling)
            .with_poll_interval(Duration::from_millis(50))
            .with_clear_on_exit(false)
            .with_ignore_patterns(["*.tmp"]);

        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.ignore_patterns, vec!["*.tmp".to_string()]);
    }

    #[test]
    fn test_huge_durations_saturate() {
        let config = WatcherConfig::default()
            .with_poll_interval(Duration::MAX)
            .with_stop_timeout(Duration::MAX);

        assert_eq!(config.poll_interval_ms, u64::MAX);
        assert_eq!(config.stop_timeout_ms, Some(u64::MAX));

        let config = WatcherConfig::default().with_poll_interval(Duration::from_micros(10));
        assert_eq!(config.poll_interval_ms, 1);
    }
}
