//! Notifier configuration via TOML
//!
//! The wake-protocol fan-out runs on a fixed worker pool. Its size and queue
//! bound come from a [`NotifierConfig`], which can be built in code or loaded
//! from a TOML file. Missing keys fall back to their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tvar_core::{StmError, StmResult};

/// Default number of notifier worker threads
pub const DEFAULT_WORKER_THREADS: usize = 2;
/// Default maximum number of queued fan-outs
pub const DEFAULT_MAX_QUEUE_DEPTH: usize = 4096;
/// Default worker thread name prefix
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "tvar-notify";

/// Configuration for a [`Notifier`](crate::notifier::Notifier) pool.
///
/// # Example
///
/// ```toml
/// worker_threads = 2
/// max_queue_depth = 4096
/// thread_name_prefix = "tvar-notify"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Number of worker threads running fan-outs (at least 1).
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Maximum queued fan-outs before submissions are rejected (at least 1).
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    /// Workers are named `{prefix}-0`, `{prefix}-1`, etc.
    #[serde(default = "default_thread_name_prefix")]
    pub thread_name_prefix: String,
}

fn default_worker_threads() -> usize {
    DEFAULT_WORKER_THREADS
}

fn default_max_queue_depth() -> usize {
    DEFAULT_MAX_QUEUE_DEPTH
}

fn default_thread_name_prefix() -> String {
    DEFAULT_THREAD_NAME_PREFIX.to_string()
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_worker_threads(),
            max_queue_depth: default_max_queue_depth(),
            thread_name_prefix: default_thread_name_prefix(),
        }
    }
}

impl NotifierConfig {
    /// Set the number of worker threads
    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Set the queue bound
    pub fn with_max_queue_depth(mut self, max_queue_depth: usize) -> Self {
        self.max_queue_depth = max_queue_depth;
        self
    }

    /// Set the worker thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Check that every value is in range.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero worker count or queue depth, or an
    /// empty thread name prefix.
    pub fn validate(&self) -> StmResult<()> {
        if self.worker_threads == 0 {
            return Err(StmError::invalid_config("worker_threads must be at least 1"));
        }
        if self.max_queue_depth == 0 {
            return Err(StmError::invalid_config("max_queue_depth must be at least 1"));
        }
        if self.thread_name_prefix.is_empty() {
            return Err(StmError::invalid_config("thread_name_prefix must not be empty"));
        }
        Ok(())
    }

    /// Parse and validate a config from TOML text.
    pub fn from_toml_str(content: &str) -> StmResult<Self> {
        Self::parse(content, Path::new("<inline>"))
    }

    /// Read, parse and validate a config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> StmResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| StmError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: &Path) -> StmResult<Self> {
        let config: NotifierConfig =
            toml::from_str(content).map_err(|e| StmError::ConfigParse {
                path: PathBuf::from(path),
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# tvar notifier configuration
#
# Worker threads running wake-protocol fan-outs (default: 2)
worker_threads = 2

# Queued fan-outs before writers fall back to overflow threads (default: 4096)
max_queue_depth = 4096

# Worker thread name prefix
thread_name_prefix = "tvar-notify"
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_values() {
        let config = NotifierConfig::default();
        assert_eq!(config.worker_threads, 2);
        assert_eq!(config.max_queue_depth, 4096);
        assert_eq!(config.thread_name_prefix, "tvar-notify");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_toml_matches_default() {
        let parsed = NotifierConfig::from_toml_str(NotifierConfig::default_toml()).unwrap();
        assert_eq!(parsed, NotifierConfig::default());
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let parsed = NotifierConfig::from_toml_str("worker_threads = 8\n").unwrap();
        assert_eq!(parsed.worker_threads, 8);
        assert_eq!(parsed.max_queue_depth, DEFAULT_MAX_QUEUE_DEPTH);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = NotifierConfig::from_toml_str("worker_threads = 0\n").unwrap_err();
        assert!(matches!(err, StmError::InvalidConfig(_)));
    }

    #[test]
    fn test_zero_queue_rejected() {
        let config = NotifierConfig::default().with_max_queue_depth(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let config = NotifierConfig::default().with_thread_name_prefix("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let err = NotifierConfig::from_toml_str("worker_threads = \"many\"").unwrap_err();
        assert!(matches!(err, StmError::ConfigParse { .. }));
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tvar.toml");
        std::fs::write(&path, "worker_threads = 3\nmax_queue_depth = 10\n").unwrap();

        let config = NotifierConfig::from_file(&path).unwrap();
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.max_queue_depth, 10);
    }

    #[test]
    fn test_from_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = NotifierConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, StmError::ConfigIo { .. }));
    }
}
