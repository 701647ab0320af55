//! Error types for tvar
//!
//! The variable hot paths (`read`, `write`) are infallible. Errors only surface
//! from the ambient layers around them: notifier submission and configuration.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for tvar operations
pub type StmResult<T> = std::result::Result<T, StmError>;

/// Error types for the tvar runtime
#[derive(Debug, Error)]
pub enum StmError {
    /// The notifier pool has been shut down and accepts no more work
    #[error("notifier has been shut down")]
    NotifierShutdown,

    /// The notifier queue is at capacity
    #[error("notifier queue is full (capacity {capacity})")]
    Backpressure {
        /// Configured maximum queue depth
        capacity: usize,
    },

    /// The OS refused to start a notifier thread
    #[error("Failed to spawn notifier thread '{thread}': {source}")]
    WorkerSpawn {
        /// Name of the thread that failed to start
        thread: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// A configuration value is out of range
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Reading a configuration file failed
    #[error("Failed to read config file '{}': {source}", path.display())]
    ConfigIo {
        /// File that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Parsing a configuration file failed
    #[error("Failed to parse config '{}': {message}", path.display())]
    ConfigParse {
        /// File (or `<inline>`) that failed to parse
        path: PathBuf,
        /// Parser message
        message: String,
    },
}

impl StmError {
    /// Create an `InvalidConfig` error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        StmError::InvalidConfig(msg.into())
    }

    /// Whether retrying the same submission later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StmError::Backpressure { .. })
    }
}
