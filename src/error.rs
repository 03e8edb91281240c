//! Error types for smolpress.
//!
//! Messages are lowercase and name the file, key or field involved, e.g.
//! `"invalid config: smol.update.url must start with http:// or https://"`
//! or `"cache entry not found: 0123456789abcdef"`.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using smolpress's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the smolpress CLI.
#[derive(Error, Debug)]
pub enum Error {
    /// Reading, packing or extracting a binary failed.
    #[error(transparent)]
    Pack(#[from] smol_pack::PackError),

    /// The build-time JSON config was rejected.
    #[error("invalid config: {0}")]
    Config(String),

    /// A command-line value could not be used.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// An input file does not exist.
    #[error("file not found: {}", path.display())]
    FileNotFound {
        /// Path that was not found.
        path: PathBuf,
    },

    /// No cache entry exists for the key.
    #[error("cache entry not found: {key}")]
    CacheEntryNotFound {
        /// Cache key that was looked up.
        key: String,
    },

    /// Filesystem operation failed.
    #[error("{operation} failed: {}: {source}", path.display())]
    Io {
        /// What was being done.
        operation: &'static str,
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Create a config error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config(reason.into())
    }

    /// Wrap an I/O error with the operation and path.
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Config(e.to_string())
    }
}
