//! Error types for the stub launcher.

use std::path::PathBuf;

use smol_pack::{CompressError, PackError};
use thiserror::Error;

/// Every condition that stops the stub before the wrapped program runs.
#[derive(Debug, Error)]
pub enum StubError {
    /// The stub's own path could not be determined.
    #[error("failed to determine executable path: {0}")]
    SelfPath(String),

    /// The stub carries no payload.
    #[error("no pressed payload found in {}", path.display())]
    MarkerNotFound {
        /// Stub that was searched.
        path: PathBuf,
    },

    /// Metadata was read but rejected.
    #[error("invalid payload metadata: {0}")]
    InvalidMetadata(String),

    /// Decompression failed or produced the wrong size.
    #[error("failed to decompress payload: {0}")]
    Decompress(#[from] CompressError),

    /// Reading the stub or writing the cache failed.
    #[error(transparent)]
    Pack(PackError),

    /// The extracted binary could not be started.
    #[error("failed to execute {}: {source}", path.display())]
    Exec {
        /// Binary that was executed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl From<PackError> for StubError {
    fn from(e: PackError) -> Self {
        match e {
            PackError::InvalidMetadata(msg) => StubError::InvalidMetadata(msg),
            PackError::Compression(e) => StubError::Decompress(e),
            other => StubError::Pack(other),
        }
    }
}

/// Result type for stub operations.
pub type Result<T> = std::result::Result<T, StubError>;
