//! Self-extracting stub format for pressed executables.
//!
//! This crate owns everything a pressed binary and its producer must agree on:
//! the on-disk layout, the marker search, the embedded config records, the
//! compression contract and the content-addressed extraction cache.
//!
//! # Binary Format
//!
//! ```text
//! +-------------------------------+
//! | Stub Executable               |  native ELF / Mach-O / PE
//! +-------------------------------+
//! | Marker (32 bytes)             |  "__SMOL" "_PRESSED_DATA" "_MAGIC_MARKER"
//! +-------------------------------+
//! | SmolMetadata (36 bytes)       |
//! |  - compressed_size   u64 LE   |
//! |  - uncompressed_size u64 LE   |
//! |  - cache_key         16 hex   |
//! |  - platform/arch/libc 3 bytes |
//! |  - has_config        u8       |
//! +-------------------------------+
//! | Config record (optional)      |  SMFG 1176 bytes or SVFG 366 bytes
//! +-------------------------------+
//! | Compressed payload (zstd)     |
//! +-------------------------------+
//! ```
//!
//! On ELF the marker, metadata and payload travel inside a `pressed_data`
//! note referenced by a PT_NOTE program header. Mach-O and PE stubs carry
//! the same bytes appended after the image.
//!
//! # Extraction Cache
//!
//! ```text
//! <cache_root>/<cache_key>/node              extracted binary (node.exe on win32)
//! <cache_root>/<cache_key>/.dlx-metadata.json
//! ```

#![deny(missing_docs)]

pub mod binary;
pub mod cache;
pub mod compress;
pub mod config;
pub mod finder;
pub mod format;
pub mod fsutil;
pub mod packer;
pub mod platform;

pub use cache::{CacheEnv, DlxMetadata, ExtractionCache, StoreRequest, UpdateCheck};
pub use compress::{Codec, CompressError, ZstdCodec};
pub use config::{ConfigKind, EmbeddedConfig, SmolUpdateConfig, VfsConfig};
pub use finder::{Marker, MarkerPosition, PAYLOAD_MARKER};
pub use format::{SmolMetadata, MAX_UNCOMPRESSED_SIZE};
pub use packer::Packer;
pub use platform::{Arch, Libc, Platform, PlatformMetadata};

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading, writing or extracting pressed binaries.
#[derive(Debug, Error)]
pub enum PackError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Executable parse error.
    #[error("binary parse failed: {0}")]
    Parse(#[from] goblin::error::Error),

    /// Compression backend error.
    #[error(transparent)]
    Compression(#[from] CompressError),

    /// The payload marker is not present in the binary.
    #[error("marker not found: {}", path.display())]
    MarkerNotFound {
        /// File that was searched.
        path: PathBuf,
    },

    /// Metadata failed admission checks.
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Stream ended before a fixed-size block was complete.
    #[error("truncated {what}: expected {expected} bytes")]
    Truncated {
        /// Block being read.
        what: &'static str,
        /// Bytes required.
        expected: usize,
    },

    /// Config record could not be built.
    #[error("config serialization failed: {0}")]
    Config(String),

    /// Binary layout cannot carry a payload.
    #[error("unsupported binary: {0}")]
    UnsupportedBinary(String),

    /// Durable write failed.
    #[error("atomic write failed: {}: {source}", path.display())]
    AtomicWrite {
        /// Destination path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Cache entry could not be created.
    #[error("cache write failed: {}: {reason}", path.display())]
    CacheWrite {
        /// Entry path.
        path: PathBuf,
        /// Reason for failure.
        reason: String,
    },
}

/// Result type for pack operations.
pub type Result<T> = std::result::Result<T, PackError>;
