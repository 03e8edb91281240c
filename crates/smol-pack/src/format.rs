//! Metadata block that follows the payload marker.
//!
//! Layout (36 bytes, then an optional config record):
//! ```text
//! Offset  Size  Field
//! 0       8     compressed_size (u64 LE)
//! 8       8     uncompressed_size (u64 LE)
//! 16      16    cache_key (ASCII hex, no terminator)
//! 32      1     platform id
//! 33      1     arch id
//! 34      1     libc id
//! 35      1     has_config (0 or 1)
//! 36      N     config record, N = 1176 (SMFG) or 366 (SVFG)
//! ```
//!
//! The compressed payload starts immediately after the last byte read.

use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;

use sha2::{Digest, Sha512};

use crate::compress::CompressError;
use crate::config::{ConfigKind, EmbeddedConfig};
use crate::finder::find_payload;
use crate::platform::PlatformMetadata;
use crate::{PackError, Result};

/// Hard ceiling on both declared sizes (500 MiB).
pub const MAX_UNCOMPRESSED_SIZE: u64 = 500 * 1024 * 1024;

/// Length of a cache key in bytes.
pub const CACHE_KEY_LEN: usize = 16;

/// Size of the fixed metadata prefix.
pub const METADATA_SIZE: usize = 8 + 8 + CACHE_KEY_LEN + PlatformMetadata::SIZE + 1;

/// Decoded metadata block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmolMetadata {
    /// Length of the compressed payload.
    pub compressed_size: u64,
    /// Length of the payload after decompression.
    pub uncompressed_size: u64,
    /// Raw cache key bytes as stored.
    pub cache_key: [u8; CACHE_KEY_LEN],
    /// Raw platform/arch/libc bytes as stored.
    pub platform: [u8; PlatformMetadata::SIZE],
    /// Whether a config record follows the fixed prefix.
    pub has_config: bool,
    /// Decoded config record. `None` when absent or unrecognized.
    pub config: Option<EmbeddedConfig>,
    /// Absolute file offset of the compressed payload.
    pub data_offset: u64,
}

impl SmolMetadata {
    /// Build metadata for a payload about to be written.
    pub fn new(
        compressed_size: u64,
        uncompressed_size: u64,
        cache_key: &str,
        platform: PlatformMetadata,
        config: Option<EmbeddedConfig>,
    ) -> Result<Self> {
        let key: [u8; CACHE_KEY_LEN] = cache_key.as_bytes().try_into().map_err(|_| {
            PackError::InvalidMetadata(format!(
                "cache key must be {} characters, got {}",
                CACHE_KEY_LEN,
                cache_key.len()
            ))
        })?;
        Ok(Self {
            compressed_size,
            uncompressed_size,
            cache_key: key,
            platform: platform.to_bytes(),
            has_config: config.is_some(),
            config,
            data_offset: 0,
        })
    }

    /// Cache key as a string. Empty if the stored bytes are not UTF-8.
    pub fn cache_key(&self) -> &str {
        std::str::from_utf8(&self.cache_key).unwrap_or("")
    }

    /// Decoded platform triple.
    pub fn platform(&self) -> Result<PlatformMetadata> {
        PlatformMetadata::from_bytes(self.platform)
    }

    /// Embedded update config, if the record is an SMFG one.
    pub fn update_config(&self) -> Option<&crate::SmolUpdateConfig> {
        self.config.as_ref().and_then(EmbeddedConfig::as_update)
    }

    /// Encode the fixed prefix and config record.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(METADATA_SIZE);
        buf.extend_from_slice(&self.compressed_size.to_le_bytes());
        buf.extend_from_slice(&self.uncompressed_size.to_le_bytes());
        buf.extend_from_slice(&self.cache_key);
        buf.extend_from_slice(&self.platform);
        match &self.config {
            Some(config) => {
                buf.push(1);
                buf.extend_from_slice(&config.serialize()?);
            }
            None => buf.push(0),
        }
        Ok(buf)
    }

    /// Check declared sizes, cache key and platform bytes.
    pub fn validate(&self, max_size: u64) -> Result<()> {
        validate_metadata(self, max_size)
    }
}

/// Read a metadata block from the current position of `reader`.
///
/// `kind` selects how a present config record is decoded; the record's
/// bytes are always consumed so the cursor lands on the payload.
pub fn read_metadata<R: Read + Seek + ?Sized>(
    reader: &mut R,
    kind: ConfigKind,
) -> Result<SmolMetadata> {
    let mut fixed = [0u8; METADATA_SIZE];
    read_block(reader, &mut fixed, "metadata")?;

    let compressed_size = u64::from_le_bytes(le8(&fixed[0..8]));
    let uncompressed_size = u64::from_le_bytes(le8(&fixed[8..16]));
    let mut cache_key = [0u8; CACHE_KEY_LEN];
    cache_key.copy_from_slice(&fixed[16..32]);
    let platform = [fixed[32], fixed[33], fixed[34]];
    let has_config = fixed[35] != 0;

    let config = if has_config {
        let mut record = vec![0u8; kind.size()];
        read_block(reader, &mut record, "config record")?;
        let config = EmbeddedConfig::deserialize(kind, &record);
        if config.is_none() {
            tracing::debug!(?kind, "config record present but not recognized");
        }
        config
    } else {
        None
    };

    let data_offset = reader.stream_position()?;

    Ok(SmolMetadata {
        compressed_size,
        uncompressed_size,
        cache_key,
        platform,
        has_config,
        config,
        data_offset,
    })
}

/// Locate and read the metadata block of the pressed binary at `path`.
pub fn read_metadata_from_file(path: &Path, kind: ConfigKind) -> Result<SmolMetadata> {
    let mut file = File::open(path)?;
    let offset = find_payload(&mut file)?.ok_or_else(|| PackError::MarkerNotFound {
        path: path.to_path_buf(),
    })?;
    file.seek(SeekFrom::Start(offset))?;
    read_metadata(&mut file, kind)
}

/// Read the compressed payload described by `meta`.
///
/// Call only after [`validate_metadata`]; the buffer is sized from the
/// declared `compressed_size`.
pub fn read_compressed<R: Read + Seek + ?Sized>(
    reader: &mut R,
    meta: &SmolMetadata,
) -> Result<Vec<u8>> {
    let len = usize::try_from(meta.compressed_size)
        .map_err(|_| CompressError::AllocationFailed(usize::MAX))?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| CompressError::AllocationFailed(len))?;
    buf.resize(len, 0);
    reader.seek(SeekFrom::Start(meta.data_offset))?;
    read_block(reader, &mut buf, "payload")?;
    Ok(buf)
}

/// Admission check run before any allocation for the payload.
pub fn validate_metadata(meta: &SmolMetadata, max_size: u64) -> Result<()> {
    for (name, size) in [
        ("compressed_size", meta.compressed_size),
        ("uncompressed_size", meta.uncompressed_size),
    ] {
        if size == 0 {
            return Err(PackError::InvalidMetadata(format!("{} is zero", name)));
        }
        if size > max_size {
            return Err(PackError::InvalidMetadata(format!(
                "{} {} exceeds limit {}",
                name, size, max_size
            )));
        }
    }

    if !is_valid_cache_key(&meta.cache_key) {
        return Err(PackError::InvalidMetadata(format!(
            "malformed cache key: {:?}",
            String::from_utf8_lossy(&meta.cache_key)
        )));
    }

    meta.platform()?;
    Ok(())
}

/// True if `key` is exactly 16 ASCII hex digits (either case).
pub fn is_valid_cache_key(key: &[u8]) -> bool {
    key.len() == CACHE_KEY_LEN && key.iter().all(u8::is_ascii_hexdigit)
}

/// Cache key for an uncompressed payload: the first 16 hex characters of
/// its SHA-512 digest.
pub fn cache_key_for(data: &[u8]) -> String {
    let digest = Sha512::digest(data);
    let mut key = hex::encode(&digest[..CACHE_KEY_LEN / 2]);
    key.truncate(CACHE_KEY_LEN);
    key
}

fn read_block<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8], what: &'static str) -> Result<()> {
    let expected = buf.len();
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == ErrorKind::UnexpectedEof {
            PackError::Truncated { what, expected }
        } else {
            PackError::Io(e)
        }
    })
}

fn le8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    out
}
