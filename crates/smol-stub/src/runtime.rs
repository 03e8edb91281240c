//! Extraction state machine.
//!
//! `LOCATE_MARKER -> READ_METADATA -> VALIDATE -> CACHE_LOOKUP ->
//! (DECOMPRESS -> WRITE_CACHE)`. Every failure is returned to the caller,
//! which reports it and exits; nothing is retried.

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use smol_pack::cache::integrity_for;
use smol_pack::finder::locate_payload;
use smol_pack::format::{read_compressed, read_metadata, validate_metadata};
use smol_pack::{
    CacheEnv, Codec, ConfigKind, ExtractionCache, SmolMetadata, StoreRequest, MAX_UNCOMPRESSED_SIZE,
};
use tracing::{debug, info};

use crate::error::{Result, StubError};

/// A payload ready to execute.
#[derive(Debug)]
pub struct Prepared {
    /// Extracted binary inside the cache.
    pub binary: PathBuf,
    /// Metadata read from the stub.
    pub metadata: SmolMetadata,
    /// Cache holding the binary.
    pub cache: ExtractionCache,
    /// Whether the binary was already cached.
    pub cache_hit: bool,
}

/// Drives one extraction for one stub file.
pub struct StubRuntime<'a> {
    codec: &'a dyn Codec,
    cache_root: PathBuf,
    max_size: u64,
}

impl<'a> StubRuntime<'a> {
    /// Runtime writing into the cache root resolved from `env`.
    pub fn new(codec: &'a dyn Codec, env: &CacheEnv) -> Self {
        Self {
            codec,
            cache_root: env.resolve(),
            max_size: MAX_UNCOMPRESSED_SIZE,
        }
    }

    /// Runtime writing into an explicit cache root.
    #[cfg(test)]
    pub fn with_root(codec: &'a dyn Codec, root: impl Into<PathBuf>) -> Self {
        Self {
            codec,
            cache_root: root.into(),
            max_size: MAX_UNCOMPRESSED_SIZE,
        }
    }

    /// Make sure the payload of `stub_path` is extracted and return where.
    pub fn prepare(&self, stub_path: &Path) -> Result<Prepared> {
        let offset = locate_payload(stub_path)?.ok_or_else(|| StubError::MarkerNotFound {
            path: stub_path.to_path_buf(),
        })?;

        let mut file = File::open(stub_path).map_err(smol_pack::PackError::from)?;
        file.seek(SeekFrom::Start(offset))
            .map_err(smol_pack::PackError::from)?;
        let metadata = read_metadata(&mut file, ConfigKind::Update)?;
        debug!(
            offset,
            compressed = metadata.compressed_size,
            uncompressed = metadata.uncompressed_size,
            cache_key = %metadata.cache_key(),
            "read payload metadata"
        );

        validate_metadata(&metadata, self.max_size)?;

        let platform = metadata.platform()?;
        let cache = ExtractionCache::new(&self.cache_root, platform.platform);
        let key = metadata.cache_key().to_string();

        if let Some(binary) = cache.lookup(&key, metadata.uncompressed_size) {
            debug!(path = %binary.display(), "cache hit");
            return Ok(Prepared {
                binary,
                metadata,
                cache,
                cache_hit: true,
            });
        }

        let compressed = read_compressed(&mut file, &metadata)?;
        drop(file);

        let expected = metadata.uncompressed_size as usize;
        let data = self.codec.decompress(&compressed, expected)?;
        drop(compressed);
        if data.len() != expected {
            return Err(StubError::Decompress(
                smol_pack::CompressError::DecompressFailed(format!(
                    "expected {} bytes, got {}",
                    expected,
                    data.len()
                )),
            ));
        }

        let binary = cache.store(&StoreRequest {
            cache_key: &key,
            data: &data,
            source_path: stub_path,
            integrity: integrity_for(&data),
            compression_algorithm: self.codec.algorithm(),
            compressed_size: metadata.compressed_size,
            update_check: None,
        })?;
        info!(path = %binary.display(), size = data.len(), "extracted payload");

        Ok(Prepared {
            binary,
            metadata,
            cache,
            cache_hit: false,
        })
    }
}
