//! Compression contract between the packer and the stub.
//!
//! The on-disk format does not record which algorithm produced the payload;
//! both sides agree on [`ZstdCodec`] by convention. The [`Codec`] trait
//! exists so the stub runtime can be driven by other implementations in
//! tests.

use std::io::{Read, Write};

use thiserror::Error;

/// Compression level for zstd (19 = high compression).
pub const ZSTD_LEVEL: i32 = 19;

/// Errors from a compression backend.
#[derive(Debug, Error)]
pub enum CompressError {
    /// Empty input or zero expected size.
    #[error("invalid compression input: {0}")]
    InvalidInput(&'static str),

    /// The output buffer could not be reserved.
    #[error("failed to allocate {0} bytes for decompression")]
    AllocationFailed(usize),

    /// The encoder failed.
    #[error("compression failed: {0}")]
    CompressFailed(String),

    /// The decoder failed or produced the wrong number of bytes.
    #[error("decompression failed: {0}")]
    DecompressFailed(String),
}

/// A compression algorithm usable for pressed payloads.
pub trait Codec: Send + Sync {
    /// Short algorithm name, recorded in cache metadata.
    fn algorithm(&self) -> &'static str;

    /// Compress `input`.
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CompressError>;

    /// Decompress `input`, which must expand to exactly `expected_size` bytes.
    ///
    /// Implementations must not produce more than `expected_size` bytes of
    /// output regardless of what the compressed stream claims.
    fn decompress(&self, input: &[u8], expected_size: usize) -> Result<Vec<u8>, CompressError>;
}

/// zstd codec.
#[derive(Debug, Clone, Copy)]
pub struct ZstdCodec {
    level: i32,
}

impl ZstdCodec {
    /// Codec with an explicit compression level.
    pub fn with_level(level: i32) -> Self {
        Self { level }
    }

    /// Configured compression level.
    pub fn level(&self) -> i32 {
        self.level
    }
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: ZSTD_LEVEL }
    }
}

impl Codec for ZstdCodec {
    fn algorithm(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, input: &[u8]) -> Result<Vec<u8>, CompressError> {
        if input.is_empty() {
            return Err(CompressError::InvalidInput("empty input"));
        }
        let mut encoder = zstd::stream::Encoder::new(Vec::new(), self.level)
            .map_err(|e| CompressError::CompressFailed(e.to_string()))?;
        encoder
            .write_all(input)
            .map_err(|e| CompressError::CompressFailed(e.to_string()))?;
        encoder
            .finish()
            .map_err(|e| CompressError::CompressFailed(e.to_string()))
    }

    fn decompress(&self, input: &[u8], expected_size: usize) -> Result<Vec<u8>, CompressError> {
        if input.is_empty() {
            return Err(CompressError::InvalidInput("empty input"));
        }
        if expected_size == 0 {
            return Err(CompressError::InvalidInput("zero expected size"));
        }

        let mut out = Vec::new();
        out.try_reserve_exact(expected_size)
            .map_err(|_| CompressError::AllocationFailed(expected_size))?;

        let decoder = zstd::stream::Decoder::new(input)
            .map_err(|e| CompressError::DecompressFailed(e.to_string()))?;
        // One extra byte so an oversized stream is detected without
        // buffering the rest of it.
        decoder
            .take(expected_size as u64 + 1)
            .read_to_end(&mut out)
            .map_err(|e| CompressError::DecompressFailed(e.to_string()))?;

        if out.len() != expected_size {
            return Err(CompressError::DecompressFailed(format!(
                "size mismatch: expected {} bytes, got {}{}",
                expected_size,
                out.len().min(expected_size),
                if out.len() > expected_size { "+" } else { "" }
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        (0..64 * 1024).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_roundtrip() {
        let codec = ZstdCodec::with_level(3);
        let data = sample();
        let compressed = codec.compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(codec.decompress(&compressed, data.len()).unwrap(), data);
    }

    #[test]
    fn test_empty_input_rejected() {
        let codec = ZstdCodec::default();
        assert!(matches!(
            codec.compress(&[]),
            Err(CompressError::InvalidInput(_))
        ));
        assert!(matches!(
            codec.decompress(&[], 10),
            Err(CompressError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_zero_expected_size_rejected() {
        let codec = ZstdCodec::with_level(1);
        let compressed = codec.compress(b"hello").unwrap();
        assert!(matches!(
            codec.decompress(&compressed, 0),
            Err(CompressError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_output_larger_than_expected_rejected() {
        let codec = ZstdCodec::with_level(1);
        let data = vec![0u8; 1024 * 1024];
        let compressed = codec.compress(&data).unwrap();
        let err = codec.decompress(&compressed, 4096).unwrap_err();
        assert!(matches!(err, CompressError::DecompressFailed(_)));
    }

    #[test]
    fn test_output_smaller_than_expected_rejected() {
        let codec = ZstdCodec::with_level(1);
        let compressed = codec.compress(b"short payload").unwrap();
        let err = codec.decompress(&compressed, 1000).unwrap_err();
        assert!(matches!(err, CompressError::DecompressFailed(_)));
    }

    #[test]
    fn test_garbage_rejected() {
        let codec = ZstdCodec::default();
        let err = codec.decompress(b"not-a-real-zstd-stream", 100).unwrap_err();
        assert!(matches!(err, CompressError::DecompressFailed(_)));
    }

    #[test]
    fn test_algorithm_name() {
        assert_eq!(ZstdCodec::default().algorithm(), "zstd");
        assert_eq!(ZstdCodec::default().level(), ZSTD_LEVEL);
    }
}
