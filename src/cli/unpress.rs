//! Unpress command: recover the original program from a pressed binary.

use crate::cli::format_size;
use clap::Args;
use smol_pack::format::{read_compressed, read_metadata, validate_metadata};
use smol_pack::fsutil::write_file_atomically;
use smol_pack::{Codec, ConfigKind, PackError, ZstdCodec, MAX_UNCOMPRESSED_SIZE};
use smolpress::Error;
use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::info;

/// Decompress the payload of a pressed binary without running it.
///
/// Examples:
///   smolpress unpress ./node-pressed -o ./node
#[derive(Args, Debug)]
pub struct UnpressCmd {
    /// Pressed binary
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Where to write the decompressed program
    #[arg(short = 'o', long, value_name = "PATH")]
    pub output: PathBuf,
}

impl UnpressCmd {
    pub fn run(self) -> smolpress::Result<()> {
        let size = unpress(&self.file, &self.output)?;
        println!(
            "Wrote {} ({})",
            self.output.display(),
            format_size(size)
        );
        Ok(())
    }
}

/// Extract the payload of `file` into `output` (mode 0755). Returns the
/// number of bytes written.
pub fn unpress(file: &Path, output: &Path) -> smolpress::Result<u64> {
    let mut reader = File::open(file).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::FileNotFound {
            path: file.to_path_buf(),
        },
        _ => Error::io("open binary", file, e),
    })?;

    let offset = smol_pack::finder::find_payload(&mut reader)?.ok_or_else(|| {
        PackError::MarkerNotFound {
            path: file.to_path_buf(),
        }
    })?;
    reader
        .seek(SeekFrom::Start(offset))
        .map_err(|e| Error::io("seek", file, e))?;
    let meta = read_metadata(&mut reader, ConfigKind::Update)?;
    validate_metadata(&meta, MAX_UNCOMPRESSED_SIZE)?;

    let compressed = read_compressed(&mut reader, &meta)?;
    let data = ZstdCodec::default()
        .decompress(&compressed, meta.uncompressed_size as usize)
        .map_err(PackError::from)?;

    let actual_key = smol_pack::format::cache_key_for(&data);
    if !actual_key.eq_ignore_ascii_case(meta.cache_key()) {
        tracing::warn!(
            expected = %meta.cache_key(),
            actual = %actual_key,
            "payload does not match its cache key"
        );
    }

    write_file_atomically(output, &data, 0o755)?;
    info!(output = %output.display(), size = data.len(), "payload extracted");
    Ok(data.len() as u64)
}
