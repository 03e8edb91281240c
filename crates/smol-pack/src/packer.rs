//! Producer side: compress a payload and embed it into a stub.
//!
//! The bytes written after the stub image are identical for every format:
//! marker, metadata block, optional config record, compressed payload.
//! Only the carrier differs. ELF stubs get an ELF note referenced from a
//! PT_NOTE program header; everything else gets the bytes appended.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::binary::{
    align4, detect_format, encode_note, parse_notes, FormatKind, NoteEntry, PRESSED_DATA_RESOURCE,
};
use crate::compress::{Codec, ZstdCodec};
use crate::config::EmbeddedConfig;
use crate::finder::{find_payload, PAYLOAD_MARKER};
use crate::format::{cache_key_for, SmolMetadata, MAX_UNCOMPRESSED_SIZE};
use crate::fsutil::write_file_atomically;
use crate::platform::PlatformMetadata;
use crate::{PackError, Result};

const PT_NOTE: u32 = 4;
const ELF64_PHDR_SIZE: usize = 56;

/// Builder for pressed executables.
pub struct Packer {
    stub_path: Option<PathBuf>,
    platform: Option<PlatformMetadata>,
    config: Option<EmbeddedConfig>,
    codec: Box<dyn Codec>,
}

/// Summary of a packing operation.
#[derive(Debug, Clone)]
pub struct PackedInfo {
    /// Carrier used for the payload.
    pub format: Option<FormatKind>,
    /// Size of the stub before embedding.
    pub stub_size: u64,
    /// Size of the compressed payload.
    pub compressed_size: u64,
    /// Size of the original payload.
    pub uncompressed_size: u64,
    /// Cache key of the payload.
    pub cache_key: String,
    /// Platform triple written to the metadata.
    pub platform: PlatformMetadata,
    /// Size of the pressed binary.
    pub total_size: u64,
}

impl Default for Packer {
    fn default() -> Self {
        Self::new()
    }
}

impl Packer {
    /// Packer using zstd at the default level.
    pub fn new() -> Self {
        Self {
            stub_path: None,
            platform: None,
            config: None,
            codec: Box::new(ZstdCodec::default()),
        }
    }

    /// Set the path to the stub executable.
    pub fn with_stub(mut self, stub_path: impl AsRef<Path>) -> Self {
        self.stub_path = Some(stub_path.as_ref().to_path_buf());
        self
    }

    /// Override the platform triple derived from the stub.
    pub fn with_platform(mut self, platform: PlatformMetadata) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Embed a config record.
    pub fn with_config(mut self, config: EmbeddedConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a different codec. The stub must be built with the same one.
    pub fn with_codec(mut self, codec: impl Codec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    /// Press `payload` into the stub and write the result to `output`.
    pub fn pack(&self, payload: impl AsRef<Path>, output: impl AsRef<Path>) -> Result<PackedInfo> {
        let output = output.as_ref();
        let stub_path = self
            .stub_path
            .as_ref()
            .ok_or_else(|| PackError::UnsupportedBinary("no stub executable given".to_string()))?;

        let stub = fs::read(stub_path)?;
        let payload = fs::read(payload.as_ref())?;
        let (image, info) = self.pack_bytes(&stub, &payload)?;

        write_file_atomically(output, &image, 0o755)?;
        info!(
            output = %output.display(),
            cache_key = %info.cache_key,
            compressed = info.compressed_size,
            uncompressed = info.uncompressed_size,
            "pressed binary written"
        );
        Ok(info)
    }

    /// Press `payload` into `stub` in memory.
    pub fn pack_bytes(&self, stub: &[u8], payload: &[u8]) -> Result<(Vec<u8>, PackedInfo)> {
        if payload.is_empty() {
            return Err(PackError::InvalidMetadata("payload is empty".to_string()));
        }
        if payload.len() as u64 > MAX_UNCOMPRESSED_SIZE {
            return Err(PackError::InvalidMetadata(format!(
                "payload of {} bytes exceeds limit {}",
                payload.len(),
                MAX_UNCOMPRESSED_SIZE
            )));
        }
        if find_payload(&mut Cursor::new(stub))?.is_some() {
            return Err(PackError::UnsupportedBinary(
                "stub already carries a pressed payload".to_string(),
            ));
        }

        let platform = match self.platform {
            Some(platform) => platform,
            None => PlatformMetadata::from_binary(stub).ok_or_else(|| {
                PackError::UnsupportedBinary(
                    "cannot determine target platform from stub; pass it explicitly".to_string(),
                )
            })?,
        };

        let cache_key = cache_key_for(payload);
        let compressed = self.codec.compress(payload)?;
        debug!(
            algorithm = self.codec.algorithm(),
            input = payload.len(),
            output = compressed.len(),
            "payload compressed"
        );

        let meta = SmolMetadata::new(
            compressed.len() as u64,
            payload.len() as u64,
            &cache_key,
            platform,
            self.config.clone(),
        )?;
        meta.validate(MAX_UNCOMPRESSED_SIZE)?;

        let section = build_section(&meta, &compressed)?;
        let image = embed(stub, &section)?;

        let info = PackedInfo {
            format: detect_format(stub),
            stub_size: stub.len() as u64,
            compressed_size: compressed.len() as u64,
            uncompressed_size: payload.len() as u64,
            cache_key,
            platform,
            total_size: image.len() as u64,
        };
        Ok((image, info))
    }
}

/// Marker, metadata, optional config record and compressed payload.
pub fn build_section(meta: &SmolMetadata, compressed: &[u8]) -> Result<Vec<u8>> {
    let marker = PAYLOAD_MARKER.to_bytes();
    let header = meta.to_bytes()?;
    let mut section = Vec::with_capacity(marker.len() + header.len() + compressed.len());
    section.extend_from_slice(&marker);
    section.extend_from_slice(&header);
    section.extend_from_slice(compressed);
    Ok(section)
}

/// Attach `section` to `stub` using the carrier for the stub's format.
pub fn embed(stub: &[u8], section: &[u8]) -> Result<Vec<u8>> {
    match detect_format(stub) {
        Some(FormatKind::Elf) => embed_elf_note(stub, section),
        _ => {
            let mut out = Vec::with_capacity(stub.len() + section.len());
            out.extend_from_slice(stub);
            out.extend_from_slice(section);
            Ok(out)
        }
    }
}

/// Append a `pressed_data` note at the end of the file and point the last
/// PT_NOTE program header at the rewritten note list.
///
/// Notes already in that segment are carried over, except earlier
/// `pressed_data` notes. The header gets zero address and memory size so
/// the loader ignores it.
fn embed_elf_note(stub: &[u8], section: &[u8]) -> Result<Vec<u8>> {
    let elf = goblin::elf::Elf::parse(stub)?;
    if !elf.is_64 || !elf.little_endian {
        return Err(PackError::UnsupportedBinary(
            "only 64-bit little-endian ELF stubs are supported".to_string(),
        ));
    }
    if elf.header.e_phentsize as usize != ELF64_PHDR_SIZE {
        return Err(PackError::UnsupportedBinary(format!(
            "unexpected program header size {}",
            elf.header.e_phentsize
        )));
    }

    let (index, phdr) = elf
        .program_headers
        .iter()
        .enumerate()
        .filter(|(_, ph)| ph.p_type == PT_NOTE)
        .last()
        .ok_or_else(|| PackError::UnsupportedBinary("ELF stub has no PT_NOTE segment".to_string()))?;

    let seg_start = phdr.p_offset as usize;
    let seg_end = seg_start.saturating_add(phdr.p_filesz as usize);
    let existing = stub.get(seg_start..seg_end).unwrap_or_default();

    let mut notes = Vec::new();
    for note in parse_notes(existing, true)
        .into_iter()
        .filter(|n| n.name != PRESSED_DATA_RESOURCE)
    {
        encode_note(&note, &mut notes);
    }
    encode_note(
        &NoteEntry {
            name: PRESSED_DATA_RESOURCE.to_string(),
            n_type: 0,
            desc: section.to_vec(),
        },
        &mut notes,
    );

    let note_offset = align4(stub.len());
    let mut out = Vec::with_capacity(note_offset + notes.len());
    out.extend_from_slice(stub);
    out.resize(note_offset, 0);
    out.extend_from_slice(&notes);

    let ph = elf.header.e_phoff as usize + index * ELF64_PHDR_SIZE;
    let entry = out
        .get_mut(ph..ph + ELF64_PHDR_SIZE)
        .ok_or_else(|| PackError::UnsupportedBinary("program header out of range".to_string()))?;
    entry[8..16].copy_from_slice(&(note_offset as u64).to_le_bytes());
    entry[16..24].copy_from_slice(&0u64.to_le_bytes());
    entry[24..32].copy_from_slice(&0u64.to_le_bytes());
    entry[32..40].copy_from_slice(&(notes.len() as u64).to_le_bytes());
    entry[40..48].copy_from_slice(&0u64.to_le_bytes());
    entry[48..56].copy_from_slice(&4u64.to_le_bytes());

    debug!(
        phdr = index,
        offset = note_offset,
        size = notes.len(),
        "retargeted PT_NOTE at pressed_data note"
    );
    Ok(out)
}
