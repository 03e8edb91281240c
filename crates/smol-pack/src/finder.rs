//! Marker search.
//!
//! The marker is kept as three NUL-terminated parts and only concatenated
//! at lookup time. The terminators keep the parts apart in read-only data,
//! so the search code never contains the full byte string and cannot match
//! itself inside the stub.

use std::fs::File;
use std::hint::black_box;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use once_cell::sync::OnceCell;
use tracing::debug;

use crate::binary::{self, ReadSeek};
use crate::Result;

/// Chunk size for the linear scan.
pub const SCAN_CHUNK_SIZE: usize = 64 * 1024;

/// Program header type for note segments.
const PT_NOTE: u32 = 4;

/// A magic marker stored as three NUL-terminated parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Marker {
    parts: [&'static [u8]; 3],
}

/// Marker preceding the metadata block of a pressed binary.
pub const PAYLOAD_MARKER: Marker =
    Marker::new(b"__SMOL\0", b"_PRESSED_DATA\0", b"_MAGIC_MARKER\0");

impl Marker {
    /// Build a marker from its parts. Each part must end in a NUL byte,
    /// which is not part of the marker.
    pub const fn new(a: &'static [u8], b: &'static [u8], c: &'static [u8]) -> Self {
        assert!(
            ends_with_nul(a) && ends_with_nul(b) && ends_with_nul(c),
            "marker parts must be NUL-terminated"
        );
        Self { parts: [a, b, c] }
    }

    /// Length of the concatenated marker.
    pub fn len(&self) -> usize {
        self.parts.iter().map(|p| p.len() - 1).sum()
    }

    /// Whether all parts are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenated marker bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for part in self.parts {
            // Keep the optimizer from folding the parts into one constant.
            let part = black_box(part);
            out.extend_from_slice(&part[..part.len() - 1]);
        }
        out
    }
}

const fn ends_with_nul(part: &[u8]) -> bool {
    !part.is_empty() && part[part.len() - 1] == 0
}

/// Which offset a successful search reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerPosition {
    /// Offset of the first marker byte.
    Start,
    /// Offset of the first byte after the marker.
    After,
}

impl MarkerPosition {
    fn apply(self, marker_start: u64, marker_len: usize) -> u64 {
        match self {
            MarkerPosition::Start => marker_start,
            MarkerPosition::After => marker_start + marker_len as u64,
        }
    }
}

/// Position of `needle` in `haystack`.
pub fn find_in_slice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Scan the whole stream in fixed-size chunks.
pub fn find_marker_linear<R: Read + Seek + ?Sized>(
    reader: &mut R,
    marker: &Marker,
    position: MarkerPosition,
) -> Result<Option<u64>> {
    let len = reader.seek(SeekFrom::End(0))?;
    let needle = marker.to_bytes();
    Ok(scan_range(reader, 0, len, &needle)?.map(|off| position.apply(off, needle.len())))
}

/// Scan only the contents of PT_NOTE segments of a little-endian ELF.
///
/// Returns `Ok(None)` for non-ELF input, big-endian ELF, or when no note
/// segment contains the marker. Reported offsets are absolute file offsets
/// (segment `p_offset` plus the position inside the segment).
pub fn find_marker_in_ptnote<R: Read + Seek + ?Sized>(
    reader: &mut R,
    marker: &Marker,
    position: MarkerPosition,
) -> Result<Option<u64>> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut header = [0u8; 64];
    let n = read_up_to(reader, &mut header)?;
    if n < 52 || &header[..4] != b"\x7fELF" {
        return Ok(None);
    }
    if header[5] != 1 {
        debug!("big-endian ELF, skipping PT_NOTE scan");
        return Ok(None);
    }

    let is_64 = match header[4] {
        2 if n >= 64 => true,
        1 => false,
        _ => return Ok(None),
    };
    let (phoff, phentsize, phnum) = if is_64 {
        (
            le_u64(&header[32..40]),
            le_u16(&header[54..56]) as u64,
            le_u16(&header[56..58]),
        )
    } else {
        (
            le_u32(&header[28..32]) as u64,
            le_u16(&header[42..44]) as u64,
            le_u16(&header[44..46]),
        )
    };
    let min_entry = if is_64 { 56 } else { 32 };
    if phentsize < min_entry {
        return Ok(None);
    }

    let needle = marker.to_bytes();
    let mut entry = vec![0u8; min_entry as usize];
    for i in 0..phnum as u64 {
        let at = phoff.saturating_add(i * phentsize);
        if at.saturating_add(min_entry) > file_len {
            break;
        }
        reader.seek(SeekFrom::Start(at))?;
        reader.read_exact(&mut entry)?;

        if le_u32(&entry[0..4]) != PT_NOTE {
            continue;
        }
        let (p_offset, p_filesz) = if is_64 {
            (le_u64(&entry[8..16]), le_u64(&entry[32..40]))
        } else {
            (le_u32(&entry[4..8]) as u64, le_u32(&entry[16..20]) as u64)
        };
        if p_filesz == 0 || p_offset >= file_len {
            continue;
        }
        let seg_len = p_filesz.min(file_len - p_offset);

        if let Some(off) = scan_range(reader, p_offset, seg_len, &needle)? {
            debug!(segment = i, offset = off, "marker found in PT_NOTE");
            return Ok(Some(position.apply(off, needle.len())));
        }
    }
    Ok(None)
}

/// Find the payload marker using the strategy of the detected format.
///
/// Unknown formats fall back to the linear scan. The returned offset is the
/// start of the metadata block.
pub fn find_payload(reader: &mut dyn ReadSeek) -> Result<Option<u64>> {
    reader.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 4];
    let n = read_up_to(reader, &mut magic)?;
    match binary::detect(&magic[..n]) {
        Some(format) => format.find_marker(reader, &PAYLOAD_MARKER, MarkerPosition::After),
        None => find_marker_linear(reader, &PAYLOAD_MARKER, MarkerPosition::After),
    }
}

/// Payload location of the running executable, computed once per process.
static SELF_PAYLOAD: OnceCell<(PathBuf, Option<u64>)> = OnceCell::new();

/// Locate the metadata block in the file at `path`.
///
/// The first successful call initializes process-wide state and later calls
/// for the same path return it without touching the file again. Calls for a
/// different path are answered by a fresh search and are not cached.
pub fn locate_payload(path: &Path) -> Result<Option<u64>> {
    let (cached_path, offset) =
        SELF_PAYLOAD.get_or_try_init(|| search_file(path).map(|o| (path.to_path_buf(), o)))?;
    if cached_path == path {
        return Ok(*offset);
    }
    search_file(path)
}

fn search_file(path: &Path) -> Result<Option<u64>> {
    let mut file = File::open(path)?;
    find_payload(&mut file)
}

/// Search `len` bytes starting at `start`, rewinding `needle.len() - 1`
/// bytes between chunks so boundary-straddling matches are found.
fn scan_range<R: Read + Seek + ?Sized>(
    reader: &mut R,
    start: u64,
    len: u64,
    needle: &[u8],
) -> io::Result<Option<u64>> {
    if needle.is_empty() || len < needle.len() as u64 {
        return Ok(None);
    }
    let end = start + len;
    let overlap = (needle.len() - 1) as u64;
    let mut buf = vec![0u8; SCAN_CHUNK_SIZE.max(needle.len() * 2)];
    let mut pos = start;

    while pos < end {
        reader.seek(SeekFrom::Start(pos))?;
        let want = ((end - pos) as usize).min(buf.len());
        let n = read_up_to(reader, &mut buf[..want])?;
        if n < needle.len() {
            return Ok(None);
        }
        if let Some(i) = find_in_slice(&buf[..n], needle) {
            return Ok(Some(pos + i as u64));
        }
        if n < want {
            return Ok(None);
        }
        pos += n as u64 - overlap;
        if pos + overlap >= end {
            break;
        }
    }
    Ok(None)
}

/// Read until `buf` is full or EOF.
fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn le_u16(b: &[u8]) -> u16 {
    u16::from_le_bytes([b[0], b[1]])
}

fn le_u32(b: &[u8]) -> u32 {
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_u64(b: &[u8]) -> u64 {
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}
