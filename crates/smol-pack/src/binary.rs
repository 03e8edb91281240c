//! Executable format capabilities.
//!
//! Format-specific behaviour sits behind [`BinaryFormat`] so the stub runtime
//! and the producer are written once against the trait:
//!
//! | format | marker search | sections / segments | resources |
//! |--------|---------------|---------------------|-----------|
//! | ELF    | PT_NOTE scan  | section headers + note owners | note owners |
//! | Mach-O | linear scan   | segments + sections | `SEGMENT/__section` |
//! | PE     | linear scan   | section table + `RT_RCDATA` names | `RT_RCDATA` names |
//!
//! Resource names are logical (`NODE_SEA_BLOB`). Mach-O stores them as a
//! `__`-prefixed section of the `NODE_SEA` segment, PE as named `RT_RCDATA`
//! entries in the resource directory.

use std::io::{Read, Seek};

use goblin::elf::program_header::PT_NOTE;

use crate::finder::{self, Marker, MarkerPosition};
use crate::Result;

/// Resource name of the Node.js SEA blob.
pub const NODE_SEA_RESOURCE: &str = "NODE_SEA_BLOB";

/// Resource name of the embedded VFS archive.
pub const SMOL_VFS_RESOURCE: &str = "SMOL_VFS_BLOB";

/// Resource name (ELF note owner) of the pressed payload.
pub const PRESSED_DATA_RESOURCE: &str = "pressed_data";

/// Mach-O segment holding the SEA and VFS sections.
pub const MACHO_RESOURCE_SEGMENT: &str = "NODE_SEA";

/// PE resource type of injected blobs.
const RT_RCDATA: u32 = 10;

/// Executable container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatKind {
    /// ELF (Linux).
    Elf,
    /// Mach-O, thin or universal (macOS).
    MachO,
    /// PE/COFF (Windows).
    Pe,
}

impl std::fmt::Display for FormatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatKind::Elf => write!(f, "ELF"),
            FormatKind::MachO => write!(f, "Mach-O"),
            FormatKind::Pe => write!(f, "PE"),
        }
    }
}

/// Identify a format from the leading magic bytes.
pub fn detect_format(magic: &[u8]) -> Option<FormatKind> {
    match magic {
        [0x7f, b'E', b'L', b'F', ..] => Some(FormatKind::Elf),
        [0xfe, 0xed, 0xfa, 0xce | 0xcf, ..]
        | [0xce | 0xcf, 0xfa, 0xed, 0xfe, ..]
        | [0xca, 0xfe, 0xba, 0xbe, ..]
        | [0xbe, 0xba, 0xfe, 0xca, ..] => Some(FormatKind::MachO),
        [b'M', b'Z', ..] => Some(FormatKind::Pe),
        _ => None,
    }
}

/// Seekable byte source usable behind `dyn`.
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Per-format operations on an executable image.
pub trait BinaryFormat: Sync {
    /// Which format this is.
    fn kind(&self) -> FormatKind;

    /// Locate `marker` in the image, or `Ok(None)` if absent.
    fn find_marker(
        &self,
        reader: &mut dyn ReadSeek,
        marker: &Marker,
        position: MarkerPosition,
    ) -> Result<Option<u64>>;

    /// Whether a section, segment or note owner named `name` exists.
    fn has_section_or_segment(&self, data: &[u8], name: &str) -> Result<bool>;

    /// Names of the sections or notes that can carry injected resources.
    fn list_resources(&self, data: &[u8]) -> Result<Vec<String>>;
}

/// ELF images. Payload lives inside a PT_NOTE segment.
#[derive(Debug, Default, Clone, Copy)]
pub struct Elf;

/// Mach-O images. Payload is located by linear scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct MachO;

/// PE images. Payload is located by linear scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pe;

static ELF: Elf = Elf;
static MACHO: MachO = MachO;
static PE: Pe = Pe;

/// Capability object for a format kind.
pub fn format_for(kind: FormatKind) -> &'static dyn BinaryFormat {
    match kind {
        FormatKind::Elf => &ELF,
        FormatKind::MachO => &MACHO,
        FormatKind::Pe => &PE,
    }
}

/// Detect the format from magic bytes and return its capability object.
pub fn detect(magic: &[u8]) -> Option<&'static dyn BinaryFormat> {
    detect_format(magic).map(format_for)
}

impl BinaryFormat for Elf {
    fn kind(&self) -> FormatKind {
        FormatKind::Elf
    }

    fn find_marker(
        &self,
        reader: &mut dyn ReadSeek,
        marker: &Marker,
        position: MarkerPosition,
    ) -> Result<Option<u64>> {
        finder::find_marker_in_ptnote(reader, marker, position)
    }

    fn has_section_or_segment(&self, data: &[u8], name: &str) -> Result<bool> {
        let elf = goblin::elf::Elf::parse(data)?;
        let in_sections = elf
            .section_headers
            .iter()
            .any(|sh| elf.shdr_strtab.get_at(sh.sh_name) == Some(name));
        if in_sections {
            return Ok(true);
        }
        Ok(elf_note_owners(&elf, data).iter().any(|owner| owner == name))
    }

    fn list_resources(&self, data: &[u8]) -> Result<Vec<String>> {
        let elf = goblin::elf::Elf::parse(data)?;
        Ok(elf_note_owners(&elf, data))
    }
}

impl BinaryFormat for MachO {
    fn kind(&self) -> FormatKind {
        FormatKind::MachO
    }

    fn find_marker(
        &self,
        reader: &mut dyn ReadSeek,
        marker: &Marker,
        position: MarkerPosition,
    ) -> Result<Option<u64>> {
        finder::find_marker_linear(reader, marker, position)
    }

    fn has_section_or_segment(&self, data: &[u8], name: &str) -> Result<bool> {
        let resource_section = format!("__{}", name);
        for (segment, section) in macho_sections(data)? {
            let section = section.as_deref();
            if segment == name || section == Some(name) {
                return Ok(true);
            }
            if segment == MACHO_RESOURCE_SEGMENT && section == Some(resource_section.as_str()) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn list_resources(&self, data: &[u8]) -> Result<Vec<String>> {
        let mut names: Vec<String> = macho_sections(data)?
            .into_iter()
            .filter_map(|(segment, section)| section.map(|s| format!("{}/{}", segment, s)))
            .collect();
        names.dedup();
        Ok(names)
    }
}

impl BinaryFormat for Pe {
    fn kind(&self) -> FormatKind {
        FormatKind::Pe
    }

    fn find_marker(
        &self,
        reader: &mut dyn ReadSeek,
        marker: &Marker,
        position: MarkerPosition,
    ) -> Result<Option<u64>> {
        finder::find_marker_linear(reader, marker, position)
    }

    fn has_section_or_segment(&self, data: &[u8], name: &str) -> Result<bool> {
        let pe = goblin::pe::PE::parse(data)?;
        let in_sections = pe
            .sections
            .iter()
            .any(|s| s.name().map(|n| n == name).unwrap_or(false));
        if in_sections {
            return Ok(true);
        }
        // Resource names are stored uppercased.
        Ok(pe_rcdata_names(&pe, data)
            .iter()
            .any(|n| n.eq_ignore_ascii_case(name)))
    }

    fn list_resources(&self, data: &[u8]) -> Result<Vec<String>> {
        let pe = goblin::pe::PE::parse(data)?;
        Ok(pe_rcdata_names(&pe, data))
    }
}

/// Named `RT_RCDATA` entries of a PE resource directory.
fn pe_rcdata_names(pe: &goblin::pe::PE<'_>, data: &[u8]) -> Vec<String> {
    let Some(table) = pe
        .header
        .optional_header
        .as_ref()
        .and_then(|oh| oh.data_directories.get_resource_table().copied())
    else {
        return Vec::new();
    };
    let Some(start) = rva_to_offset(&pe.sections, table.virtual_address) else {
        return Vec::new();
    };
    let end = start.saturating_add(table.size as usize).min(data.len());
    match data.get(start..end) {
        Some(rsrc) => rcdata_names(rsrc),
        None => Vec::new(),
    }
}

fn rva_to_offset(sections: &[goblin::pe::section_table::SectionTable], rva: u32) -> Option<usize> {
    sections.iter().find_map(|s| {
        let size = s.virtual_size.max(s.size_of_raw_data);
        let delta = rva.checked_sub(s.virtual_address)?;
        (delta < size).then(|| s.pointer_to_raw_data as usize + delta as usize)
    })
}

/// Key of a resource directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ResourceKey {
    Id(u32),
    Name(String),
}

/// One directory entry: its key and, when it points at a subdirectory,
/// that directory's offset within the resource section.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResourceEntry {
    key: ResourceKey,
    subdir: Option<usize>,
}

const RESOURCE_SUBDIR_FLAG: u32 = 0x8000_0000;

/// Walk the type level of a resource section and collect the names under
/// `RT_RCDATA`. Malformed directories yield what was read so far.
fn rcdata_names(rsrc: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    for entry in resource_entries(rsrc, 0) {
        let (ResourceKey::Id(RT_RCDATA), Some(dir)) = (&entry.key, entry.subdir) else {
            continue;
        };
        for named in resource_entries(rsrc, dir) {
            if let ResourceKey::Name(name) = named.key {
                names.push(name);
            }
        }
    }
    names
}

fn resource_entries(rsrc: &[u8], dir: usize) -> Vec<ResourceEntry> {
    let (Some(named), Some(ids)) = (read_u16(rsrc, dir + 12), read_u16(rsrc, dir + 14)) else {
        return Vec::new();
    };
    let mut entries = Vec::new();
    for i in 0..(named as usize + ids as usize) {
        let at = dir + 16 + i * 8;
        let (Some(name), Some(target)) = (read_u32(rsrc, at), read_u32(rsrc, at + 4)) else {
            break;
        };
        let key = if name & RESOURCE_SUBDIR_FLAG != 0 {
            match resource_name(rsrc, (name & !RESOURCE_SUBDIR_FLAG) as usize) {
                Some(name) => ResourceKey::Name(name),
                None => break,
            }
        } else {
            ResourceKey::Id(name & 0xffff)
        };
        let subdir = (target & RESOURCE_SUBDIR_FLAG != 0)
            .then(|| (target & !RESOURCE_SUBDIR_FLAG) as usize);
        entries.push(ResourceEntry { key, subdir });
    }
    entries
}

/// Length-prefixed UTF-16LE string.
fn resource_name(rsrc: &[u8], at: usize) -> Option<String> {
    let len = read_u16(rsrc, at)? as usize;
    let raw = rsrc.get(at + 2..at + 2 + len * 2)?;
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    Some(String::from_utf16_lossy(&units))
}

fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    let b = buf.get(at..at + 2)?;
    Some(u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    let b = buf.get(at..at + 4)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Owner names of every note in every PT_NOTE segment, in file order.
fn elf_note_owners(elf: &goblin::elf::Elf<'_>, data: &[u8]) -> Vec<String> {
    let mut owners = Vec::new();
    for ph in elf.program_headers.iter().filter(|ph| ph.p_type == PT_NOTE) {
        let start = ph.p_offset as usize;
        let end = start.saturating_add(ph.p_filesz as usize);
        let Some(segment) = data.get(start..end) else {
            continue;
        };
        for note in parse_notes(segment, elf.little_endian) {
            owners.push(note.name);
        }
    }
    owners
}

/// One entry in an ELF note segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NoteEntry {
    pub name: String,
    pub n_type: u32,
    pub desc: Vec<u8>,
}

pub(crate) fn align4(n: usize) -> usize {
    (n + 3) & !3
}

/// Walk the `namesz/descsz/type/name/desc` records of a note segment.
///
/// Stops at the first malformed record instead of failing, since segment
/// padding and foreign notes are common.
pub(crate) fn parse_notes(segment: &[u8], little_endian: bool) -> Vec<NoteEntry> {
    let read_u32 = |b: &[u8]| -> u32 {
        let raw = [b[0], b[1], b[2], b[3]];
        if little_endian {
            u32::from_le_bytes(raw)
        } else {
            u32::from_be_bytes(raw)
        }
    };

    let mut notes = Vec::new();
    let mut pos = 0usize;
    while pos + 12 <= segment.len() {
        let namesz = read_u32(&segment[pos..]) as usize;
        let descsz = read_u32(&segment[pos + 4..]) as usize;
        let n_type = read_u32(&segment[pos + 8..]);

        let name_start = pos + 12;
        let desc_start = name_start + align4(namesz);
        let next = desc_start + align4(descsz);
        if next > segment.len() || desc_start + descsz > segment.len() {
            break;
        }

        let raw_name = &segment[name_start..name_start + namesz];
        let name_len = raw_name.iter().position(|&b| b == 0).unwrap_or(raw_name.len());
        notes.push(NoteEntry {
            name: String::from_utf8_lossy(&raw_name[..name_len]).into_owned(),
            n_type,
            desc: segment[desc_start..desc_start + descsz].to_vec(),
        });
        pos = next;
    }
    notes
}

/// Serialize a note record (little-endian, 4-byte aligned).
pub(crate) fn encode_note(note: &NoteEntry, out: &mut Vec<u8>) {
    let namesz = note.name.len() + 1;
    out.extend_from_slice(&(namesz as u32).to_le_bytes());
    out.extend_from_slice(&(note.desc.len() as u32).to_le_bytes());
    out.extend_from_slice(&note.n_type.to_le_bytes());
    out.extend_from_slice(note.name.as_bytes());
    out.resize(out.len() + align4(namesz) - note.name.len(), 0);
    out.extend_from_slice(&note.desc);
    out.resize(out.len() + align4(note.desc.len()) - note.desc.len(), 0);
}

/// `(segment, section)` pairs for every Mach-O slice. Segments without
/// sections appear once with `None`.
fn macho_sections(data: &[u8]) -> Result<Vec<(String, Option<String>)>> {
    let mut out = Vec::new();
    match goblin::mach::Mach::parse(data)? {
        goblin::mach::Mach::Binary(macho) => collect_macho(&macho, &mut out)?,
        goblin::mach::Mach::Fat(fat) => {
            for arch in fat.iter_arches() {
                let arch = arch?;
                let macho = goblin::mach::MachO::parse(arch.slice(data), 0)?;
                collect_macho(&macho, &mut out)?;
            }
        }
    }
    Ok(out)
}

fn collect_macho(
    macho: &goblin::mach::MachO<'_>,
    out: &mut Vec<(String, Option<String>)>,
) -> Result<()> {
    for segment in macho.segments.iter() {
        let segname = segment.name()?.to_string();
        let sections = segment.sections()?;
        if sections.is_empty() {
            out.push((segname, None));
            continue;
        }
        for (section, _) in sections {
            out.push((segname.clone(), Some(section.name()?.to_string())));
        }
    }
    Ok(())
}
