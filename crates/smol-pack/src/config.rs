//! Fixed-size config records embedded ahead of the compressed payload.
//!
//! Both records share one schema-driven codec: a header (magic, version,
//! record-specific bytes) followed by length-prefixed string fields, each
//! occupying `prefix + max_len` bytes regardless of content.
//!
//! ```text
//! SMFG (1176 bytes)                     SVFG (366 bytes)
//! 0    4  magic 0x534D4647              0    4  magic 0x53564647
//! 4    2  version (1)                   4    2  version (1)
//! 6    1  prompt                        6    2  padding
//! 7    1  prompt_default ('y'/'n')      8   34  mode    (u16 len + 32)
//! 8    8  interval (ms, i64)            42 258  source  (u16 len + 256)
//! 16   8  notify_interval (ms, i64)     300 66  prefix  (u16 len + 64)
//! 24 128  binname       (u8 len + 127)
//! 152 256 command       (u16 len + 254)
//! 408 512 url           (u16 len + 510)
//! 920 128 tag           (u8 len + 127)
//! 1048 64 skip_env      (u8 len + 63)
//! 1112 64 fake_argv_env (u8 len + 63)
//! ```
//!
//! Decoding never fails hard: unknown magic, unknown version, wrong size or
//! an out-of-range length prefix all mean "no config".

use tracing::warn;

use crate::{PackError, Result};

/// Default update check interval (24 hours).
pub const DEFAULT_INTERVAL_MS: i64 = 86_400_000;

/// Default update command shown to users.
pub const DEFAULT_UPDATE_COMMAND: &str = "self-update";

/// Default name of the fake-argv environment variable.
pub const DEFAULT_FAKE_ARGV_ENV: &str = "SMOL_FAKE_ARGV";

/// Default VFS mount prefix.
pub const DEFAULT_VFS_PREFIX: &str = "/snapshot";

#[derive(Debug, Clone, Copy)]
enum LenPrefix {
    U8,
    U16,
}

impl LenPrefix {
    const fn width(self) -> usize {
        match self {
            LenPrefix::U8 => 1,
            LenPrefix::U16 => 2,
        }
    }
}

#[derive(Debug)]
struct FieldSpec {
    name: &'static str,
    prefix: LenPrefix,
    max_len: usize,
}

impl FieldSpec {
    const fn new(name: &'static str, prefix: LenPrefix, max_len: usize) -> Self {
        Self {
            name,
            prefix,
            max_len,
        }
    }

    const fn width(&self) -> usize {
        self.prefix.width() + self.max_len
    }
}

#[derive(Debug)]
struct RecordSchema {
    tag: &'static str,
    magic: u32,
    version: u16,
    header_len: usize,
    fields: &'static [FieldSpec],
    size: usize,
}

const fn record_size(header_len: usize, fields: &[FieldSpec]) -> usize {
    let mut total = header_len;
    let mut i = 0;
    while i < fields.len() {
        total += fields[i].width();
        i += 1;
    }
    total
}

const SMFG_FIELDS: [FieldSpec; 6] = [
    FieldSpec::new("binname", LenPrefix::U8, 127),
    FieldSpec::new("command", LenPrefix::U16, 254),
    FieldSpec::new("url", LenPrefix::U16, 510),
    FieldSpec::new("tag", LenPrefix::U8, 127),
    FieldSpec::new("skip_env", LenPrefix::U8, 63),
    FieldSpec::new("fake_argv_env", LenPrefix::U8, 63),
];

const SVFG_FIELDS: [FieldSpec; 3] = [
    FieldSpec::new("mode", LenPrefix::U16, 32),
    FieldSpec::new("source", LenPrefix::U16, 256),
    FieldSpec::new("prefix", LenPrefix::U16, 64),
];

const SMFG: RecordSchema = RecordSchema {
    tag: "SMFG",
    magic: 0x534D_4647,
    version: 1,
    header_len: 24,
    fields: &SMFG_FIELDS,
    size: 1176,
};

const SVFG: RecordSchema = RecordSchema {
    tag: "SVFG",
    magic: 0x5356_4647,
    version: 1,
    header_len: 8,
    fields: &SVFG_FIELDS,
    size: 366,
};

const _: () = assert!(record_size(SMFG.header_len, SMFG.fields) == SMFG.size);
const _: () = assert!(record_size(SVFG.header_len, SVFG.fields) == SVFG.size);

/// Size of an SMFG record in bytes.
pub const SMOL_CONFIG_SIZE: usize = SMFG.size;

/// Size of an SVFG record in bytes.
pub const VFS_CONFIG_SIZE: usize = SVFG.size;

/// Maximum byte length of each SMFG string field, in field order.
pub fn smfg_limits() -> impl Iterator<Item = (&'static str, usize)> {
    SMFG.fields.iter().map(|f| (f.name, f.max_len))
}

/// Maximum byte length of each SVFG string field, in field order.
pub fn svfg_limits() -> impl Iterator<Item = (&'static str, usize)> {
    SVFG.fields.iter().map(|f| (f.name, f.max_len))
}

impl RecordSchema {
    fn begin(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size);
        buf.extend_from_slice(&self.magic.to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf
    }

    fn write_strings(&self, buf: &mut Vec<u8>, values: &[&str]) {
        for (field, original) in self.fields.iter().zip(values) {
            let value = truncate_to(original, field.max_len);
            if value.len() < original.len() {
                warn!(
                    record = self.tag,
                    field = field.name,
                    max = field.max_len,
                    "config string truncated"
                );
            }
            match field.prefix {
                LenPrefix::U8 => buf.push(value.len() as u8),
                LenPrefix::U16 => buf.extend_from_slice(&(value.len() as u16).to_le_bytes()),
            }
            let start = buf.len();
            buf.extend_from_slice(value.as_bytes());
            buf.resize(start + field.max_len, 0);
        }
    }

    fn finish(&self, buf: Vec<u8>) -> Result<Vec<u8>> {
        if buf.len() != self.size {
            return Err(PackError::Config(format!(
                "{} size mismatch: expected {}, got {}",
                self.tag,
                self.size,
                buf.len()
            )));
        }
        Ok(buf)
    }

    fn check_header(&self, data: &[u8]) -> bool {
        if data.len() != self.size {
            return false;
        }
        let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let version = u16::from_le_bytes([data[4], data[5]]);
        magic == self.magic && version == self.version
    }

    fn read_strings(&self, data: &[u8]) -> Option<Vec<String>> {
        let mut offset = self.header_len;
        let mut out = Vec::with_capacity(self.fields.len());
        for field in self.fields {
            let len = match field.prefix {
                LenPrefix::U8 => data[offset] as usize,
                LenPrefix::U16 => u16::from_le_bytes([data[offset], data[offset + 1]]) as usize,
            };
            if len > field.max_len {
                return None;
            }
            let start = offset + field.prefix.width();
            out.push(String::from_utf8_lossy(&data[start..start + len]).into_owned());
            offset += field.width();
        }
        Some(out)
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
fn truncate_to(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

fn normalize_prompt_default(c: char) -> char {
    if c.eq_ignore_ascii_case(&'y') {
        'y'
    } else {
        'n'
    }
}

/// Update-check settings carried in an SMFG record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmolUpdateConfig {
    /// Whether to prompt before running the update command.
    pub prompt: bool,
    /// Default prompt answer, `'y'` or `'n'`.
    pub prompt_default: char,
    /// Minimum time between update checks (ms).
    pub interval: i64,
    /// Minimum time between notifications (ms).
    pub notify_interval: i64,
    /// Binary name shown in notifications.
    pub binname: String,
    /// Update command shown in notifications.
    pub command: String,
    /// Releases API URL.
    pub url: String,
    /// Release tag glob.
    pub tag: String,
    /// Environment variable that disables update checks when truthy.
    pub skip_env: String,
    /// Environment variable name used by the wrapped program for argv emulation.
    pub fake_argv_env: String,
}

impl Default for SmolUpdateConfig {
    fn default() -> Self {
        Self {
            prompt: false,
            prompt_default: 'n',
            interval: DEFAULT_INTERVAL_MS,
            notify_interval: DEFAULT_INTERVAL_MS,
            binname: String::new(),
            command: DEFAULT_UPDATE_COMMAND.to_string(),
            url: String::new(),
            tag: String::new(),
            skip_env: String::new(),
            fake_argv_env: DEFAULT_FAKE_ARGV_ENV.to_string(),
        }
    }
}

impl SmolUpdateConfig {
    /// Encode as an SMFG record. Over-long strings are truncated.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = SMFG.begin();
        buf.push(u8::from(self.prompt));
        buf.push(normalize_prompt_default(self.prompt_default) as u8);
        buf.extend_from_slice(&self.interval.to_le_bytes());
        buf.extend_from_slice(&self.notify_interval.to_le_bytes());
        SMFG.write_strings(
            &mut buf,
            &[
                self.binname.as_str(),
                self.command.as_str(),
                self.url.as_str(),
                self.tag.as_str(),
                self.skip_env.as_str(),
                self.fake_argv_env.as_str(),
            ],
        );
        SMFG.finish(buf)
    }

    /// Decode an SMFG record, or `None` if it is not one.
    pub fn deserialize(data: &[u8]) -> Option<Self> {
        if !SMFG.check_header(data) {
            return None;
        }
        let interval = i64::from_le_bytes(data[8..16].try_into().ok()?);
        let notify_interval = i64::from_le_bytes(data[16..24].try_into().ok()?);
        let mut strings = SMFG.read_strings(data)?.into_iter();
        Some(Self {
            prompt: data[6] != 0,
            prompt_default: normalize_prompt_default(data[7] as char),
            interval,
            notify_interval,
            binname: strings.next()?,
            command: strings.next()?,
            url: strings.next()?,
            tag: strings.next()?,
            skip_env: strings.next()?,
            fake_argv_env: strings.next()?,
        })
    }
}

/// Virtual filesystem settings carried in an SVFG record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VfsConfig {
    /// `on-disk`, `in-memory` or `compat`.
    pub mode: String,
    /// Source path of the archive.
    pub source: String,
    /// Mount prefix inside the program.
    pub prefix: String,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            mode: "on-disk".to_string(),
            source: String::new(),
            prefix: DEFAULT_VFS_PREFIX.to_string(),
        }
    }
}

impl VfsConfig {
    /// Encode as an SVFG record. Over-long strings are truncated.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = SVFG.begin();
        buf.extend_from_slice(&[0, 0]);
        SVFG.write_strings(
            &mut buf,
            &[
                self.mode.as_str(),
                self.source.as_str(),
                self.prefix.as_str(),
            ],
        );
        SVFG.finish(buf)
    }

    /// Decode an SVFG record, or `None` if it is not one.
    pub fn deserialize(data: &[u8]) -> Option<Self> {
        if !SVFG.check_header(data) {
            return None;
        }
        let mut strings = SVFG.read_strings(data)?.into_iter();
        Some(Self {
            mode: strings.next()?,
            source: strings.next()?,
            prefix: strings.next()?,
        })
    }
}

/// Which record type a stub carries. Chosen by build convention; the
/// on-disk format has no tag for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKind {
    /// SMFG update config.
    Update,
    /// SVFG VFS config.
    Vfs,
}

impl ConfigKind {
    /// Fixed record size.
    pub fn size(self) -> usize {
        match self {
            ConfigKind::Update => SMOL_CONFIG_SIZE,
            ConfigKind::Vfs => VFS_CONFIG_SIZE,
        }
    }
}

/// A decoded config record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddedConfig {
    /// SMFG record.
    Update(SmolUpdateConfig),
    /// SVFG record.
    Vfs(VfsConfig),
}

impl EmbeddedConfig {
    /// Record kind.
    pub fn kind(&self) -> ConfigKind {
        match self {
            EmbeddedConfig::Update(_) => ConfigKind::Update,
            EmbeddedConfig::Vfs(_) => ConfigKind::Vfs,
        }
    }

    /// Encode the record.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        match self {
            EmbeddedConfig::Update(c) => c.serialize(),
            EmbeddedConfig::Vfs(c) => c.serialize(),
        }
    }

    /// Decode a record of the given kind.
    pub fn deserialize(kind: ConfigKind, data: &[u8]) -> Option<Self> {
        match kind {
            ConfigKind::Update => SmolUpdateConfig::deserialize(data).map(EmbeddedConfig::Update),
            ConfigKind::Vfs => VfsConfig::deserialize(data).map(EmbeddedConfig::Vfs),
        }
    }

    /// The update config, if this is one.
    pub fn as_update(&self) -> Option<&SmolUpdateConfig> {
        match self {
            EmbeddedConfig::Update(c) => Some(c),
            EmbeddedConfig::Vfs(_) => None,
        }
    }
}
