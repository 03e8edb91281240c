//! Platform triple carried in the metadata block.
//!
//! Each component is a single enumerated byte. Unknown bytes are rejected
//! during metadata validation.

use std::fmt;
use std::path::Path;

use goblin::elf::header::{EM_386, EM_AARCH64, EM_ARM, EM_X86_64};
use goblin::mach::cputype::{CPU_TYPE_ARM, CPU_TYPE_ARM64, CPU_TYPE_X86, CPU_TYPE_X86_64};
use goblin::pe::header::{
    COFF_MACHINE_ARM64, COFF_MACHINE_ARMNT, COFF_MACHINE_X86, COFF_MACHINE_X86_64,
};

use crate::binary::{detect_format, FormatKind};
use crate::{PackError, Result};

/// Operating system of the pressed binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Platform {
    /// Linux.
    Linux = 0,
    /// macOS.
    Darwin = 1,
    /// Windows.
    Win32 = 2,
}

/// CPU architecture of the pressed binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Arch {
    /// x86_64.
    X64 = 0,
    /// aarch64.
    Arm64 = 1,
    /// 32-bit x86.
    Ia32 = 2,
    /// 32-bit ARM.
    Arm = 3,
}

/// C library flavour (Linux only).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Libc {
    /// glibc.
    Glibc = 0,
    /// musl.
    Musl = 1,
    /// Not applicable (macOS, Windows).
    NotApplicable = 255,
}

impl Platform {
    /// Decode a platform id byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Linux),
            1 => Some(Self::Darwin),
            2 => Some(Self::Win32),
            _ => None,
        }
    }

    /// Name of the extracted binary inside a cache entry.
    pub fn binary_name(self) -> &'static str {
        match self {
            Self::Win32 => "node.exe",
            _ => "node",
        }
    }

    /// Parse `linux`, `darwin` (or `macos`) and `win32` (or `windows`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "linux" => Some(Self::Linux),
            "darwin" | "macos" => Some(Self::Darwin),
            "win32" | "windows" => Some(Self::Win32),
            _ => None,
        }
    }
}

impl Arch {
    /// Decode an arch id byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::X64),
            1 => Some(Self::Arm64),
            2 => Some(Self::Ia32),
            3 => Some(Self::Arm),
            _ => None,
        }
    }

    /// Parse Node-style (`x64`) and Rust-style (`x86_64`) names.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "x64" | "x86_64" | "amd64" => Some(Self::X64),
            "arm64" | "aarch64" => Some(Self::Arm64),
            "ia32" | "x86" | "i686" => Some(Self::Ia32),
            "arm" => Some(Self::Arm),
            _ => None,
        }
    }
}

impl Libc {
    /// Decode a libc id byte.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(Self::Glibc),
            1 => Some(Self::Musl),
            255 => Some(Self::NotApplicable),
            _ => None,
        }
    }

    /// Parse `glibc`, `musl` or `none`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "glibc" | "gnu" => Some(Self::Glibc),
            "musl" => Some(Self::Musl),
            "none" | "n/a" => Some(Self::NotApplicable),
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => write!(f, "linux"),
            Platform::Darwin => write!(f, "darwin"),
            Platform::Win32 => write!(f, "win32"),
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::X64 => write!(f, "x64"),
            Arch::Arm64 => write!(f, "arm64"),
            Arch::Ia32 => write!(f, "ia32"),
            Arch::Arm => write!(f, "arm"),
        }
    }
}

impl fmt::Display for Libc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Libc::Glibc => write!(f, "glibc"),
            Libc::Musl => write!(f, "musl"),
            Libc::NotApplicable => write!(f, "n/a"),
        }
    }
}

/// The three platform bytes stored after the cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformMetadata {
    /// Operating system.
    pub platform: Platform,
    /// CPU architecture.
    pub arch: Arch,
    /// C library.
    pub libc: Libc,
}

impl PlatformMetadata {
    /// Encoded size in bytes.
    pub const SIZE: usize = 3;

    /// Create a triple. Non-Linux platforms always carry [`Libc::NotApplicable`].
    pub fn new(platform: Platform, arch: Arch, libc: Libc) -> Self {
        let libc = if platform == Platform::Linux {
            libc
        } else {
            Libc::NotApplicable
        };
        Self {
            platform,
            arch,
            libc,
        }
    }

    /// Encode as three bytes.
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        [self.platform as u8, self.arch as u8, self.libc as u8]
    }

    /// Decode three bytes, rejecting ids outside their enumerations.
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Result<Self> {
        let platform = Platform::from_byte(bytes[0]).ok_or_else(|| {
            PackError::InvalidMetadata(format!("unknown platform id: {}", bytes[0]))
        })?;
        let arch = Arch::from_byte(bytes[1])
            .ok_or_else(|| PackError::InvalidMetadata(format!("unknown arch id: {}", bytes[1])))?;
        let libc = Libc::from_byte(bytes[2])
            .ok_or_else(|| PackError::InvalidMetadata(format!("unknown libc id: {}", bytes[2])))?;
        Ok(Self {
            platform,
            arch,
            libc,
        })
    }

    /// Triple for the machine running this code.
    pub fn host() -> Self {
        let platform = if cfg!(target_os = "macos") {
            Platform::Darwin
        } else if cfg!(windows) {
            Platform::Win32
        } else {
            Platform::Linux
        };

        let arch = if cfg!(target_arch = "aarch64") {
            Arch::Arm64
        } else if cfg!(target_arch = "x86") {
            Arch::Ia32
        } else if cfg!(target_arch = "arm") {
            Arch::Arm
        } else {
            Arch::X64
        };

        let libc = if platform == Platform::Linux {
            host_libc()
        } else {
            Libc::NotApplicable
        };

        Self::new(platform, arch, libc)
    }

    /// Derive the triple from an executable's headers.
    ///
    /// Returns `None` when the format or machine type is not one the stub
    /// runtime ships for.
    pub fn from_binary(data: &[u8]) -> Option<Self> {
        match detect_format(data)? {
            FormatKind::Elf => {
                let elf = goblin::elf::Elf::parse(data).ok()?;
                let arch = match elf.header.e_machine {
                    EM_X86_64 => Arch::X64,
                    EM_AARCH64 => Arch::Arm64,
                    EM_386 => Arch::Ia32,
                    EM_ARM => Arch::Arm,
                    _ => return None,
                };
                let libc = match elf.interpreter {
                    Some(interp) if interp.contains("musl") => Libc::Musl,
                    _ => Libc::Glibc,
                };
                Some(Self::new(Platform::Linux, arch, libc))
            }
            FormatKind::MachO => {
                let cputype = match goblin::mach::Mach::parse(data).ok()? {
                    goblin::mach::Mach::Binary(macho) => macho.header.cputype,
                    goblin::mach::Mach::Fat(fat) => fat.iter_arches().next()?.ok()?.cputype,
                };
                let arch = match cputype {
                    CPU_TYPE_X86_64 => Arch::X64,
                    CPU_TYPE_ARM64 => Arch::Arm64,
                    CPU_TYPE_X86 => Arch::Ia32,
                    CPU_TYPE_ARM => Arch::Arm,
                    _ => return None,
                };
                Some(Self::new(Platform::Darwin, arch, Libc::NotApplicable))
            }
            FormatKind::Pe => {
                let pe = goblin::pe::PE::parse(data).ok()?;
                let arch = match pe.header.coff_header.machine {
                    COFF_MACHINE_X86_64 => Arch::X64,
                    COFF_MACHINE_ARM64 => Arch::Arm64,
                    COFF_MACHINE_X86 => Arch::Ia32,
                    COFF_MACHINE_ARMNT => Arch::Arm,
                    _ => return None,
                };
                Some(Self::new(Platform::Win32, arch, Libc::NotApplicable))
            }
        }
    }
}

impl fmt::Display for PlatformMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.platform, self.arch)?;
        if self.libc == Libc::Musl {
            write!(f, "-musl")?;
        }
        Ok(())
    }
}

/// Dynamic loader paths that only exist on musl systems.
const MUSL_LOADERS: &[&str] = &[
    "/lib/ld-musl-x86_64.so.1",
    "/lib/ld-musl-aarch64.so.1",
    "/lib/ld-musl-i386.so.1",
    "/lib/ld-musl-arm.so.1",
    "/usr/lib/ld-musl-x86_64.so.1",
    "/usr/lib/ld-musl-aarch64.so.1",
];

fn host_libc() -> Libc {
    if cfg!(target_env = "musl") || MUSL_LOADERS.iter().any(|p| Path::new(p).exists()) {
        Libc::Musl
    } else {
        Libc::Glibc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_roundtrip() {
        let meta = PlatformMetadata::new(Platform::Linux, Arch::Arm64, Libc::Musl);
        assert_eq!(meta.to_bytes(), [0, 1, 1]);
        assert_eq!(PlatformMetadata::from_bytes(meta.to_bytes()).unwrap(), meta);
    }

    #[test]
    fn test_non_linux_forces_libc_na() {
        let meta = PlatformMetadata::new(Platform::Darwin, Arch::X64, Libc::Glibc);
        assert_eq!(meta.libc, Libc::NotApplicable);
        assert_eq!(meta.to_bytes(), [1, 0, 255]);
    }

    #[test]
    fn test_rejects_out_of_range_ids() {
        assert!(PlatformMetadata::from_bytes([3, 0, 0]).is_err());
        assert!(PlatformMetadata::from_bytes([0, 4, 0]).is_err());
        assert!(PlatformMetadata::from_bytes([0, 0, 2]).is_err());
    }

    #[test]
    fn test_binary_name() {
        assert_eq!(Platform::Linux.binary_name(), "node");
        assert_eq!(Platform::Darwin.binary_name(), "node");
        assert_eq!(Platform::Win32.binary_name(), "node.exe");
    }

    #[test]
    fn test_parse_names() {
        assert_eq!(Platform::parse("macos"), Some(Platform::Darwin));
        assert_eq!(Arch::parse("aarch64"), Some(Arch::Arm64));
        assert_eq!(Libc::parse("musl"), Some(Libc::Musl));
        assert_eq!(Arch::parse("riscv64"), None);
    }

    #[test]
    fn test_display() {
        let meta = PlatformMetadata::new(Platform::Linux, Arch::X64, Libc::Musl);
        assert_eq!(meta.to_string(), "linux-x64-musl");
    }
}
