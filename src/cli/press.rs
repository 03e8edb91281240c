//! Press command for building self-extracting binaries.
//!
//! Produces a copy of the stub with the compressed program embedded:
//! - ELF stubs carry it in a PT_NOTE-referenced note
//! - Mach-O, PE and unknown stubs carry it appended

use crate::cli::parsers::{parse_arch, parse_level, parse_libc, parse_platform};
use crate::cli::{format_size, ratio_percent};
use clap::Args;
use smol_pack::{Arch, EmbeddedConfig, Libc, Packer, Platform, PlatformMetadata, ZstdCodec};
use smolpress::{Error, SeaConfig};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Compress a program into a self-extracting stub.
///
/// Examples:
///   smolpress press ./node --stub ./smol-stub -o ./node-pressed
///   smolpress press ./node --stub ./smol-stub -o ./node-pressed --config sea-config.json
///   smolpress press ./node.exe --stub ./smol-stub.exe -o out.exe --platform win32 --arch x64
#[derive(Args, Debug)]
pub struct PressCmd {
    /// Program to compress
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Stub executable the program is embedded into
    #[arg(long, value_name = "PATH")]
    pub stub: PathBuf,

    /// Output file path for the pressed binary
    #[arg(short = 'o', long, value_name = "PATH")]
    pub output: PathBuf,

    /// sea-config JSON file whose `smol.update` section is embedded
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// zstd compression level (1-22)
    #[arg(long, default_value_t = smol_pack::compress::ZSTD_LEVEL, value_parser = parse_level, value_name = "N")]
    pub level: i32,

    /// Target platform (default: detected from the stub)
    #[arg(long, value_parser = parse_platform, value_name = "OS")]
    pub platform: Option<Platform>,

    /// Target architecture (default: detected from the stub)
    #[arg(long, value_parser = parse_arch, value_name = "ARCH")]
    pub arch: Option<Arch>,

    /// Target C library (default: detected from the stub)
    #[arg(long, value_parser = parse_libc, value_name = "LIBC")]
    pub libc: Option<Libc>,
}

impl PressCmd {
    pub fn run(self) -> smolpress::Result<()> {
        for path in [&self.input, &self.stub] {
            if !path.is_file() {
                return Err(Error::FileNotFound { path: path.clone() });
            }
        }
        info!(
            input = %self.input.display(),
            stub = %self.stub.display(),
            output = %self.output.display(),
            "pressing binary"
        );

        let mut packer = Packer::new()
            .with_stub(&self.stub)
            .with_codec(ZstdCodec::with_level(self.level));

        if let Some(config) = self.embedded_config()? {
            packer = packer.with_config(config);
        }
        if let Some(platform) = self.platform_override()? {
            packer = packer.with_platform(platform);
        }

        println!("Compressing {}...", self.input.display());
        let packed = packer.pack(&self.input, &self.output)?;

        println!(
            "Pressed {} -> {} ({:.1}% of original)",
            format_size(packed.uncompressed_size),
            format_size(packed.compressed_size),
            ratio_percent(packed.compressed_size, packed.uncompressed_size)
        );
        println!(
            "Stub: {} ({})",
            format_size(packed.stub_size),
            packed
                .format
                .map(|f| f.to_string())
                .unwrap_or_else(|| "unknown format".to_string())
        );
        println!("Platform: {}", packed.platform);
        println!("Cache key: {}", packed.cache_key);
        println!(
            "\nWrote {} ({})",
            self.output.display(),
            format_size(packed.total_size)
        );
        Ok(())
    }

    fn embedded_config(&self) -> smolpress::Result<Option<EmbeddedConfig>> {
        let Some(path) = &self.config else {
            return Ok(None);
        };
        let sea = SeaConfig::load(path)?;
        if sea.vfs_config()?.is_some() {
            warn!("smol.vfs is not embedded by press; write it with `smolpress config svfg`");
        }
        Ok(sea.update_config()?.map(EmbeddedConfig::Update))
    }

    /// Platform triple from the flags, with unset parts taken from the stub
    /// (or the host when the stub is not recognized).
    fn platform_override(&self) -> smolpress::Result<Option<PlatformMetadata>> {
        if self.platform.is_none() && self.arch.is_none() && self.libc.is_none() {
            return Ok(None);
        }
        let base = detect_platform(&self.stub)?.unwrap_or_else(PlatformMetadata::host);
        Ok(Some(PlatformMetadata::new(
            self.platform.unwrap_or(base.platform),
            self.arch.unwrap_or(base.arch),
            self.libc.unwrap_or(base.libc),
        )))
    }
}

fn detect_platform(stub: &Path) -> smolpress::Result<Option<PlatformMetadata>> {
    let bytes = std::fs::read(stub).map_err(|e| Error::io("read stub", stub, e))?;
    Ok(PlatformMetadata::from_binary(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn cmd(dir: &Path) -> PressCmd {
        PressCmd {
            input: dir.join("input"),
            stub: dir.join("stub"),
            output: dir.join("out"),
            config: None,
            level: 3,
            platform: None,
            arch: None,
            libc: None,
        }
    }

    #[test]
    fn test_platform_override_fills_from_host() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stub"), b"not an executable").unwrap();

        let mut press = cmd(dir.path());
        assert_eq!(press.platform_override().unwrap(), None);

        press.platform = Some(Platform::Win32);
        press.arch = Some(Arch::Arm64);
        let platform = press.platform_override().unwrap().unwrap();
        assert_eq!(platform.platform, Platform::Win32);
        assert_eq!(platform.arch, Arch::Arm64);
        assert_eq!(platform.libc, Libc::NotApplicable);
    }

    #[test]
    fn test_press_unknown_stub_with_platform() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stub"), b"#!/bin/sh\necho stub\n").unwrap();
        fs::write(dir.path().join("input"), b"payload ".repeat(100)).unwrap();
        fs::write(
            dir.path().join("sea.json"),
            r#"{"smol":{"update":{"binname":"tool"}}}"#,
        )
        .unwrap();

        let mut press = cmd(dir.path());
        press.platform = Some(Platform::Linux);
        press.arch = Some(Arch::X64);
        press.libc = Some(Libc::Glibc);
        press.config = Some(dir.path().join("sea.json"));
        press.run().unwrap();

        let meta = smol_pack::format::read_metadata_from_file(
            &dir.path().join("out"),
            smol_pack::ConfigKind::Update,
        )
        .unwrap();
        assert_eq!(meta.uncompressed_size, 800);
        assert_eq!(meta.update_config().unwrap().binname, "tool");
    }

    #[test]
    fn test_press_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stub"), b"stub").unwrap();
        let err = cmd(dir.path()).run().unwrap_err();
        assert!(matches!(err, Error::FileNotFound { .. }));
    }

    #[test]
    fn test_press_bad_config_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stub"), b"stub").unwrap();
        fs::write(dir.path().join("input"), b"payload").unwrap();
        fs::write(
            dir.path().join("sea.json"),
            r#"{"smol":{"update":{"url":"file:///etc"}}}"#,
        )
        .unwrap();

        let mut press = cmd(dir.path());
        press.config = Some(dir.path().join("sea.json"));
        press.platform = Some(Platform::Linux);
        assert!(matches!(press.run(), Err(Error::Config(_))));
        assert!(!dir.path().join("out").exists());
    }
}
