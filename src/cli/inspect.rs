//! Inspect command for pressed binaries.

use crate::cli::{format_size, ratio_percent};
use clap::Args;
use serde::Serialize;
use smol_pack::binary::{self, NODE_SEA_RESOURCE, SMOL_VFS_RESOURCE};
use smol_pack::finder::{find_payload, PAYLOAD_MARKER};
use smol_pack::format::read_metadata;
use smol_pack::{ConfigKind, EmbeddedConfig};
use smolpress::Error;
use std::io::{Cursor, Seek, SeekFrom};
use std::path::PathBuf;
use tracing::warn;

/// Show the format, resources, marker offset, metadata and config of a
/// pressed binary.
///
/// Examples:
///   smolpress inspect ./node-pressed
///   smolpress inspect ./node-pressed --json
#[derive(Args, Debug)]
pub struct InspectCmd {
    /// Pressed binary to inspect
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Decode the config record as SVFG instead of SMFG
    #[arg(long)]
    pub vfs: bool,

    /// Print machine-readable JSON
    #[arg(long)]
    pub json: bool,
}

/// Everything `inspect` reports.
#[derive(Debug, Serialize)]
pub struct Report {
    pub file: String,
    pub size: u64,
    pub format: Option<String>,
    pub resources: Vec<String>,
    pub has_sea_blob: bool,
    pub has_vfs_blob: bool,
    pub payload: Option<PayloadReport>,
}

/// Metadata of an embedded payload.
#[derive(Debug, Serialize)]
pub struct PayloadReport {
    pub marker_offset: u64,
    pub data_offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub cache_key: String,
    pub platform: String,
    pub config: Option<serde_json::Value>,
}

impl InspectCmd {
    pub fn run(self) -> smolpress::Result<()> {
        let report = inspect(&self.file, self.config_kind())?;
        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report);
        }
        Ok(())
    }

    fn config_kind(&self) -> ConfigKind {
        if self.vfs {
            ConfigKind::Vfs
        } else {
            ConfigKind::Update
        }
    }
}

/// Build a report for the file at `path`.
pub fn inspect(path: &std::path::Path, kind: ConfigKind) -> smolpress::Result<Report> {
    let data = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => Error::io("read binary", path, e),
    })?;

    let format = binary::detect(&data);
    let (resources, has_sea_blob, has_vfs_blob) = match format {
        Some(format) => {
            let resources = format.list_resources(&data).unwrap_or_else(|e| {
                warn!(error = %e, "failed to list resources");
                Vec::new()
            });
            let has = |name| format.has_section_or_segment(&data, name).unwrap_or(false);
            (resources, has(NODE_SEA_RESOURCE), has(SMOL_VFS_RESOURCE))
        }
        None => (Vec::new(), false, false),
    };

    let mut cursor = Cursor::new(&data[..]);
    let payload = match find_payload(&mut cursor)? {
        Some(offset) => {
            cursor
                .seek(SeekFrom::Start(offset))
                .map_err(|e| Error::io("seek", path, e))?;
            let meta = read_metadata(&mut cursor, kind)?;
            Some(PayloadReport {
                marker_offset: offset - PAYLOAD_MARKER.len() as u64,
                data_offset: meta.data_offset,
                compressed_size: meta.compressed_size,
                uncompressed_size: meta.uncompressed_size,
                cache_key: meta.cache_key().to_string(),
                platform: meta
                    .platform()
                    .map(|p| p.to_string())
                    .unwrap_or_else(|e| format!("invalid ({})", e)),
                config: meta.config.as_ref().map(config_json),
            })
        }
        None => None,
    };

    Ok(Report {
        file: path.display().to_string(),
        size: data.len() as u64,
        format: format.map(|f| f.kind().to_string()),
        resources,
        has_sea_blob,
        has_vfs_blob,
        payload,
    })
}

fn config_json(config: &EmbeddedConfig) -> serde_json::Value {
    match config {
        EmbeddedConfig::Update(c) => serde_json::json!({
            "type": "SMFG",
            "prompt": c.prompt,
            "promptDefault": c.prompt_default.to_string(),
            "interval": c.interval,
            "notifyInterval": c.notify_interval,
            "binname": c.binname,
            "command": c.command,
            "url": c.url,
            "tag": c.tag,
            "skipEnv": c.skip_env,
            "fakeArgvEnv": c.fake_argv_env,
        }),
        EmbeddedConfig::Vfs(c) => serde_json::json!({
            "type": "SVFG",
            "mode": c.mode,
            "source": c.source,
            "prefix": c.prefix,
        }),
    }
}

fn print_report(report: &Report) {
    println!("File:      {}", report.file);
    println!("Size:      {}", format_size(report.size));
    println!(
        "Format:    {}",
        report.format.as_deref().unwrap_or("unknown")
    );
    if !report.resources.is_empty() {
        println!("Resources: {}", report.resources.join(", "));
    }
    if report.has_sea_blob {
        println!("SEA blob:  present");
    }
    if report.has_vfs_blob {
        println!("VFS blob:  present");
    }

    let Some(payload) = &report.payload else {
        println!("\nNo pressed payload found");
        return;
    };
    println!("\nPayload");
    println!("  Marker offset: {}", payload.marker_offset);
    println!("  Data offset:   {}", payload.data_offset);
    println!(
        "  Compressed:    {} ({:.1}%)",
        format_size(payload.compressed_size),
        ratio_percent(payload.compressed_size, payload.uncompressed_size)
    );
    println!("  Uncompressed:  {}", format_size(payload.uncompressed_size));
    println!("  Cache key:     {}", payload.cache_key);
    println!("  Platform:      {}", payload.platform);
    match &payload.config {
        Some(config) => {
            println!("\nConfig");
            if let Some(fields) = config.as_object() {
                for (key, value) in fields {
                    println!("  {}: {}", key, value);
                }
            }
        }
        None => println!("\nConfig: none"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smol_pack::{Arch, Libc, Platform, PlatformMetadata, SmolUpdateConfig};
    use std::fs;

    #[test]
    fn test_inspect_pressed_file() {
        let dir = tempfile::tempdir().unwrap();
        let update = SmolUpdateConfig {
            binname: "tool".to_string(),
            ..SmolUpdateConfig::default()
        };
        let packer = smol_pack::Packer::new()
            .with_platform(PlatformMetadata::new(
                Platform::Linux,
                Arch::Arm64,
                Libc::Musl,
            ))
            .with_config(EmbeddedConfig::Update(update));
        let (image, info) = packer
            .pack_bytes(b"plain stub bytes", &b"x".repeat(4096))
            .unwrap();
        let path = dir.path().join("pressed");
        fs::write(&path, &image).unwrap();

        let report = inspect(&path, ConfigKind::Update).unwrap();
        assert_eq!(report.format, None);
        let payload = report.payload.unwrap();
        assert_eq!(payload.marker_offset, 16);
        assert_eq!(payload.uncompressed_size, 4096);
        assert_eq!(payload.cache_key, info.cache_key);
        assert_eq!(payload.platform, "linux-arm64-musl");
        let config = payload.config.unwrap();
        assert_eq!(config["type"], "SMFG");
        assert_eq!(config["binname"], "tool");
    }

    #[test]
    fn test_inspect_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain");
        fs::write(&path, b"MZ but not really a PE").unwrap();
        let report = inspect(&path, ConfigKind::Update).unwrap();
        assert_eq!(report.format.as_deref(), Some("PE"));
        assert!(report.payload.is_none());
    }

    #[test]
    fn test_inspect_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            inspect(&dir.path().join("nope"), ConfigKind::Update),
            Err(Error::FileNotFound { .. })
        ));
    }
}
