//! Config command: write raw SMFG/SVFG records.
//!
//! Build scripts that inject the records themselves (for example into a
//! Mach-O section) use these instead of `press`.

use clap::{Args, Subcommand};
use smol_pack::fsutil::write_file_atomically;
use smolpress::{Error, SeaConfig};
use std::path::PathBuf;

/// Serialize the `smol` section of a sea-config file into a binary record.
#[derive(Subcommand, Debug)]
pub enum ConfigCmd {
    /// Write the update-check record (SMFG, 1176 bytes)
    Smfg(RecordArgs),

    /// Write the VFS record (SVFG, 366 bytes)
    Svfg(RecordArgs),
}

/// Input and output of a record conversion.
#[derive(Args, Debug)]
pub struct RecordArgs {
    /// sea-config JSON file
    #[arg(long, value_name = "PATH")]
    pub config: PathBuf,

    /// Where to write the record
    #[arg(short = 'o', long, value_name = "PATH")]
    pub output: PathBuf,
}

impl ConfigCmd {
    pub fn run(self) -> smolpress::Result<()> {
        let (args, record) = match &self {
            ConfigCmd::Smfg(args) => (args, smfg_record(&SeaConfig::load(&args.config)?)?),
            ConfigCmd::Svfg(args) => (args, svfg_record(&SeaConfig::load(&args.config)?)?),
        };
        write_file_atomically(&args.output, &record, 0o644)?;
        println!(
            "Wrote {} ({} bytes)",
            args.output.display(),
            record.len()
        );
        Ok(())
    }
}

/// SMFG bytes for `config`. A missing `smol.update` section is an error.
pub fn smfg_record(config: &SeaConfig) -> smolpress::Result<Vec<u8>> {
    let update = config
        .update_config()?
        .ok_or_else(|| Error::config("smol.update section is missing"))?;
    Ok(update.serialize()?)
}

/// SVFG bytes for `config`. A missing or disabled `smol.vfs` is an error.
pub fn svfg_record(config: &SeaConfig) -> smolpress::Result<Vec<u8>> {
    let vfs = config
        .vfs_config()?
        .ok_or_else(|| Error::config("smol.vfs is missing or disabled"))?;
    Ok(vfs.serialize()?)
}
