//! smolpress CLI entry point.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cli;

/// smolpress - self-extracting executable compressor
#[derive(Parser, Debug)]
#[command(name = "smolpress")]
#[command(about = "Compress executables into self-extracting stubs")]
#[command(
    long_about = "smolpress appends a zstd-compressed program to a small launcher stub.\n\n\
The pressed binary extracts itself into a shared cache on first run and \
execs the cached copy on every later run.\n\n\
Quick start:\n  \
smolpress press ./node --stub ./smol-stub -o ./node-pressed\n  \
smolpress inspect ./node-pressed"
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compress a program into a stub
    Press(cli::press::PressCmd),

    /// Show what a pressed binary contains
    Inspect(cli::inspect::InspectCmd),

    /// Decompress the payload of a pressed binary
    Unpress(cli::unpress::UnpressCmd),

    /// Write a raw config record
    #[command(subcommand)]
    Config(cli::config::ConfigCmd),

    /// Inspect the extraction cache
    #[command(subcommand)]
    Cache(cli::cache::CacheCmd),
}

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on RUST_LOG or default to warn
    init_logging();

    tracing::debug!(version = smolpress::VERSION, "starting smolpress");

    let result = match cli.command {
        Commands::Press(cmd) => cmd.run(),
        Commands::Inspect(cmd) => cmd.run(),
        Commands::Unpress(cmd) => cmd.run(),
        Commands::Config(cmd) => cmd.run(),
        Commands::Cache(cmd) => cmd.run(),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber.
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("smolpress=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
