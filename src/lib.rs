//! smolpress - compress executables into self-extracting stubs
//!
//! A pressed binary is a small launcher (`smol-stub`) with the original
//! program appended in compressed form. On first run the launcher extracts
//! the program into a shared, content-addressed cache; later runs exec the
//! cached copy directly.
//!
//! # Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │  stub executable (ELF / Mach-O / PE)            │
//! ├─────────────────────────────────────────────────┤
//! │  marker (32 bytes)                              │
//! ├─────────────────────────────────────────────────┤
//! │  metadata (36 bytes) + optional config record   │
//! ├─────────────────────────────────────────────────┤
//! │  zstd payload                                   │
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! This crate holds the producer CLI and its JSON configuration layer. The
//! binary format, cache and packer live in `smol-pack`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;

pub use config::SeaConfig;
pub use error::{Error, Result};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
