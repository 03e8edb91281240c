//! Shared CLI argument parsers.

use smol_pack::{Arch, Libc, Platform};

/// Parse a platform name (`linux`, `darwin`/`macos`, `win32`/`windows`).
pub fn parse_platform(s: &str) -> Result<Platform, String> {
    Platform::parse(s).ok_or_else(|| format!("invalid platform: {}", s))
}

/// Parse an architecture name (`x64`, `arm64`, ...).
pub fn parse_arch(s: &str) -> Result<Arch, String> {
    Arch::parse(s).ok_or_else(|| format!("invalid arch: {}", s))
}

/// Parse a libc name (`glibc`, `musl`, `none`).
pub fn parse_libc(s: &str) -> Result<Libc, String> {
    Libc::parse(s).ok_or_else(|| format!("invalid libc: {}", s))
}

/// Parse a zstd level (1-22).
pub fn parse_level(s: &str) -> Result<i32, String> {
    let level: i32 = s
        .parse()
        .map_err(|_| format!("invalid compression level: {}", s))?;
    if !(1..=22).contains(&level) {
        return Err(format!("compression level must be 1-22, got {}", level));
    }
    Ok(level)
}

/// Parse a cache key (16 hex digits).
pub fn parse_cache_key(s: &str) -> Result<String, String> {
    if smol_pack::format::is_valid_cache_key(s.as_bytes()) {
        Ok(s.to_string())
    } else {
        Err(format!("invalid cache key '{}': expected 16 hex digits", s))
    }
}
