//! CLI command implementations.

pub mod cache;
pub mod config;
pub mod inspect;
pub mod parsers;
pub mod press;
pub mod unpress;

/// Human-readable byte count ("1.5 MiB").
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Compressed size as a percentage of the original.
pub fn ratio_percent(compressed: u64, uncompressed: u64) -> f64 {
    if uncompressed == 0 {
        0.0
    } else {
        compressed as f64 * 100.0 / uncompressed as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MiB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }

    #[test]
    fn test_ratio_percent() {
        assert_eq!(ratio_percent(0, 0), 0.0);
        assert_eq!(ratio_percent(25, 100), 25.0);
    }
}
