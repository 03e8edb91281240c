//! Cache command for looking at the extraction cache.

use crate::cli::parsers::parse_cache_key;
use clap::Subcommand;
use smol_pack::{CacheEnv, DlxMetadata, ExtractionCache, PlatformMetadata};
use smolpress::Error;

/// Inspect the shared extraction cache.
#[derive(Subcommand, Debug)]
pub enum CacheCmd {
    /// Print the resolved cache root
    Dir,

    /// Print the metadata sidecar of one entry
    Show {
        /// Cache key (16 hex digits)
        #[arg(value_parser = parse_cache_key, value_name = "KEY")]
        key: String,
    },
}

impl CacheCmd {
    pub fn run(self) -> smolpress::Result<()> {
        let cache = ExtractionCache::from_env(
            &CacheEnv::from_process(),
            PlatformMetadata::host().platform,
        );
        match self {
            CacheCmd::Dir => {
                println!("{}", cache.root().display());
            }
            CacheCmd::Show { key } => {
                let metadata = show(&cache, &key)?;
                println!("{}", serde_json::to_string_pretty(&metadata)?);
                match cache.lookup(&key, metadata.size) {
                    Some(path) => println!("\nBinary: {}", path.display()),
                    None => println!("\nBinary: missing or incomplete"),
                }
            }
        }
        Ok(())
    }
}

/// Sidecar of the entry for `key`.
pub fn show(cache: &ExtractionCache, key: &str) -> smolpress::Result<DlxMetadata> {
    cache
        .read_metadata(key)?
        .ok_or_else(|| Error::CacheEntryNotFound {
            key: key.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use smol_pack::cache::integrity_for;
    use smol_pack::{Platform, StoreRequest};
    use std::path::Path;

    #[test]
    fn test_show_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ExtractionCache::new(dir.path(), Platform::Linux);
        let data = b"cached program".to_vec();
        cache
            .store(&StoreRequest {
                cache_key: "00112233aabbccdd",
                data: &data,
                source_path: Path::new("/usr/local/bin/tool"),
                integrity: integrity_for(&data),
                compression_algorithm: "zstd",
                compressed_size: 9,
                update_check: None,
            })
            .unwrap();

        let meta = show(&cache, "00112233aabbccdd").unwrap();
        assert_eq!(meta.size, data.len() as u64);
        assert_eq!(meta.source.path, "/usr/local/bin/tool");
        assert!(meta.integrity.unwrap().starts_with("sha512-"));
    }

    #[test]
    fn test_show_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ExtractionCache::new(dir.path(), Platform::Linux);
        assert!(matches!(
            show(&cache, "00112233aabbccdd"),
            Err(Error::CacheEntryNotFound { .. })
        ));
    }
}
