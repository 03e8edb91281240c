//! Content-addressed extraction cache.
//!
//! Each payload extracts to `<root>/<cache_key>/node` next to a
//! `.dlx-metadata.json` sidecar. Entries are never locked: concurrent
//! writers of the same key write identical bytes and the last rename wins.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha512};
use tracing::{debug, warn};

use crate::fsutil::write_file_atomically;
use crate::platform::Platform;
use crate::{PackError, Result};

/// Sidecar file name inside a cache entry.
pub const METADATA_FILE_NAME: &str = ".dlx-metadata.json";

/// Sidecar schema version.
pub const METADATA_SCHEMA_VERSION: &str = "1.0.0";

/// `source.type` recorded for entries written by the stub.
pub const SOURCE_TYPE_EXTRACT: &str = "extract";

const BINARY_MODE: u32 = 0o755;
const METADATA_MODE: u32 = 0o644;

/// Snapshot of the environment inputs that decide the cache root.
#[derive(Debug, Clone, Default)]
pub struct CacheEnv {
    /// `SOCKET_DLX_DIR`.
    pub dlx_dir: Option<OsString>,
    /// `SOCKET_HOME`.
    pub socket_home: Option<OsString>,
    /// User home directory.
    pub home: Option<PathBuf>,
    /// System temp directory.
    pub temp_dir: PathBuf,
}

impl CacheEnv {
    /// Capture the current process environment.
    pub fn from_process() -> Self {
        Self {
            dlx_dir: std::env::var_os("SOCKET_DLX_DIR"),
            socket_home: std::env::var_os("SOCKET_HOME"),
            home: dirs::home_dir(),
            temp_dir: std::env::temp_dir(),
        }
    }

    /// Cache root for this environment.
    ///
    /// `SOCKET_DLX_DIR` > `SOCKET_HOME/_dlx` > `~/.socket/_dlx` >
    /// `<tmp>/.socket/_dlx`. Empty variables are treated as unset.
    pub fn resolve(&self) -> PathBuf {
        if let Some(dir) = non_empty(&self.dlx_dir) {
            return PathBuf::from(dir);
        }
        if let Some(base) = non_empty(&self.socket_home) {
            return PathBuf::from(base).join("_dlx");
        }
        match &self.home {
            Some(home) if !home.as_os_str().is_empty() => home.join(".socket").join("_dlx"),
            _ => self.temp_dir.join(".socket").join("_dlx"),
        }
    }
}

fn non_empty(value: &Option<OsString>) -> Option<&OsString> {
    value.as_ref().filter(|v| !v.is_empty())
}

/// Provenance of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DlxSource {
    /// How the entry was produced.
    #[serde(rename = "type")]
    pub kind: String,
    /// Stub the entry was extracted from.
    pub path: String,
}

/// Update-check bookkeeping stored alongside an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateCheck {
    /// Last time a release check ran (ms since epoch).
    pub last_check: i64,
    /// Last time the user was notified (ms since epoch).
    pub last_notification: i64,
    /// Newest version seen so far.
    pub latest_known: String,
}

/// Contents of `.dlx-metadata.json`.
///
/// Fields this crate does not know about are kept in `other` and written
/// back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DlxMetadata {
    /// Schema version.
    pub version: String,
    /// Entry cache key.
    pub cache_key: String,
    /// Creation time (ms since epoch).
    pub timestamp: u64,
    /// SRI hash, `sha512-<base64>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
    /// Legacy hex hash, `sha512-<hex>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    /// Size of the extracted binary.
    pub size: u64,
    /// Provenance.
    pub source: DlxSource,
    /// Producer-specific details.
    #[serde(default)]
    pub extra: Map<String, Value>,
    /// Update-check state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_check: Option<UpdateCheck>,
    /// Unrecognized fields.
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Everything `store` needs to create an entry.
#[derive(Debug, Clone)]
pub struct StoreRequest<'a> {
    /// Entry key.
    pub cache_key: &'a str,
    /// Decompressed binary.
    pub data: &'a [u8],
    /// Stub the data came from.
    pub source_path: &'a Path,
    /// SRI hash of `data`.
    pub integrity: String,
    /// Codec name.
    pub compression_algorithm: &'a str,
    /// Size of the compressed payload.
    pub compressed_size: u64,
    /// Initial update-check state.
    pub update_check: Option<UpdateCheck>,
}

/// Cache rooted at a resolved directory.
#[derive(Debug, Clone)]
pub struct ExtractionCache {
    root: PathBuf,
    binary_name: &'static str,
}

impl ExtractionCache {
    /// Cache at `root` holding binaries for `platform`.
    pub fn new(root: impl Into<PathBuf>, platform: Platform) -> Self {
        Self {
            root: root.into(),
            binary_name: platform.binary_name(),
        }
    }

    /// Cache at the root resolved from `env`.
    pub fn from_env(env: &CacheEnv, platform: Platform) -> Self {
        Self::new(env.resolve(), platform)
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Entry directory for `cache_key`.
    pub fn entry_dir(&self, cache_key: &str) -> PathBuf {
        self.root.join(cache_key)
    }

    /// Extracted binary path for `cache_key`.
    pub fn binary_path(&self, cache_key: &str) -> PathBuf {
        self.entry_dir(cache_key).join(self.binary_name)
    }

    /// Sidecar path for `cache_key`.
    pub fn metadata_path(&self, cache_key: &str) -> PathBuf {
        self.entry_dir(cache_key).join(METADATA_FILE_NAME)
    }

    /// Return the cached binary if it exists with exactly `expected_size`
    /// bytes and, on Unix, some execute bit set. Contents are not hashed.
    pub fn lookup(&self, cache_key: &str, expected_size: u64) -> Option<PathBuf> {
        let path = self.binary_path(cache_key);
        let meta = match open_no_follow(&path).and_then(|f| f.metadata()) {
            Ok(meta) => meta,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cache miss");
                return None;
            }
        };

        if !meta.is_file() || meta.len() != expected_size {
            debug!(
                path = %path.display(),
                size = meta.len(),
                expected = expected_size,
                "cache entry size mismatch"
            );
            return None;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if meta.permissions().mode() & 0o111 == 0 {
                debug!(path = %path.display(), "cache entry not executable");
                return None;
            }
        }

        Some(path)
    }

    /// Create or overwrite the entry for `req.cache_key`.
    ///
    /// The binary is written first, then the sidecar. If the sidecar cannot
    /// be written the binary is removed again.
    pub fn store(&self, req: &StoreRequest<'_>) -> Result<PathBuf> {
        let entry_dir = self.entry_dir(req.cache_key);
        fs::create_dir_all(&entry_dir).map_err(|e| PackError::CacheWrite {
            path: entry_dir.clone(),
            reason: e.to_string(),
        })?;

        let binary_path = self.binary_path(req.cache_key);
        write_file_atomically(&binary_path, req.data, BINARY_MODE)?;

        let mut extra = Map::new();
        extra.insert(
            "compressed_size".to_string(),
            Value::from(req.compressed_size),
        );
        extra.insert(
            "compression_algorithm".to_string(),
            Value::from(req.compression_algorithm),
        );

        let metadata = DlxMetadata {
            version: METADATA_SCHEMA_VERSION.to_string(),
            cache_key: req.cache_key.to_string(),
            timestamp: now_millis(),
            integrity: Some(req.integrity.clone()),
            checksum: None,
            size: req.data.len() as u64,
            source: DlxSource {
                kind: SOURCE_TYPE_EXTRACT.to_string(),
                path: req.source_path.to_string_lossy().into_owned(),
            },
            extra,
            update_check: req.update_check.clone(),
            other: Map::new(),
        };

        if let Err(e) = self.write_metadata(req.cache_key, &metadata) {
            if let Err(rm) = fs::remove_file(&binary_path) {
                warn!(
                    path = %binary_path.display(),
                    error = %rm,
                    "failed to remove binary after metadata write failure"
                );
            }
            return Err(PackError::CacheWrite {
                path: self.metadata_path(req.cache_key),
                reason: e.to_string(),
            });
        }

        debug!(
            cache_key = %req.cache_key,
            path = %binary_path.display(),
            size = req.data.len(),
            "stored cache entry"
        );
        Ok(binary_path)
    }

    /// Read an entry's sidecar. `Ok(None)` if it does not exist.
    pub fn read_metadata(&self, cache_key: &str) -> Result<Option<DlxMetadata>> {
        let path = self.metadata_path(cache_key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Replace an entry's sidecar.
    pub fn write_metadata(&self, cache_key: &str, metadata: &DlxMetadata) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(metadata)?;
        json.push(b'\n');
        write_file_atomically(&self.metadata_path(cache_key), &json, METADATA_MODE)
    }

    /// Update-check state for an entry, or defaults if none is recorded or
    /// the sidecar is unreadable.
    pub fn read_update_check(&self, cache_key: &str) -> UpdateCheck {
        match self.read_metadata(cache_key) {
            Ok(Some(meta)) => meta.update_check.unwrap_or_default(),
            Ok(None) => UpdateCheck::default(),
            Err(e) => {
                debug!(cache_key = %cache_key, error = %e, "unreadable cache metadata");
                UpdateCheck::default()
            }
        }
    }

    /// Record update-check state, keeping every other sidecar field.
    pub fn write_update_check(&self, cache_key: &str, check: &UpdateCheck) -> Result<()> {
        let mut metadata = self
            .read_metadata(cache_key)?
            .ok_or_else(|| PackError::CacheWrite {
                path: self.metadata_path(cache_key),
                reason: "metadata file missing".to_string(),
            })?;
        metadata.update_check = Some(check.clone());
        self.write_metadata(cache_key, &metadata)
    }
}

/// SRI integrity string for `data`: `sha512-<base64>`.
pub fn integrity_for(data: &[u8]) -> String {
    format!("sha512-{}", STANDARD.encode(Sha512::digest(data)))
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(unix)]
fn open_no_follow(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NOFOLLOW | libc::O_CLOEXEC)
        .open(path)
}

#[cfg(not(unix))]
fn open_no_follow(path: &Path) -> std::io::Result<fs::File> {
    fs::File::open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn request<'a>(key: &'a str, data: &'a [u8], source: &'a Path) -> StoreRequest<'a> {
        StoreRequest {
            cache_key: key,
            data,
            source_path: source,
            integrity: integrity_for(data),
            compression_algorithm: "zstd",
            compressed_size: 42,
            update_check: None,
        }
    }

    #[test]
    fn test_resolve_priority() {
        let mut env = CacheEnv {
            dlx_dir: Some("/custom/cache".into()),
            socket_home: Some("/opt/socket".into()),
            home: Some(PathBuf::from("/home/user")),
            temp_dir: PathBuf::from("/tmp"),
        };
        assert_eq!(env.resolve(), PathBuf::from("/custom/cache"));

        env.dlx_dir = Some(OsString::new());
        assert_eq!(env.resolve(), PathBuf::from("/opt/socket/_dlx"));

        env.socket_home = None;
        assert_eq!(env.resolve(), PathBuf::from("/home/user/.socket/_dlx"));

        env.home = None;
        assert_eq!(env.resolve(), PathBuf::from("/tmp/.socket/_dlx"));
    }

    #[test]
    #[serial]
    fn test_from_process_reads_environment() {
        let saved = (
            std::env::var_os("SOCKET_DLX_DIR"),
            std::env::var_os("SOCKET_HOME"),
        );

        std::env::set_var("SOCKET_DLX_DIR", "/srv/dlx");
        std::env::set_var("SOCKET_HOME", "/srv/socket");
        assert_eq!(CacheEnv::from_process().resolve(), PathBuf::from("/srv/dlx"));

        std::env::remove_var("SOCKET_DLX_DIR");
        assert_eq!(
            CacheEnv::from_process().resolve(),
            PathBuf::from("/srv/socket/_dlx")
        );

        for (name, value) in [("SOCKET_DLX_DIR", saved.0), ("SOCKET_HOME", saved.1)] {
            match value {
                Some(v) => std::env::set_var(name, v),
                None => std::env::remove_var(name),
            }
        }
    }

    #[test]
    fn test_paths() {
        let cache = ExtractionCache::new("/root/_dlx", Platform::Linux);
        assert_eq!(
            cache.binary_path("0123456789abcdef"),
            PathBuf::from("/root/_dlx/0123456789abcdef/node")
        );
        assert_eq!(
            cache.metadata_path("0123456789abcdef"),
            PathBuf::from("/root/_dlx/0123456789abcdef/.dlx-metadata.json")
        );
        let win = ExtractionCache::new("/root/_dlx", Platform::Win32);
        assert!(win.binary_path("k").ends_with("node.exe"));
    }

    #[test]
    fn test_store_then_lookup() {
        let dir = TempDir::new().unwrap();
        let cache = ExtractionCache::new(dir.path(), Platform::Linux);
        let data = vec![7u8; 100];
        let source = PathBuf::from("/usr/local/bin/tool");

        assert!(cache.lookup("aaaaaaaaaaaaaaaa", 100).is_none());
        let path = cache
            .store(&request("aaaaaaaaaaaaaaaa", &data, &source))
            .unwrap();
        assert_eq!(cache.lookup("aaaaaaaaaaaaaaaa", 100), Some(path.clone()));
        assert!(cache.lookup("aaaaaaaaaaaaaaaa", 99).is_none());
        assert_eq!(fs::read(&path).unwrap(), data);
    }

    #[test]
    fn test_store_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = ExtractionCache::new(dir.path(), Platform::Linux);
        let data = b"#!/bin/sh\necho hi\n".to_vec();
        let source = PathBuf::from("/bin/stub");

        for _ in 0..2 {
            let path = cache
                .store(&request("0123456789abcdef", &data, &source))
                .unwrap();
            assert!(cache
                .lookup("0123456789abcdef", data.len() as u64)
                .is_some());
            assert_eq!(fs::read(path).unwrap(), data);
        }
    }

    #[test]
    fn test_sidecar_contents() {
        let dir = TempDir::new().unwrap();
        let cache = ExtractionCache::new(dir.path(), Platform::Linux);
        let source = PathBuf::from("/bin/stub");
        cache
            .store(&request("0123456789abcdef", b"hello", &source))
            .unwrap();

        let raw: Value =
            serde_json::from_slice(&fs::read(cache.metadata_path("0123456789abcdef")).unwrap())
                .unwrap();
        assert_eq!(raw["version"], "1.0.0");
        assert_eq!(raw["cache_key"], "0123456789abcdef");
        assert_eq!(raw["size"], 5);
        assert_eq!(raw["source"]["type"], "extract");
        assert_eq!(raw["source"]["path"], "/bin/stub");
        assert_eq!(raw["extra"]["compression_algorithm"], "zstd");
        assert_eq!(
            raw["integrity"],
            "sha512-m3HSJL1i83hdltRq0+o9czGb+8KJDKra4t/3JRlnPKcjI8PZm6XBHXx6zG4UuMXaDEZjR1wuXDre9G9zvN7AQw=="
        );
        assert!(raw.get("update_check").is_none());
        assert!(raw.get("checksum").is_none());
    }

    #[test]
    fn test_update_check_roundtrip_preserves_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let cache = ExtractionCache::new(dir.path(), Platform::Linux);
        let key = "0123456789abcdef";
        fs::create_dir_all(cache.entry_dir(key)).unwrap();
        fs::write(
            cache.metadata_path(key),
            r#"{
  "version": "1.0.0",
  "cache_key": "0123456789abcdef",
  "timestamp": 1700000000000,
  "checksum": "sha512-abcd",
  "checksum_algorithm": "sha512",
  "platform": "linux",
  "size": 5,
  "source": { "type": "decompression", "path": "/bin/stub" },
  "extra": { "compression_ratio": 2.5 }
}"#,
        )
        .unwrap();

        assert_eq!(cache.read_update_check(key), UpdateCheck::default());

        let check = UpdateCheck {
            last_check: 1_700_000_100_000,
            last_notification: 1_700_000_000_000,
            latest_known: "25.1.0".to_string(),
        };
        cache.write_update_check(key, &check).unwrap();
        assert_eq!(cache.read_update_check(key), check);

        let raw: Value =
            serde_json::from_slice(&fs::read(cache.metadata_path(key)).unwrap()).unwrap();
        assert_eq!(raw["checksum_algorithm"], "sha512");
        assert_eq!(raw["platform"], "linux");
        assert_eq!(raw["checksum"], "sha512-abcd");
        assert_eq!(raw["extra"]["compression_ratio"], 2.5);
    }

    #[test]
    fn test_write_update_check_requires_entry() {
        let dir = TempDir::new().unwrap();
        let cache = ExtractionCache::new(dir.path(), Platform::Linux);
        let err = cache
            .write_update_check("0123456789abcdef", &UpdateCheck::default())
            .unwrap_err();
        assert!(matches!(err, PackError::CacheWrite { .. }));
    }

    #[test]
    fn test_metadata_failure_removes_binary() {
        let dir = TempDir::new().unwrap();
        let cache = ExtractionCache::new(dir.path(), Platform::Linux);
        let key = "0123456789abcdef";
        // A directory where the sidecar should go makes the rename fail.
        fs::create_dir_all(cache.metadata_path(key).join("blocker")).unwrap();

        let source = PathBuf::from("/bin/stub");
        let err = cache.store(&request(key, b"data", &source)).unwrap_err();
        assert!(matches!(err, PackError::CacheWrite { .. }));
        assert!(!cache.binary_path(key).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_lookup_rejects_non_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let cache = ExtractionCache::new(dir.path(), Platform::Linux);
        let key = "aaaaaaaaaaaaaaaa";
        fs::create_dir_all(cache.entry_dir(key)).unwrap();
        fs::write(cache.binary_path(key), [0u8; 100]).unwrap();
        fs::set_permissions(cache.binary_path(key), fs::Permissions::from_mode(0o644)).unwrap();
        assert!(cache.lookup(key, 100).is_none());

        fs::set_permissions(cache.binary_path(key), fs::Permissions::from_mode(0o700)).unwrap();
        assert!(cache.lookup(key, 100).is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_lookup_rejects_symlink() {
        let dir = TempDir::new().unwrap();
        let cache = ExtractionCache::new(dir.path(), Platform::Linux);
        let key = "aaaaaaaaaaaaaaaa";
        let target = dir.path().join("real");
        fs::write(&target, [0u8; 10]).unwrap();
        fs::create_dir_all(cache.entry_dir(key)).unwrap();
        std::os::unix::fs::symlink(&target, cache.binary_path(key)).unwrap();
        assert!(cache.lookup(key, 10).is_none());
    }
}
