//! Durable file writes.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{PackError, Result};

/// Temp file name used for an atomic write to `path`: `<path>.tmp.<pid>`.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".tmp.{}", std::process::id()));
    PathBuf::from(name)
}

/// Removes the temp file unless the write completed.
struct TempFileGuard {
    path: PathBuf,
    finalized: bool,
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    error = %e,
                    path = %self.path.display(),
                    "failed to remove temp file"
                );
            }
        }
    }
}

/// Write `data` to `path` so that readers see either the old file or the
/// complete new one.
///
/// The data goes to a temp file in the same directory, is flushed to disk,
/// then renamed over the destination. `mode` is applied to the temp file
/// before the rename on Unix and ignored elsewhere.
pub fn write_file_atomically(path: &Path, data: &[u8], mode: u32) -> Result<()> {
    let wrap = |source: std::io::Error| PackError::AtomicWrite {
        path: path.to_path_buf(),
        source,
    };

    let temp_path = temp_path_for(path);
    let mut guard = TempFileGuard {
        path: temp_path.clone(),
        finalized: false,
    };

    {
        let mut file = create_with_mode(&temp_path, mode).map_err(wrap)?;
        file.write_all(data).map_err(wrap)?;
        file.sync_all().map_err(wrap)?;
    }

    set_mode(&temp_path, mode).map_err(wrap)?;

    // Windows rename does not replace an existing file.
    if cfg!(windows) && path.exists() {
        fs::remove_file(path).map_err(wrap)?;
    }

    fs::rename(&temp_path, path).map_err(wrap)?;
    guard.finalized = true;

    if let Some(parent) = path.parent() {
        if let Err(e) = fsync_dir(parent) {
            debug!(error = %e, dir = %parent.display(), "directory fsync failed");
        }
    }

    debug!(path = %path.display(), bytes = data.len(), "wrote file atomically");
    Ok(())
}

/// Flush a directory entry to disk. A no-op off Unix.
pub fn fsync_dir(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let dir = if dir.as_os_str().is_empty() {
            Path::new(".")
        } else {
            dir
        };
        File::open(dir)?.sync_all()
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
        Ok(())
    }
}

#[cfg(unix)]
fn create_with_mode(path: &Path, mode: u32) -> std::io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
}

#[cfg(not(unix))]
fn create_with_mode(path: &Path, _mode: u32) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_temp_path_naming() {
        let temp = temp_path_for(Path::new("/cache/abc/node"));
        let expected = format!("/cache/abc/node.tmp.{}", std::process::id());
        assert_eq!(temp, PathBuf::from(expected));
    }

    #[test]
    fn test_write_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        write_file_atomically(&path, b"payload", 0o644).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"payload");
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn test_write_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        fs::write(&path, b"old contents that are longer").unwrap();
        write_file_atomically(&path, b"new", 0o644).unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[cfg(unix)]
    #[test]
    fn test_write_applies_mode() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node");
        write_file_atomically(&path, b"\x7fELF", 0o755).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_failed_write_leaves_no_temp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing-dir").join("out.bin");
        let err = write_file_atomically(&path, b"data", 0o644).unwrap_err();
        assert!(matches!(err, PackError::AtomicWrite { .. }));
        assert!(!temp_path_for(&path).exists());
    }
}
