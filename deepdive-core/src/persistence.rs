//! Atomic file writes (write to a temp sibling, then rename).

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

/// Temp sibling for `path`: the full file name plus `.tmp`, so `a.md` and
/// `a.json` never share one.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("unnamed"));
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically write raw bytes to a file.
///
/// Creates parent directories if they don't exist. A failed rename removes
/// the temp file.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    std::fs::write(&tmp, data)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// [`atomic_write`] on the blocking pool, for callers inside the runtime.
pub async fn atomic_write_async(path: PathBuf, data: Vec<u8>) -> io::Result<()> {
    tokio::task::spawn_blocking(move || atomic_write(&path, &data))
        .await
        .map_err(io::Error::other)?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("dir").join("report.md");
        atomic_write(&path, b"# Title").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Title");
    }

    #[test]
    fn test_atomic_write_no_tmp_leftover() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clean.md");
        atomic_write(&path, b"body").unwrap();
        assert!(!tmp_path(&path).exists());
        assert_eq!(tmp_path(&path).file_name().unwrap(), "clean.md.tmp");
    }

    #[test]
    fn test_atomic_write_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("r.md");
        atomic_write(&path, b"old").unwrap();
        atomic_write(&path, b"new").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }

    #[tokio::test]
    async fn test_atomic_write_async() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("async.md");
        atomic_write_async(path.clone(), b"ok".to_vec()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "ok");
    }
}
