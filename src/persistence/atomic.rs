//! Atomic file writes.
//!
//! Content is written to a hidden temp file in the target directory, synced,
//! and then moved into place. Readers see either nothing (or the previous
//! file) or the complete new content, never a partial write.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// How the final path is claimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with `AlreadyExists` if the target is present.
    CreateNew,
    /// Atomically replace whatever is at the target.
    Replace,
}

/// Writes `contents` to `path` atomically, creating the parent directory.
pub fn write_atomic(path: &Path, contents: &[u8], mode: WriteMode) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let temp = temp_path(dir, path);
    let result = write_and_publish(&temp, path, contents, mode);
    if result.is_err() {
        let _ = fs::remove_file(&temp);
    }
    result?;

    sync_dir(dir)
}

fn write_and_publish(temp: &Path, path: &Path, contents: &[u8], mode: WriteMode) -> io::Result<()> {
    {
        let mut file = File::create_new(temp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }

    match mode {
        WriteMode::Replace => fs::rename(temp, path),
        WriteMode::CreateNew => {
            // link(2) refuses to overwrite, which rename(2) would not.
            fs::hard_link(temp, path)?;
            fs::remove_file(temp)
        }
    }
}

/// A rename or link is only durable once its directory entry is synced.
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

/// `.<name>.<pid>-<seq>.tmp` next to the target.
///
/// The leading dot and `.tmp` suffix keep it out of `*.json` globs.
fn temp_path(dir: &Path, path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
    dir.join(format!(".{name}.{}-{seq}.tmp", std::process::id()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sync_dir_requires_existing_directory() {
        let dir = tempdir().unwrap();
        sync_dir(dir.path()).unwrap();
        assert!(sync_dir(&dir.path().join("gone")).is_err());
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("a.json");

        write_atomic(&path, b"{}", WriteMode::CreateNew).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"{}");
    }

    #[test]
    fn leaves_no_temp_files_behind() {
        let dir = tempdir().unwrap();
        write_atomic(&dir.path().join("a.json"), b"1", WriteMode::CreateNew).unwrap();
        write_atomic(&dir.path().join("b.json"), b"2", WriteMode::Replace).unwrap();

        assert_eq!(entries(dir.path()), vec!["a.json", "b.json"]);
    }

    #[test]
    fn create_new_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.json");
        write_atomic(&path, b"first", WriteMode::CreateNew).unwrap();

        let err = write_atomic(&path, b"second", WriteMode::CreateNew).unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(&path).unwrap(), b"first");
        assert_eq!(entries(dir.path()), vec!["a.json"]);
    }

    #[test]
    fn replace_overwrites() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("token.json");
        write_atomic(&path, b"old", WriteMode::Replace).unwrap();
        write_atomic(&path, b"new", WriteMode::Replace).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn temp_names_are_hidden_and_unique() {
        let dir = Path::new("/spool");
        let a = temp_path(dir, &dir.join("x.json"));
        let b = temp_path(dir, &dir.join("x.json"));

        assert_ne!(a, b);
        let name = a.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".x.json."));
        assert!(name.ends_with(".tmp"));
    }
}
