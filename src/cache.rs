//! # Image Cache
//!
//! Manages the directory of downloaded images.
//!
//! - [`save`] writes a new image atomically (temp file + rename), so a reader
//!   never sees a half-written file under its final name.
//! - [`list`] enumerates cached images, newest first by modification time.
//! - [`prune`] keeps the `retention_count` most recent images and deletes the
//!   rest, skipping any file that cannot be removed (e.g. still in use). It
//!   also clears temp files left behind by an interrupted save.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Prefix of in-flight temp files; these are never listed.
const PARTIAL_PREFIX: &str = ".partial-";

/// A temp file this old belongs to a save that never finished.
const STALE_PARTIAL_AGE: Duration = Duration::from_secs(10 * 60);

/// A cached image on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl CachedFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Saves `bytes` as `directory/file_name`, creating the directory if needed.
///
/// # Returns
/// The absolute path of the saved file.
pub fn save(directory: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(directory)?;
    let path = directory.join(file_name);
    write_atomic(&path, bytes)?;
    debug!(path = %path.display(), size = bytes.len(), "cached image");
    Ok(path)
}

/// Writes `bytes` to `path` via a sibling temp file that is renamed into
/// place only after its contents are fully written and synced.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    // Dropping the temp file on an early return removes it.
    let mut tmp = tempfile::Builder::new()
        .prefix(PARTIAL_PREFIX)
        .tempfile_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Lists cached images ordered by modification time, most recent first.
pub fn list(directory: &Path) -> std::io::Result<Vec<CachedFile>> {
    let mut files: Vec<CachedFile> = std::fs::read_dir(directory)?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            !entry
                .file_name()
                .to_string_lossy()
                .starts_with(PARTIAL_PREFIX)
        })
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            if !metadata.is_file() {
                return None;
            }
            Some(CachedFile {
                path: entry.path(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            })
        })
        .collect();

    files.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(files)
}

/// Removes cached images beyond the `retention_count` most recent, plus
/// stale temp files.
///
/// Images are kept when `retention_count` is 0. Nothing happens when the
/// directory does not exist.
///
/// # Returns
/// The number of images deleted.
pub fn prune(directory: &Path, retention_count: u32) -> usize {
    prune_with(directory, retention_count, |path| std::fs::remove_file(path))
}

fn prune_with<F>(directory: &Path, retention_count: u32, mut remove: F) -> usize
where
    F: FnMut(&Path) -> std::io::Result<()>,
{
    if !directory.is_dir() {
        return 0;
    }
    remove_stale_partials(directory, SystemTime::now());
    if retention_count == 0 {
        return 0;
    }

    let files = match list(directory) {
        Ok(files) => files,
        Err(e) => {
            warn!(dir = %directory.display(), error = %e, "could not list image cache");
            return 0;
        }
    };

    let mut deleted = 0;
    for file in files.iter().skip(retention_count as usize) {
        match remove(&file.path) {
            Ok(()) => deleted += 1,
            // One locked file must not stop the rest from being pruned.
            Err(e) => debug!(path = %file.path.display(), error = %e, "could not delete cached image"),
        }
    }

    if deleted > 0 {
        info!(deleted, kept = retention_count, "pruned image cache");
    }
    deleted
}

fn remove_stale_partials(directory: &Path, now: SystemTime) {
    let Ok(entries) = std::fs::read_dir(directory) else {
        return;
    };
    for entry in entries.filter_map(|entry| entry.ok()) {
        if !entry.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX) {
            continue;
        }
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age >= STALE_PARTIAL_AGE);
        if !stale {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => debug!(path = %entry.path().display(), "removed interrupted download"),
            Err(e) => debug!(path = %entry.path().display(), error = %e, "could not remove temp file"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    /// Creates `name` with a modification time `age_secs` in the past.
    fn cached(dir: &Path, name: &str, age_secs: u64) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, name.as_bytes()).expect("write file");
        let mtime = SystemTime::now() - Duration::from_secs(age_secs);
        File::options()
            .write(true)
            .open(&path)
            .and_then(|f| f.set_modified(mtime))
            .expect("set mtime");
        path
    }

    #[test]
    fn save_creates_directory_and_writes_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("images/nested");

        let path = save(&target, "20240601_en-US_abc", b"jpeg").expect("save");

        assert_eq!(path, target.join("20240601_en-US_abc"));
        assert_eq!(std::fs::read(&path).expect("read"), b"jpeg");
        let leftovers: Vec<_> = std::fs::read_dir(&target)
            .expect("read dir")
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(PARTIAL_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn save_overwrites_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        save(dir.path(), "img", b"old").expect("first save");
        let path = save(dir.path(), "img", b"new").expect("second save");
        assert_eq!(std::fs::read(path).expect("read"), b"new");
    }

    #[test]
    fn list_orders_newest_first_and_skips_partials() {
        let dir = tempfile::tempdir().expect("tempdir");
        cached(dir.path(), "old", 300);
        cached(dir.path(), "new", 10);
        cached(dir.path(), ".partial-xyz", 0);
        std::fs::create_dir(dir.path().join("subdir")).expect("mkdir");

        let names: Vec<String> = list(dir.path())
            .expect("list")
            .iter()
            .map(CachedFile::file_name)
            .collect();
        assert_eq!(names, vec!["new", "old"]);
    }

    #[test]
    fn prune_keeps_most_recent_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files: Vec<PathBuf> = (0..5)
            .map(|i| cached(dir.path(), &format!("img{i}"), 100 * (i + 1)))
            .collect();

        let deleted = prune(dir.path(), 3);

        assert_eq!(deleted, 2);
        assert!(files[0].exists());
        assert!(files[1].exists());
        assert!(files[2].exists());
        assert!(!files[3].exists());
        assert!(!files[4].exists());
    }

    #[test]
    fn prune_continues_past_undeletable_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files: Vec<PathBuf> = (0..5)
            .map(|i| cached(dir.path(), &format!("img{i}"), 100 * (i + 1)))
            .collect();
        let locked = files[3].clone();

        let deleted = prune_with(dir.path(), 3, |path| {
            if path == locked {
                Err(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "file in use",
                ))
            } else {
                std::fs::remove_file(path)
            }
        });

        assert_eq!(deleted, 1);
        assert!(files[3].exists());
        assert!(!files[4].exists());
    }

    #[test]
    fn prune_clears_stale_partials_but_not_fresh_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        let stale = cached(dir.path(), ".partial-crashed", 3600);
        let fresh = cached(dir.path(), ".partial-writing", 5);
        let image = cached(dir.path(), "img", 7200);

        assert_eq!(prune(dir.path(), 0), 0);

        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(image.exists());
    }

    #[test]
    fn prune_is_noop_for_zero_retention_or_missing_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        cached(dir.path(), "a", 10);
        cached(dir.path(), "b", 20);

        assert_eq!(prune(dir.path(), 0), 0);
        assert_eq!(list(dir.path()).expect("list").len(), 2);
        assert_eq!(prune(&dir.path().join("absent"), 3), 0);
    }
}
