//! Polling directory watcher.
//!
//! Each watched directory keeps a signature of its direct entries (name,
//! size, modification time). A poll reports the directories whose signature
//! moved since the previous poll.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
struct EntrySignature {
    name: OsString,
    len: u64,
    modified: Option<SystemTime>,
}

type DirSignature = Option<Vec<EntrySignature>>;

fn signature(path: &Path) -> DirSignature {
    let entries = fs::read_dir(path).ok()?;
    let mut signature: Vec<EntrySignature> = entries
        .filter_map(Result::ok)
        .map(|entry| {
            let meta = entry.metadata().ok();
            EntrySignature {
                name: entry.file_name(),
                len: meta.as_ref().map_or(0, fs::Metadata::len),
                modified: meta.and_then(|m| m.modified().ok()),
            }
        })
        .collect();
    signature.sort_by(|a, b| a.name.cmp(&b.name));
    Some(signature)
}

#[derive(Debug, Default)]
pub struct DirectoryWatcher {
    watched: BTreeMap<PathBuf, DirSignature>,
}

impl DirectoryWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start watching `path`. Returns false if it was already watched.
    pub fn watch(&mut self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        if self.watched.contains_key(&path) {
            return false;
        }
        let snapshot = signature(&path);
        debug!(path = %path.display(), exists = snapshot.is_some(), "watching directory");
        self.watched.insert(path, snapshot);
        true
    }

    pub fn unwatch(&mut self, path: &Path) -> bool {
        self.watched.remove(path).is_some()
    }

    pub fn clear(&mut self) {
        self.watched.clear();
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.watched.contains_key(path)
    }

    pub fn watched(&self) -> impl Iterator<Item = &Path> {
        self.watched.keys().map(PathBuf::as_path)
    }

    /// Directories that changed since the last poll, in path order.
    pub fn poll(&mut self) -> Vec<PathBuf> {
        let mut changed = Vec::new();
        for (path, previous) in &mut self.watched {
            let current = signature(path);
            if current != *previous {
                debug!(path = %path.display(), "directory changed");
                *previous = current;
                changed.push(path.clone());
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_detects_new_file() {
        let dir = tempdir().unwrap();
        let mut watcher = DirectoryWatcher::new();
        assert!(watcher.watch(dir.path()));
        assert!(!watcher.watch(dir.path()));

        assert!(watcher.poll().is_empty());
        fs::write(dir.path().join("track.mp3"), b"data").unwrap();
        assert_eq!(watcher.poll(), vec![dir.path().to_path_buf()]);
        assert!(watcher.poll().is_empty());
    }

    #[test]
    fn test_directory_appearing_counts_as_change() {
        let dir = tempdir().unwrap();
        let later = dir.path().join("later");
        let mut watcher = DirectoryWatcher::new();
        watcher.watch(&later);

        assert!(watcher.poll().is_empty());
        fs::create_dir(&later).unwrap();
        assert_eq!(watcher.poll(), vec![later.clone()]);

        assert!(watcher.unwatch(&later));
        assert!(!watcher.is_watching(&later));
    }
}
