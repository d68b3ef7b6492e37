//! JSON file persistence for simulator registries.
//!
//! Writes are plain whole-file overwrites. A crash mid-write can leave a
//! truncated document behind; the next load treats it as malformed and falls
//! back to defaults.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("malformed JSON in {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("failed to encode {path}: {source}")]
    Encode { path: PathBuf, source: serde_json::Error },
}

impl PersistenceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, PersistenceError::Read { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

/// A typed JSON document at a fixed path.
#[derive(Debug, Clone)]
pub struct JsonStore<T> {
    path: PathBuf,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _marker: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    pub fn save(&self, value: &T) -> Result<(), PersistenceError> {
        let json = serde_json::to_vec_pretty(value).map_err(|source| PersistenceError::Encode {
            path: self.path.clone(),
            source,
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| PersistenceError::Write {
                path: self.path.clone(),
                source,
            })?;
        }

        fs::write(&self.path, json).map_err(|source| PersistenceError::Write {
            path: self.path.clone(),
            source,
        })?;

        debug!(path = %self.path.display(), "registry saved");
        Ok(())
    }

    pub fn load(&self) -> Result<T, PersistenceError> {
        let bytes = fs::read(&self.path).map_err(|source| PersistenceError::Read {
            path: self.path.clone(),
            source,
        })?;

        serde_json::from_slice(&bytes).map_err(|source| PersistenceError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

impl<T> JsonStore<T>
where
    T: Serialize + DeserializeOwned + Default,
{
    /// Load, or fall back to `T::default()` with a warning on any failure.
    pub fn load_or_default(&self) -> T {
        match self.load() {
            Ok(value) => value,
            Err(e) if e.is_not_found() => {
                debug!(path = %self.path.display(), "no saved registry, using defaults");
                T::default()
            }
            Err(e) => {
                warn!(error = %e, "could not load registry, using defaults");
                T::default()
            }
        }
    }
}

impl<E> JsonStore<Vec<E>>
where
    E: Serialize + DeserializeOwned,
{
    /// Append one entry to a JSON array document.
    ///
    /// A missing or unreadable document starts a fresh array.
    pub fn append(&self, entry: E) -> Result<(), PersistenceError> {
        let mut entries = self.load_or_default();
        entries.push(entry);
        self.save(&entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
    struct Entry {
        name: String,
        value: i32,
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempdir().unwrap();
        let store: JsonStore<Vec<Entry>> = JsonStore::new(dir.path().join("nested/entries.json"));

        let entries = vec![
            Entry { name: "a".into(), value: 1 },
            Entry { name: "b".into(), value: 2 },
        ];
        store.save(&entries).unwrap();
        assert_eq!(store.load().unwrap(), entries);
    }

    #[test]
    fn test_missing_file_defaults() {
        let dir = tempdir().unwrap();
        let store: JsonStore<Vec<Entry>> = JsonStore::new(dir.path().join("absent.json"));

        let err = store.load().unwrap_err();
        assert!(err.is_not_found());
        assert!(store.load_or_default().is_empty());
    }

    #[test]
    fn test_malformed_file_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, b"[{\"name\": ").unwrap();

        let store: JsonStore<Vec<Entry>> = JsonStore::new(&path);
        assert!(matches!(store.load(), Err(PersistenceError::Parse { .. })));
        assert!(store.load_or_default().is_empty());
    }

    #[test]
    fn test_append_grows_array() {
        let dir = tempdir().unwrap();
        let store: JsonStore<Vec<Entry>> = JsonStore::new(dir.path().join("log.json"));

        store.append(Entry { name: "x".into(), value: 1 }).unwrap();
        store.append(Entry { name: "y".into(), value: 2 }).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].name, "y");
    }
}
