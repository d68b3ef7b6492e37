//! Host filesystem capacity lookup for mounted storage.

use std::path::{Path, PathBuf};
use sysinfo::Disks;
use tracing::debug;

/// Capacity figures of the filesystem holding a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskSpace {
    pub mount_point: PathBuf,
    pub total_space: u64,
    pub free_space: u64,
    pub file_system: String,
}

/// Find the disk whose mount point is the deepest ancestor of `path`.
///
/// Returns `None` when the host reports no disk containing it.
pub fn probe(path: &Path) -> Option<DiskSpace> {
    let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let disks = Disks::new_with_refreshed_list();

    let space = disks
        .list()
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().components().count())
        .map(|disk| DiskSpace {
            mount_point: disk.mount_point().to_path_buf(),
            total_space: disk.total_space(),
            free_space: disk.available_space(),
            file_system: disk.file_system().to_string_lossy().into_owned(),
        });

    if space.is_none() {
        debug!(path = %target.display(), "no disk found for path");
    }
    space
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_probe_picks_containing_disk() {
        let dir = tempdir().unwrap();
        if let Some(space) = probe(dir.path()) {
            let target = dir.path().canonicalize().unwrap();
            assert!(target.starts_with(&space.mount_point));
            assert!(space.free_space <= space.total_space);
        }
    }
}
