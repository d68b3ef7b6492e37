use super::disk;
use super::media::{self, MediaMetadata};
use super::watcher::DirectoryWatcher;
use super::Simulator;
use crate::clock::Clock;
use crate::config::StorageConfig;
use crate::events::{EventBus, SubscriptionId};
use crate::fault::{FaultKind, FaultManager};
use crate::persistence::{JsonStore, PersistenceError};
use crate::scheduler::{SchedulerError, TaskId, TaskScheduler};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use super::media::MediaFile;

// Example capacity reported until the host filesystem has been probed.
const EXAMPLE_TOTAL_SPACE: u64 = 32_000_000_000;
const EXAMPLE_FREE_SPACE: u64 = 28_000_000_000;
const EXAMPLE_FILE_SYSTEM: &str = "FAT32";

pub const DEFAULT_DEVICE_NAME: &str = "USB_DRIVE_01";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageDevice {
    pub device_id: String,
    pub device_name: String,
    pub mount_point: PathBuf,
    pub total_space: u64,
    pub free_space: u64,
    pub file_system: String,
    pub is_connected: bool,
    pub connected_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub media_files: Vec<MediaFile>,
}

impl StorageDevice {
    /// Refresh capacity from the filesystem under the mount point.
    ///
    /// Leaves the previous figures in place when the lookup fails.
    fn refresh_space(&mut self) {
        match disk::probe(&self.mount_point) {
            Some(space) => {
                self.total_space = space.total_space;
                self.free_space = space.free_space;
                self.file_system = space.file_system;
            }
            None => debug!(device_id = %self.device_id, "keeping previous space figures"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StorageEvent {
    DeviceConnected(StorageDevice),
    DeviceDisconnected(String),
    MediaFilesChanged { device_id: String, files: Vec<MediaFile> },
    MountError { device_id: String, error: String },
    FileSystemError { device_id: String, error: String },
    MediaFileAdded { device_id: String, file: MediaFile },
    MediaFileRemoved { device_id: String, file_name: String },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage device {0} not found")]
    DeviceNotFound(String),
    #[error("storage device {0} is not connected")]
    NotConnected(String),
    #[error("failed to mount {0}")]
    MountFailed(String),
    #[error("file system error on {0}")]
    FileSystemFault(String),
    #[error("mount path {0} does not exist")]
    MountPathMissing(PathBuf),
    #[error("media file {file_name} not found on {device_id}")]
    MediaFileNotFound { device_id: String, file_name: String },
    #[error("i/o error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StorageTask {
    BackgroundScan,
    WatchPoll,
}

/// Registry of simulated removable storage devices and their media index.
pub struct StorageRegistry {
    config: StorageConfig,
    clock: Arc<dyn Clock>,
    scheduler: TaskScheduler<StorageTask>,
    scan_task: Option<TaskId>,
    poll_task: Option<TaskId>,
    now_ms: u64,

    devices: Vec<StorageDevice>,
    watcher: DirectoryWatcher,
    monitoring: bool,
    faults: FaultManager,
    next_device_seq: u32,

    store: Option<JsonStore<Vec<StorageDevice>>>,
    events: EventBus<StorageEvent>,
}

impl StorageRegistry {
    pub fn new(mut config: StorageConfig, clock: Arc<dyn Clock>) -> Self {
        config.supported_formats = normalize_formats(&config.supported_formats);
        Self {
            config,
            clock,
            scheduler: TaskScheduler::new(),
            scan_task: None,
            poll_task: None,
            now_ms: 0,
            devices: Vec::new(),
            watcher: DirectoryWatcher::new(),
            monitoring: false,
            faults: FaultManager::new(),
            next_device_seq: 1,
            store: None,
            events: EventBus::new(),
        }
    }

    /// Attach the device list file and load whatever it holds.
    pub fn with_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.store = Some(JsonStore::new(path));
        self.load_registry();
        self
    }

    pub fn load_registry(&mut self) {
        if let Some(store) = &self.store {
            self.devices = store.load_or_default();
            debug!(count = self.devices.len(), "loaded storage devices");
        }
    }

    pub fn save_registry(&self) -> Result<(), StorageError> {
        match &self.store {
            Some(store) => {
                store.save(&self.devices)?;
                debug!(count = self.devices.len(), "storage device list saved");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn generate_device_id(&mut self) -> String {
        loop {
            let candidate = format!("USB_{:04}", self.next_device_seq);
            self.next_device_seq += 1;
            if !self.devices.iter().any(|d| d.device_id == candidate) {
                return candidate;
            }
        }
    }

    fn index_of(&self, device_id: &str) -> Result<usize, StorageError> {
        self.devices
            .iter()
            .position(|d| d.device_id == device_id)
            .ok_or_else(|| StorageError::DeviceNotFound(device_id.to_string()))
    }

    /// Simulate plugging in a stick. Returns the new device id.
    pub fn insert(&mut self, name: &str) -> Result<String, StorageError> {
        let device_id = self.generate_device_id();
        let mount_point = self.config.mount_root.join(&device_id);

        fs::create_dir_all(&mount_point).map_err(|source| StorageError::Io {
            path: mount_point.clone(),
            source,
        })?;

        let device = StorageDevice {
            device_id: device_id.clone(),
            device_name: name.to_string(),
            mount_point: mount_point.clone(),
            total_space: EXAMPLE_TOTAL_SPACE,
            free_space: EXAMPLE_FREE_SPACE,
            file_system: EXAMPLE_FILE_SYSTEM.to_string(),
            is_connected: true,
            connected_time: Some(self.clock.wall_time(self.now_ms)),
            media_files: Vec::new(),
        };

        self.devices.push(device.clone());
        info!(device = name, mount = %mount_point.display(), "USB device inserted");
        self.events.emit(&StorageEvent::DeviceConnected(device));

        if self.monitoring {
            self.watcher.watch(mount_point);
        }

        Ok(device_id)
    }

    /// Simulate pulling a stick out.
    pub fn remove(&mut self, device_id: &str) -> Result<StorageDevice, StorageError> {
        let index = self.index_of(device_id)?;
        let device = self.devices.remove(index);

        info!(device = %device.device_name, "USB device removed");
        self.events.emit(&StorageEvent::DeviceDisconnected(device.device_id.clone()));

        if self.monitoring {
            self.watcher.unwatch(&device.mount_point);
        }
        Ok(device)
    }

    pub fn mount(&mut self, device_id: &str, mount_point: impl Into<PathBuf>) -> Result<(), StorageError> {
        if self.faults.is_active(FaultKind::MountError) {
            error!(device_id, "failed to mount device");
            self.events.emit(&StorageEvent::MountError {
                device_id: device_id.to_string(),
                error: "Simulated mount error - device not responding".to_string(),
            });
            return Err(StorageError::MountFailed(device_id.to_string()));
        }

        let index = self.index_of(device_id)?;
        let mount_point = mount_point.into();
        fs::create_dir_all(&mount_point).map_err(|source| StorageError::Io {
            path: mount_point.clone(),
            source,
        })?;

        let device = &mut self.devices[index];
        if self.monitoring && device.mount_point != mount_point {
            self.watcher.unwatch(&device.mount_point);
        }
        device.mount_point = mount_point.clone();
        device.is_connected = true;

        info!(device_id, mount = %mount_point.display(), "device mounted");
        if self.monitoring {
            self.watcher.watch(mount_point);
        }
        Ok(())
    }

    pub fn unmount(&mut self, device_id: &str) -> Result<(), StorageError> {
        let index = self.index_of(device_id)?;
        let device = &mut self.devices[index];
        device.is_connected = false;

        if self.monitoring {
            self.watcher.unwatch(&device.mount_point);
        }
        info!(device_id, "device unmounted");
        Ok(())
    }

    /// Rebuild the media index of one device from its mount directory.
    ///
    /// The previous list is replaced wholesale. Returns the number of files found.
    pub fn scan(&mut self, device_id: &str) -> Result<usize, StorageError> {
        let index = self.index_of(device_id)?;
        if !self.devices[index].is_connected {
            return Err(StorageError::NotConnected(device_id.to_string()));
        }

        if self.faults.is_active(FaultKind::FileSystemError) {
            error!(device_id, "file system error while scanning");
            self.events.emit(&StorageEvent::FileSystemError {
                device_id: device_id.to_string(),
                error: "Simulated file system error".to_string(),
            });
            return Err(StorageError::FileSystemFault(device_id.to_string()));
        }

        let mount_point = self.devices[index].mount_point.clone();
        if !mount_point.is_dir() {
            warn!(device_id, mount = %mount_point.display(), "mount path missing, skipping scan");
            return Err(StorageError::MountPathMissing(mount_point));
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&mount_point)
            .map_err(|source| StorageError::Io {
                path: mount_point.clone(),
                source,
            })?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && self.is_media_file(path))
            .collect();
        paths.sort();

        let corrupted = self.faults.is_active(FaultKind::CorruptedFiles);
        let mut files = Vec::with_capacity(paths.len());
        for path in &paths {
            match media::inspect(path, !corrupted) {
                Ok(file) => {
                    if corrupted {
                        self.events.emit(&StorageEvent::FileSystemError {
                            device_id: device_id.to_string(),
                            error: format!("Corrupted media file: {}", file.file_name),
                        });
                    }
                    files.push(file);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable file"),
            }
        }

        let count = files.len();
        let device = &mut self.devices[index];
        device.media_files = files;
        device.refresh_space();

        info!(device_id, count, "scanned media files");
        self.events.emit(&StorageEvent::MediaFilesChanged {
            device_id: device_id.to_string(),
            files: device.media_files.clone(),
        });
        Ok(count)
    }

    fn scan_all(&mut self) {
        let ids: Vec<String> = self
            .devices
            .iter()
            .filter(|d| d.is_connected)
            .map(|d| d.device_id.clone())
            .collect();
        for id in ids {
            if let Err(e) = self.scan(&id) {
                debug!(device_id = %id, error = %e, "background scan failed");
            }
        }
    }

    fn poll_watcher(&mut self) {
        for path in self.watcher.poll() {
            let target = self
                .devices
                .iter()
                .find(|d| d.is_connected && d.mount_point == path)
                .map(|d| d.device_id.clone());
            match target {
                Some(id) => {
                    if let Err(e) = self.scan(&id) {
                        debug!(device_id = %id, error = %e, "reactive scan failed");
                    }
                }
                None => debug!(path = %path.display(), "change outside any mounted device"),
            }
        }
    }

    pub fn add_media_file(&mut self, device_id: &str, file: MediaFile) -> Result<(), StorageError> {
        let index = self.index_of(device_id)?;
        let device = &mut self.devices[index];
        device.media_files.push(file.clone());

        info!(device_id, file = %file.file_name, "added media file");
        let files = device.media_files.clone();
        self.events.emit(&StorageEvent::MediaFileAdded {
            device_id: device_id.to_string(),
            file,
        });
        self.events.emit(&StorageEvent::MediaFilesChanged {
            device_id: device_id.to_string(),
            files,
        });
        Ok(())
    }

    pub fn remove_media_file(&mut self, device_id: &str, file_name: &str) -> Result<(), StorageError> {
        let index = self.index_of(device_id)?;
        let device = &mut self.devices[index];
        let position = device
            .media_files
            .iter()
            .position(|f| f.file_name == file_name)
            .ok_or_else(|| StorageError::MediaFileNotFound {
                device_id: device_id.to_string(),
                file_name: file_name.to_string(),
            })?;
        device.media_files.remove(position);

        info!(device_id, file = file_name, "removed media file");
        let files = device.media_files.clone();
        self.events.emit(&StorageEvent::MediaFileRemoved {
            device_id: device_id.to_string(),
            file_name: file_name.to_string(),
        });
        self.events.emit(&StorageEvent::MediaFilesChanged {
            device_id: device_id.to_string(),
            files,
        });
        Ok(())
    }

    pub fn start_monitoring(&mut self) -> Result<(), StorageError> {
        if self.monitoring {
            return Ok(());
        }

        let poll_task = self.scheduler.schedule_periodic(
            StorageTask::WatchPoll,
            self.config.watch_poll_interval_ms,
            self.now_ms,
        )?;
        if self.config.auto_scan {
            if let Err(e) = self.arm_background_scan() {
                self.scheduler.cancel(poll_task);
                return Err(e);
            }
        }
        self.poll_task = Some(poll_task);
        self.rebuild_watch_list();
        self.monitoring = true;

        info!("USB monitoring started");
        Ok(())
    }

    pub fn stop_monitoring(&mut self) {
        if !self.monitoring {
            return;
        }

        self.watcher.clear();
        for id in [self.poll_task.take(), self.scan_task.take()].into_iter().flatten() {
            self.scheduler.cancel(id);
        }
        self.monitoring = false;

        info!("USB monitoring stopped");
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring
    }

    fn arm_background_scan(&mut self) -> Result<(), StorageError> {
        if self.scan_task.is_none() {
            self.scan_task = Some(self.scheduler.schedule_periodic(
                StorageTask::BackgroundScan,
                self.config.scan_interval_ms,
                self.now_ms,
            )?);
        }
        Ok(())
    }

    fn rebuild_watch_list(&mut self) {
        self.watcher.clear();
        for directory in &self.config.watch_directories {
            if directory.is_dir() {
                self.watcher.watch(directory.clone());
            }
        }
        for device in self.devices.iter().filter(|d| d.is_connected) {
            self.watcher.watch(device.mount_point.clone());
        }
    }

    pub fn enable_auto_scan(&mut self, enable: bool) -> Result<(), StorageError> {
        self.config.auto_scan = enable;
        if enable && self.monitoring {
            self.arm_background_scan()?;
        } else if let Some(id) = self.scan_task.take() {
            self.scheduler.cancel(id);
        }
        info!(enabled = enable, "auto scan toggled");
        Ok(())
    }

    pub fn set_watch_directories(&mut self, directories: Vec<PathBuf>) {
        self.config.watch_directories = directories;
        if self.monitoring {
            self.rebuild_watch_list();
        }
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.watcher.watched().map(Path::to_path_buf).collect()
    }

    pub fn set_supported_formats(&mut self, formats: &[String]) {
        self.config.supported_formats = normalize_formats(formats);
        info!(formats = %self.config.supported_formats.join(", "), "supported formats updated");
    }

    pub fn supported_formats(&self) -> &[String] {
        &self.config.supported_formats
    }

    pub fn is_media_file(&self, name: impl AsRef<Path>) -> bool {
        media::extension_of(name).is_some_and(|ext| self.config.supported_formats.contains(&ext))
    }

    pub fn file_metadata(&self, path: &Path) -> Result<MediaMetadata, StorageError> {
        media::read_metadata(path).map_err(|source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn devices(&self) -> &[StorageDevice] {
        &self.devices
    }

    /// Copies of the currently connected devices.
    pub fn connected_devices(&self) -> Vec<StorageDevice> {
        self.devices.iter().filter(|d| d.is_connected).cloned().collect()
    }

    pub fn device(&self, device_id: &str) -> Option<&StorageDevice> {
        self.devices.iter().find(|d| d.device_id == device_id)
    }

    pub fn media_files(&self, device_id: &str) -> Option<&[MediaFile]> {
        self.device(device_id).map(|d| d.media_files.as_slice())
    }

    pub fn is_device_connected(&self, device_id: &str) -> bool {
        self.device(device_id).is_some_and(|d| d.is_connected)
    }

    pub fn faults(&self) -> &FaultManager {
        &self.faults
    }
}

fn normalize_formats(formats: &[String]) -> Vec<String> {
    formats
        .iter()
        .map(|f| f.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|f| !f.is_empty())
        .collect()
}

impl Simulator for StorageRegistry {
    type Event = StorageEvent;

    fn now_ms(&self) -> u64 {
        self.now_ms
    }

    fn advance_to(&mut self, now_ms: u64) {
        while let Some((_, task, fired_at)) = self.scheduler.pop_due(now_ms) {
            self.now_ms = fired_at;
            match task {
                StorageTask::BackgroundScan => self.scan_all(),
                StorageTask::WatchPoll => self.poll_watcher(),
            }
        }
        self.now_ms = self.now_ms.max(now_ms);
    }

    fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&StorageEvent) + Send + 'static,
    {
        self.events.subscribe(handler)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    fn inject_fault(&mut self, fault: FaultKind, enabled: bool) -> bool {
        match fault {
            FaultKind::MountError | FaultKind::FileSystemError | FaultKind::CorruptedFiles => {
                if self.faults.set(fault, enabled, self.now_ms) {
                    info!(fault = fault.label(), enabled, "storage fault simulation toggled");
                }
                true
            }
            _ => false,
        }
    }

    fn clear_faults(&mut self) {
        self.faults.clear_all(self.now_ms);
    }

    fn is_healthy(&self) -> bool {
        self.faults.active_faults().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedEpochClock;
    use tempfile::tempdir;

    fn registry(root: &Path) -> StorageRegistry {
        let config = StorageConfig {
            mount_root: root.join("mnt"),
            watch_directories: Vec::new(),
            ..StorageConfig::default()
        };
        StorageRegistry::new(config, Arc::new(FixedEpochClock::from_unix_seconds(0)))
    }

    #[test]
    fn test_ids_are_unique() {
        let dir = tempdir().unwrap();
        let mut usb = registry(dir.path());
        let a = usb.insert("A").unwrap();
        let b = usb.insert("B").unwrap();
        assert_ne!(a, b);
        assert!(usb.device(&a).unwrap().mount_point.is_dir());
    }

    #[test]
    fn test_format_normalization() {
        let dir = tempdir().unwrap();
        let mut usb = registry(dir.path());
        usb.set_supported_formats(&[".MP3".to_string(), " ogg ".to_string(), String::new()]);
        assert_eq!(usb.supported_formats(), ["mp3".to_string(), "ogg".to_string()]);
        assert!(usb.is_media_file("x.Mp3"));
        assert!(!usb.is_media_file("x.flac"));
    }

    #[test]
    fn test_media_edits_leave_space_alone() {
        let dir = tempdir().unwrap();
        let mut usb = registry(dir.path());
        let id = usb.insert("A").unwrap();
        let meta = MediaMetadata::fallback("a");
        let file = MediaFile {
            file_name: "a.mp3".to_string(),
            file_path: PathBuf::from("/media/a.mp3"),
            title: meta.title,
            artist: meta.artist,
            album: meta.album,
            duration: meta.duration,
            file_size: 1000,
            file_type: "mp3".to_string(),
            last_modified: None,
        };

        usb.add_media_file(&id, file).unwrap();
        let device = usb.device(&id).unwrap();
        assert_eq!(device.total_space, EXAMPLE_TOTAL_SPACE);
        assert_eq!(device.free_space, EXAMPLE_FREE_SPACE);
    }

    #[test]
    fn test_failed_monitoring_start_leaves_no_tasks() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            mount_root: dir.path().join("mnt"),
            watch_directories: Vec::new(),
            scan_interval_ms: 0,
            ..StorageConfig::default()
        };
        let mut usb = StorageRegistry::new(config, Arc::new(FixedEpochClock::from_unix_seconds(0)));

        for _ in 0..100 {
            assert!(matches!(
                usb.start_monitoring(),
                Err(StorageError::Scheduler(SchedulerError::ZeroPeriod))
            ));
        }
        assert!(!usb.is_monitoring());
        assert!(usb.scheduler.get_scheduled_tasks().is_empty());
    }
}
