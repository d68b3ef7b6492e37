use autodash::config::StorageConfig;
use autodash::devices::disk;
use autodash::devices::media::{MediaFile, UNKNOWN_ALBUM, UNKNOWN_ARTIST, UNKNOWN_DURATION};
use autodash::devices::storage::{StorageError, StorageEvent, StorageRegistry};
use autodash::devices::Simulator;
use autodash::events::collector;
use autodash::{FaultKind, FixedEpochClock};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

fn config(root: &Path) -> StorageConfig {
    StorageConfig {
        mount_root: root.join("mnt"),
        watch_directories: Vec::new(),
        ..StorageConfig::default()
    }
}

fn registry(root: &Path) -> StorageRegistry {
    StorageRegistry::new(config(root), Arc::new(FixedEpochClock::from_unix_seconds(1_700_000_000)))
}

fn mount_of(usb: &StorageRegistry, id: &str) -> PathBuf {
    usb.device(id).unwrap().mount_point.clone()
}

#[test]
fn test_scan_parses_artist_and_title() {
    let dir = tempdir().unwrap();
    let mut usb = registry(dir.path());
    let id = usb.insert("USB_DRIVE_01").unwrap();
    let mount = mount_of(&usb, &id);
    fs::write(mount.join("Artist - Title.mp3"), vec![0u8; 4096]).unwrap();

    assert_eq!(usb.scan(&id).unwrap(), 1);
    let files = usb.media_files(&id).unwrap();
    assert_eq!(files[0].artist, "Artist");
    assert_eq!(files[0].title, "Title");
    assert_eq!(files[0].file_type, "mp3");
    assert_eq!(files[0].album, UNKNOWN_ALBUM);
}

#[test]
fn test_scan_filters_and_sorts() {
    let dir = tempdir().unwrap();
    let mut usb = registry(dir.path());
    let id = usb.insert("USB_DRIVE_01").unwrap();
    let mount = mount_of(&usb, &id);
    for name in ["b.wav", "a.MP3", "notes.txt", "c.flac"] {
        fs::write(mount.join(name), b"x").unwrap();
    }
    fs::create_dir(mount.join("nested.mp3")).unwrap();

    usb.scan(&id).unwrap();
    let names: Vec<&str> = usb
        .media_files(&id)
        .unwrap()
        .iter()
        .map(|f| f.file_name.as_str())
        .collect();
    assert_eq!(names, ["a.MP3", "b.wav", "c.flac"]);

    usb.set_supported_formats(&["wav".to_string()]);
    usb.scan(&id).unwrap();
    assert_eq!(usb.media_files(&id).unwrap().len(), 1);
}

#[test]
fn test_rescan_replaces_list() {
    let dir = tempdir().unwrap();
    let mut usb = registry(dir.path());
    let id = usb.insert("USB_DRIVE_01").unwrap();
    let mount = mount_of(&usb, &id);

    fs::write(mount.join("one.mp3"), b"1").unwrap();
    usb.scan(&id).unwrap();
    fs::remove_file(mount.join("one.mp3")).unwrap();
    fs::write(mount.join("two.mp3"), b"2").unwrap();
    usb.scan(&id).unwrap();

    let files = usb.media_files(&id).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name, "two.mp3");
}

#[test]
fn test_insert_and_remove_notify() {
    let dir = tempdir().unwrap();
    let mut usb = registry(dir.path());
    let events = Arc::new(Mutex::new(Vec::new()));
    usb.subscribe(collector(Arc::clone(&events)));

    let id = usb.insert("USB_DRIVE_01").unwrap();
    let device = usb.device(&id).unwrap().clone();
    assert_eq!(device.total_space, 32_000_000_000);
    assert_eq!(device.free_space, 28_000_000_000);
    assert_eq!(device.file_system, "FAT32");
    assert!(device.mount_point.starts_with(dir.path().join("mnt")));
    assert_eq!(usb.connected_devices().len(), 1);

    usb.remove(&id).unwrap();
    assert!(usb.device(&id).is_none());
    assert!(matches!(usb.remove(&id), Err(StorageError::DeviceNotFound(_))));

    let events = events.lock().unwrap();
    assert_eq!(events[0], StorageEvent::DeviceConnected(device));
    assert_eq!(events[1], StorageEvent::DeviceDisconnected(id));
}

#[test]
fn test_filesystem_fault_leaves_list_untouched() {
    let dir = tempdir().unwrap();
    let mut usb = registry(dir.path());
    let id = usb.insert("USB_DRIVE_01").unwrap();
    fs::write(mount_of(&usb, &id).join("song.mp3"), b"x").unwrap();
    usb.scan(&id).unwrap();
    fs::write(mount_of(&usb, &id).join("other.mp3"), b"x").unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    usb.subscribe(collector(Arc::clone(&events)));
    usb.inject_fault(FaultKind::FileSystemError, true);

    assert!(matches!(usb.scan(&id), Err(StorageError::FileSystemFault(_))));
    assert_eq!(usb.media_files(&id).unwrap().len(), 1);
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], StorageEvent::FileSystemError { device_id, .. } if *device_id == id));
}

#[test]
fn test_corrupted_files_get_fallback_metadata() {
    let dir = tempdir().unwrap();
    let mut usb = registry(dir.path());
    let id = usb.insert("USB_DRIVE_01").unwrap();
    let mount = mount_of(&usb, &id);
    fs::write(mount.join("Artist - Title.mp3"), vec![0u8; 100_000]).unwrap();
    fs::write(mount.join("Other - Song.wav"), vec![0u8; 100_000]).unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    usb.subscribe(collector(Arc::clone(&events)));
    usb.inject_fault(FaultKind::CorruptedFiles, true);
    assert_eq!(usb.scan(&id).unwrap(), 2);

    for file in usb.media_files(&id).unwrap() {
        assert_eq!(file.artist, UNKNOWN_ARTIST);
        assert_eq!(file.duration, UNKNOWN_DURATION);
        assert!(file.title.contains(" - "));
    }
    let corrupted = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, StorageEvent::FileSystemError { .. }))
        .count();
    assert_eq!(corrupted, 2);
}

#[test]
fn test_mount_error_fault() {
    let dir = tempdir().unwrap();
    let mut usb = registry(dir.path());
    let id = usb.insert("USB_DRIVE_01").unwrap();
    usb.unmount(&id).unwrap();
    assert!(!usb.is_device_connected(&id));
    assert!(matches!(usb.scan(&id), Err(StorageError::NotConnected(_))));

    let events = Arc::new(Mutex::new(Vec::new()));
    usb.subscribe(collector(Arc::clone(&events)));
    usb.inject_fault(FaultKind::MountError, true);
    let target = dir.path().join("elsewhere");
    assert!(matches!(usb.mount(&id, &target), Err(StorageError::MountFailed(_))));
    assert!(matches!(events.lock().unwrap()[0], StorageEvent::MountError { .. }));
    assert!(!usb.is_device_connected(&id));

    usb.clear_faults();
    usb.mount(&id, &target).unwrap();
    assert!(usb.is_device_connected(&id));
    assert_eq!(mount_of(&usb, &id), target);
    assert!(target.is_dir());
}

#[test]
fn test_watcher_triggers_scan() {
    let dir = tempdir().unwrap();
    let mut config = config(dir.path());
    config.auto_scan = false;
    let mut usb = StorageRegistry::new(config, Arc::new(FixedEpochClock::from_unix_seconds(0)));
    usb.start_monitoring().unwrap();

    let id = usb.insert("USB_DRIVE_01").unwrap();
    let mount = mount_of(&usb, &id);
    assert!(usb.watched_paths().contains(&mount));

    let events = Arc::new(Mutex::new(Vec::new()));
    usb.subscribe(collector(Arc::clone(&events)));
    fs::write(mount.join("new.ogg"), b"x").unwrap();
    usb.advance(1000);

    assert_eq!(usb.media_files(&id).unwrap().len(), 1);
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, StorageEvent::MediaFilesChanged { files, .. } if files.len() == 1)));

    usb.stop_monitoring();
    assert!(usb.watched_paths().is_empty());
    fs::write(mount.join("later.ogg"), b"x").unwrap();
    usb.advance(60_000);
    assert_eq!(usb.media_files(&id).unwrap().len(), 1);
}

#[test]
fn test_background_scan_interval() {
    let dir = tempdir().unwrap();
    let mut config = config(dir.path());
    config.watch_poll_interval_ms = 3_600_000;
    let mut usb = StorageRegistry::new(config, Arc::new(FixedEpochClock::from_unix_seconds(0)));
    let id = usb.insert("USB_DRIVE_01").unwrap();
    fs::write(mount_of(&usb, &id).join("a.mp3"), b"x").unwrap();
    usb.start_monitoring().unwrap();

    usb.advance(9_999);
    assert!(usb.media_files(&id).unwrap().is_empty());
    usb.advance(1);
    assert_eq!(usb.media_files(&id).unwrap().len(), 1);

    usb.enable_auto_scan(false).unwrap();
    fs::write(mount_of(&usb, &id).join("b.mp3"), b"x").unwrap();
    usb.advance(30_000);
    assert_eq!(usb.media_files(&id).unwrap().len(), 1);
}

#[test]
fn test_manual_media_edits() {
    let dir = tempdir().unwrap();
    let mut usb = registry(dir.path());
    let id = usb.insert("USB_DRIVE_01").unwrap();
    let file = MediaFile {
        file_name: "x.mp3".to_string(),
        file_path: PathBuf::from("/media/x.mp3"),
        title: "x".to_string(),
        artist: UNKNOWN_ARTIST.to_string(),
        album: UNKNOWN_ALBUM.to_string(),
        duration: "00:10".to_string(),
        file_size: 1_000_000,
        file_type: "mp3".to_string(),
        last_modified: None,
    };

    usb.add_media_file(&id, file).unwrap();
    assert_eq!(usb.media_files(&id).unwrap().len(), 1);

    assert!(matches!(
        usb.remove_media_file(&id, "missing.mp3"),
        Err(StorageError::MediaFileNotFound { .. })
    ));
    usb.remove_media_file(&id, "x.mp3").unwrap();
    assert!(usb.media_files(&id).unwrap().is_empty());
}

#[test]
fn test_scan_reads_space_from_filesystem() {
    let dir = tempdir().unwrap();
    let mut usb = registry(dir.path());
    let id = usb.insert("USB_DRIVE_01").unwrap();
    let mount = mount_of(&usb, &id);
    fs::write(mount.join("a.mp3"), vec![0u8; 4096]).unwrap();

    usb.scan(&id).unwrap();
    let device = usb.device(&id).unwrap();
    match disk::probe(&mount) {
        Some(space) => {
            assert_eq!(device.total_space, space.total_space);
            assert_eq!(device.file_system, space.file_system);
            assert_ne!(device.free_space, 28_000_000_000);
            assert!(device.free_space <= device.total_space);
        }
        None => {
            assert_eq!(device.total_space, 32_000_000_000);
            assert_eq!(device.free_space, 28_000_000_000);
            assert_eq!(device.file_system, "FAT32");
        }
    }
}

#[test]
fn test_registry_round_trip() {
    let dir = tempdir().unwrap();
    let store_path = dir.path().join("usb_devices.json");

    let mut usb = registry(dir.path()).with_store(&store_path);
    let first = usb.insert("USB_DRIVE_01").unwrap();
    let second = usb.insert("USB_DRIVE_02").unwrap();
    fs::write(mount_of(&usb, &first).join("A - B.mp3"), b"x").unwrap();
    usb.scan(&first).unwrap();
    usb.save_registry().unwrap();

    let raw = fs::read_to_string(&store_path).unwrap();
    for key in ["deviceId", "mountPoint", "totalSpace", "connectedTime", "mediaFiles", "fileName", "lastModified"] {
        assert!(raw.contains(key), "missing {key}");
    }

    let reloaded = registry(dir.path()).with_store(&store_path);
    assert_eq!(reloaded.devices(), usb.devices());

    // New ids never collide with loaded ones.
    let mut reloaded = reloaded;
    let third = reloaded.insert("USB_DRIVE_03").unwrap();
    assert!(third != first && third != second);
}

#[test]
fn test_malformed_registry_loads_empty() {
    let dir = tempdir().unwrap();
    let store_path = dir.path().join("usb_devices.json");
    fs::write(&store_path, "{ not json").unwrap();

    let usb = registry(dir.path()).with_store(&store_path);
    assert!(usb.devices().is_empty());
}
