//! Simulator configuration.
//!
//! Every field has a default so a partial `autodash_config.json` only needs
//! to name what it overrides.

use crate::persistence::JsonStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "autodash_config.json";
pub const BLUETOOTH_REGISTRY_FILE: &str = "bluetooth_devices.json";
pub const USB_REGISTRY_FILE: &str = "usb_devices.json";
pub const CALIBRATION_FILE: &str = "i2c_calibration.json";
pub const SENSOR_LOG_FILE: &str = "sensor_data.json";

pub const DEFAULT_DATA_DIR: &str = "config";
pub const DEFAULT_MOUNT_ROOT: &str = "mnt/usb";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub bus_address: u8,
    pub update_interval_ms: u64,
    pub data_logging: bool,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            bus_address: 0x48,
            update_interval_ms: 5000,
            data_logging: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub mount_root: PathBuf,
    pub scan_interval_ms: u64,
    pub watch_poll_interval_ms: u64,
    pub auto_scan: bool,
    pub watch_directories: Vec<PathBuf>,
    pub supported_formats: Vec<String>,
}

pub const DEFAULT_SUPPORTED_FORMATS: [&str; 14] = [
    "mp3", "wav", "flac", "aac", "ogg", "wma", "m4a", "mp4", "avi", "mkv", "mov", "wmv", "flv", "webm",
];

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mount_root: PathBuf::from(DEFAULT_MOUNT_ROOT),
            scan_interval_ms: 10_000,
            watch_poll_interval_ms: 1000,
            auto_scan: true,
            watch_directories: vec![
                PathBuf::from("mnt/usb"),
                PathBuf::from("media/usb"),
                PathBuf::from("tmp/usb"),
            ],
            supported_formats: DEFAULT_SUPPORTED_FORMATS.iter().map(|s| (*s).to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WirelessConfig {
    pub discovery_interval_ms: u64,
    pub signal_interval_ms: u64,
    pub pairing_timeout_ms: u64,
    pub connection_timeout_ms: u64,
    pub discovery_timeout_s: u32,
    pub discovery_chance_percent: u8,
    pub auto_reconnect: bool,
}

impl Default for WirelessConfig {
    fn default() -> Self {
        Self {
            discovery_interval_ms: 2000,
            signal_interval_ms: 3000,
            pairing_timeout_ms: 10_000,
            connection_timeout_ms: 15_000,
            discovery_timeout_s: 30,
            discovery_chance_percent: 10,
            auto_reconnect: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Fixed seed for reproducible runs. `None` seeds from entropy.
    pub seed: Option<u64>,
    pub sensor: SensorConfig,
    pub storage: StorageConfig,
    pub wireless: WirelessConfig,
}

impl SimulatorConfig {
    /// Load `autodash_config.json` from `data_dir`, defaults when absent or malformed.
    pub fn load(data_dir: &Path) -> Self {
        JsonStore::<SimulatorConfig>::new(data_dir.join(CONFIG_FILE)).load_or_default()
    }
}

/// File locations derived from one data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn config(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn bluetooth_registry(&self) -> PathBuf {
        self.root.join(BLUETOOTH_REGISTRY_FILE)
    }

    pub fn usb_registry(&self) -> PathBuf {
        self.root.join(USB_REGISTRY_FILE)
    }

    pub fn calibration(&self) -> PathBuf {
        self.root.join(CALIBRATION_FILE)
    }

    pub fn sensor_log(&self) -> PathBuf {
        self.root.join(SENSOR_LOG_FILE)
    }
}

impl Default for DataPaths {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_DIR)
    }
}
