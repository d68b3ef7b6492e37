//! Application context owning the three simulators.
//!
//! The hub loads configuration and persisted registries from one data
//! directory, fans time advancement out to every simulator and saves
//! everything back on shutdown.

use crate::clock::Clock;
use crate::config::{DataPaths, SimulatorConfig};
use crate::devices::sensor::{SensorError, SensorReading, SensorSimulator};
use crate::devices::storage::{StorageError, StorageRegistry};
use crate::devices::wireless::{ConnectionState, WirelessError, WirelessRegistry};
use crate::devices::Simulator;
use crate::fault::FaultKind;
use crate::rng::SimRng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum HubError {
    #[error("sensor: {0}")]
    Sensor(#[from] SensorError),
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
    #[error("bluetooth: {0}")]
    Wireless(#[from] WirelessError),
}

/// Point-in-time summary across all simulators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubStatus {
    pub uptime_ms: u64,
    pub sensor_connected: bool,
    pub reading: SensorReading,
    pub storage_devices: usize,
    pub media_files: usize,
    pub storage_monitoring: bool,
    pub bluetooth_initialized: bool,
    pub bluetooth_discovering: bool,
    pub available_devices: usize,
    pub paired_devices: usize,
    pub connected_devices: usize,
    pub active_faults: Vec<FaultKind>,
    pub healthy: bool,
}

pub struct DeviceHub {
    config: SimulatorConfig,
    paths: DataPaths,
    now_ms: u64,
    running: bool,

    sensor: SensorSimulator,
    storage: StorageRegistry,
    wireless: WirelessRegistry,
}

impl DeviceHub {
    /// Load `autodash_config.json` from `data_dir` and build the hub.
    ///
    /// `seed` overrides the configured seed when given.
    pub fn open(data_dir: impl Into<PathBuf>, seed: Option<u64>, clock: Arc<dyn Clock>) -> Self {
        let paths = DataPaths::new(data_dir);
        let mut config = SimulatorConfig::load(&paths.root);
        if seed.is_some() {
            config.seed = seed;
        }
        Self::with_config(config, paths, clock)
    }

    pub fn with_config(config: SimulatorConfig, paths: DataPaths, clock: Arc<dyn Clock>) -> Self {
        let mut rng = SimRng::from_seed_option(config.seed);

        let sensor = SensorSimulator::new(config.sensor.clone(), Arc::clone(&clock), rng.fork())
            .with_storage(paths.calibration(), paths.sensor_log());
        let storage =
            StorageRegistry::new(config.storage.clone(), Arc::clone(&clock)).with_store(paths.usb_registry());
        let wireless = WirelessRegistry::new(config.wireless.clone(), clock, rng.fork())
            .with_store(paths.bluetooth_registry());

        Self {
            config,
            paths,
            now_ms: 0,
            running: false,
            sensor,
            storage,
            wireless,
        }
    }

    /// Connect the sensor bus, start USB monitoring and bring up the Bluetooth stack.
    pub fn start(&mut self) -> Result<(), HubError> {
        if self.running {
            return Ok(());
        }

        self.sensor.connect(self.config.sensor.bus_address)?;
        if let Err(e) = self.storage.start_monitoring() {
            self.sensor.disconnect();
            return Err(e.into());
        }
        if let Err(e) = self.wireless.initialize() {
            self.storage.stop_monitoring();
            self.sensor.disconnect();
            return Err(e.into());
        }
        self.running = true;

        info!(data_dir = %self.paths.root.display(), "device hub started");
        Ok(())
    }

    /// Stop every timer and persist registries and calibration.
    ///
    /// All saves are attempted; the first failure is returned.
    pub fn shutdown(&mut self) -> Result<(), HubError> {
        if self.wireless.is_discovering() {
            self.wireless.stop_discovery();
        }
        self.storage.stop_monitoring();
        self.sensor.disconnect();
        self.running = false;

        let results = [
            self.wireless.save_registry().map_err(HubError::from),
            self.storage.save_registry().map_err(HubError::from),
            self.sensor.save_calibration().map_err(HubError::from),
        ];

        let mut first_error = None;
        for result in results {
            if let Err(e) = result {
                warn!(error = %e, "save failed during shutdown");
                first_error.get_or_insert(e);
            }
        }

        info!("device hub stopped");
        first_error.map_or(Ok(()), Err)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn advance(&mut self, dt_ms: u64) {
        self.advance_to(self.now_ms.saturating_add(dt_ms));
    }

    /// Run every simulator's due tasks up to `now_ms`.
    pub fn advance_to(&mut self, now_ms: u64) {
        self.sensor.advance_to(now_ms);
        self.storage.advance_to(now_ms);
        self.wireless.advance_to(now_ms);
        self.now_ms = self.now_ms.max(now_ms);
    }

    /// Route a fault toggle to whichever simulator models it.
    pub fn inject_fault(&mut self, fault: FaultKind, enabled: bool) -> bool {
        self.sensor.inject_fault(fault, enabled)
            || self.storage.inject_fault(fault, enabled)
            || self.wireless.inject_fault(fault, enabled)
    }

    pub fn clear_faults(&mut self) {
        self.sensor.clear_faults();
        self.storage.clear_faults();
        self.wireless.clear_faults();
    }

    pub fn is_healthy(&self) -> bool {
        self.sensor.is_healthy() && self.storage.is_healthy() && self.wireless.is_healthy()
    }

    pub fn status(&self) -> HubStatus {
        let active_faults = self
            .sensor
            .faults()
            .active_faults()
            .iter()
            .chain(self.storage.faults().active_faults())
            .chain(self.wireless.faults().active_faults())
            .copied()
            .collect();

        HubStatus {
            uptime_ms: self.now_ms,
            sensor_connected: self.sensor.is_connected(),
            reading: self.sensor.current_reading(),
            storage_devices: self.storage.devices().len(),
            media_files: self.storage.devices().iter().map(|d| d.media_files.len()).sum(),
            storage_monitoring: self.storage.is_monitoring(),
            bluetooth_initialized: self.wireless.is_initialized(),
            bluetooth_discovering: self.wireless.is_discovering(),
            available_devices: self.wireless.available_devices().len(),
            paired_devices: self.wireless.paired_devices().len(),
            connected_devices: self
                .wireless
                .paired_devices()
                .iter()
                .filter(|d| d.connection_state == ConnectionState::Connected)
                .count(),
            active_faults,
            healthy: self.is_healthy(),
        }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    pub fn paths(&self) -> &DataPaths {
        &self.paths
    }

    pub fn sensor(&self) -> &SensorSimulator {
        &self.sensor
    }

    pub fn sensor_mut(&mut self) -> &mut SensorSimulator {
        &mut self.sensor
    }

    pub fn storage(&self) -> &StorageRegistry {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut StorageRegistry {
        &mut self.storage
    }

    pub fn wireless(&self) -> &WirelessRegistry {
        &self.wireless
    }

    pub fn wireless_mut(&mut self) -> &mut WirelessRegistry {
        &mut self.wireless
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedEpochClock;
    use tempfile::tempdir;

    fn hub(root: &std::path::Path) -> DeviceHub {
        let mut config = SimulatorConfig {
            seed: Some(5),
            ..SimulatorConfig::default()
        };
        config.storage.mount_root = root.join("mnt");
        config.storage.watch_directories.clear();
        DeviceHub::with_config(
            config,
            DataPaths::new(root.join("config")),
            Arc::new(FixedEpochClock::from_unix_seconds(0)),
        )
    }

    #[test]
    fn test_fault_routing() {
        let dir = tempdir().unwrap();
        let mut hub = hub(dir.path());
        assert!(hub.is_healthy());

        assert!(hub.inject_fault(FaultKind::MountError, true));
        assert!(hub.inject_fault(FaultKind::LowBattery, true));
        assert!(!hub.is_healthy());
        assert_eq!(hub.status().active_faults, vec![FaultKind::MountError, FaultKind::LowBattery]);

        hub.clear_faults();
        assert!(hub.is_healthy());
    }

    #[test]
    fn test_advance_reaches_every_simulator() {
        let dir = tempdir().unwrap();
        let mut hub = hub(dir.path());
        hub.start().unwrap();

        hub.advance(5000);
        assert_eq!(hub.now_ms(), 5000);
        assert!(hub.sensor().current_reading().is_valid);
        assert_eq!(hub.storage().now_ms(), 5000);
        assert_eq!(hub.wireless().now_ms(), 5000);

        hub.shutdown().unwrap();
        assert!(hub.paths().calibration().exists());
        assert!(hub.paths().usb_registry().exists());
        assert!(hub.paths().bluetooth_registry().exists());
    }
}
