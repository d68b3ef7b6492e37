use super::Simulator;
use crate::clock::Clock;
use crate::config::WirelessConfig;
use crate::events::{EventBus, SubscriptionId};
use crate::fault::{FaultKind, FaultManager};
use crate::persistence::{JsonStore, PersistenceError};
use crate::rng::SimRng;
use crate::scheduler::{SchedulerError, TaskId, TaskScheduler};
use arrayvec::ArrayString;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::fmt::{self, Write as _};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const ADDRESS_BYTES: usize = 6;
pub const ADDRESS_LEN: usize = 17;

const_assert!(ADDRESS_BYTES * 3 - 1 == ADDRESS_LEN);

/// `XX:XX:XX:XX:XX:XX`, upper-case hex.
pub type DeviceAddress = ArrayString<ADDRESS_LEN>;

const SIGNAL_MIN: i32 = 0;
const SIGNAL_MAX: i32 = 100;
const SIGNAL_WALK_STEP: i32 = 5;
const INITIAL_SIGNAL_MIN: i32 = 75;

const_assert!(INITIAL_SIGNAL_MIN >= SIGNAL_MIN);

const GENERIC_MANUFACTURER: &str = "Generic Manufacturer";
const GENERIC_MODEL: &str = "Generic Model";
const GENERIC_FIRMWARE: &str = "1.0.0";

pub const DEFAULT_PROFILE_CATALOGUE: [&str; 8] = ["A2DP", "AVRCP", "HFP", "HSP", "PBAP", "MAP", "OPP", "HID"];

/// Devices that show up when a discovery tick succeeds.
pub const DEMO_DEVICES: [(&str, DeviceType); 7] = [
    ("iPhone 15 Pro", DeviceType::Phone),
    ("Samsung Galaxy S24", DeviceType::Phone),
    ("Sony WH-1000XM5", DeviceType::Headset),
    ("Bose QuietComfort 45", DeviceType::Headset),
    ("JBL Flip 6", DeviceType::Speaker),
    ("VW Passat Audio", DeviceType::CarAudio),
    ("Apple Watch Series 9", DeviceType::Smartwatch),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown {kind} ordinal {value}")]
pub struct OrdinalError {
    kind: &'static str,
    value: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum DeviceType {
    Phone = 0,
    Headset = 1,
    Speaker = 2,
    CarAudio = 3,
    Smartwatch = 4,
    Tablet = 5,
    Laptop = 6,
}

impl DeviceType {
    pub const ALL: [DeviceType; 7] = [
        DeviceType::Phone,
        DeviceType::Headset,
        DeviceType::Speaker,
        DeviceType::CarAudio,
        DeviceType::Smartwatch,
        DeviceType::Tablet,
        DeviceType::Laptop,
    ];

    /// Profiles a freshly discovered device of this type advertises.
    pub fn default_profiles(self) -> &'static [&'static str] {
        match self {
            DeviceType::Phone | DeviceType::CarAudio => &["A2DP", "AVRCP", "HFP", "HSP", "PBAP", "MAP"],
            DeviceType::Headset => &["A2DP", "AVRCP", "HFP", "HSP"],
            DeviceType::Speaker | DeviceType::Tablet | DeviceType::Laptop => &["A2DP", "AVRCP"],
            DeviceType::Smartwatch => &["HFP", "HSP", "OPP"],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Phone => "phone",
            DeviceType::Headset => "headset",
            DeviceType::Speaker => "speaker",
            DeviceType::CarAudio => "car-audio",
            DeviceType::Smartwatch => "smartwatch",
            DeviceType::Tablet => "tablet",
            DeviceType::Laptop => "laptop",
        }
    }
}

impl From<DeviceType> for u8 {
    fn from(value: DeviceType) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for DeviceType {
    type Error = OrdinalError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        DeviceType::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(OrdinalError { kind: "device type", value })
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = WirelessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        DeviceType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted || (wanted == "car" && *t == DeviceType::CarAudio))
            .ok_or_else(|| WirelessError::UnknownDeviceType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Searching = 1,
    Connecting = 2,
    Connected = 3,
    Pairing = 4,
    Paired = 5,
    Error = 6,
}

impl ConnectionState {
    const ALL: [ConnectionState; 7] = [
        ConnectionState::Disconnected,
        ConnectionState::Searching,
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Pairing,
        ConnectionState::Paired,
        ConnectionState::Error,
    ];

    /// `Pairing` and `Connecting` always resolve through a scheduled completion.
    pub fn is_transient(self) -> bool {
        matches!(self, ConnectionState::Pairing | ConnectionState::Connecting)
    }
}

impl From<ConnectionState> for u8 {
    fn from(value: ConnectionState) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for ConnectionState {
    type Error = OrdinalError;

    fn try_from(value: u8) -> Result<Self, OrdinalError> {
        ConnectionState::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(OrdinalError { kind: "connection state", value })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Searching => "searching",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Pairing => "pairing",
            ConnectionState::Paired => "paired",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirelessDevice {
    pub device_id: String,
    pub device_name: String,
    pub device_address: DeviceAddress,
    pub device_type: DeviceType,
    pub connection_state: ConnectionState,
    pub is_paired: bool,
    pub is_trusted: bool,
    pub signal_strength: u8,
    pub last_seen: DateTime<Utc>,
    pub paired_time: Option<DateTime<Utc>>,
    pub supported_profiles: Vec<String>,
    pub manufacturer: String,
    pub model: String,
    pub firmware_version: String,
}

impl WirelessDevice {
    pub fn supports_profile(&self, profile: &str) -> bool {
        self.supported_profiles.iter().any(|p| p.eq_ignore_ascii_case(profile))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WirelessEvent {
    DeviceDiscovered(WirelessDevice),
    DeviceRemoved(String),
    DevicePaired(String),
    DeviceUnpaired(String),
    DeviceConnected(String),
    DeviceDisconnected(String),
    ConnectionStateChanged { device_id: String, state: ConnectionState },
    SignalStrengthChanged { device_id: String, strength: u8 },
    PairingError { device_id: String, error: String },
    ConnectionError { device_id: String, error: String },
    DiscoveryStarted,
    DiscoveryStopped,
}

#[derive(Debug, Error)]
pub enum WirelessError {
    #[error("bluetooth is turned off")]
    PoweredOff,
    #[error("bluetooth stack not initialized")]
    NotInitialized,
    #[error("device {0} not found")]
    DeviceNotFound(String),
    #[error("device {0} is not paired")]
    NotPaired(String),
    #[error("device {0} is already pairing")]
    AlreadyPairing(String),
    #[error("device {0} is already connecting")]
    AlreadyConnecting(String),
    #[error("device {device_id} is {state}")]
    InvalidState { device_id: String, state: ConnectionState },
    #[error("profile {profile} not supported by device {device_id}")]
    ProfileNotSupported { device_id: String, profile: String },
    #[error("unknown device type '{0}'")]
    UnknownDeviceType(String),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WirelessTask {
    Discovery,
    SignalUpdate,
    CompletePairing(String),
    CompleteConnection(String),
}

impl WirelessTask {
    fn targets(&self, device_id: &str) -> bool {
        match self {
            WirelessTask::CompletePairing(id) | WirelessTask::CompleteConnection(id) => id == device_id,
            _ => false,
        }
    }
}

/// Simulated Bluetooth stack: discovery, pairing and connection state per device.
///
/// Discovered devices live in the available list until pairing completes,
/// then move to the paired list. A device is never in both. Only the paired
/// list is persisted.
pub struct WirelessRegistry {
    config: WirelessConfig,
    clock: Arc<dyn Clock>,
    rng: SimRng,
    scheduler: TaskScheduler<WirelessTask>,
    discovery_task: Option<TaskId>,
    signal_task: Option<TaskId>,
    now_ms: u64,

    available: Vec<WirelessDevice>,
    paired: Vec<WirelessDevice>,
    initialized: bool,
    discovering: bool,
    profile_catalogue: Vec<String>,
    faults: FaultManager,
    next_device_seq: u32,

    store: Option<JsonStore<Vec<WirelessDevice>>>,
    events: EventBus<WirelessEvent>,
}

impl WirelessRegistry {
    pub fn new(config: WirelessConfig, clock: Arc<dyn Clock>, rng: SimRng) -> Self {
        Self {
            config,
            clock,
            rng,
            scheduler: TaskScheduler::new(),
            discovery_task: None,
            signal_task: None,
            now_ms: 0,
            available: Vec::new(),
            paired: Vec::new(),
            initialized: false,
            discovering: false,
            profile_catalogue: DEFAULT_PROFILE_CATALOGUE.iter().map(|p| (*p).to_string()).collect(),
            faults: FaultManager::new(),
            next_device_seq: 1,
            store: None,
            events: EventBus::new(),
        }
    }

    /// Attach the paired-device file and load it.
    pub fn with_store(mut self, path: impl Into<PathBuf>) -> Self {
        self.store = Some(JsonStore::new(path));
        self.load_registry();
        self
    }

    pub fn load_registry(&mut self) {
        if let Some(store) = &self.store {
            let mut loaded: Vec<WirelessDevice> = store.load_or_default();
            // Completion timers are not persisted, so an in-flight pair or
            // connect would never resolve.
            for device in loaded.iter_mut().filter(|d| d.connection_state.is_transient()) {
                info!(device_id = %device.device_id, state = %device.connection_state, "settling interrupted operation");
                device.connection_state = ConnectionState::Paired;
            }
            self.available.retain(|a| !loaded.iter().any(|p| p.device_id == a.device_id));
            self.paired = loaded;
            debug!(count = self.paired.len(), "loaded paired devices");
        }
    }

    pub fn save_registry(&self) -> Result<(), WirelessError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        match store.save(&self.paired) {
            Ok(()) => {
                debug!(count = self.paired.len(), "paired devices saved");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to save paired devices");
                Err(e.into())
            }
        }
    }

    fn save_quietly(&self) {
        // Already logged; in-memory state stays authoritative.
        let _ = self.save_registry();
    }

    pub fn initialize(&mut self) -> Result<(), WirelessError> {
        if self.faults.is_active(FaultKind::BluetoothOff) {
            error!("bluetooth is turned off");
            return Err(WirelessError::PoweredOff);
        }

        self.initialized = true;
        if self.signal_task.is_none() {
            self.signal_task = Some(self.scheduler.schedule_periodic(
                WirelessTask::SignalUpdate,
                self.config.signal_interval_ms,
                self.now_ms,
            )?);
        }

        info!("bluetooth stack initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized && !self.faults.is_active(FaultKind::BluetoothOff)
    }

    fn require_initialized(&self) -> Result<(), WirelessError> {
        if self.faults.is_active(FaultKind::BluetoothOff) {
            Err(WirelessError::PoweredOff)
        } else if !self.initialized {
            Err(WirelessError::NotInitialized)
        } else {
            Ok(())
        }
    }

    pub fn start_discovery(&mut self) -> Result<(), WirelessError> {
        if let Err(e) = self.require_initialized() {
            error!(error = %e, "cannot start discovery");
            return Err(e);
        }

        if let Some(id) = self.discovery_task.take() {
            self.scheduler.cancel(id);
        }
        self.discovery_task = Some(self.scheduler.schedule_periodic(
            WirelessTask::Discovery,
            self.config.discovery_interval_ms,
            self.now_ms,
        )?);
        self.discovering = true;

        info!("bluetooth discovery started");
        self.events.emit(&WirelessEvent::DiscoveryStarted);
        Ok(())
    }

    pub fn stop_discovery(&mut self) {
        if let Some(id) = self.discovery_task.take() {
            self.scheduler.cancel(id);
        }
        self.discovering = false;

        info!("bluetooth discovery stopped");
        self.events.emit(&WirelessEvent::DiscoveryStopped);
    }

    pub fn is_discovering(&self) -> bool {
        self.discovering && self.is_initialized()
    }

    fn discovery_tick(&mut self) {
        if !self.is_initialized() {
            return;
        }
        if self.rng.chance_percent(self.config.discovery_chance_percent) {
            self.spawn_demo_devices();
        }
    }

    /// Make the whole demo batch appear at once.
    pub fn spawn_demo_devices(&mut self) -> Vec<String> {
        DEMO_DEVICES
            .iter()
            .map(|(name, device_type)| self.simulate_device_appearance(name, *device_type))
            .collect()
    }

    fn generate_device_id(&mut self) -> String {
        loop {
            let candidate = format!("BT_{:04}", self.next_device_seq);
            self.next_device_seq += 1;
            if self.device(&candidate).is_none() {
                return candidate;
            }
        }
    }

    fn random_address(&mut self) -> DeviceAddress {
        let mut address = DeviceAddress::new();
        for i in 0..ADDRESS_BYTES {
            if i > 0 {
                address.push(':');
            }
            // Fits: ADDRESS_LEN covers six octets and five separators.
            let _ = write!(address, "{:02X}", self.rng.byte());
        }
        address
    }

    pub fn simulate_device_appearance(&mut self, name: &str, device_type: DeviceType) -> String {
        let device_id = self.generate_device_id();
        let device = WirelessDevice {
            device_id: device_id.clone(),
            device_name: name.to_string(),
            device_address: self.random_address(),
            device_type,
            connection_state: ConnectionState::Disconnected,
            is_paired: false,
            is_trusted: false,
            signal_strength: self.rng.range_i32(INITIAL_SIGNAL_MIN, SIGNAL_MAX) as u8,
            last_seen: self.clock.wall_time(self.now_ms),
            paired_time: None,
            supported_profiles: device_type.default_profiles().iter().map(|p| (*p).to_string()).collect(),
            manufacturer: GENERIC_MANUFACTURER.to_string(),
            model: GENERIC_MODEL.to_string(),
            firmware_version: GENERIC_FIRMWARE.to_string(),
        };

        info!(device = name, id = %device_id, address = %device.device_address, "discovered device");
        self.available.push(device.clone());
        self.events.emit(&WirelessEvent::DeviceDiscovered(device));
        device_id
    }

    pub fn simulate_device_disappearance(&mut self, device_id: &str) -> Result<(), WirelessError> {
        let index = self
            .available
            .iter()
            .position(|d| d.device_id == device_id)
            .ok_or_else(|| WirelessError::DeviceNotFound(device_id.to_string()))?;

        self.scheduler.cancel_where(|t| t.targets(device_id));
        let device = self.available.remove(index);

        info!(device = %device.device_name, "device out of range");
        self.events.emit(&WirelessEvent::DeviceRemoved(device.device_id));
        Ok(())
    }

    pub fn pair(&mut self, device_id: &str) -> Result<(), WirelessError> {
        self.require_initialized()?;

        let device = self
            .available
            .iter_mut()
            .find(|d| d.device_id == device_id)
            .ok_or_else(|| WirelessError::DeviceNotFound(device_id.to_string()))?;

        match device.connection_state {
            ConnectionState::Pairing => {
                warn!(device_id, "device is already pairing");
                return Err(WirelessError::AlreadyPairing(device_id.to_string()));
            }
            ConnectionState::Error => {
                return Err(WirelessError::InvalidState {
                    device_id: device_id.to_string(),
                    state: ConnectionState::Error,
                });
            }
            _ => {}
        }

        let task = self.scheduler.schedule_once(
            WirelessTask::CompletePairing(device_id.to_string()),
            self.config.pairing_timeout_ms,
            self.now_ms,
        )?;
        device.connection_state = ConnectionState::Pairing;

        info!(device = %device.device_name, task, "starting pairing");
        self.events.emit(&WirelessEvent::ConnectionStateChanged {
            device_id: device_id.to_string(),
            state: ConnectionState::Pairing,
        });
        Ok(())
    }

    fn complete_pairing(&mut self, device_id: &str) {
        let Some(index) = self
            .available
            .iter()
            .position(|d| d.device_id == device_id && d.connection_state == ConnectionState::Pairing)
        else {
            debug!(device_id, "pairing completion for a device no longer pairing");
            return;
        };

        let mut device = self.available.remove(index);
        device.is_paired = true;
        device.paired_time = Some(self.clock.wall_time(self.now_ms));
        device.connection_state = ConnectionState::Paired;

        info!(device = %device.device_name, "pairing completed");
        self.paired.push(device);

        self.events.emit(&WirelessEvent::DevicePaired(device_id.to_string()));
        self.events.emit(&WirelessEvent::ConnectionStateChanged {
            device_id: device_id.to_string(),
            state: ConnectionState::Paired,
        });
        self.save_quietly();
    }

    pub fn unpair(&mut self, device_id: &str) -> Result<(), WirelessError> {
        let index = self
            .paired
            .iter()
            .position(|d| d.device_id == device_id)
            .ok_or_else(|| {
                error!(device_id, "device not found in paired devices");
                WirelessError::DeviceNotFound(device_id.to_string())
            })?;

        if self.paired[index].connection_state == ConnectionState::Connected {
            self.disconnect(device_id)?;
        }
        self.scheduler.cancel_where(|t| t.targets(device_id));

        let device = self.paired.remove(index);
        info!(device = %device.device_name, "unpaired device");
        self.events.emit(&WirelessEvent::DeviceUnpaired(device.device_id));
        self.save_quietly();
        Ok(())
    }

    pub fn connect(&mut self, device_id: &str) -> Result<(), WirelessError> {
        self.require_initialized()?;

        let device = self
            .paired
            .iter_mut()
            .find(|d| d.device_id == device_id)
            .ok_or_else(|| {
                error!(device_id, "device not found in paired devices");
                WirelessError::DeviceNotFound(device_id.to_string())
            })?;

        if !device.is_paired {
            return Err(WirelessError::NotPaired(device_id.to_string()));
        }
        match device.connection_state {
            ConnectionState::Connecting => {
                warn!(device_id, "device is already connecting");
                return Err(WirelessError::AlreadyConnecting(device_id.to_string()));
            }
            ConnectionState::Error => {
                return Err(WirelessError::InvalidState {
                    device_id: device_id.to_string(),
                    state: ConnectionState::Error,
                });
            }
            _ => {}
        }

        let task = self.scheduler.schedule_once(
            WirelessTask::CompleteConnection(device_id.to_string()),
            self.config.connection_timeout_ms,
            self.now_ms,
        )?;
        device.connection_state = ConnectionState::Connecting;

        info!(device = %device.device_name, task, "starting connection");
        self.events.emit(&WirelessEvent::ConnectionStateChanged {
            device_id: device_id.to_string(),
            state: ConnectionState::Connecting,
        });
        Ok(())
    }

    fn complete_connection(&mut self, device_id: &str) {
        let Some(device) = self
            .paired
            .iter_mut()
            .find(|d| d.device_id == device_id && d.connection_state == ConnectionState::Connecting)
        else {
            debug!(device_id, "connection completion for a device no longer connecting");
            return;
        };

        device.connection_state = ConnectionState::Connected;
        info!(device = %device.device_name, "connection completed");

        self.events.emit(&WirelessEvent::DeviceConnected(device_id.to_string()));
        self.events.emit(&WirelessEvent::ConnectionStateChanged {
            device_id: device_id.to_string(),
            state: ConnectionState::Connected,
        });
    }

    pub fn disconnect(&mut self, device_id: &str) -> Result<(), WirelessError> {
        let device = self
            .paired
            .iter_mut()
            .find(|d| d.device_id == device_id)
            .ok_or_else(|| WirelessError::DeviceNotFound(device_id.to_string()))?;

        if device.connection_state != ConnectionState::Connected {
            return Err(WirelessError::InvalidState {
                device_id: device_id.to_string(),
                state: device.connection_state,
            });
        }

        device.connection_state = ConnectionState::Disconnected;
        info!(device = %device.device_name, "disconnected device");

        self.events.emit(&WirelessEvent::DeviceDisconnected(device_id.to_string()));
        self.events.emit(&WirelessEvent::ConnectionStateChanged {
            device_id: device_id.to_string(),
            state: ConnectionState::Disconnected,
        });
        Ok(())
    }

    fn device_mut(&mut self, device_id: &str) -> Option<&mut WirelessDevice> {
        self.available
            .iter_mut()
            .chain(self.paired.iter_mut())
            .find(|d| d.device_id == device_id)
    }

    /// Force a device into `Error`, dropping any pending completion.
    pub fn simulate_device_fault(&mut self, device_id: &str) -> Result<(), WirelessError> {
        self.scheduler.cancel_where(|t| t.targets(device_id));
        let device = self
            .device_mut(device_id)
            .ok_or_else(|| WirelessError::DeviceNotFound(device_id.to_string()))?;
        device.connection_state = ConnectionState::Error;

        warn!(device_id, "device fault simulated");
        self.events.emit(&WirelessEvent::ConnectionStateChanged {
            device_id: device_id.to_string(),
            state: ConnectionState::Error,
        });
        Ok(())
    }

    /// Only way out of `Error`: back to `Disconnected`.
    pub fn reset_device(&mut self, device_id: &str) -> Result<(), WirelessError> {
        let device = self
            .device_mut(device_id)
            .ok_or_else(|| WirelessError::DeviceNotFound(device_id.to_string()))?;
        if device.connection_state != ConnectionState::Error {
            return Err(WirelessError::InvalidState {
                device_id: device_id.to_string(),
                state: device.connection_state,
            });
        }
        device.connection_state = ConnectionState::Disconnected;

        info!(device_id, "device reset");
        self.events.emit(&WirelessEvent::ConnectionStateChanged {
            device_id: device_id.to_string(),
            state: ConnectionState::Disconnected,
        });
        Ok(())
    }

    pub fn simulate_connection_error(&mut self, device_id: &str) {
        warn!(device_id, "connection error simulated");
        self.events.emit(&WirelessEvent::ConnectionError {
            device_id: device_id.to_string(),
            error: "Simulated connection error".to_string(),
        });
    }

    pub fn simulate_pairing_error(&mut self, device_id: &str) {
        warn!(device_id, "pairing error simulated");
        self.events.emit(&WirelessEvent::PairingError {
            device_id: device_id.to_string(),
            error: "Simulated pairing error".to_string(),
        });
    }

    fn update_signal_strengths(&mut self) {
        for device in self.available.iter_mut().chain(self.paired.iter_mut()) {
            let delta = self.rng.range_i32(-SIGNAL_WALK_STEP, SIGNAL_WALK_STEP);
            let next = (i32::from(device.signal_strength) + delta).clamp(SIGNAL_MIN, SIGNAL_MAX) as u8;
            if next != device.signal_strength {
                device.signal_strength = next;
                self.events.emit(&WirelessEvent::SignalStrengthChanged {
                    device_id: device.device_id.clone(),
                    strength: next,
                });
            }
        }
    }

    /// Set a device's signal strength, clamped to 0..=100.
    pub fn update_signal_strength(&mut self, device_id: &str, strength: i32) -> Result<(), WirelessError> {
        let strength = strength.clamp(SIGNAL_MIN, SIGNAL_MAX) as u8;
        let device = self
            .device_mut(device_id)
            .ok_or_else(|| WirelessError::DeviceNotFound(device_id.to_string()))?;
        device.signal_strength = strength;

        self.events.emit(&WirelessEvent::SignalStrengthChanged {
            device_id: device_id.to_string(),
            strength,
        });
        Ok(())
    }

    pub fn set_discovery_timeout(&mut self, seconds: u32) {
        self.config.discovery_timeout_s = seconds;
        info!(seconds, "discovery timeout set");
    }

    pub fn set_pairing_timeout(&mut self, timeout_ms: u64) {
        self.config.pairing_timeout_ms = timeout_ms;
        info!(timeout_ms, "pairing timeout set");
    }

    pub fn set_connection_timeout(&mut self, timeout_ms: u64) {
        self.config.connection_timeout_ms = timeout_ms;
        info!(timeout_ms, "connection timeout set");
    }

    pub fn enable_auto_reconnect(&mut self, enable: bool) {
        self.config.auto_reconnect = enable;
        info!(enabled = enable, "auto reconnect toggled");
    }

    pub fn config(&self) -> &WirelessConfig {
        &self.config
    }

    pub fn supported_profiles(&self) -> &[String] {
        &self.profile_catalogue
    }

    pub fn is_profile_supported(&self, profile: &str) -> bool {
        self.profile_catalogue.iter().any(|p| p.eq_ignore_ascii_case(profile))
    }

    pub fn enable_profile(&mut self, device_id: &str, profile: &str) -> Result<(), WirelessError> {
        let device = self
            .paired
            .iter()
            .find(|d| d.device_id == device_id)
            .ok_or_else(|| WirelessError::DeviceNotFound(device_id.to_string()))?;
        if !device.supports_profile(profile) {
            error!(device_id, profile, "profile not supported by device");
            return Err(WirelessError::ProfileNotSupported {
                device_id: device_id.to_string(),
                profile: profile.to_string(),
            });
        }
        info!(device_id, profile, "profile enabled");
        Ok(())
    }

    pub fn disable_profile(&mut self, device_id: &str, profile: &str) -> Result<(), WirelessError> {
        if !self.paired.iter().any(|d| d.device_id == device_id) {
            error!(device_id, "device not found for profile disable");
            return Err(WirelessError::DeviceNotFound(device_id.to_string()));
        }
        info!(device_id, profile, "profile disabled");
        Ok(())
    }

    pub fn available_devices(&self) -> &[WirelessDevice] {
        &self.available
    }

    pub fn paired_devices(&self) -> &[WirelessDevice] {
        &self.paired
    }

    pub fn device(&self, device_id: &str) -> Option<&WirelessDevice> {
        self.available
            .iter()
            .chain(self.paired.iter())
            .find(|d| d.device_id == device_id)
    }

    /// Look a device up by id, falling back to an exact display name match.
    pub fn find(&self, id_or_name: &str) -> Option<&WirelessDevice> {
        self.device(id_or_name).or_else(|| {
            self.available
                .iter()
                .chain(self.paired.iter())
                .find(|d| d.device_name == id_or_name)
        })
    }

    pub fn is_device_paired(&self, device_id: &str) -> bool {
        self.paired.iter().any(|d| d.device_id == device_id && d.is_paired)
    }

    pub fn connection_state(&self, device_id: &str) -> Option<ConnectionState> {
        self.device(device_id).map(|d| d.connection_state)
    }

    pub fn signal_strength(&self, device_id: &str) -> Option<u8> {
        self.device(device_id).map(|d| d.signal_strength)
    }

    pub fn faults(&self) -> &FaultManager {
        &self.faults
    }
}

impl Simulator for WirelessRegistry {
    type Event = WirelessEvent;

    fn now_ms(&self) -> u64 {
        self.now_ms
    }

    fn advance_to(&mut self, now_ms: u64) {
        while let Some((_, task, fired_at)) = self.scheduler.pop_due(now_ms) {
            self.now_ms = fired_at;
            match task {
                WirelessTask::Discovery => self.discovery_tick(),
                WirelessTask::SignalUpdate => self.update_signal_strengths(),
                WirelessTask::CompletePairing(id) => self.complete_pairing(&id),
                WirelessTask::CompleteConnection(id) => self.complete_connection(&id),
            }
        }
        self.now_ms = self.now_ms.max(now_ms);
    }

    fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&WirelessEvent) + Send + 'static,
    {
        self.events.subscribe(handler)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    fn inject_fault(&mut self, fault: FaultKind, enabled: bool) -> bool {
        match fault {
            FaultKind::BluetoothOff | FaultKind::Interference | FaultKind::LowBattery => {}
            _ => return false,
        }

        let changed = self.faults.set(fault, enabled, self.now_ms);
        if fault == FaultKind::BluetoothOff && enabled {
            self.stop_discovery();
            warn!("bluetooth turned off");
        } else if changed {
            info!(fault = fault.label(), enabled, "bluetooth fault simulation toggled");
        }
        true
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

    fn registry() -> WirelessRegistry {
        WirelessRegistry::new(
            WirelessConfig::default(),
            Arc::new(FixedEpochClock::from_unix_seconds(1_700_000_000)),
            SimRng::seeded(11),
        )
    }

    #[test]
    fn test_address_format() {
        let mut bt = registry();
        let address = bt.random_address();
        assert_eq!(address.len(), ADDRESS_LEN);
        let octets: Vec<&str> = address.split(':').collect();
        assert_eq!(octets.len(), ADDRESS_BYTES);
        for octet in octets {
            assert_eq!(octet.len(), 2);
            assert!(octet.chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
        }
    }

    #[test]
    fn test_enums_serialize_as_ordinals() {
        assert_eq!(serde_json::to_string(&ConnectionState::Paired).unwrap(), "5");
        assert_eq!(serde_json::to_string(&DeviceType::CarAudio).unwrap(), "3");
        let state: ConnectionState = serde_json::from_str("6").unwrap();
        assert_eq!(state, ConnectionState::Error);
        assert!(serde_json::from_str::<DeviceType>("7").is_err());
    }

    #[test]
    fn test_device_type_parsing() {
        assert_eq!("Car-Audio".parse::<DeviceType>().unwrap(), DeviceType::CarAudio);
        assert_eq!("car_audio".parse::<DeviceType>().unwrap(), DeviceType::CarAudio);
        assert_eq!("phone".parse::<DeviceType>().unwrap(), DeviceType::Phone);
        assert!("toaster".parse::<DeviceType>().is_err());
    }

    #[test]
    fn test_generated_ids_unique() {
        let mut bt = registry();
        let ids = bt.spawn_demo_devices();
        let mut sorted = ids.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), ids.len());
        assert_eq!(bt.available_devices().len(), DEMO_DEVICES.len());
    }

    #[test]
    fn test_error_state_needs_reset() {
        let mut bt = registry();
        bt.initialize().unwrap();
        let id = bt.simulate_device_appearance("JBL Flip 6", DeviceType::Speaker);

        bt.simulate_device_fault(&id).unwrap();
        assert!(bt.pair(&id).is_err());
        bt.advance(60_000);
        assert_eq!(bt.connection_state(&id), Some(ConnectionState::Error));

        bt.reset_device(&id).unwrap();
        assert_eq!(bt.connection_state(&id), Some(ConnectionState::Disconnected));
        assert!(bt.reset_device(&id).is_err());
    }
}
