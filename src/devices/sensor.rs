use super::Simulator;
use crate::clock::Clock;
use crate::config::SensorConfig;
use crate::events::{EventBus, SubscriptionId};
use crate::fault::{FaultKind, FaultManager};
use crate::persistence::{JsonStore, PersistenceError};
use crate::rng::SimRng;
use crate::scheduler::{SchedulerError, TaskId, TaskScheduler};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use static_assertions::const_assert;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

const TEMP_BOUNDS_C: (f64, f64) = (-40.0, 80.0);
const HUMIDITY_BOUNDS_PCT: (f64, f64) = (0.0, 100.0);
const PRESSURE_BOUNDS_HPA: (f64, f64) = (800.0, 1200.0);
const LIGHT_BOUNDS_LUX: (f64, f64) = (0.0, 10_000.0);

// Corruption noise: (k - 50) * 0.1 for k in 0..100
const NOISE_SPAN: u32 = 100;
const NOISE_CENTER: f64 = 50.0;
const NOISE_SCALE: f64 = 0.1;

const REG_TEMPERATURE: u8 = 0x00;
const REG_HUMIDITY: u8 = 0x01;
const REG_PRESSURE_HI: u8 = 0x02;
const REG_PRESSURE_LO: u8 = 0x03;
const REG_LIGHT_HI: u8 = 0x04;
const REG_LIGHT_LO: u8 = 0x05;
const SENSOR_REGISTER_COUNT: usize = 6;

const_assert!(REG_LIGHT_LO as usize + 1 == SENSOR_REGISTER_COUNT);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Quantity {
    Temperature,
    Humidity,
    Pressure,
    Light,
}

impl Quantity {
    pub const ALL: [Quantity; 4] = [
        Quantity::Temperature,
        Quantity::Humidity,
        Quantity::Pressure,
        Quantity::Light,
    ];

    /// Absolute physical clamp range.
    pub fn physical_bounds(self) -> (f64, f64) {
        match self {
            Quantity::Temperature => TEMP_BOUNDS_C,
            Quantity::Humidity => HUMIDITY_BOUNDS_PCT,
            Quantity::Pressure => PRESSURE_BOUNDS_HPA,
            Quantity::Light => LIGHT_BOUNDS_LUX,
        }
    }

    pub fn default_range(self) -> (f64, f64) {
        match self {
            Quantity::Temperature => (18.0, 25.0),
            Quantity::Humidity => (40.0, 60.0),
            Quantity::Pressure => (1013.0, 1013.5),
            Quantity::Light => (100.0, 1000.0),
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Quantity::Temperature => "°C",
            Quantity::Humidity => "%",
            Quantity::Pressure => "hPa",
            Quantity::Light => "lux",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Quantity::Temperature => "temperature",
            Quantity::Humidity => "humidity",
            Quantity::Pressure => "pressure",
            Quantity::Light => "light",
        };
        f.write_str(name)
    }
}

impl FromStr for Quantity {
    type Err = SensorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "temperature" | "temp" => Ok(Quantity::Temperature),
            "humidity" => Ok(Quantity::Humidity),
            "pressure" => Ok(Quantity::Pressure),
            "light" | "light_level" => Ok(Quantity::Light),
            other => Err(SensorError::UnknownQuantity(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub light_level: f64,
    pub is_valid: bool,
    pub timestamp: Option<DateTime<Utc>>,
}

impl SensorReading {
    pub fn value(&self, quantity: Quantity) -> f64 {
        match quantity {
            Quantity::Temperature => self.temperature,
            Quantity::Humidity => self.humidity,
            Quantity::Pressure => self.pressure,
            Quantity::Light => self.light_level,
        }
    }

    fn value_mut(&mut self, quantity: Quantity) -> &mut f64 {
        match quantity {
            Quantity::Temperature => &mut self.temperature,
            Quantity::Humidity => &mut self.humidity,
            Quantity::Pressure => &mut self.pressure,
            Quantity::Light => &mut self.light_level,
        }
    }
}

/// Calibration offsets and sampling ranges, persisted across restarts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorCalibration {
    pub temperature_offset: f64,
    pub humidity_offset: f64,
    pub pressure_offset: f64,
    pub light_offset: f64,
    pub temperature_range: [f64; 2],
    pub humidity_range: [f64; 2],
    pub pressure_range: [f64; 2],
    pub light_range: [f64; 2],
}

impl SensorCalibration {
    pub fn offset(&self, quantity: Quantity) -> f64 {
        match quantity {
            Quantity::Temperature => self.temperature_offset,
            Quantity::Humidity => self.humidity_offset,
            Quantity::Pressure => self.pressure_offset,
            Quantity::Light => self.light_offset,
        }
    }

    fn offset_mut(&mut self, quantity: Quantity) -> &mut f64 {
        match quantity {
            Quantity::Temperature => &mut self.temperature_offset,
            Quantity::Humidity => &mut self.humidity_offset,
            Quantity::Pressure => &mut self.pressure_offset,
            Quantity::Light => &mut self.light_offset,
        }
    }

    pub fn range(&self, quantity: Quantity) -> (f64, f64) {
        let [min, max] = match quantity {
            Quantity::Temperature => self.temperature_range,
            Quantity::Humidity => self.humidity_range,
            Quantity::Pressure => self.pressure_range,
            Quantity::Light => self.light_range,
        };
        (min, max)
    }

    fn range_mut(&mut self, quantity: Quantity) -> &mut [f64; 2] {
        match quantity {
            Quantity::Temperature => &mut self.temperature_range,
            Quantity::Humidity => &mut self.humidity_range,
            Quantity::Pressure => &mut self.pressure_range,
            Quantity::Light => &mut self.light_range,
        }
    }
}

impl Default for SensorCalibration {
    fn default() -> Self {
        let range = |q: Quantity| {
            let (min, max) = q.default_range();
            [min, max]
        };
        Self {
            temperature_offset: 0.0,
            humidity_offset: 0.0,
            pressure_offset: 0.0,
            light_offset: 0.0,
            temperature_range: range(Quantity::Temperature),
            humidity_range: range(Quantity::Humidity),
            pressure_range: range(Quantity::Pressure),
            light_range: range(Quantity::Light),
        }
    }
}

/// One row of the append-only sensor data log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorLogEntry {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub light_level: f64,
}

/// Raw dump of the emulated register file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterSnapshot {
    pub address: u8,
    #[serde(with = "serde_bytes")]
    pub registers: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    ReadingUpdated(SensorReading),
    ConnectionError(String),
    SensorError(String),
    CalibrationChanged,
}

#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor at address {address:#04x} is not responding")]
    ConnectionFailed { address: u8 },
    #[error("sensor bus not connected")]
    NotConnected,
    #[error("invalid {quantity} range [{min}, {max}]")]
    InvalidRange { quantity: Quantity, min: f64, max: f64 },
    #[error("invalid {quantity} calibration offset {offset}")]
    InvalidOffset { quantity: Quantity, offset: f64 },
    #[error("update interval must be non-zero")]
    InvalidInterval,
    #[error("unknown quantity '{0}'")]
    UnknownQuantity(String),
    #[error("no calibration store attached")]
    NoStore,
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SensorTask {
    Sample,
}

/// Mock environmental sensor on an emulated I2C bus.
pub struct SensorSimulator {
    config: SensorConfig,
    clock: Arc<dyn Clock>,
    rng: SimRng,
    scheduler: TaskScheduler<SensorTask>,
    sample_task: Option<TaskId>,
    now_ms: u64,

    reading: SensorReading,
    calibration: SensorCalibration,
    connected: bool,
    address: u8,
    faults: FaultManager,
    scratch_registers: [u8; 256],

    calibration_store: Option<JsonStore<SensorCalibration>>,
    log_store: Option<JsonStore<Vec<SensorLogEntry>>>,
    events: EventBus<SensorEvent>,
}

impl SensorSimulator {
    pub fn new(config: SensorConfig, clock: Arc<dyn Clock>, rng: SimRng) -> Self {
        let address = config.bus_address;
        Self {
            config,
            clock,
            rng,
            scheduler: TaskScheduler::new(),
            sample_task: None,
            now_ms: 0,
            reading: SensorReading::default(),
            calibration: SensorCalibration::default(),
            connected: false,
            address,
            faults: FaultManager::new(),
            scratch_registers: [0; 256],
            calibration_store: None,
            log_store: None,
            events: EventBus::new(),
        }
    }

    /// Attach on-disk calibration and data log files and load the calibration.
    pub fn with_storage(mut self, calibration_path: impl Into<PathBuf>, log_path: impl Into<PathBuf>) -> Self {
        self.calibration_store = Some(JsonStore::new(calibration_path));
        self.log_store = Some(JsonStore::new(log_path));
        self.load_calibration();
        self
    }

    pub fn connect(&mut self, address: u8) -> Result<(), SensorError> {
        if self.faults.is_active(FaultKind::ConnectionError) {
            error!(address = format_args!("{address:#04x}"), "failed to connect to sensor");
            self.events.emit(&SensorEvent::ConnectionError(
                "I2C connection failed - device not responding".to_string(),
            ));
            return Err(SensorError::ConnectionFailed { address });
        }

        self.address = address;
        self.connected = true;
        self.restart_sampling()?;

        info!(address = format_args!("{address:#04x}"), "connected to sensor");
        Ok(())
    }

    pub fn disconnect(&mut self) {
        if let Some(id) = self.sample_task.take() {
            self.scheduler.cancel(id);
        }
        self.connected = false;
        info!("sensor disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.connected && !self.faults.is_active(FaultKind::ConnectionError)
    }

    fn restart_sampling(&mut self) -> Result<(), SensorError> {
        if let Some(id) = self.sample_task.take() {
            self.scheduler.cancel(id);
        }
        let id = self
            .scheduler
            .schedule_periodic(SensorTask::Sample, self.config.update_interval_ms, self.now_ms)?;
        self.sample_task = Some(id);
        Ok(())
    }

    pub fn set_update_interval(&mut self, interval_ms: u64) -> Result<(), SensorError> {
        if interval_ms == 0 {
            return Err(SensorError::InvalidInterval);
        }
        self.config.update_interval_ms = interval_ms;
        if self.sample_task.is_some() {
            self.restart_sampling()?;
        }
        info!(interval_ms, "sensor update interval changed");
        Ok(())
    }

    pub fn update_interval_ms(&self) -> u64 {
        self.config.update_interval_ms
    }

    pub fn set_range(&mut self, quantity: Quantity, min: f64, max: f64) -> Result<(), SensorError> {
        if !min.is_finite() || !max.is_finite() || min > max {
            return Err(SensorError::InvalidRange { quantity, min, max });
        }
        *self.calibration.range_mut(quantity) = [min, max];
        info!(%quantity, min, max, unit = quantity.unit(), "sampling range changed");
        Ok(())
    }

    pub fn range(&self, quantity: Quantity) -> (f64, f64) {
        self.calibration.range(quantity)
    }

    pub fn calibrate(&mut self, quantity: Quantity, offset: f64) -> Result<(), SensorError> {
        if !offset.is_finite() {
            return Err(SensorError::InvalidOffset { quantity, offset });
        }
        *self.calibration.offset_mut(quantity) = offset;
        info!(%quantity, offset, unit = quantity.unit(), "calibration offset set");
        self.events.emit(&SensorEvent::CalibrationChanged);
        Ok(())
    }

    pub fn calibration(&self) -> &SensorCalibration {
        &self.calibration
    }

    pub fn save_calibration(&self) -> Result<(), SensorError> {
        let store = self.calibration_store.as_ref().ok_or(SensorError::NoStore)?;
        match store.save(&self.calibration) {
            Ok(()) => {
                info!("calibration data saved");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "failed to save calibration data");
                Err(e.into())
            }
        }
    }

    /// Reload calibration from disk. Missing or malformed files keep defaults.
    pub fn load_calibration(&mut self) {
        if let Some(store) = &self.calibration_store {
            let mut loaded = store.load_or_default();
            for quantity in Quantity::ALL {
                let (min, max) = loaded.range(quantity);
                if !min.is_finite() || !max.is_finite() || min > max {
                    warn!(%quantity, min, max, "ignoring invalid stored range");
                    let (dmin, dmax) = quantity.default_range();
                    *loaded.range_mut(quantity) = [dmin, dmax];
                }
            }
            self.calibration = loaded;
            debug!("calibration data loaded");
        }
    }

    pub fn enable_data_logging(&mut self, enable: bool) {
        self.config.data_logging = enable;
        info!(enabled = enable, "sensor data logging toggled");
    }

    pub fn current_reading(&self) -> SensorReading {
        self.reading
    }

    pub fn value(&self, quantity: Quantity) -> f64 {
        self.reading.value(quantity)
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn read_register(&self, register: u8) -> Result<u8, SensorError> {
        if !self.is_connected() {
            error!(register, "cannot read register - device not connected");
            return Err(SensorError::NotConnected);
        }

        let r = &self.reading;
        let value = match register {
            REG_TEMPERATURE => (r.temperature * 2.0) as u8,
            REG_HUMIDITY => (r.humidity * 2.55) as u8,
            REG_PRESSURE_HI => ((r.pressure as i32 >> 8) & 0xFF) as u8,
            REG_PRESSURE_LO => (r.pressure as i32 & 0xFF) as u8,
            REG_LIGHT_HI => ((r.light_level as i32 >> 8) & 0xFF) as u8,
            REG_LIGHT_LO => (r.light_level as i32 & 0xFF) as u8,
            other => self.scratch_registers[usize::from(other)],
        };
        Ok(value)
    }

    pub fn write_register(&mut self, register: u8, value: u8) -> Result<(), SensorError> {
        if !self.is_connected() {
            error!(register, "cannot write register - device not connected");
            return Err(SensorError::NotConnected);
        }
        debug!(register = format_args!("{register:#04x}"), value = format_args!("{value:#04x}"), "register write");
        self.scratch_registers[usize::from(register)] = value;
        Ok(())
    }

    pub fn register_snapshot(&self) -> Result<RegisterSnapshot, SensorError> {
        let registers = (0..SENSOR_REGISTER_COUNT as u8)
            .map(|reg| self.read_register(reg))
            .collect::<Result<Vec<u8>, _>>()?;
        Ok(RegisterSnapshot {
            address: self.address,
            registers,
        })
    }

    pub fn faults(&self) -> &FaultManager {
        &self.faults
    }

    fn sample(&mut self) {
        if self.faults.is_active(FaultKind::SensorFailure) {
            self.reading.is_valid = false;
            error!("sensor failure detected - invalid data");
            self.events
                .emit(&SensorEvent::SensorError("Sensor failure - invalid readings".to_string()));
            return;
        }

        let mut reading = SensorReading::default();
        for quantity in Quantity::ALL {
            let (min, max) = self.calibration.range(quantity);
            *reading.value_mut(quantity) = self.rng.uniform(min, max);
        }

        if self.faults.is_active(FaultKind::DataCorruption) {
            reading.temperature += self.corruption_noise();
            reading.humidity += self.corruption_noise();
        }

        for quantity in Quantity::ALL {
            let (lo, hi) = quantity.physical_bounds();
            let value = reading.value_mut(quantity);
            *value = (*value + self.calibration.offset(quantity)).clamp(lo, hi);
        }

        reading.is_valid = true;
        reading.timestamp = Some(self.clock.wall_time(self.now_ms));
        self.reading = reading;

        if self.config.data_logging {
            self.log_reading();
        }

        debug!(
            temperature = format_args!("{:.1}", reading.temperature),
            humidity = format_args!("{:.1}", reading.humidity),
            pressure = format_args!("{:.1}", reading.pressure),
            light = format_args!("{:.0}", reading.light_level),
            "sensor data updated"
        );
        self.events.emit(&SensorEvent::ReadingUpdated(reading));
    }

    fn corruption_noise(&mut self) -> f64 {
        (f64::from(self.rng.below(NOISE_SPAN)) - NOISE_CENTER) * NOISE_SCALE
    }

    fn log_reading(&self) {
        let (Some(store), Some(timestamp)) = (&self.log_store, self.reading.timestamp) else {
            return;
        };
        let entry = SensorLogEntry {
            timestamp,
            temperature: self.reading.temperature,
            humidity: self.reading.humidity,
            pressure: self.reading.pressure,
            light_level: self.reading.light_level,
        };
        if let Err(e) = store.append(entry) {
            warn!(error = %e, "failed to append sensor log");
        }
    }
}

impl Simulator for SensorSimulator {
    type Event = SensorEvent;

    fn now_ms(&self) -> u64 {
        self.now_ms
    }

    fn advance_to(&mut self, now_ms: u64) {
        while let Some((_, task, fired_at)) = self.scheduler.pop_due(now_ms) {
            self.now_ms = fired_at;
            match task {
                SensorTask::Sample => self.sample(),
            }
        }
        self.now_ms = self.now_ms.max(now_ms);
    }

    fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&SensorEvent) + Send + 'static,
    {
        self.events.subscribe(handler)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    fn inject_fault(&mut self, fault: FaultKind, enabled: bool) -> bool {
        match fault {
            FaultKind::ConnectionError | FaultKind::SensorFailure | FaultKind::DataCorruption => {}
            _ => return false,
        }

        if self.faults.set(fault, enabled, self.now_ms) {
            if enabled {
                warn!(fault = fault.label(), "sensor fault simulation enabled");
                match fault {
                    FaultKind::ConnectionError => self
                        .events
                        .emit(&SensorEvent::ConnectionError("Simulated I2C connection error".to_string())),
                    FaultKind::SensorFailure => self
                        .events
                        .emit(&SensorEvent::SensorError("Simulated sensor failure".to_string())),
                    _ => {}
                }
            } else {
                info!(fault = fault.label(), "sensor fault simulation disabled");
            }
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
