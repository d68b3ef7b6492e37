//! # AutoDash Device Simulation Core
//!
//! Mock peripherals for an automotive dashboard: an environmental sensor on
//! an emulated I2C bus, removable USB storage with a media index, and a
//! Bluetooth device registry with pairing and connection state.
//!
//! ## Features
//!
//! - **Virtual time**: every timer lives in an explicit [`scheduler::TaskScheduler`];
//!   nothing happens until the owner advances the clock
//! - **Observers**: plain callback subscription with unsubscribe tokens
//! - **Fault injection**: per-simulator flags that force error paths
//! - **Persistence**: registries and calibration as JSON in one data directory
//!
//! ## Quick Start
//!
//! ```no_run
//! use autodash::{DeviceHub, SystemClock};
//! use std::sync::Arc;
//!
//! let mut hub = DeviceHub::open("config", None, Arc::new(SystemClock));
//! hub.start().expect("hub start");
//!
//! // Five seconds later the first sensor sample is in.
//! hub.advance(5000);
//! println!("{:?}", hub.sensor().current_reading());
//!
//! hub.shutdown().expect("hub shutdown");
//! ```
//!
//! ## Architecture
//!
//! - [`hub`] - Application context owning the simulators
//! - [`devices`] - Sensor, storage and wireless simulators
//! - [`scheduler`] - Deadline-ordered virtual timers
//! - [`events`] - Observer registration
//! - [`fault`] - Fault flags and history
//! - [`persistence`] - JSON file stores
//! - [`config`] - Simulator configuration and data paths

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::new_without_default)]

pub mod clock;
pub mod config;
pub mod devices;
pub mod events;
pub mod fault;
pub mod hub;
pub mod persistence;
pub mod rng;
pub mod scheduler;

// Re-export main public types for convenience
pub use clock::{Clock, FixedEpochClock, SystemClock};
pub use config::{DataPaths, SimulatorConfig};
pub use devices::Simulator;
pub use fault::FaultKind;
pub use hub::{DeviceHub, HubError, HubStatus};
