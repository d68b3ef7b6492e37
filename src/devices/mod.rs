pub mod disk;
pub mod media;
pub mod sensor;
pub mod storage;
pub mod watcher;
pub mod wireless;

pub use sensor::{Quantity, SensorEvent, SensorReading, SensorSimulator};
pub use storage::{MediaFile, StorageDevice, StorageEvent, StorageRegistry};
pub use wireless::{ConnectionState, DeviceType, WirelessDevice, WirelessEvent, WirelessRegistry};

use crate::events::SubscriptionId;
use crate::fault::FaultKind;

/// Common surface of the three peripheral simulators.
///
/// Time only moves when the owner calls [`Simulator::advance_to`]; every
/// timer callback runs inside that call, in deadline order.
pub trait Simulator {
    type Event;

    /// Current simulation time in milliseconds.
    fn now_ms(&self) -> u64;

    /// Run every task due up to `now_ms`, then settle the clock there.
    fn advance_to(&mut self, now_ms: u64);

    fn advance(&mut self, dt_ms: u64) {
        let target = self.now_ms().saturating_add(dt_ms);
        self.advance_to(target);
    }

    fn subscribe<F>(&mut self, handler: F) -> SubscriptionId
    where
        F: FnMut(&Self::Event) + Send + 'static;

    fn unsubscribe(&mut self, id: SubscriptionId) -> bool;

    /// Toggle a fault flag. Returns false for kinds this simulator does not model.
    fn inject_fault(&mut self, fault: FaultKind, enabled: bool) -> bool;

    fn clear_faults(&mut self);

    fn is_healthy(&self) -> bool;
}
