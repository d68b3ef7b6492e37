use heapless::Vec;
use serde::{Deserialize, Serialize};

const MAX_FAULT_HISTORY: usize = 64;
const MAX_ACTIVE_FAULTS: usize = 16;

/// Injectable fault toggles across all simulators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaultKind {
    // Sensor bus
    ConnectionError,
    SensorFailure,
    DataCorruption,
    // Removable storage
    MountError,
    FileSystemError,
    CorruptedFiles,
    // Bluetooth stack
    BluetoothOff,
    Interference,
    LowBattery,
}

impl FaultKind {
    pub fn label(self) -> &'static str {
        match self {
            FaultKind::ConnectionError => "connection error",
            FaultKind::SensorFailure => "sensor failure",
            FaultKind::DataCorruption => "data corruption",
            FaultKind::MountError => "mount error",
            FaultKind::FileSystemError => "file system error",
            FaultKind::CorruptedFiles => "corrupted files",
            FaultKind::BluetoothOff => "bluetooth off",
            FaultKind::Interference => "interference",
            FaultKind::LowBattery => "low battery",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultRecord {
    pub id: u32,
    pub kind: FaultKind,
    pub activated_at_ms: u64,
    pub cleared_at_ms: Option<u64>,
}

/// Active fault flags of one simulator plus a bounded activation history.
#[derive(Debug)]
pub struct FaultManager {
    active: Vec<FaultKind, MAX_ACTIVE_FAULTS>,
    fault_history: Vec<FaultRecord, MAX_FAULT_HISTORY>,
    next_fault_id: u32,
}

impl FaultManager {
    pub fn new() -> Self {
        Self {
            active: Vec::new(),
            fault_history: Vec::new(),
            next_fault_id: 1,
        }
    }

    pub fn is_active(&self, kind: FaultKind) -> bool {
        self.active.contains(&kind)
    }

    /// Toggle a fault. Returns true when the flag actually changed.
    pub fn set(&mut self, kind: FaultKind, enabled: bool, timestamp_ms: u64) -> bool {
        match (enabled, self.is_active(kind)) {
            (true, false) => {
                // One slot per kind at most, the capacity cannot be hit.
                let _ = self.active.push(kind);
                self.record_activation(kind, timestamp_ms);
                true
            }
            (false, true) => {
                self.active.retain(|k| *k != kind);
                self.record_clearance(kind, timestamp_ms);
                true
            }
            _ => false,
        }
    }

    fn record_activation(&mut self, kind: FaultKind, timestamp_ms: u64) {
        let record = FaultRecord {
            id: self.next_fault_id,
            kind,
            activated_at_ms: timestamp_ms,
            cleared_at_ms: None,
        };
        self.next_fault_id = self.next_fault_id.wrapping_add(1);

        if self.fault_history.is_full() {
            self.fault_history.remove(0);
        }
        let _ = self.fault_history.push(record);
    }

    fn record_clearance(&mut self, kind: FaultKind, timestamp_ms: u64) {
        if let Some(record) = self
            .fault_history
            .iter_mut()
            .rev()
            .find(|r| r.kind == kind && r.cleared_at_ms.is_none())
        {
            record.cleared_at_ms = Some(timestamp_ms);
        }
    }

    /// Clear every active fault.
    pub fn clear_all(&mut self, timestamp_ms: u64) {
        let active: std::vec::Vec<FaultKind> = self.active.iter().copied().collect();
        for kind in active {
            self.set(kind, false, timestamp_ms);
        }
    }

    pub fn active_faults(&self) -> &[FaultKind] {
        &self.active
    }

    pub fn get_fault_history(&self) -> &[FaultRecord] {
        &self.fault_history
    }

    pub fn clear_resolved_history(&mut self) {
        self.fault_history.retain(|r| r.cleared_at_ms.is_none());
    }
}

impl Default for FaultManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_records_history() {
        let mut faults = FaultManager::new();
        assert!(faults.set(FaultKind::SensorFailure, true, 100));
        assert!(!faults.set(FaultKind::SensorFailure, true, 150));
        assert!(faults.is_active(FaultKind::SensorFailure));

        assert!(faults.set(FaultKind::SensorFailure, false, 400));
        assert!(!faults.is_active(FaultKind::SensorFailure));

        let history = faults.get_fault_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].activated_at_ms, 100);
        assert_eq!(history[0].cleared_at_ms, Some(400));
    }

    #[test]
    fn test_clear_all() {
        let mut faults = FaultManager::new();
        faults.set(FaultKind::MountError, true, 1);
        faults.set(FaultKind::CorruptedFiles, true, 2);
        faults.clear_all(10);

        assert!(faults.active_faults().is_empty());
        assert!(faults.get_fault_history().iter().all(|r| r.cleared_at_ms == Some(10)));

        faults.clear_resolved_history();
        assert!(faults.get_fault_history().is_empty());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut faults = FaultManager::new();
        for i in 0..(MAX_FAULT_HISTORY as u64 + 10) {
            faults.set(FaultKind::Interference, true, i);
            faults.set(FaultKind::Interference, false, i);
        }
        assert_eq!(faults.get_fault_history().len(), MAX_FAULT_HISTORY);
        assert_eq!(faults.get_fault_history()[0].id, 11);
    }
}
