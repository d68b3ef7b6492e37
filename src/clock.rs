//! Wall-clock mapping for virtual simulation time.
//!
//! Simulators keep time as elapsed milliseconds and only ask a [`Clock`]
//! when a record needs a human-readable timestamp.

use chrono::{DateTime, Duration, TimeZone, Utc};

pub trait Clock: Send + Sync {
    /// Wall-clock time corresponding to `elapsed_ms` of simulation time.
    fn wall_time(&self, elapsed_ms: u64) -> DateTime<Utc>;
}

/// Real time. Ignores the elapsed counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn wall_time(&self, _elapsed_ms: u64) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Deterministic clock: a fixed epoch plus elapsed simulation time.
#[derive(Debug, Clone, Copy)]
pub struct FixedEpochClock {
    epoch: DateTime<Utc>,
}

impl FixedEpochClock {
    pub fn new(epoch: DateTime<Utc>) -> Self {
        Self { epoch }
    }

    /// Epoch at a unix timestamp in seconds. Out-of-range values fall back to the unix epoch.
    pub fn from_unix_seconds(seconds: i64) -> Self {
        let epoch = Utc
            .timestamp_opt(seconds, 0)
            .single()
            .unwrap_or_default();
        Self { epoch }
    }
}

impl Clock for FixedEpochClock {
    fn wall_time(&self, elapsed_ms: u64) -> DateTime<Utc> {
        let offset = i64::try_from(elapsed_ms).unwrap_or(i64::MAX);
        self.epoch + Duration::milliseconds(offset)
    }
}
