use crate::reading::{LocationReading, SourceKind};
use serde::Serialize;
use uuid::Uuid;

/// Fallback controller states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackerState {
    /// Not yet started
    Idle,
    /// Waiting on (or receiving) hardware fixes, timeout may be armed
    AcquiringPrecise,
    /// Polling the network source; terminal fallback
    AcquiringNetwork,
    /// Explicitly stopped; next start goes through Idle again
    Stopped,
}

/// Identifier the datastore record is keyed by. Fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DeviceIdentity {
    id: String,
}

impl DeviceIdentity {
    /// Use the trimmed user input, or a generated id when it is blank.
    pub fn from_input(input: Option<&str>) -> Self {
        match input.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => Self { id: id.to_string() },
            None => Self::generated(),
        }
    }

    /// First eight hex digits of a random v4 UUID
    pub fn generated() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self { id }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.id)
    }
}

/// Per-session counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub readings_received: u64,
    pub publish_succeeded: u64,
    pub publish_failed: u64,
}

/// Tracking session. Only the fallback controller mutates it; everyone else
/// sees snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct TrackingSession {
    pub device_id: DeviceIdentity,
    pub active: bool,
    pub state: TrackerState,
    pub last_reading: Option<LocationReading>,
    pub stats: SessionStats,
}

impl TrackingSession {
    pub fn new(device_id: DeviceIdentity) -> Self {
        Self {
            device_id,
            active: false,
            state: TrackerState::Idle,
            last_reading: None,
            stats: SessionStats::default(),
        }
    }

    /// Source currently armed, if any
    pub fn current_source(&self) -> Option<SourceKind> {
        match self.state {
            TrackerState::AcquiringPrecise => Some(SourceKind::Precise),
            TrackerState::AcquiringNetwork => Some(SourceKind::Network),
            TrackerState::Idle | TrackerState::Stopped => None,
        }
    }

    /// Stopped -> Idle, with readings and counters cleared.
    pub fn begin(&mut self) {
        self.last_reading = None;
        self.stats = SessionStats::default();
        self.state = TrackerState::Idle;
        self.active = true;
    }

    pub fn switch_to(&mut self, state: TrackerState) {
        self.state = state;
    }

    pub fn record_reading(&mut self, reading: LocationReading) {
        self.stats.readings_received += 1;
        self.last_reading = Some(reading);
    }

    pub fn record_publish(&mut self, succeeded: bool) {
        if succeeded {
            self.stats.publish_succeeded += 1;
        } else {
            self.stats.publish_failed += 1;
        }
    }

    /// Any state -> Stopped. The session data is discarded.
    pub fn reset(&mut self) {
        self.active = false;
        self.state = TrackerState::Stopped;
        self.last_reading = None;
        self.stats = SessionStats::default();
    }
}
