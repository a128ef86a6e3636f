//! Device location tracker.
//!
//! Acquires the device position from a precise (hardware) source, falls back
//! to network-address geolocation when no fix arrives in time, and overwrites
//! the device's record in a remote JSON datastore with each reading.

pub mod config;
pub mod controller;
pub mod display;
pub mod error;
pub mod geocode;
pub mod publisher;
pub mod reading;
pub mod session;
pub mod sources;

pub use config::TrackerConfig;
pub use controller::{Command, FallbackController};
pub use display::{DisplayText, TrackerView};
pub use error::{PublishError, SourceError, SourceResult};
pub use geocode::{NominatimGeocoder, ReverseGeocoder};
pub use publisher::{Ack, HttpTransport, PublishRecord, Publisher, ReqwestTransport};
pub use reading::{Accuracy, LocationReading, SourceKind};
pub use session::{DeviceIdentity, SessionStats, TrackerState, TrackingSession};
pub use sources::{LocationSource, SourceEvent};
