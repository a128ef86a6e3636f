use crate::reading::SourceKind;
use thiserror::Error;

/// Failures reported by a location source.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// Source cannot be used on this device (hardware absent, permission denied)
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// Source stopped delivering mid-session
    #[error("Source failed: {0}")]
    Runtime(String),

    /// Geolocation or reverse-geocoding request failed
    #[error("Lookup failed: {0}")]
    Lookup(String),

    /// Provider answered with coordinates outside the valid range
    #[error("Invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },

    /// A source was handed to the controller in the other source's slot
    #[error("Expected a {expected:?} source, got {found:?}")]
    WrongKind {
        expected: SourceKind,
        found: SourceKind,
    },
}

/// Failures while writing a reading to the remote datastore.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PublishError {
    #[error("Invalid datastore URL: {0}")]
    InvalidUrl(String),

    #[error("{0}")]
    Status(u16),

    #[error("{0}")]
    Transport(String),

    #[error("Encoding failed: {0}")]
    Encode(String),
}

pub type SourceResult<T> = Result<T, SourceError>;
