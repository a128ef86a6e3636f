use crate::error::{SourceError, SourceResult};
use chrono::Utc;
use serde::{Serialize, Serializer};

/// Fixed accuracy estimate for address-based lookups.
pub const NETWORK_ACCURACY_METERS: f64 = 1000.0;

/// Which acquisition strategy produced a reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceKind {
    /// Satellite positioning hardware
    Precise,
    /// Network-address geolocation
    Network,
}

/// Horizontal accuracy of a fix. Serializes as a number of meters or the
/// string `"Unknown"`, which is what the datastore record expects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Accuracy {
    Meters(f64),
    Unknown,
}

impl Accuracy {
    /// A missing estimate is recorded as 0 m, the provider default. Only a
    /// value that cannot be written as a JSON number becomes `Unknown`.
    pub fn from_reported(value: Option<f64>) -> Self {
        match value.unwrap_or(0.0) {
            m if m.is_finite() && m >= 0.0 => Accuracy::Meters(m),
            _ => Accuracy::Unknown,
        }
    }

    pub fn meters(&self) -> Option<f64> {
        match self {
            Accuracy::Meters(m) => Some(*m),
            Accuracy::Unknown => None,
        }
    }
}

impl Serialize for Accuracy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Accuracy::Meters(m) => serializer.serialize_f64(*m),
            Accuracy::Unknown => serializer.serialize_str("Unknown"),
        }
    }
}

/// One timestamped location observation. Fields are private so a reading
/// cannot change after construction, and construction validates coordinates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocationReading {
    latitude: f64,
    longitude: f64,
    accuracy: Accuracy,
    source: SourceKind,
    alternate: bool,
    timestamp: i64,
}

impl LocationReading {
    /// Reading from positioning hardware.
    pub fn precise(
        latitude: f64,
        longitude: f64,
        accuracy: Option<f64>,
        timestamp: i64,
    ) -> SourceResult<Self> {
        validate(latitude, longitude)?;
        Ok(Self {
            latitude,
            longitude,
            accuracy: Accuracy::from_reported(accuracy),
            source: SourceKind::Precise,
            alternate: false,
            timestamp,
        })
    }

    /// Reading from a geolocation service. `alternate` marks the fallback service.
    pub fn network(
        latitude: f64,
        longitude: f64,
        alternate: bool,
        timestamp: i64,
    ) -> SourceResult<Self> {
        validate(latitude, longitude)?;
        Ok(Self {
            latitude,
            longitude,
            accuracy: Accuracy::Meters(NETWORK_ACCURACY_METERS),
            source: SourceKind::Network,
            alternate,
            timestamp,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn accuracy(&self) -> Accuracy {
        self.accuracy
    }

    pub fn source(&self) -> SourceKind {
        self.source
    }

    pub fn is_alternate(&self) -> bool {
        self.alternate
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Method tag written to the datastore record
    pub fn method(&self) -> &'static str {
        match (self.source, self.alternate) {
            (SourceKind::Precise, _) => "GPS",
            (SourceKind::Network, false) => "IP",
            (SourceKind::Network, true) => "IP-alt",
        }
    }

    pub fn accuracy_text(&self) -> String {
        match (self.source, self.accuracy) {
            (SourceKind::Network, _) => {
                format!("~{:.0} meters (IP-based)", NETWORK_ACCURACY_METERS)
            }
            (SourceKind::Precise, Accuracy::Meters(m)) if m > 0.0 => format!("{:.1} meters", m),
            (SourceKind::Precise, _) => "Unknown".to_string(),
        }
    }

    pub fn coordinates_text(&self) -> String {
        format!("Lat: {:.8}\nLong: {:.8}", self.latitude, self.longitude)
    }
}

fn validate(lat: f64, lon: f64) -> SourceResult<()> {
    let valid = lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon);
    if valid {
        Ok(())
    } else {
        Err(SourceError::InvalidCoordinates { lat, lon })
    }
}

/// Seconds since the Unix epoch
pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}
