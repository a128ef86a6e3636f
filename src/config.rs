use std::time::Duration;

/// Wait this long for a first hardware fix before falling back.
pub const DEFAULT_GPS_TIMEOUT: Duration = Duration::from_secs(15);
/// Network polling period, also the "waiting for location" status period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Minimum spacing between hardware fix requests.
pub const DEFAULT_GPS_MIN_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Local Realtime Database emulator
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:9000";
pub const DEFAULT_PRIMARY_IP_URL: &str = "http://ip-api.com/json/";
pub const DEFAULT_ALTERNATE_IP_URL: &str = "https://ipinfo.io/json";
pub const DEFAULT_GEOCODE_URL: &str = "https://nominatim.openstreetmap.org/reverse";

pub const USER_AGENT: &str = concat!("location_tracker/", env!("CARGO_PKG_VERSION"));

/// Runtime settings for the tracker. The binary fills this from the command
/// line; tests build it directly.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub base_url: String,
    pub gps_timeout: Duration,
    pub poll_interval: Duration,
    pub gps_min_interval: Duration,
    pub lookup_timeout: Duration,
    pub primary_ip_url: String,
    pub alternate_ip_url: String,
    pub geocode_url: String,
    pub geocode: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            gps_timeout: DEFAULT_GPS_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            gps_min_interval: DEFAULT_GPS_MIN_INTERVAL,
            lookup_timeout: DEFAULT_LOOKUP_TIMEOUT,
            primary_ip_url: DEFAULT_PRIMARY_IP_URL.to_string(),
            alternate_ip_url: DEFAULT_ALTERNATE_IP_URL.to_string(),
            geocode_url: DEFAULT_GEOCODE_URL.to_string(),
            geocode: true,
        }
    }
}

/// Client for geolocation and address lookups. Falls back to a plain client
/// if the builder rejects the settings.
pub fn lookup_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Client for datastore writes. No request timeout is set: a hung write
/// stalls the controller loop until the connection gives up.
pub fn publish_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}
