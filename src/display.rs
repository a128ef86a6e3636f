use crate::session::TrackingSession;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub const METHOD_GPS_READY: &str = "GPS Ready (High Accuracy)";
pub const METHOD_GPS: &str = "Using GPS (High Accuracy)";
pub const METHOD_IP: &str = "Using IP Geolocation (Low Accuracy)";
pub const METHOD_GPS_FAILED: &str = "GPS failed, using IP Geolocation";

/// Plain strings the presentation shell renders
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct DisplayText {
    pub status: String,
    pub method: String,
    pub accuracy: String,
    pub coordinates: String,
    pub address: String,
}

impl DisplayText {
    pub fn new() -> Self {
        Self {
            status: "Ready to start tracking".to_string(),
            method: "Checking location services...".to_string(),
            accuracy: "Accuracy: Unknown".to_string(),
            coordinates: "Coordinates will appear here".to_string(),
            address: "Address will appear here".to_string(),
        }
    }

    fn fields(&self) -> [(&'static str, &str); 5] {
        [
            ("status", self.status.as_str()),
            ("method", self.method.as_str()),
            ("accuracy", self.accuracy.as_str()),
            ("coordinates", self.coordinates.as_str()),
            ("address", self.address.as_str()),
        ]
    }

    /// Fields that differ from `previous` (all of them when there is none)
    pub fn changes_since(&self, previous: Option<&DisplayText>) -> Vec<(&'static str, &str)> {
        match previous {
            None => self.fields().to_vec(),
            Some(prev) => self
                .fields()
                .into_iter()
                .zip(prev.fields())
                .filter(|((_, now), (_, before))| now != before)
                .map(|(field, _)| field)
                .collect(),
        }
    }
}

impl Default for DisplayText {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only snapshot published by the controller after every change
#[derive(Serialize, Clone, Debug)]
pub struct TrackerView {
    pub timestamp: f64,
    pub session: TrackingSession,
    pub display: DisplayText,
    pub precise_available: bool,
    pub timeout_armed: bool,
}

impl TrackerView {
    pub fn new(
        session: TrackingSession,
        display: DisplayText,
        precise_available: bool,
        timeout_armed: bool,
    ) -> Self {
        Self {
            timestamp: current_timestamp(),
            session,
            display,
            precise_available,
            timeout_armed,
        }
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DeviceIdentity;

    #[test]
    fn test_changes_since() {
        let before = DisplayText::new();
        assert_eq!(before.changes_since(None).len(), 5);

        let mut after = before.clone();
        after.status = "IP location updated".to_string();
        after.accuracy = "Accuracy: ~1000 meters (IP-based)".to_string();

        let changes = after.changes_since(Some(&before));
        assert_eq!(
            changes,
            vec![
                ("status", "IP location updated"),
                ("accuracy", "Accuracy: ~1000 meters (IP-based)"),
            ]
        );
        assert!(after.changes_since(Some(&after)).is_empty());
    }

    #[test]
    fn test_view_save() {
        let session = TrackingSession::new(DeviceIdentity::from_input(Some("dev")));
        let view = TrackerView::new(session, DisplayText::new(), true, false);

        let path = std::env::temp_dir().join(format!("tracker_view_{}.json", std::process::id()));
        view.save(&path).unwrap();

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["session"]["device_id"], "dev");
        assert_eq!(saved["session"]["state"], "IDLE");
        assert_eq!(saved["display"]["status"], "Ready to start tracking");
        assert_eq!(saved["precise_available"], true);
        let _ = std::fs::remove_file(&path);
    }
}
