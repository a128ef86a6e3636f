use super::{EventSender, LocationSource, SourceEvent, TaskSlot};
use crate::error::{SourceError, SourceResult};
use crate::reading::{now_timestamp, LocationReading, SourceKind};
use log::{debug, warn};
use serde::Deserialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{interval, MissedTickBehavior};

pub const TERMUX_LOCATION: &str = "termux-location";

/// Subset of the JSON object printed by `termux-location`
#[derive(Debug, Deserialize)]
struct TermuxFix {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    accuracy: Option<f64>,
}

/// Satellite positioning through the Termux:API `termux-location` command.
///
/// Each interval runs one `termux-location -p gps -r once` request. A command
/// that cannot be spawned, exits non-zero, or prints something other than a
/// fix ends the acquisition task with a [`SourceEvent::Failure`].
pub struct TermuxGpsSource {
    command: String,
    force: bool,
    task: TaskSlot,
}

impl TermuxGpsSource {
    pub fn new() -> Self {
        Self::with_command(TERMUX_LOCATION)
    }

    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            force: false,
            task: TaskSlot::default(),
        }
    }

    /// Skip the Android platform check (e.g. a Termux-compatible shim on Linux).
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }
}

impl Default for TermuxGpsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl LocationSource for TermuxGpsSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Precise
    }

    fn initialize(&mut self) -> SourceResult<()> {
        if !(cfg!(target_os = "android") || self.force) {
            return Err(SourceError::Unavailable(
                "satellite positioning is only available on Android".to_string(),
            ));
        }

        std::process::Command::new(&self.command)
            .arg("-h")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| SourceError::Unavailable(format!("{}: {}", self.command, e)))?;
        Ok(())
    }

    fn start(&mut self, interval: Duration, events: EventSender) -> SourceResult<()> {
        self.task.spawn(acquire_loop(self.command.clone(), interval, events))
    }

    fn stop(&mut self) {
        if self.task.abort() {
            debug!("[gps] acquisition stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.task.is_running()
    }
}

async fn acquire_loop(command: String, period: Duration, events: EventSender) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut fix_count = 0u64;

    loop {
        ticker.tick().await;

        let event = match request_fix(&command).await {
            Ok(Some(reading)) => {
                fix_count += 1;
                debug!("[gps] {} fixes", fix_count);
                SourceEvent::Reading(reading)
            }
            Ok(None) => SourceEvent::Status {
                source: SourceKind::Precise,
                text: "waiting for fix".to_string(),
            },
            Err(error) => {
                warn!("[gps] acquisition failed after {} fixes: {}", fix_count, error);
                let _ = events
                    .send(SourceEvent::Failure {
                        source: SourceKind::Precise,
                        error,
                    })
                    .await;
                break;
            }
        };

        if events.send(event).await.is_err() {
            debug!("[gps] channel closed after {} fixes", fix_count);
            break;
        }
    }
}

async fn request_fix(command: &str) -> SourceResult<Option<LocationReading>> {
    let output = Command::new(command)
        .args(["-p", "gps", "-r", "once"])
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| SourceError::Runtime(format!("{}: {}", command, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SourceError::Runtime(format!(
            "{} exited with {}: {}",
            command,
            output.status,
            stderr.trim()
        )));
    }

    parse_fix(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `termux-location` output. Empty output means no fix yet.
pub fn parse_fix(output: &str) -> SourceResult<Option<LocationReading>> {
    let text = output.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| SourceError::Runtime(format!("unreadable location output: {}", e)))?;

    if let Some(api_error) = value.get("API_ERROR").and_then(|v| v.as_str()) {
        return Err(SourceError::Runtime(api_error.to_string()));
    }

    let fix: TermuxFix = serde_json::from_value(value)
        .map_err(|e| SourceError::Runtime(format!("unexpected location output: {}", e)))?;

    LocationReading::precise(fix.latitude, fix.longitude, fix.accuracy, now_timestamp()).map(Some)
}
