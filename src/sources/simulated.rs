use super::{EventSender, LocationSource, SourceEvent, TaskSlot};
use crate::error::{SourceError, SourceResult};
use crate::reading::{now_timestamp, LocationReading, SourceKind};
use log::debug;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Stand-in receiver for hosts without positioning hardware.
///
/// Fixes drift north-east from `origin` by 1e-5 degrees per fix, with
/// accuracy oscillating around 5 m. The first fix arrives after
/// `first_fix_delay` (a cold start longer than the controller's timeout
/// exercises the fallback path).
#[derive(Debug)]
pub struct SimulatedGpsSource {
    origin: (f64, f64),
    first_fix_delay: Duration,
    fail_after: Option<u64>,
    available: bool,
    task: TaskSlot,
}

impl SimulatedGpsSource {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            origin: (latitude, longitude),
            first_fix_delay: Duration::ZERO,
            fail_after: None,
            available: true,
            task: TaskSlot::default(),
        }
    }

    pub fn first_fix_delay(mut self, delay: Duration) -> Self {
        self.first_fix_delay = delay;
        self
    }

    /// Report a receiver fault after `fixes` successful fixes.
    pub fn fail_after(mut self, fixes: Option<u64>) -> Self {
        self.fail_after = fixes;
        self
    }

    /// Make the availability check fail, as on a device without a receiver.
    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }
}

impl Default for SimulatedGpsSource {
    fn default() -> Self {
        Self::new(37.7749, -122.4194)
    }
}

impl LocationSource for SimulatedGpsSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Precise
    }

    fn initialize(&mut self) -> SourceResult<()> {
        if self.available {
            Ok(())
        } else {
            Err(SourceError::Unavailable("no simulated receiver".to_string()))
        }
    }

    fn start(&mut self, interval: Duration, events: EventSender) -> SourceResult<()> {
        if !self.available {
            return Err(SourceError::Unavailable("no simulated receiver".to_string()));
        }
        self.task.spawn(simulate_loop(
            self.origin,
            self.first_fix_delay,
            self.fail_after,
            interval,
            events,
        ))
    }

    fn stop(&mut self) {
        if self.task.abort() {
            debug!("[sim-gps] stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.task.is_running()
    }
}

async fn simulate_loop(
    origin: (f64, f64),
    first_fix_delay: Duration,
    fail_after: Option<u64>,
    period: Duration,
    events: EventSender,
) {
    let acquiring = SourceEvent::Status {
        source: SourceKind::Precise,
        text: "acquiring satellites".to_string(),
    };
    if events.send(acquiring).await.is_err() {
        return;
    }
    sleep(first_fix_delay).await;

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut seq = 0u64;

    loop {
        ticker.tick().await;

        if fail_after == Some(seq) {
            let _ = events
                .send(SourceEvent::Failure {
                    source: SourceKind::Precise,
                    error: SourceError::Runtime("simulated receiver fault".to_string()),
                })
                .await;
            break;
        }

        let step = seq as f64;
        let event = match LocationReading::precise(
            origin.0 + step * 0.00001,
            origin.1 + step * 0.00001,
            Some(5.0 + (step * 0.1).sin() * 2.0),
            now_timestamp(),
        ) {
            Ok(reading) => SourceEvent::Reading(reading),
            Err(error) => SourceEvent::Failure {
                source: SourceKind::Precise,
                error,
            },
        };
        let failed = matches!(event, SourceEvent::Failure { .. });

        if events.send(event).await.is_err() || failed {
            break;
        }
        seq += 1;
    }
}
