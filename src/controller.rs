//! Fallback controller.
//!
//! Owns the tracking session and arbitrates between the precise and network
//! sources:
//!
//! ```text
//! Idle ──start──> AcquiringPrecise ──timeout / failure──> AcquiringNetwork
//!   └──start (precise unavailable)─────────────────────────────┘
//! any ──stop──> Stopped ──start──> Idle ...
//! ```
//!
//! Everything runs on one loop ([`FallbackController::run`]): commands,
//! source events, the precise timeout and the waiting status tick. Address
//! lookup and publishing are awaited inline, so nothing else is handled while
//! a request is outstanding.

use crate::config::TrackerConfig;
use crate::display::{
    DisplayText, TrackerView, METHOD_GPS, METHOD_GPS_FAILED, METHOD_GPS_READY, METHOD_IP,
};
use crate::error::{SourceError, SourceResult};
use crate::geocode::{address_text, ReverseGeocoder};
use crate::publisher::{HttpTransport, Publisher};
use crate::reading::{LocationReading, SourceKind};
use crate::session::{DeviceIdentity, SessionStats, TrackerState, TrackingSession};
use crate::sources::{LocationSource, SourceEvent};
use log::{debug, error, info, warn};
use std::future::pending;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, sleep_until, Instant, Interval, MissedTickBehavior};

const EVENT_CAPACITY: usize = 64;

/// Requests from the presentation shell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    /// Stop tracking and leave the run loop
    Shutdown,
}

enum Step {
    Command(Option<Command>),
    Event(SourceEvent),
    PreciseTimeout,
    WaitingTick,
}

pub struct FallbackController<T: HttpTransport, G: ReverseGeocoder> {
    config: TrackerConfig,
    precise: Option<Box<dyn LocationSource>>,
    network: Box<dyn LocationSource>,
    publisher: Publisher<T>,
    geocoder: Option<G>,
    session: TrackingSession,
    display: DisplayText,
    events: Option<mpsc::Receiver<SourceEvent>>,
    events_tx: Option<mpsc::Sender<SourceEvent>>,
    precise_deadline: Option<Instant>,
    waiting_ticker: Option<Interval>,
    last_stats: SessionStats,
    view_tx: watch::Sender<TrackerView>,
}

impl<T: HttpTransport, G: ReverseGeocoder> FallbackController<T, G> {
    /// Build the controller and check the precise source once. A source that
    /// fails the check is dropped for the rest of the process.
    ///
    /// Fails only if a source sits in the wrong slot.
    pub fn new(
        config: TrackerConfig,
        device_id: DeviceIdentity,
        precise: Option<Box<dyn LocationSource>>,
        network: Box<dyn LocationSource>,
        publisher: Publisher<T>,
        geocoder: Option<G>,
    ) -> SourceResult<Self> {
        expect_kind(&*network, SourceKind::Network)?;
        if let Some(source) = &precise {
            expect_kind(&**source, SourceKind::Precise)?;
        }

        let mut display = DisplayText::new();

        let precise = match precise {
            Some(mut source) => match source.initialize() {
                Ok(()) => {
                    info!("GPS available");
                    display.method = METHOD_GPS_READY.to_string();
                    Some(source)
                }
                Err(e) => {
                    warn!("GPS not available: {}", e);
                    display.method = METHOD_IP.to_string();
                    None
                }
            },
            None => {
                display.method = METHOD_IP.to_string();
                None
            }
        };

        let session = TrackingSession::new(device_id);
        let (view_tx, _) = watch::channel(TrackerView::new(
            session.clone(),
            display.clone(),
            precise.is_some(),
            false,
        ));

        Ok(Self {
            config,
            precise,
            network,
            publisher,
            geocoder,
            session,
            display,
            events: None,
            events_tx: None,
            precise_deadline: None,
            waiting_ticker: None,
            last_stats: SessionStats::default(),
            view_tx,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerView> {
        self.view_tx.subscribe()
    }

    pub fn session(&self) -> &TrackingSession {
        &self.session
    }

    pub fn display(&self) -> &DisplayText {
        &self.display
    }

    pub fn state(&self) -> TrackerState {
        self.session.state
    }

    pub fn precise_available(&self) -> bool {
        self.precise.is_some()
    }

    /// Counters of the most recently stopped session
    pub fn last_session_stats(&self) -> &SessionStats {
        &self.last_stats
    }

    pub fn timeout_armed(&self) -> bool {
        self.precise_deadline.is_some()
    }

    pub fn view(&self) -> TrackerView {
        TrackerView::new(
            self.session.clone(),
            self.display.clone(),
            self.precise_available(),
            self.timeout_armed(),
        )
    }

    fn publish_view(&self) {
        self.view_tx.send_replace(self.view());
    }

    /// Begin a tracking session. Does nothing while one is active.
    pub fn start(&mut self) {
        if self.session.active {
            debug!("start ignored, already tracking");
            return;
        }

        self.session.begin();
        self.display.status = "Starting location tracking...".to_string();
        info!("Tracking started as {}", self.session.device_id);

        // Fresh channel per session: anything still queued from an earlier
        // session is dropped with the old receiver.
        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        self.events = Some(rx);
        self.events_tx = Some(tx.clone());

        let precise_start = self
            .precise
            .as_mut()
            .map(|source| source.start(self.config.gps_min_interval, tx));

        match precise_start {
            Some(Ok(())) => {
                let now = Instant::now();
                let period = self.config.poll_interval;
                let mut ticker = interval_at(now + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                self.precise_deadline = Some(now + self.config.gps_timeout);
                self.waiting_ticker = Some(ticker);
                self.session.switch_to(TrackerState::AcquiringPrecise);
                self.display.method = METHOD_GPS.to_string();
                info!(
                    "Acquiring GPS, falling back after {:?} without a fix",
                    self.config.gps_timeout
                );
                self.publish_view();
            }
            Some(Err(e)) => {
                warn!("GPS start failed: {}", e);
                self.enter_network(METHOD_GPS_FAILED);
            }
            None => self.enter_network(METHOD_IP),
        }
    }

    /// End the session from any state. Stopping twice is a no-op.
    pub fn stop(&mut self) {
        if self.session.state == TrackerState::Stopped {
            debug!("stop ignored, already stopped");
            return;
        }

        self.precise_deadline = None;
        self.waiting_ticker = None;
        if let Some(source) = self.precise.as_mut() {
            source.stop();
        }
        self.network.stop();
        self.events = None;
        self.events_tx = None;

        let stats = self.session.stats.clone();
        self.last_stats = stats.clone();
        self.session.reset();
        self.display.status = "Tracking stopped".to_string();
        info!(
            "Tracking stopped ({} readings, {} published, {} failed)",
            stats.readings_received, stats.publish_succeeded, stats.publish_failed
        );
        self.publish_view();
    }

    /// Switch to the terminal network source. The precise source and its
    /// timers are disarmed first.
    fn enter_network(&mut self, method: &str) {
        self.precise_deadline = None;
        self.waiting_ticker = None;
        if let Some(source) = self.precise.as_mut() {
            source.stop();
        }

        self.session.switch_to(TrackerState::AcquiringNetwork);
        self.display.method = method.to_string();

        match self.events_tx.clone() {
            Some(tx) => {
                if let Err(e) = self.network.start(self.config.poll_interval, tx) {
                    error!("IP geolocation could not start: {}", e);
                    self.display.status = format!("IP Error: {}", e);
                } else {
                    info!(
                        "Using IP geolocation every {:?}",
                        self.config.poll_interval
                    );
                }
            }
            None => error!("no event channel for IP geolocation"),
        }
        self.publish_view();
    }

    /// Precise timeout elapsed. Falls back only if no fix has arrived.
    pub fn on_precise_timeout(&mut self) {
        self.precise_deadline = None;

        let waiting = self.session.active
            && self.session.state == TrackerState::AcquiringPrecise
            && self.session.last_reading.is_none();
        if !waiting {
            return;
        }

        warn!(
            "No GPS fix within {:?}, falling back to IP geolocation",
            self.config.gps_timeout
        );
        self.display.status = "GPS timeout, falling back to IP".to_string();
        self.enter_network(METHOD_IP);
    }

    pub fn on_waiting_tick(&mut self) {
        if self.session.active
            && self.session.state == TrackerState::AcquiringPrecise
            && self.session.last_reading.is_none()
        {
            self.display.status = "Waiting for location...".to_string();
            self.publish_view();
        }
    }

    /// Consume one source event.
    pub async fn handle_event(&mut self, event: SourceEvent) {
        if !self.session.active {
            debug!("discarding {:?} event, tracking stopped", event.source());
            return;
        }
        if self.session.current_source() != Some(event.source()) {
            debug!(
                "discarding {:?} event, current source is {:?}",
                event.source(),
                self.session.current_source()
            );
            return;
        }

        match event {
            SourceEvent::Reading(reading) => self.accept_reading(reading).await,
            SourceEvent::Status { source, text } => {
                self.display.status = match source {
                    SourceKind::Precise => format!("GPS: {}", text),
                    SourceKind::Network => text,
                };
                self.publish_view();
            }
            SourceEvent::Failure {
                source: SourceKind::Precise,
                error,
            } => {
                warn!("GPS failed during tracking: {}", error);
                self.display.status = format!("GPS Error: {}", error);
                self.enter_network(METHOD_GPS_FAILED);
            }
            SourceEvent::Failure {
                source: SourceKind::Network,
                error,
            } => {
                warn!("IP geolocation failed: {}", error);
                self.display.status = format!("IP Error: {}", error);
                self.publish_view();
            }
        }
    }

    async fn accept_reading(&mut self, reading: LocationReading) {
        if reading.source() == SourceKind::Precise && self.precise_deadline.take().is_some() {
            debug!("first GPS fix, timeout cancelled");
        }
        if reading.source() == SourceKind::Precise {
            self.waiting_ticker = None;
        }

        self.display.coordinates = reading.coordinates_text();
        self.display.accuracy = format!("Accuracy: {}", reading.accuracy_text());
        self.display.status = match (reading.source(), reading.is_alternate()) {
            (SourceKind::Precise, _) => "GPS location updated",
            (SourceKind::Network, false) => "IP location updated",
            (SourceKind::Network, true) => "IP location updated (alternative)",
        }
        .to_string();
        self.session.record_reading(reading.clone());
        self.publish_view();

        if let Some(geocoder) = &self.geocoder {
            let result = geocoder
                .address(reading.latitude(), reading.longitude())
                .await;
            if let Err(e) = &result {
                debug!("address lookup failed: {}", e);
            }
            self.display.address = address_text(&result);
        }

        match self
            .publisher
            .publish(&reading, &self.session.device_id)
            .await
        {
            Ok(ack) => {
                debug!("published {} reading (HTTP {})", reading.method(), ack.status);
                self.session.record_publish(true);
                self.display.status = "Location updated in datastore".to_string();
            }
            Err(e) => {
                warn!("publish failed: {}", e);
                self.session.record_publish(false);
                self.display.status = format!("Datastore error: {}", e);
            }
        }
        self.publish_view();
    }

    /// Drive the controller until `Shutdown` arrives or the command channel
    /// closes. Tracking is stopped on the way out and the counters of the
    /// last session are returned.
    pub async fn run(&mut self, commands: &mut mpsc::Receiver<Command>) -> SessionStats {
        loop {
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                Some(event) = next_event(&mut self.events) => Step::Event(event),
                () = deadline(self.precise_deadline) => Step::PreciseTimeout,
                () = next_tick(&mut self.waiting_ticker) => Step::WaitingTick,
            };

            match step {
                Step::Command(Some(Command::Start)) => self.start(),
                Step::Command(Some(Command::Stop)) => self.stop(),
                Step::Command(Some(Command::Shutdown)) | Step::Command(None) => {
                    self.stop();
                    break;
                }
                Step::Event(event) => self.handle_event(event).await,
                Step::PreciseTimeout => self.on_precise_timeout(),
                Step::WaitingTick => self.on_waiting_tick(),
            }
        }
        self.last_stats.clone()
    }
}

fn expect_kind(source: &dyn LocationSource, expected: SourceKind) -> SourceResult<()> {
    let found = source.kind();
    if found == expected {
        Ok(())
    } else {
        Err(SourceError::WrongKind { expected, found })
    }
}

async fn next_event(events: &mut Option<mpsc::Receiver<SourceEvent>>) -> Option<SourceEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => pending().await,
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublishError;
    use crate::reading::Accuracy;
    use crate::sources::{EventSender, SimulatedGpsSource};
    use reqwest::Url;
    use std::future::Future;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct SharedLog {
        bodies: Arc<Mutex<Vec<String>>>,
        status: Arc<Mutex<u16>>,
    }

    struct LogTransport(SharedLog);

    impl HttpTransport for LogTransport {
        fn put_json(
            &self,
            _url: Url,
            body: String,
        ) -> impl Future<Output = Result<u16, PublishError>> + Send {
            self.0.bodies.lock().unwrap().push(body);
            let status = *self.0.status.lock().unwrap();
            async move { Ok(status) }
        }
    }

    struct FixedGeocoder;

    impl ReverseGeocoder for FixedGeocoder {
        fn address(
            &self,
            _latitude: f64,
            _longitude: f64,
        ) -> impl Future<Output = SourceResult<Option<String>>> + Send {
            async { Ok(Some("1 Infinite Loop".to_string())) }
        }
    }

    /// Source that never emits anything on its own; tests inject events.
    #[derive(Clone, Default)]
    struct Calls {
        starts: Arc<Mutex<u32>>,
        stops: Arc<Mutex<u32>>,
    }

    struct ManualSource {
        kind: SourceKind,
        calls: Calls,
        running: bool,
    }

    impl ManualSource {
        fn new(kind: SourceKind, calls: Calls) -> Self {
            Self {
                kind,
                calls,
                running: false,
            }
        }
    }

    impl LocationSource for ManualSource {
        fn kind(&self) -> SourceKind {
            self.kind
        }

        fn initialize(&mut self) -> SourceResult<()> {
            Ok(())
        }

        fn start(&mut self, _interval: Duration, _events: EventSender) -> SourceResult<()> {
            *self.calls.starts.lock().unwrap() += 1;
            self.running = true;
            Ok(())
        }

        fn stop(&mut self) {
            *self.calls.stops.lock().unwrap() += 1;
            self.running = false;
        }

        fn is_running(&self) -> bool {
            self.running
        }
    }

    fn controller(
        precise: Option<Box<dyn LocationSource>>,
        network: Box<dyn LocationSource>,
        log: SharedLog,
    ) -> FallbackController<LogTransport, FixedGeocoder> {
        *log.status.lock().unwrap() = 200;
        let publisher = Publisher::new("http://localhost:9000", LogTransport(log)).unwrap();
        FallbackController::new(
            TrackerConfig::default(),
            DeviceIdentity::from_input(Some("unit")),
            precise,
            network,
            publisher,
            Some(FixedGeocoder),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_unavailable_precise_goes_straight_to_network() {
        let net = Calls::default();
        let mut ctl = controller(
            Some(Box::new(SimulatedGpsSource::default().unavailable())),
            Box::new(ManualSource::new(SourceKind::Network, net.clone())),
            SharedLog::default(),
        );
        assert!(!ctl.precise_available());
        assert_eq!(ctl.display().method, METHOD_IP);

        ctl.start();
        assert_eq!(ctl.state(), TrackerState::AcquiringNetwork);
        assert!(!ctl.timeout_armed());
        assert_eq!(*net.starts.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_precise_reading_cancels_timeout_and_publishes_once() {
        let log = SharedLog::default();
        let mut ctl = controller(
            Some(Box::new(ManualSource::new(SourceKind::Precise, Calls::default()))),
            Box::new(ManualSource::new(SourceKind::Network, Calls::default())),
            log.clone(),
        );
        ctl.start();
        assert_eq!(ctl.state(), TrackerState::AcquiringPrecise);
        assert!(ctl.timeout_armed());

        let reading = LocationReading::precise(37.0, -122.0, Some(5.0), 1).unwrap();
        ctl.handle_event(SourceEvent::Reading(reading.clone())).await;

        assert_eq!(ctl.state(), TrackerState::AcquiringPrecise);
        assert!(!ctl.timeout_armed());
        assert_eq!(ctl.session().last_reading, Some(reading));
        assert_eq!(log.bodies.lock().unwrap().len(), 1);
        assert_eq!(ctl.display().address, "1 Infinite Loop");
        assert_eq!(ctl.display().accuracy, "Accuracy: 5.0 meters");
        assert_eq!(ctl.display().status, "Location updated in datastore");

        // A late timeout after the first fix changes nothing
        ctl.on_precise_timeout();
        assert_eq!(ctl.state(), TrackerState::AcquiringPrecise);
    }

    #[tokio::test]
    async fn test_timeout_without_fix_falls_back() {
        let gps = Calls::default();
        let net = Calls::default();
        let mut ctl = controller(
            Some(Box::new(ManualSource::new(SourceKind::Precise, gps.clone()))),
            Box::new(ManualSource::new(SourceKind::Network, net.clone())),
            SharedLog::default(),
        );
        ctl.start();
        ctl.on_precise_timeout();

        assert_eq!(ctl.state(), TrackerState::AcquiringNetwork);
        assert!(!ctl.timeout_armed());
        assert_eq!(*gps.stops.lock().unwrap(), 1);
        assert_eq!(*net.starts.lock().unwrap(), 1);
        assert_eq!(ctl.display().method, METHOD_IP);
    }

    #[tokio::test]
    async fn test_precise_runtime_failure_falls_back() {
        let mut ctl = controller(
            Some(Box::new(ManualSource::new(SourceKind::Precise, Calls::default()))),
            Box::new(ManualSource::new(SourceKind::Network, Calls::default())),
            SharedLog::default(),
        );
        ctl.start();
        ctl.handle_event(SourceEvent::Failure {
            source: SourceKind::Precise,
            error: SourceError::Runtime("receiver fault".into()),
        })
        .await;

        assert_eq!(ctl.state(), TrackerState::AcquiringNetwork);
        assert_eq!(ctl.display().method, METHOD_GPS_FAILED);
        assert!(ctl.display().status.contains("receiver fault"));
    }

    #[tokio::test]
    async fn test_stale_precise_reading_after_fallback_is_ignored() {
        let log = SharedLog::default();
        let mut ctl = controller(
            Some(Box::new(ManualSource::new(SourceKind::Precise, Calls::default()))),
            Box::new(ManualSource::new(SourceKind::Network, Calls::default())),
            log.clone(),
        );
        ctl.start();
        ctl.on_precise_timeout();

        let late = LocationReading::precise(1.0, 1.0, Some(3.0), 1).unwrap();
        ctl.handle_event(SourceEvent::Reading(late)).await;
        assert!(ctl.session().last_reading.is_none());
        assert!(log.bodies.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_network_failure_keeps_state() {
        let mut ctl = controller(
            None,
            Box::new(ManualSource::new(SourceKind::Network, Calls::default())),
            SharedLog::default(),
        );
        ctl.start();
        ctl.handle_event(SourceEvent::Failure {
            source: SourceKind::Network,
            error: SourceError::Lookup("ipinfo: HTTP 429".into()),
        })
        .await;
        assert_eq!(ctl.state(), TrackerState::AcquiringNetwork);
        assert!(ctl.display().status.starts_with("IP Error"));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let gps = Calls::default();
        let net = Calls::default();
        let mut ctl = controller(
            Some(Box::new(ManualSource::new(SourceKind::Precise, gps.clone()))),
            Box::new(ManualSource::new(SourceKind::Network, net.clone())),
            SharedLog::default(),
        );
        ctl.start();
        ctl.stop();
        assert_eq!(ctl.state(), TrackerState::Stopped);
        assert!(!ctl.timeout_armed());
        assert!(!ctl.session().active);
        assert_eq!(ctl.display().status, "Tracking stopped");

        let stops = (*gps.stops.lock().unwrap(), *net.stops.lock().unwrap());
        ctl.stop();
        assert_eq!(ctl.state(), TrackerState::Stopped);
        assert_eq!((*gps.stops.lock().unwrap(), *net.stops.lock().unwrap()), stops);
    }

    #[tokio::test]
    async fn test_events_after_stop_are_discarded() {
        let log = SharedLog::default();
        let mut ctl = controller(
            None,
            Box::new(ManualSource::new(SourceKind::Network, Calls::default())),
            log.clone(),
        );
        ctl.start();
        ctl.stop();

        let reading = LocationReading::network(1.0, 1.0, false, 1).unwrap();
        ctl.handle_event(SourceEvent::Reading(reading)).await;
        assert!(log.bodies.lock().unwrap().is_empty());
        assert!(ctl.session().last_reading.is_none());
    }

    #[tokio::test]
    async fn test_stop_before_start() {
        let gps = Calls::default();
        let net = Calls::default();
        let mut ctl = controller(
            Some(Box::new(ManualSource::new(SourceKind::Precise, gps.clone()))),
            Box::new(ManualSource::new(SourceKind::Network, net.clone())),
            SharedLog::default(),
        );
        assert_eq!(ctl.state(), TrackerState::Idle);

        ctl.stop();
        assert_eq!(ctl.state(), TrackerState::Stopped);
        assert!(!ctl.timeout_armed());
        assert_eq!(ctl.display().status, "Tracking stopped");

        let stops = (*gps.stops.lock().unwrap(), *net.stops.lock().unwrap());
        ctl.stop();
        assert_eq!(ctl.state(), TrackerState::Stopped);
        assert_eq!((*gps.stops.lock().unwrap(), *net.stops.lock().unwrap()), stops);

        ctl.start();
        assert_eq!(ctl.state(), TrackerState::AcquiringPrecise);
        assert!(ctl.session().active);
        assert!(ctl.timeout_armed());
    }

    #[tokio::test]
    async fn test_sources_in_wrong_slot_are_rejected() {
        fn build(
            precise: Option<Box<dyn LocationSource>>,
            network: Box<dyn LocationSource>,
        ) -> Option<SourceError> {
            let publisher =
                Publisher::new("http://localhost:9000", LogTransport(SharedLog::default()))
                    .unwrap();
            FallbackController::new(
                TrackerConfig::default(),
                DeviceIdentity::from_input(Some("unit")),
                precise,
                network,
                publisher,
                Some(FixedGeocoder),
            )
            .err()
        }

        assert_eq!(
            build(None, Box::new(SimulatedGpsSource::default())),
            Some(SourceError::WrongKind {
                expected: SourceKind::Network,
                found: SourceKind::Precise,
            })
        );
        assert_eq!(
            build(
                Some(Box::new(ManualSource::new(SourceKind::Network, Calls::default()))),
                Box::new(ManualSource::new(SourceKind::Network, Calls::default())),
            ),
            Some(SourceError::WrongKind {
                expected: SourceKind::Precise,
                found: SourceKind::Network,
            })
        );
    }

    #[tokio::test]
    async fn test_stop_keeps_counters_of_finished_session() {
        let mut ctl = controller(
            None,
            Box::new(ManualSource::new(SourceKind::Network, Calls::default())),
            SharedLog::default(),
        );
        ctl.start();
        let reading = LocationReading::network(10.0, 20.0, false, 1).unwrap();
        ctl.handle_event(SourceEvent::Reading(reading)).await;
        ctl.stop();

        assert_eq!(ctl.session().stats, SessionStats::default());
        assert_eq!(ctl.last_session_stats().readings_received, 1);
        assert_eq!(ctl.last_session_stats().publish_succeeded, 1);

        // A no-op stop leaves them alone
        ctl.stop();
        assert_eq!(ctl.last_session_stats().readings_received, 1);
    }

    #[tokio::test]
    async fn test_restart_after_stop_retries_precise() {
        let mut ctl = controller(
            Some(Box::new(ManualSource::new(SourceKind::Precise, Calls::default()))),
            Box::new(ManualSource::new(SourceKind::Network, Calls::default())),
            SharedLog::default(),
        );
        ctl.start();
        ctl.on_precise_timeout();
        ctl.stop();

        ctl.start();
        assert_eq!(ctl.state(), TrackerState::AcquiringPrecise);
        assert!(ctl.timeout_armed());
    }

    #[tokio::test]
    async fn test_status_events() {
        let mut ctl = controller(
            Some(Box::new(ManualSource::new(SourceKind::Precise, Calls::default()))),
            Box::new(ManualSource::new(SourceKind::Network, Calls::default())),
            SharedLog::default(),
        );
        ctl.start();
        ctl.handle_event(SourceEvent::Status {
            source: SourceKind::Precise,
            text: "acquiring satellites".into(),
        })
        .await;
        assert_eq!(ctl.display().status, "GPS: acquiring satellites");

        ctl.on_waiting_tick();
        assert_eq!(ctl.display().status, "Waiting for location...");
    }

    #[tokio::test]
    async fn test_subscribers_see_state_changes() {
        let mut ctl = controller(
            None,
            Box::new(ManualSource::new(SourceKind::Network, Calls::default())),
            SharedLog::default(),
        );
        let mut view = ctl.subscribe();
        assert_eq!(view.borrow().session.state, TrackerState::Idle);

        ctl.start();
        assert!(view.has_changed().unwrap());
        let snapshot = view.borrow_and_update().clone();
        assert_eq!(snapshot.session.state, TrackerState::AcquiringNetwork);
        assert!(snapshot.session.active);

        let reading = LocationReading::network(10.0, 20.0, true, 1).unwrap();
        ctl.handle_event(SourceEvent::Reading(reading)).await;
        let snapshot = view.borrow_and_update().clone();
        assert_eq!(snapshot.session.stats.publish_succeeded, 1);
        assert_eq!(
            snapshot.session.last_reading.as_ref().map(|r| r.accuracy()),
            Some(Accuracy::Meters(1000.0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_times_out_to_network() {
        let log = SharedLog::default();
        let net = Calls::default();
        let mut ctl = controller(
            Some(Box::new(
                SimulatedGpsSource::new(37.0, -122.0).first_fix_delay(Duration::from_secs(60)),
            )),
            Box::new(ManualSource::new(SourceKind::Network, net.clone())),
            log.clone(),
        );
        let (cmd_tx, mut cmd_rx) = mpsc::channel(4);

        let driver = async {
            cmd_tx.send(Command::Start).await.unwrap();
            tokio::time::sleep(Duration::from_secs(16)).await;
            cmd_tx.send(Command::Shutdown).await.unwrap();
        };
        let mut view = ctl.subscribe();
        let (stats, ()) = tokio::join!(ctl.run(&mut cmd_rx), driver);
        assert_eq!(stats, SessionStats::default());

        assert_eq!(*net.starts.lock().unwrap(), 1);
        assert!(log.bodies.lock().unwrap().is_empty());
        assert_eq!(view.borrow_and_update().session.state, TrackerState::Stopped);
    }
}
