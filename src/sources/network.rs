use super::{EventSender, LocationSource, SourceEvent, TaskSlot};
use crate::error::{SourceError, SourceResult};
use crate::reading::{now_timestamp, LocationReading, SourceKind};
use log::{debug, warn};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

/// A service that estimates (latitude, longitude) from the caller's address.
pub trait NetworkLocator: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn locate(&self) -> impl Future<Output = SourceResult<(f64, f64)>> + Send;
}

/// Response formats of the supported geolocation services
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpProvider {
    /// ip-api.com: `{"status": "success", "lat": .., "lon": ..}`
    IpApi,
    /// ipinfo.io: `{"loc": "lat,lon"}`
    IpInfo,
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    loc: Option<String>,
}

impl IpProvider {
    pub fn name(&self) -> &'static str {
        match self {
            IpProvider::IpApi => "ip-api",
            IpProvider::IpInfo => "ipinfo",
        }
    }

    pub fn parse(&self, body: &str) -> SourceResult<(f64, f64)> {
        let malformed = |e: serde_json::Error| {
            SourceError::Lookup(format!("{}: malformed response: {}", self.name(), e))
        };
        match self {
            IpProvider::IpApi => {
                let resp: IpApiResponse = serde_json::from_str(body).map_err(malformed)?;
                if resp.status != "success" {
                    return Err(SourceError::Lookup(format!(
                        "ip-api: {}",
                        resp.message.unwrap_or(resp.status)
                    )));
                }
                match (resp.lat, resp.lon) {
                    (Some(lat), Some(lon)) => Ok((lat, lon)),
                    _ => Err(SourceError::Lookup("ip-api: no coordinates".to_string())),
                }
            }
            IpProvider::IpInfo => {
                let resp: IpInfoResponse = serde_json::from_str(body).map_err(malformed)?;
                let loc = resp
                    .loc
                    .ok_or_else(|| SourceError::Lookup("ipinfo: no coordinates".to_string()))?;
                let (lat, lon) = loc
                    .split_once(',')
                    .ok_or_else(|| SourceError::Lookup(format!("ipinfo: bad loc '{}'", loc)))?;
                let lat = lat.trim().parse::<f64>();
                let lon = lon.trim().parse::<f64>();
                match (lat, lon) {
                    (Ok(lat), Ok(lon)) => Ok((lat, lon)),
                    _ => Err(SourceError::Lookup(format!("ipinfo: bad loc '{}'", loc))),
                }
            }
        }
    }
}

/// HTTP GET against a geolocation service
pub struct HttpIpLocator {
    client: reqwest::Client,
    url: String,
    provider: IpProvider,
}

impl HttpIpLocator {
    pub fn new(client: reqwest::Client, url: impl Into<String>, provider: IpProvider) -> Self {
        Self {
            client,
            url: url.into(),
            provider,
        }
    }
}

impl NetworkLocator for HttpIpLocator {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn locate(&self) -> impl Future<Output = SourceResult<(f64, f64)>> + Send {
        let request = self.client.get(&self.url);
        let provider = self.provider;
        async move {
            let response = request
                .send()
                .await
                .map_err(|e| SourceError::Lookup(format!("{}: {}", provider.name(), e)))?;

            let status = response.status();
            if !status.is_success() {
                return Err(SourceError::Lookup(format!(
                    "{}: HTTP {}",
                    provider.name(),
                    status.as_u16()
                )));
            }

            let body = response
                .text()
                .await
                .map_err(|e| SourceError::Lookup(format!("{}: {}", provider.name(), e)))?;
            provider.parse(&body)
        }
    }
}

/// Ask the primary service; if it gives nothing usable, ask the alternate once.
pub async fn lookup_with_fallback<L: NetworkLocator>(
    primary: &L,
    alternate: &L,
) -> SourceResult<LocationReading> {
    let first = primary
        .locate()
        .await
        .and_then(|(lat, lon)| LocationReading::network(lat, lon, false, now_timestamp()));

    match first {
        Ok(reading) => Ok(reading),
        Err(err) => {
            warn!(
                "[ip] {} lookup failed ({}), trying {}",
                primary.name(),
                err,
                alternate.name()
            );
            alternate
                .locate()
                .await
                .and_then(|(lat, lon)| LocationReading::network(lat, lon, true, now_timestamp()))
        }
    }
}

/// Network-address geolocation. Always available; each poll cycle yields a
/// reading or a lookup failure.
pub struct NetworkSource<L: NetworkLocator> {
    primary: Arc<L>,
    alternate: Arc<L>,
    task: TaskSlot,
}

impl<L: NetworkLocator> NetworkSource<L> {
    pub fn new(primary: L, alternate: L) -> Self {
        Self {
            primary: Arc::new(primary),
            alternate: Arc::new(alternate),
            task: TaskSlot::default(),
        }
    }
}

impl<L: NetworkLocator> LocationSource for NetworkSource<L> {
    fn kind(&self) -> SourceKind {
        SourceKind::Network
    }

    fn initialize(&mut self) -> SourceResult<()> {
        Ok(())
    }

    fn start(&mut self, interval: Duration, events: EventSender) -> SourceResult<()> {
        self.task.spawn(poll_loop(
            Arc::clone(&self.primary),
            Arc::clone(&self.alternate),
            interval,
            events,
        ))
    }

    fn stop(&mut self) {
        if self.task.abort() {
            debug!("[ip] polling stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.task.is_running()
    }
}

async fn poll_loop<L: NetworkLocator>(
    primary: Arc<L>,
    alternate: Arc<L>,
    period: Duration,
    events: EventSender,
) {
    // First tick completes immediately, so the first poll happens on start
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let event = match lookup_with_fallback(primary.as_ref(), alternate.as_ref()).await {
            Ok(reading) => SourceEvent::Reading(reading),
            Err(error) => SourceEvent::Failure {
                source: SourceKind::Network,
                error,
            },
        };

        if events.send(event).await.is_err() {
            debug!("[ip] channel closed");
            break;
        }
    }
}
