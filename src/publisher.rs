//! Overwrite-style publishing of the latest reading.
//!
//! Each publish replaces the record at `{base_url}/locations/{device_id}.json`.
//! There is no retry, batching or ordering: a failed publish is reported and
//! dropped, and the next reading simply publishes again.

use crate::error::PublishError;
use crate::reading::{Accuracy, LocationReading};
use crate::session::DeviceIdentity;
use log::debug;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use serde::Serialize;
use std::future::Future;

/// JSON body stored for a device
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishRecord {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp: i64,
    pub method: &'static str,
    pub accuracy: Accuracy,
}

impl PublishRecord {
    pub fn new(reading: &LocationReading, device: &DeviceIdentity) -> Self {
        Self {
            device_id: device.as_str().to_string(),
            latitude: reading.latitude(),
            longitude: reading.longitude(),
            timestamp: reading.timestamp(),
            method: reading.method(),
            accuracy: reading.accuracy(),
        }
    }
}

/// Datastore acknowledgement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub status: u16,
}

/// HTTP PUT seam, so publishing can be exercised without a server.
pub trait HttpTransport: Send + Sync {
    /// Send `body` as JSON and return the response status code.
    fn put_json(
        &self,
        url: Url,
        body: String,
    ) -> impl Future<Output = Result<u16, PublishError>> + Send;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl HttpTransport for ReqwestTransport {
    fn put_json(
        &self,
        url: Url,
        body: String,
    ) -> impl Future<Output = Result<u16, PublishError>> + Send {
        let request = self
            .client
            .put(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        async move {
            let response = request
                .send()
                .await
                .map_err(|e| PublishError::Transport(e.to_string()))?;
            Ok(response.status().as_u16())
        }
    }
}

pub struct Publisher<T: HttpTransport> {
    base_url: Url,
    transport: T,
}

impl<T: HttpTransport> Publisher<T> {
    pub fn new(base_url: &str, transport: T) -> Result<Self, PublishError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| PublishError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(PublishError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            base_url,
            transport,
        })
    }

    /// Record location for a device; the id is encoded as one path segment.
    pub fn record_url(&self, device: &DeviceIdentity) -> Result<Url, PublishError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| PublishError::InvalidUrl(self.base_url.to_string()))?;
            segments
                .pop_if_empty()
                .push("locations")
                .push(&format!("{}.json", device.as_str()));
        }
        Ok(url)
    }

    /// Overwrite the device's record with `reading`. Only HTTP 200 counts as success.
    pub async fn publish(
        &self,
        reading: &LocationReading,
        device: &DeviceIdentity,
    ) -> Result<Ack, PublishError> {
        let url = self.record_url(device)?;
        let body = serde_json::to_string(&PublishRecord::new(reading, device))
            .map_err(|e| PublishError::Encode(e.to_string()))?;

        debug!("PUT {} {}", url, body);
        let status = self.transport.put_json(url, body).await?;
        if status == 200 {
            Ok(Ack { status })
        } else {
            Err(PublishError::Status(status))
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
