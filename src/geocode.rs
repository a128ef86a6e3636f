use crate::error::{SourceError, SourceResult};
use serde::Deserialize;
use std::future::Future;

pub const ADDRESS_UNAVAILABLE: &str = "Address not available";
pub const ADDRESS_LOOKUP_FAILED: &str = "Address lookup failed";

/// Address lookup by coordinates. `Ok(None)` means the service answered but
/// knows no address for the point.
pub trait ReverseGeocoder: Send + Sync {
    fn address(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> impl Future<Output = SourceResult<Option<String>>> + Send;
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// OpenStreetMap Nominatim `/reverse` endpoint
pub struct NominatimGeocoder {
    client: reqwest::Client,
    url: String,
}

impl NominatimGeocoder {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl ReverseGeocoder for NominatimGeocoder {
    fn address(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> impl Future<Output = SourceResult<Option<String>>> + Send {
        let request = self.client.get(&self.url).query(&[
            ("format", "jsonv2".to_string()),
            ("lat", latitude.to_string()),
            ("lon", longitude.to_string()),
        ]);
        async move {
            let response = request
                .send()
                .await
                .map_err(|e| SourceError::Lookup(format!("nominatim: {}", e)))?;
            let status = response.status();
            if !status.is_success() {
                return Err(SourceError::Lookup(format!(
                    "nominatim: HTTP {}",
                    status.as_u16()
                )));
            }
            let body = response
                .text()
                .await
                .map_err(|e| SourceError::Lookup(format!("nominatim: {}", e)))?;
            parse_address(&body)
        }
    }
}

/// Nominatim answers `{"error": "Unable to geocode"}` for points with no address.
pub fn parse_address(body: &str) -> SourceResult<Option<String>> {
    let resp: NominatimResponse = serde_json::from_str(body)
        .map_err(|e| SourceError::Lookup(format!("nominatim: malformed response: {}", e)))?;
    if resp.error.is_some() {
        return Ok(None);
    }
    Ok(resp
        .display_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty()))
}

/// Text shown for a lookup outcome
pub fn address_text(result: &SourceResult<Option<String>>) -> String {
    match result {
        Ok(Some(address)) => address.clone(),
        Ok(None) => ADDRESS_UNAVAILABLE.to_string(),
        Err(_) => ADDRESS_LOOKUP_FAILED.to_string(),
    }
}
