//! Geocoding client
//!
//! Resolves a street address to coordinates against a Nominatim-style
//! endpoint. Not-found and service errors both resolve to `None`; the caller
//! decides whether missing coordinates matter.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::GeocodingConfig;
use crate::db::models::Coordinates;
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct GeocodeHit {
    lat: String,
    lon: String,
}

/// Thin client over the geocoding endpoint
pub struct GeocodingClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl GeocodingClient {
    pub fn new(config: &GeocodingConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Geocoding(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.clone(),
        })
    }

    /// Resolve an address to coordinates; `None` on not-found or any error
    pub async fn resolve(
        &self,
        street: &str,
        postal_code: &str,
        city: &str,
    ) -> Option<Coordinates> {
        let query = format!("{}, {} {}, Germany", street, postal_code, city);

        match self.lookup(&query).await {
            Ok(Some(coords)) => {
                debug!("Geocoded '{}' to {:.5},{:.5}", query, coords.latitude, coords.longitude);
                Some(coords)
            }
            Ok(None) => {
                debug!("No geocoding result for '{}'", query);
                None
            }
            Err(e) => {
                warn!("Geocoding failed for '{}': {}", query, e);
                None
            }
        }
    }

    async fn lookup(&self, query: &str) -> Result<Option<Coordinates>> {
        let response = self
            .http_client
            .get(&self.base_url)
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await
            .map_err(|e| Error::Geocoding(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Geocoding(format!("HTTP {}", status)));
        }

        let hits: Vec<GeocodeHit> = response
            .json()
            .await
            .map_err(|e| Error::Geocoding(e.to_string()))?;

        let Some(hit) = hits.into_iter().next() else {
            return Ok(None);
        };

        let latitude = hit
            .lat
            .parse::<f64>()
            .map_err(|e| Error::Geocoding(format!("bad latitude '{}': {}", hit.lat, e)))?;
        let longitude = hit
            .lon
            .parse::<f64>()
            .map_err(|e| Error::Geocoding(format!("bad longitude '{}': {}", hit.lon, e)))?;

        Ok(Some(Coordinates { latitude, longitude }))
    }
}
