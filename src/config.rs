//! Service configuration
//!
//! Loaded from a TOML file with sensible defaults for every section. Missing
//! routing or geocoding credentials are not an error: the affected component
//! degrades (heuristic ordering, unresolved coordinates) instead of failing.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Error, Result};

/// Top-level service configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub pharmacy: PharmacyConfig,
    pub routing: RoutingConfig,
    pub geocoding: GeocodingConfig,
    pub storage: StorageConfig,
    pub tracking: TrackingConfig,
}

/// Pharmacy the tours run for; the address anchors route optimization
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PharmacyConfig {
    pub id: Option<String>,
    pub name: Option<String>,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl PharmacyConfig {
    /// Origin/return address for round trips, if fully configured
    pub fn origin_address(&self) -> Option<String> {
        match (&self.street, &self.postal_code, &self.city) {
            (Some(street), Some(plz), Some(city)) => {
                Some(format!("{}, {} {}, Germany", street, plz, city))
            }
            _ => None,
        }
    }

    /// Pharmacy coordinates, when configured; anchors the heuristic ordering
    pub fn origin_coordinates(&self) -> Option<crate::db::models::Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => {
                Some(crate::db::models::Coordinates { latitude, longitude })
            }
            _ => None,
        }
    }
}

/// Routing optimizer service
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// API key; absent means the nearest-neighbor fallback is always used
    pub api_key: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://maps.googleapis.com/maps/api/directions/json".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Geocoding service
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeocodingConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://nominatim.openstreetmap.org/search".to_string(),
            user_agent: "Botendienst/0.1".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Object store for tour PDFs, stop photos and signatures
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Base URL of the bucketed object store; absent disables uploads
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_secs: 30,
        }
    }
}

/// Location tracking intervals
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Reporter backstop interval in seconds
    pub report_interval_secs: u64,
    /// Aggregator fallback poll interval in seconds
    pub poll_interval_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            report_interval_secs: 30,
            poll_interval_secs: 30,
        }
    }
}

impl TrackingConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields the defaults (degraded mode); a malformed file
    /// is a configuration error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!(
                "Config file {} not found, using defaults (routing/geocoding degraded)",
                path.display()
            );
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

        info!(
            "Loaded config from {} (routing key: {}, storage: {})",
            path.display(),
            if config.routing.api_key.is_some() { "set" } else { "absent" },
            if config.storage.base_url.is_some() { "set" } else { "absent" },
        );
        Ok(config)
    }

    /// Default location of the config file relative to the working directory
    pub fn default_path() -> PathBuf {
        PathBuf::from("botendienst.toml")
    }
}
