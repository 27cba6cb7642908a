//! Geospatial helpers and service clients
//!
//! The geocoding and routing clients degrade instead of failing: geocoding
//! resolves to `None` on any error, routing errors trigger the caller's
//! heuristic fallback.

pub mod geocoding;
pub mod navigation;
pub mod polyline;
pub mod routing;

pub use geocoding::GeocodingClient;
pub use routing::{OptimizedRoute, RoutingClient, RoutingStop};

use crate::db::models::Coordinates;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in kilometers (haversine)
pub fn distance_km(a: Coordinates, b: Coordinates) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();

    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_KM * c
}
