//! Routing optimizer client
//!
//! Submits an origin plus stop coordinates to a Directions-style routing
//! service and maps the returned waypoint order back onto stop IDs. The tour
//! is a round trip: origin and destination are the pharmacy when its address
//! is configured, else the first stop.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::RoutingConfig;
use crate::error::{Error, Result};

/// One stop submitted for optimization
#[derive(Debug, Clone)]
pub struct RoutingStop {
    pub id: Uuid,
    pub latitude: f64,
    pub longitude: f64,
}

/// Result of a successful optimization
#[derive(Debug, Clone)]
pub struct OptimizedRoute {
    /// Stop IDs in visiting order (covers every submitted stop)
    pub order: Vec<Uuid>,
    pub polyline: Option<String>,
    pub distance_km: f64,
    pub duration_minutes: i64,
}

#[derive(Debug, Deserialize)]
struct DirectionsResponse {
    status: String,
    error_message: Option<String>,
    #[serde(default)]
    routes: Vec<DirectionsRoute>,
}

#[derive(Debug, Deserialize)]
struct DirectionsRoute {
    #[serde(default)]
    waypoint_order: Vec<usize>,
    overview_polyline: Option<OverviewPolyline>,
    #[serde(default)]
    legs: Vec<RouteLeg>,
}

#[derive(Debug, Deserialize)]
struct OverviewPolyline {
    points: String,
}

#[derive(Debug, Deserialize)]
struct RouteLeg {
    distance: LegValue,
    duration: LegValue,
}

#[derive(Debug, Deserialize)]
struct LegValue {
    value: f64,
}

/// Thin client over the routing service
pub struct RoutingClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RoutingClient {
    /// Build the client if an API key is configured
    pub fn from_config(config: &RoutingConfig) -> Result<Option<Self>> {
        let Some(api_key) = config.api_key.clone() else {
            return Ok(None);
        };

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Routing(e.to_string()))?;

        Ok(Some(Self {
            http_client,
            base_url: config.base_url.clone(),
            api_key,
        }))
    }

    /// Optimize the visiting order of `stops`, optionally anchored to an
    /// origin/return address.
    ///
    /// Requires at least two stops; errors are transient and the caller is
    /// expected to fall back to the heuristic.
    pub async fn optimize(
        &self,
        origin_address: Option<&str>,
        stops: &[RoutingStop],
    ) -> Result<OptimizedRoute> {
        if stops.len() < 2 {
            return Err(Error::Validation(
                "at least 2 stops required for optimization".into(),
            ));
        }

        // Round trip anchored to the pharmacy if known, else to the first stop
        let (origin, waypoint_stops): (String, &[RoutingStop]) = match origin_address {
            Some(address) => (address.to_string(), stops),
            None => (coordinate_param(&stops[0]), &stops[1..]),
        };

        let waypoints = format!(
            "optimize:true|{}",
            waypoint_stops
                .iter()
                .map(coordinate_param)
                .collect::<Vec<_>>()
                .join("|")
        );

        debug!(
            "Requesting route optimization for {} waypoints (anchored: {})",
            waypoint_stops.len(),
            origin_address.is_some()
        );

        let response = self
            .http_client
            .get(&self.base_url)
            .query(&[
                ("origin", origin.as_str()),
                ("destination", origin.as_str()),
                ("waypoints", waypoints.as_str()),
                ("mode", "driving"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Routing(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Routing(format!("HTTP {}", status)));
        }

        let body: DirectionsResponse = response
            .json()
            .await
            .map_err(|e| Error::Routing(e.to_string()))?;

        if body.status != "OK" {
            return Err(Error::Routing(
                body.error_message
                    .unwrap_or_else(|| format!("service status {}", body.status)),
            ));
        }

        let route = body
            .routes
            .into_iter()
            .next()
            .ok_or_else(|| Error::Routing("response contained no routes".into()))?;

        let order = apply_waypoint_order(stops, origin_address.is_some(), &route.waypoint_order);

        let distance_m: f64 = route.legs.iter().map(|l| l.distance.value).sum();
        let duration_s: f64 = route.legs.iter().map(|l| l.duration.value).sum();

        Ok(OptimizedRoute {
            order,
            polyline: route.overview_polyline.map(|p| p.points),
            distance_km: distance_m / 1000.0,
            duration_minutes: (duration_s / 60.0).round() as i64,
        })
    }
}

fn coordinate_param(stop: &RoutingStop) -> String {
    format!("{:.6},{:.6}", stop.latitude, stop.longitude)
}

/// Map the service's waypoint order (indices into the submitted waypoints)
/// back onto stop IDs.
///
/// When the first stop served as origin it was not a waypoint, so it leads
/// the result and the indices refer to the remaining stops. Indices the
/// service never returned (defensive against a short list) keep their
/// original relative order at the end.
fn apply_waypoint_order(
    stops: &[RoutingStop],
    anchored: bool,
    waypoint_order: &[usize],
) -> Vec<Uuid> {
    let (prefix, waypoints): (&[RoutingStop], &[RoutingStop]) = if anchored {
        (&[], stops)
    } else {
        (&stops[..1], &stops[1..])
    };

    let mut order: Vec<Uuid> = prefix.iter().map(|s| s.id).collect();
    let mut used = vec![false; waypoints.len()];

    for &index in waypoint_order {
        if let Some(stop) = waypoints.get(index) {
            order.push(stop.id);
            used[index] = true;
        }
    }
    for (index, stop) in waypoints.iter().enumerate() {
        if !used[index] {
            order.push(stop.id);
        }
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(lat: f64) -> RoutingStop {
        RoutingStop {
            id: Uuid::new_v4(),
            latitude: lat,
            longitude: 13.4,
        }
    }

    #[test]
    fn anchored_order_covers_all_stops() {
        let stops = vec![stop(52.1), stop(52.2), stop(52.3)];
        let order = apply_waypoint_order(&stops, true, &[2, 0, 1]);

        assert_eq!(order, vec![stops[2].id, stops[0].id, stops[1].id]);
    }

    #[test]
    fn unanchored_keeps_first_stop_in_front() {
        let stops = vec![stop(52.1), stop(52.2), stop(52.3)];
        let order = apply_waypoint_order(&stops, false, &[1, 0]);

        assert_eq!(order, vec![stops[0].id, stops[2].id, stops[1].id]);
    }

    #[test]
    fn missing_indices_are_appended_not_dropped() {
        let stops = vec![stop(52.1), stop(52.2), stop(52.3)];
        // Service returned fewer indices than waypoints
        let order = apply_waypoint_order(&stops, true, &[1]);

        assert_eq!(order.len(), 3);
        assert_eq!(order[0], stops[1].id);
        assert_eq!(order[1], stops[0].id);
        assert_eq!(order[2], stops[2].id);
    }

    #[test]
    fn directions_payload_parses() {
        let raw = r#"{
            "status": "OK",
            "routes": [{
                "waypoint_order": [1, 0],
                "overview_polyline": {"points": "abc"},
                "legs": [
                    {"distance": {"value": 1200.0}, "duration": {"value": 300.0}},
                    {"distance": {"value": 800.0}, "duration": {"value": 240.0}}
                ]
            }]
        }"#;
        let parsed: DirectionsResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.status, "OK");
        assert_eq!(parsed.routes[0].waypoint_order, vec![1, 0]);
    }

    #[test]
    fn client_absent_without_api_key() {
        let config = RoutingConfig::default();
        assert!(RoutingClient::from_config(&config).unwrap().is_none());
    }
}
