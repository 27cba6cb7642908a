//! Route optimization
//!
//! Computes a visiting order for a tour's pending stops. The routing service
//! is used when a credential is configured; on failure or absence the
//! deterministic nearest-neighbor heuristic takes over. Stops already in a
//! terminal status keep their relative order as a frozen prefix.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::db::models::{Coordinates, Stop};
use crate::db::tours;
use crate::error::{Error, Result};
use crate::geo::{self, RoutingClient, RoutingStop};
use crate::tour::sequencer;
use crate::tour::service::TourService;

/// How an optimization outcome was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizeMethod {
    /// Routing service returned the order
    Routed,
    /// Nearest-neighbor heuristic over stop coordinates
    NearestNeighbor,
    /// Lexicographic postal-code sort (no usable coordinates)
    PostalCode,
    /// Nothing to go on; order left as it was
    Unchanged,
}

/// Result reported back to the dispatcher
#[derive(Debug, Clone, serde::Serialize)]
pub struct OptimizeOutcome {
    pub method: OptimizeMethod,
    pub pending_stops: usize,
    pub distance_km: Option<f64>,
    pub duration_minutes: Option<i64>,
    pub message: String,
}

/// Route optimizer service
pub struct RouteOptimizer {
    tours: Arc<TourService>,
    routing: Option<Arc<RoutingClient>>,
    origin_address: Option<String>,
    origin_coordinates: Option<Coordinates>,
}

impl RouteOptimizer {
    pub fn new(
        tours: Arc<TourService>,
        routing: Option<Arc<RoutingClient>>,
        origin_address: Option<String>,
        origin_coordinates: Option<Coordinates>,
    ) -> Self {
        Self {
            tours,
            routing,
            origin_address,
            origin_coordinates,
        }
    }

    /// Recompute the visiting order of a tour's pending stops.
    ///
    /// Fewer than two pending stops is a validation error and writes
    /// nothing. The heuristic path never errors; a tour whose pending stops
    /// have no coordinates at all falls back to postal-code order or is left
    /// untouched.
    pub async fn optimize_route(&self, tour_id: Uuid) -> Result<OptimizeOutcome> {
        let stops = self.tours.stops_for_tour(tour_id).await?;
        let (frozen, pending) = sequencer::partition(&stops);

        if pending.len() < 2 {
            return Err(Error::Validation(
                "Mindestens 2 offene Stops für Optimierung erforderlich".into(),
            ));
        }

        if let Some(routing) = &self.routing {
            match self.optimize_via_service(routing, tour_id, &frozen, &pending).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    warn!(
                        "Routing service failed for tour {}: {}; using heuristic",
                        tour_id, e
                    );
                }
            }
        }

        self.optimize_heuristic(tour_id, &frozen, &pending).await
    }

    async fn optimize_via_service(
        &self,
        routing: &RoutingClient,
        tour_id: Uuid,
        frozen: &[&Stop],
        pending: &[&Stop],
    ) -> Result<OptimizeOutcome> {
        let routable: Vec<RoutingStop> = pending
            .iter()
            .filter_map(|s| {
                s.coordinates().map(|c| RoutingStop {
                    id: s.id,
                    latitude: c.latitude,
                    longitude: c.longitude,
                })
            })
            .collect();

        if routable.len() < 2 {
            return Err(Error::Routing(
                "fewer than 2 pending stops have coordinates".into(),
            ));
        }

        let route = routing
            .optimize(self.origin_address.as_deref(), &routable)
            .await?;

        // Pending stops without coordinates keep their relative order at the end
        let mut pending_order = route.order.clone();
        for stop in pending {
            if !pending_order.contains(&stop.id) {
                pending_order.push(stop.id);
            }
        }

        let order = sequencer::merge_order(frozen, &pending_order);
        self.tours.reorder_stops(tour_id, &order).await?;

        tours::set_route(
            self.tours.pool(),
            tour_id,
            route.polyline.as_deref(),
            Some(route.distance_km),
            Some(route.duration_minutes),
        )
        .await?;

        info!(
            "Optimized tour {} via routing service: {:.1} km, {} min",
            tour_id, route.distance_km, route.duration_minutes
        );

        Ok(OptimizeOutcome {
            method: OptimizeMethod::Routed,
            pending_stops: pending.len(),
            distance_km: Some(route.distance_km),
            duration_minutes: Some(route.duration_minutes),
            message: format!(
                "Route optimiert: {:.2} km, ca. {} Min.",
                route.distance_km, route.duration_minutes
            ),
        })
    }

    async fn optimize_heuristic(
        &self,
        tour_id: Uuid,
        frozen: &[&Stop],
        pending: &[&Stop],
    ) -> Result<OptimizeOutcome> {
        let with_coords: Vec<(Uuid, Coordinates)> = pending
            .iter()
            .filter_map(|s| s.coordinates().map(|c| (s.id, c)))
            .collect();

        if with_coords.len() >= 2 {
            let mut pending_order = nearest_neighbor(&with_coords, self.origin_coordinates);
            for stop in pending {
                if !pending_order.contains(&stop.id) {
                    pending_order.push(stop.id);
                }
            }

            let order = sequencer::merge_order(frozen, &pending_order);
            self.tours.reorder_stops(tour_id, &order).await?;

            info!(
                "Optimized tour {} with nearest-neighbor over {} stops",
                tour_id,
                with_coords.len()
            );
            return Ok(OptimizeOutcome {
                method: OptimizeMethod::NearestNeighbor,
                pending_stops: pending.len(),
                distance_km: None,
                duration_minutes: None,
                message: "Nach Entfernung optimiert".into(),
            });
        }

        // No usable coordinates: sort stably by postal code so the order is
        // at least geographically plausible, or leave it alone entirely.
        let has_postal = pending.iter().any(|s| {
            s.postal_code
                .as_deref()
                .map(|p| !p.trim().is_empty())
                .unwrap_or(false)
        });

        if !has_postal {
            info!("Tour {} has no coordinates or postal codes, order unchanged", tour_id);
            return Ok(OptimizeOutcome {
                method: OptimizeMethod::Unchanged,
                pending_stops: pending.len(),
                distance_km: None,
                duration_minutes: None,
                message: "Keine Koordinaten vorhanden, Reihenfolge unverändert".into(),
            });
        }

        let mut sorted: Vec<&Stop> = pending.to_vec();
        sorted.sort_by(|a, b| {
            let plz_a = a.postal_code.as_deref().unwrap_or("");
            let plz_b = b.postal_code.as_deref().unwrap_or("");
            plz_a.cmp(plz_b)
        });

        let pending_order: Vec<Uuid> = sorted.iter().map(|s| s.id).collect();
        let order = sequencer::merge_order(frozen, &pending_order);
        self.tours.reorder_stops(tour_id, &order).await?;

        Ok(OptimizeOutcome {
            method: OptimizeMethod::PostalCode,
            pending_stops: pending.len(),
            distance_km: None,
            duration_minutes: None,
            message: "Nach PLZ sortiert (keine Koordinaten vorhanden)".into(),
        })
    }
}

/// Deterministic nearest-neighbor ordering.
///
/// Starts from `origin` when known, else the first stop anchors the chain.
/// Ties resolve to the earlier index, so the result is stable for a fixed
/// input.
pub fn nearest_neighbor(
    stops: &[(Uuid, Coordinates)],
    origin: Option<Coordinates>,
) -> Vec<Uuid> {
    if stops.is_empty() {
        return Vec::new();
    }

    let mut remaining: Vec<(Uuid, Coordinates)> = stops.to_vec();
    let mut order = Vec::with_capacity(stops.len());

    let mut current = match origin {
        Some(origin) => origin,
        None => {
            let (id, coords) = remaining.remove(0);
            order.push(id);
            coords
        }
    };

    while !remaining.is_empty() {
        let mut nearest_index = 0;
        let mut nearest_distance = f64::INFINITY;

        for (index, (_, coords)) in remaining.iter().enumerate() {
            let distance = geo::distance_km(current, *coords);
            if distance < nearest_distance {
                nearest_distance = distance;
                nearest_index = index;
            }
        }

        let (id, coords) = remaining.remove(nearest_index);
        order.push(id);
        current = coords;
    }

    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lat: f64, lon: f64) -> Coordinates {
        Coordinates { latitude: lat, longitude: lon }
    }

    #[test]
    fn nearest_neighbor_chains_by_distance() {
        let a = (Uuid::new_v4(), point(52.50, 13.40));
        let b = (Uuid::new_v4(), point(52.60, 13.40));
        let c = (Uuid::new_v4(), point(52.51, 13.40));

        // No origin: a stays first, then c (closer), then b
        let order = nearest_neighbor(&[a, b, c], None);
        assert_eq!(order, vec![a.0, c.0, b.0]);
    }

    #[test]
    fn origin_anchors_the_first_pick() {
        let a = (Uuid::new_v4(), point(52.50, 13.40));
        let b = (Uuid::new_v4(), point(52.60, 13.40));

        // Origin closest to b, so b leads
        let order = nearest_neighbor(&[a, b], Some(point(52.61, 13.40)));
        assert_eq!(order, vec![b.0, a.0]);
    }

    #[test]
    fn result_is_a_full_permutation() {
        let stops: Vec<(Uuid, Coordinates)> = (0..10)
            .map(|i| (Uuid::new_v4(), point(52.0 + i as f64 * 0.01, 13.0)))
            .collect();

        let order = nearest_neighbor(&stops, Some(point(52.05, 13.0)));
        assert_eq!(order.len(), stops.len());

        let mut seen: Vec<Uuid> = order.clone();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), stops.len(), "no stop dropped or duplicated");
    }

    #[test]
    fn deterministic_for_fixed_input() {
        let stops: Vec<(Uuid, Coordinates)> = (0..6)
            .map(|i| (Uuid::new_v4(), point(50.0 + i as f64, 8.0)))
            .collect();

        let first = nearest_neighbor(&stops, None);
        let second = nearest_neighbor(&stops, None);
        assert_eq!(first, second);
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(nearest_neighbor(&[], None).is_empty());
    }
}
