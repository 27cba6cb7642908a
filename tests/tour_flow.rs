//! End-to-end tour scenarios: lifecycle, import, optimization, tracking

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use botendienst::config::RoutingConfig;
use botendienst::db::models::{Coordinates, StopStatus, TourStatus};
use botendienst::db::stops::NewStop;
use botendienst::db::tours::NewTour;
use botendienst::db::{init_memory_database, positions};
use botendienst::error::Error;
use botendienst::events::ChangeFeed;
use botendienst::geo::RoutingClient;
use botendienst::import::{CorrectedAddress, ImportBatch, ImportPipeline, Resolution, StopCandidate};
use botendienst::tour::{OptimizeMethod, RouteOptimizer, TourLocks, TourService};
use botendienst::tracking::PositionAggregator;

struct World {
    tours: Arc<TourService>,
    feed: ChangeFeed,
    pharmacy_id: Uuid,
}

async fn world() -> World {
    let db = init_memory_database().await.unwrap();
    let feed = ChangeFeed::new(128);
    let tours = Arc::new(TourService::new(
        db,
        feed.clone(),
        None,
        Arc::new(TourLocks::new()),
    ));
    World {
        tours,
        feed,
        pharmacy_id: Uuid::new_v4(),
    }
}

fn optimizer_without_routing(world: &World) -> Arc<RouteOptimizer> {
    Arc::new(RouteOptimizer::new(world.tours.clone(), None, None, None))
}

/// Routing client with a credential but an unreachable endpoint, to force
/// the service-failure fallback path
fn optimizer_with_broken_routing(world: &World) -> Arc<RouteOptimizer> {
    let config = RoutingConfig {
        api_key: Some("test-key".into()),
        base_url: "http://127.0.0.1:1/directions".into(),
        timeout_secs: 1,
    };
    let routing = RoutingClient::from_config(&config).unwrap().map(Arc::new);
    assert!(routing.is_some());
    Arc::new(RouteOptimizer::new(world.tours.clone(), routing, None, None))
}

async fn tour_on(world: &World, date: NaiveDate) -> Uuid {
    world
        .tours
        .create_tour(NewTour {
            pharmacy_id: world.pharmacy_id,
            name: "Testtour".into(),
            date,
            driver_id: None,
            created_by: None,
        })
        .await
        .unwrap()
        .id
}

fn geocoded_stop(name: &str, lat: f64, lon: f64) -> NewStop {
    NewStop {
        customer_name: name.into(),
        latitude: Some(lat),
        longitude: Some(lon),
        package_count: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn optimization_keeps_frozen_prefix_and_orders_pending() {
    let world = world().await;
    let optimizer = optimizer_without_routing(&world);
    let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    let tour_id = tour_on(&world, date).await;

    // Visiting order: done, skipped, then three pending scattered north-south
    let done = world
        .tours
        .add_stop(tour_id, geocoded_stop("Erledigt", 52.50, 13.40))
        .await
        .unwrap();
    let skipped = world
        .tours
        .add_stop(tour_id, geocoded_stop("Uebersprungen", 52.51, 13.40))
        .await
        .unwrap();
    let far = world
        .tours
        .add_stop(tour_id, geocoded_stop("Fern", 52.70, 13.40))
        .await
        .unwrap();
    let near = world
        .tours
        .add_stop(tour_id, geocoded_stop("Nah", 52.52, 13.40))
        .await
        .unwrap();
    let middle = world
        .tours
        .add_stop(tour_id, geocoded_stop("Mitte", 52.60, 13.40))
        .await
        .unwrap();

    world.tours.start_tour(tour_id).await.unwrap();
    world.tours.complete_stop(done.id, None).await.unwrap();
    world.tours.skip_stop(skipped.id, None).await.unwrap();

    let outcome = optimizer.optimize_route(tour_id).await.unwrap();
    assert_eq!(outcome.method, OptimizeMethod::NearestNeighbor);
    assert_eq!(outcome.pending_stops, 3);

    let stops = world.tours.stops_for_tour(tour_id).await.unwrap();

    // Frozen stops keep positions 0 and 1 in their original relative order
    assert_eq!(stops[0].id, done.id);
    assert_eq!(stops[1].id, skipped.id);

    // Pending stops follow, nearest-neighbor chained from the first pending
    assert_eq!(stops[2].id, far.id);
    assert_eq!(stops[3].id, middle.id);
    assert_eq!(stops[4].id, near.id);

    // Sort orders are a gapless permutation
    let orders: Vec<i64> = stops.iter().map(|s| s.sort_order).collect();
    assert_eq!(orders, [0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn routing_failure_falls_back_to_full_permutation() {
    let world = world().await;
    let optimizer = optimizer_with_broken_routing(&world);
    let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    let tour_id = tour_on(&world, date).await;

    let mut ids = Vec::new();
    for i in 0..5 {
        let stop = world
            .tours
            .add_stop(
                tour_id,
                geocoded_stop(&format!("Stop {}", i), 52.5 + i as f64 * 0.01, 13.4),
            )
            .await
            .unwrap();
        ids.push(stop.id);
    }

    // Service is unreachable, the heuristic must still produce a full order
    let outcome = optimizer.optimize_route(tour_id).await.unwrap();
    assert_eq!(outcome.method, OptimizeMethod::NearestNeighbor);

    let stops = world.tours.stops_for_tour(tour_id).await.unwrap();
    assert_eq!(stops.len(), 5);

    let mut seen: Vec<Uuid> = stops.iter().map(|s| s.id).collect();
    seen.sort_unstable();
    let mut expected = ids.clone();
    expected.sort_unstable();
    assert_eq!(seen, expected, "no stop dropped, none duplicated");
}

#[tokio::test]
async fn too_few_pending_stops_is_rejected_without_write() {
    let world = world().await;
    let optimizer = optimizer_without_routing(&world);
    let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    let tour_id = tour_on(&world, date).await;

    world
        .tours
        .add_stop(tour_id, geocoded_stop("Einzig", 52.5, 13.4))
        .await
        .unwrap();

    let err = optimizer.optimize_route(tour_id).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    let stops = world.tours.stops_for_tour(tour_id).await.unwrap();
    assert_eq!(stops[0].sort_order, 0);
}

#[tokio::test]
async fn stops_without_coordinates_fall_back_to_postal_order() {
    let world = world().await;
    let optimizer = optimizer_without_routing(&world);
    let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    let tour_id = tour_on(&world, date).await;

    for (name, plz) in [("B", "53111"), ("A", "10115"), ("C", "80331")] {
        let mut stop = NewStop {
            customer_name: name.into(),
            package_count: 1,
            ..Default::default()
        };
        stop.postal_code = Some(plz.into());
        world.tours.add_stop(tour_id, stop).await.unwrap();
    }

    let outcome = optimizer.optimize_route(tour_id).await.unwrap();
    assert_eq!(outcome.method, OptimizeMethod::PostalCode);

    let stops = world.tours.stops_for_tour(tour_id).await.unwrap();
    let names: Vec<&str> = stops.iter().map(|s| s.customer_name.as_str()).collect();
    assert_eq!(names, ["A", "B", "C"]);
}

#[tokio::test]
async fn import_scenario_auto_resolves_then_pauses_then_finishes() {
    let world = world().await;
    let optimizer = optimizer_without_routing(&world);
    let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    let tour_id = tour_on(&world, date).await;

    let batch = ImportBatch {
        candidates: vec![
            StopCandidate {
                customer_name: "A".into(),
                street: "Hauptstr. 1".into(),
                postal_code: "12345".into(),
                city: "Berlin".into(),
                package_count: 1,
                ..Default::default()
            },
            StopCandidate {
                customer_name: "B".into(),
                package_count: 1,
                ..Default::default()
            },
        ],
        tour_date: None,
        tour_name: None,
    };

    let mut pipeline = ImportPipeline::new(
        world.tours.clone(),
        optimizer,
        world.feed.clone(),
        tour_id,
        world.pharmacy_id,
        batch.candidates.clone(),
    );

    // A imports without pausing; B pauses with a validation prompt
    let status = pipeline.start(&batch).await.unwrap();
    assert_eq!(status.imported, 1);
    assert!(status.pending_candidate.is_some());

    let status = pipeline
        .resume(Resolution::Corrected(CorrectedAddress {
            street: Some("Nebenstr. 2".into()),
            postal_code: Some("54321".into()),
            city: Some("Köln".into()),
            phone: None,
        }))
        .await
        .unwrap();

    assert_eq!(status.imported, 2);

    let stops = world.tours.stops_for_tour(tour_id).await.unwrap();
    assert_eq!(stops.len(), 2);
    assert_eq!(stops[0].customer_name, "A");
    assert_eq!(stops[1].street.as_deref(), Some("Nebenstr. 2"));
}

#[tokio::test]
async fn cancelled_import_keeps_only_imported_stops() {
    let world = world().await;
    let optimizer = optimizer_without_routing(&world);
    let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    let tour_id = tour_on(&world, date).await;

    let batch = ImportBatch {
        candidates: vec![
            StopCandidate {
                customer_name: "A".into(),
                street: "Hauptstr. 1".into(),
                postal_code: "12345".into(),
                city: "Berlin".into(),
                package_count: 1,
                ..Default::default()
            },
            StopCandidate {
                customer_name: "B".into(),
                package_count: 1,
                ..Default::default()
            },
        ],
        tour_date: None,
        tour_name: None,
    };

    let mut pipeline = ImportPipeline::new(
        world.tours.clone(),
        optimizer,
        world.feed.clone(),
        tour_id,
        world.pharmacy_id,
        batch.candidates.clone(),
    );

    pipeline.start(&batch).await.unwrap();
    pipeline.cancel().unwrap();

    let stops = world.tours.stops_for_tour(tour_id).await.unwrap();
    assert_eq!(stops.len(), 1, "exactly the pre-pause import persists");
    assert_eq!(stops[0].customer_name, "A");
}

#[tokio::test]
async fn courier_day_end_to_end() {
    let world = world().await;
    let date = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
    let tour_id = tour_on(&world, date).await;

    let first = world
        .tours
        .add_stop(tour_id, geocoded_stop("Bolz, Hilde", 52.50, 13.40))
        .await
        .unwrap();
    let second = world
        .tours
        .add_stop(tour_id, geocoded_stop("Meier, Karl", 52.52, 13.41))
        .await
        .unwrap();
    let third = world
        .tours
        .add_stop(tour_id, geocoded_stop("Schulz, Eva", 52.54, 13.42))
        .await
        .unwrap();

    world.tours.start_tour(tour_id).await.unwrap();

    // First delivery, cash collected at the door
    world
        .tours
        .complete_stop(first.id, Some(Coordinates { latitude: 52.5001, longitude: 13.4002 }))
        .await
        .unwrap();
    world
        .tours
        .mark_cash_collected(first.id, Some(12.80), None)
        .await
        .unwrap();

    // Nobody home at the second, third moves to tomorrow
    world.tours.skip_stop(second.id, Some("niemand da")).await.unwrap();
    let tomorrow = date.succ_opt().unwrap();
    world
        .tours
        .reschedule_stop(third.id, tomorrow, Some("Kunde wünscht morgen"))
        .await
        .unwrap();

    let stats = world.tours.tour_stats(tour_id).await.unwrap();
    assert_eq!(stats.completed_stops, 1);
    assert_eq!(stats.skipped_stops, 1);
    assert_eq!(stats.rescheduled_stops, 1);
    assert_eq!(stats.pending_stops, 0);

    let tour = world.tours.complete_tour(tour_id).await.unwrap();
    assert_eq!(tour.status, TourStatus::Completed);

    let stops = world.tours.stops_for_tour(tour_id).await.unwrap();
    assert!(stops.iter().all(|s| s.status != StopStatus::Pending));
    assert_eq!(stops[0].completed_latitude, Some(52.5001));
}

#[tokio::test]
async fn aggregator_serves_latest_position_per_courier() {
    let db = init_memory_database().await.unwrap();
    let feed = ChangeFeed::new(64);
    let aggregator = PositionAggregator::new(db.clone(), &feed, Duration::from_secs(3600));

    let courier = Uuid::new_v4();
    let now = Utc::now();

    // Old sample arrives after the newer one
    positions::append(
        &db,
        &positions::NewPosition {
            driver_id: courier,
            tour_id: None,
            latitude: 52.9,
            longitude: 13.4,
            accuracy: None,
            heading: None,
            speed: None,
            recorded_at: now,
        },
    )
    .await
    .unwrap();
    positions::append(
        &db,
        &positions::NewPosition {
            driver_id: courier,
            tour_id: None,
            latitude: 52.1,
            longitude: 13.4,
            accuracy: None,
            heading: None,
            speed: None,
            recorded_at: now - chrono::Duration::minutes(5),
        },
    )
    .await
    .unwrap();

    let latest = aggregator.latest_now().await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].latitude, 52.9);
}
