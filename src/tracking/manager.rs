//! Tracking coordination across couriers
//!
//! One reporter per courier, created on first use. Driving mode ties
//! tracking to the courier's active tour: entering starts the reporter,
//! leaving stops it, and a feed watcher stops it when the tour leaves
//! `active` from the dispatcher's side.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::models::TourStatus;
use crate::db::positions::{self, NewPosition};
use crate::db::tours;
use crate::error::{Error, Result};
use crate::events::{ChangeFeed, DeliveryEvent};
use crate::tracking::reporter::TrackingReporter;
use crate::tracking::source::{PositionFix, PositionSource};

/// Builds the position source for a courier's reporter
pub type SourceFactory = dyn Fn(Uuid) -> Arc<dyn PositionSource> + Send + Sync;

/// Per-courier tracking registry
pub struct TrackingManager {
    db: SqlitePool,
    feed: ChangeFeed,
    source_factory: Box<SourceFactory>,
    backstop_interval: Duration,
    reporters: Mutex<HashMap<Uuid, Arc<TrackingReporter>>>,
}

impl TrackingManager {
    /// Create the manager and start the tour watcher
    pub fn spawn(
        db: SqlitePool,
        feed: ChangeFeed,
        source_factory: Box<SourceFactory>,
        backstop_interval: Duration,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            db,
            feed,
            source_factory,
            backstop_interval,
            reporters: Mutex::new(HashMap::new()),
        });

        Self::spawn_tour_watcher(Arc::downgrade(&manager));
        manager
    }

    /// Stop tracking automatically when a tracked tour stops being active
    fn spawn_tour_watcher(manager: Weak<TrackingManager>) {
        let Some(strong) = manager.upgrade() else { return };
        let mut rx = strong.feed.subscribe();
        drop(strong);

        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                let DeliveryEvent::TourChanged { tour_id, .. } = event else {
                    continue;
                };
                let Some(manager) = manager.upgrade() else { break };

                let still_active = match tours::get(&manager.db, tour_id).await {
                    Ok(tour) => tour.status == TourStatus::Active,
                    Err(_) => false,
                };
                if still_active {
                    continue;
                }

                let reporters = manager.reporters.lock().await;
                for reporter in reporters.values() {
                    if reporter.tracked_tour().await == Some(tour_id) {
                        info!(
                            "Tour {} left active, stopping tracking for {}",
                            tour_id,
                            reporter.driver_id()
                        );
                        reporter.stop().await;
                    }
                }
            }
        });
    }

    /// The courier's reporter, created lazily
    pub async fn reporter(&self, driver_id: Uuid) -> Arc<TrackingReporter> {
        let mut reporters = self.reporters.lock().await;
        reporters
            .entry(driver_id)
            .or_insert_with(|| {
                debug!("Creating tracking reporter for driver {}", driver_id);
                Arc::new(TrackingReporter::new(
                    self.db.clone(),
                    self.feed.clone(),
                    (self.source_factory)(driver_id),
                    driver_id,
                    self.backstop_interval,
                ))
            })
            .clone()
    }

    /// Enter driving mode: requires an active tour assigned to the courier.
    /// Activation is idempotent.
    pub async fn enter_driving_mode(&self, driver_id: Uuid) -> Result<Uuid> {
        let tour = tours::active_for_driver(&self.db, driver_id)
            .await?
            .ok_or_else(|| {
                Error::Validation(format!("driver {} has no active tour", driver_id))
            })?;

        let reporter = self.reporter(driver_id).await;
        reporter.start(tour.id).await?;
        Ok(tour.id)
    }

    /// Leave driving mode; a courier who never tracked is a no-op
    pub async fn exit_driving_mode(&self, driver_id: Uuid) {
        let reporters = self.reporters.lock().await;
        if let Some(reporter) = reporters.get(&driver_id) {
            reporter.stop().await;
        }
    }

    /// Append a device-reported sample directly (the courier's device posts
    /// fixes over HTTP instead of an in-process source)
    pub async fn report_position(
        &self,
        driver_id: Uuid,
        tour_id: Option<Uuid>,
        fix: PositionFix,
    ) -> Result<()> {
        positions::append(
            &self.db,
            &NewPosition {
                driver_id,
                tour_id,
                latitude: fix.latitude,
                longitude: fix.longitude,
                accuracy: fix.accuracy,
                heading: fix.heading,
                speed: fix.speed,
                recorded_at: fix.recorded_at,
            },
        )
        .await?;

        self.feed.publish(DeliveryEvent::PositionRecorded {
            driver_id,
            tour_id,
            timestamp: fix.recorded_at,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;
    use crate::db::tours::NewTour;
    use crate::events::ChangeFeed;
    use crate::tour::{TourLocks, TourService};
    use crate::tracking::source::UnavailableSource;
    use chrono::{NaiveDate, Utc};

    async fn setup() -> (Arc<TrackingManager>, Arc<TourService>, Uuid) {
        let db = init_memory_database().await.unwrap();
        let feed = ChangeFeed::new(64);
        let tours = Arc::new(TourService::new(
            db.clone(),
            feed.clone(),
            None,
            Arc::new(TourLocks::new()),
        ));
        let manager = TrackingManager::spawn(
            db,
            feed,
            Box::new(|_| Arc::new(UnavailableSource)),
            Duration::from_secs(3600),
        );
        let driver_id = Uuid::new_v4();
        (manager, tours, driver_id)
    }

    #[tokio::test]
    async fn driving_mode_needs_an_active_tour() {
        let (manager, _tours, driver_id) = setup().await;
        let err = manager.enter_driving_mode(driver_id).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn driving_mode_tracks_the_active_tour() {
        let (manager, tours, driver_id) = setup().await;

        let tour = tours
            .create_tour(NewTour {
                pharmacy_id: Uuid::new_v4(),
                name: "Tour".into(),
                date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
                driver_id: Some(driver_id),
                created_by: None,
            })
            .await
            .unwrap();
        tours.start_tour(tour.id).await.unwrap();

        let tracked = manager.enter_driving_mode(driver_id).await.unwrap();
        assert_eq!(tracked, tour.id);

        let reporter = manager.reporter(driver_id).await;
        assert!(reporter.is_tracking().await);

        // Entering again is a no-op, not an error
        manager.enter_driving_mode(driver_id).await.unwrap();

        manager.exit_driving_mode(driver_id).await;
        assert!(!reporter.is_tracking().await);
    }

    #[tokio::test]
    async fn completing_the_tour_stops_tracking() {
        let (manager, tours, driver_id) = setup().await;

        let tour = tours
            .create_tour(NewTour {
                pharmacy_id: Uuid::new_v4(),
                name: "Tour".into(),
                date: NaiveDate::from_ymd_opt(2025, 6, 2).unwrap(),
                driver_id: Some(driver_id),
                created_by: None,
            })
            .await
            .unwrap();
        tours.start_tour(tour.id).await.unwrap();
        manager.enter_driving_mode(driver_id).await.unwrap();

        let reporter = manager.reporter(driver_id).await;
        assert!(reporter.is_tracking().await);

        tours.complete_tour(tour.id).await.unwrap();

        // The watcher reacts to the change event
        for _ in 0..100 {
            if !reporter.is_tracking().await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!reporter.is_tracking().await);
    }

    #[tokio::test]
    async fn reported_positions_are_appended() {
        let (manager, _tours, driver_id) = setup().await;

        manager
            .report_position(
                driver_id,
                None,
                PositionFix {
                    latitude: 52.5,
                    longitude: 13.4,
                    accuracy: Some(8.0),
                    heading: None,
                    speed: None,
                    recorded_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let latest = positions::latest_per_driver(&manager.db).await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].driver_id, driver_id);
    }
}
