//! Latest-position aggregation for dispatch oversight
//!
//! Derives "most recent position per courier" from the append-only sample
//! table, selected by sample timestamp. The live view refreshes immediately
//! on position events and falls back to a timer when the feed is quiet or
//! unavailable.

use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::watch;
use uuid::Uuid;

use crate::db::models::DriverPosition;
use crate::db::positions;
use crate::error::Result;
use crate::events::{ChangeFeed, DeliveryEvent};
use crate::tracking::live_view::LiveView;

/// Aggregated courier positions for the dispatcher map
pub struct PositionAggregator {
    db: SqlitePool,
    view: LiveView<Vec<DriverPosition>>,
}

impl PositionAggregator {
    pub fn new(db: SqlitePool, feed: &ChangeFeed, poll_interval: Duration) -> Self {
        let refresh_db = db.clone();
        let view = LiveView::spawn(
            Vec::new(),
            feed.subscribe(),
            poll_interval,
            |event| matches!(event, DeliveryEvent::PositionRecorded { .. }),
            move || {
                let db = refresh_db.clone();
                async move { positions::latest_per_driver(&db).await.ok() }
            },
        );

        Self { db, view }
    }

    /// Subscribe to the derived view; the receiver updates on every refresh
    pub fn subscribe(&self) -> watch::Receiver<Vec<DriverPosition>> {
        self.view.subscribe()
    }

    /// Last refreshed snapshot
    pub fn latest(&self) -> Vec<DriverPosition> {
        self.view.latest()
    }

    /// Bypass the view and read the current state directly
    pub async fn latest_now(&self) -> Result<Vec<DriverPosition>> {
        positions::latest_per_driver(&self.db).await
    }

    /// All samples of one tour in chronological order
    pub async fn tour_track(&self, tour_id: Uuid) -> Result<Vec<DriverPosition>> {
        positions::track_for_tour(&self.db, tour_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory_database;
    use crate::db::positions::NewPosition;
    use chrono::{Duration as ChronoDuration, Utc};

    fn sample(driver_id: Uuid, lat: f64, at: chrono::DateTime<Utc>) -> NewPosition {
        NewPosition {
            driver_id,
            tour_id: None,
            latitude: lat,
            longitude: 13.4,
            accuracy: None,
            heading: None,
            speed: None,
            recorded_at: at,
        }
    }

    #[tokio::test]
    async fn view_updates_on_position_event() {
        let db = init_memory_database().await.unwrap();
        let feed = ChangeFeed::new(64);
        let aggregator = PositionAggregator::new(db.clone(), &feed, Duration::from_secs(3600));
        let mut rx = aggregator.subscribe();

        // Seed refresh from the immediate first tick
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();

        let driver = Uuid::new_v4();
        positions::append(&db, &sample(driver, 52.5, Utc::now()))
            .await
            .unwrap();
        feed.publish(DeliveryEvent::PositionRecorded {
            driver_id: driver,
            tour_id: None,
            timestamp: Utc::now(),
        });

        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();

        let latest = aggregator.latest();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].driver_id, driver);
    }

    #[tokio::test]
    async fn out_of_order_arrival_does_not_win() {
        let db = init_memory_database().await.unwrap();
        let feed = ChangeFeed::new(64);
        let aggregator = PositionAggregator::new(db.clone(), &feed, Duration::from_secs(3600));

        let driver = Uuid::new_v4();
        let newer = Utc::now();
        let older = newer - ChronoDuration::seconds(120);

        // Newer sample arrives first, stale one afterwards
        positions::append(&db, &sample(driver, 52.9, newer)).await.unwrap();
        positions::append(&db, &sample(driver, 52.1, older)).await.unwrap();

        let latest = aggregator.latest_now().await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].latitude, 52.9);
    }
}
