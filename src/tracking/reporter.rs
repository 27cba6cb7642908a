//! Position reporting for one courier
//!
//! While tracking is active, every fix from the device subscription is
//! appended as a position sample; an independent interval requests a
//! one-shot fix as a backstop in case the subscription stalls. Acquisition
//! failures surface as a non-fatal status and never stop the backstop.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sqlx::SqlitePool;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::positions::{self, NewPosition};
use crate::error::Result;
use crate::events::{ChangeFeed, DeliveryEvent};
use crate::tracking::source::{PositionError, PositionFix, PositionSource};

/// Courier-visible tracking state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrackingStatus {
    Inactive,
    Active,
    /// Tracking continues but the last acquisition failed
    Degraded { reason: String },
}

struct ReporterShared {
    db: SqlitePool,
    feed: ChangeFeed,
    source: Arc<dyn PositionSource>,
    driver_id: Uuid,
    status_tx: watch::Sender<TrackingStatus>,
}

impl ReporterShared {
    async fn record(&self, tour_id: Option<Uuid>, fix: PositionFix) {
        let sample = NewPosition {
            driver_id: self.driver_id,
            tour_id,
            latitude: fix.latitude,
            longitude: fix.longitude,
            accuracy: fix.accuracy,
            heading: fix.heading,
            speed: fix.speed,
            recorded_at: fix.recorded_at,
        };

        match positions::append(&self.db, &sample).await {
            Ok(_) => {
                let _ = self.status_tx.send(TrackingStatus::Active);
                self.feed.publish(DeliveryEvent::PositionRecorded {
                    driver_id: self.driver_id,
                    tour_id,
                    timestamp: fix.recorded_at,
                });
            }
            Err(e) => {
                // Non-fatal: the next fix retries
                warn!("Failed to store position for {}: {}", self.driver_id, e);
                let _ = self.status_tx.send(TrackingStatus::Degraded {
                    reason: e.to_string(),
                });
            }
        }
    }

    fn degrade(&self, error: &PositionError) {
        let _ = self.status_tx.send(TrackingStatus::Degraded {
            reason: error.to_string(),
        });
    }
}

struct ActiveTracking {
    tour_id: Uuid,
    subscription: JoinHandle<()>,
    backstop: JoinHandle<()>,
}

/// Position reporter for one courier
pub struct TrackingReporter {
    shared: Arc<ReporterShared>,
    backstop_interval: Duration,
    active: Mutex<Option<ActiveTracking>>,
}

impl TrackingReporter {
    pub fn new(
        db: SqlitePool,
        feed: ChangeFeed,
        source: Arc<dyn PositionSource>,
        driver_id: Uuid,
        backstop_interval: Duration,
    ) -> Self {
        let (status_tx, _) = watch::channel(TrackingStatus::Inactive);
        Self {
            shared: Arc::new(ReporterShared {
                db,
                feed,
                source,
                driver_id,
                status_tx,
            }),
            backstop_interval,
            active: Mutex::new(None),
        }
    }

    pub fn driver_id(&self) -> Uuid {
        self.shared.driver_id
    }

    /// Start tracking for a tour. Re-starting an active reporter is a no-op;
    /// returns whether tracking was newly started.
    pub async fn start(&self, tour_id: Uuid) -> Result<bool> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            debug!("Tracking already active for {}, ignoring start", self.shared.driver_id);
            return Ok(false);
        }

        info!(
            "Starting position tracking for driver {} on tour {}",
            self.shared.driver_id, tour_id
        );

        let subscription = {
            let shared = self.shared.clone();
            let mut rx = shared.source.watch();
            tokio::spawn(async move {
                while let Some(fix) = rx.recv().await {
                    shared.record(Some(tour_id), fix).await;
                }
                debug!("Position subscription ended for {}", shared.driver_id);
            })
        };

        let backstop = {
            let shared = self.shared.clone();
            let period = self.backstop_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                // Skip the immediate first tick; the subscription covers startup
                interval.tick().await;
                loop {
                    interval.tick().await;
                    match shared.source.current().await {
                        Ok(fix) => shared.record(Some(tour_id), fix).await,
                        Err(e) => shared.degrade(&e),
                    }
                }
            })
        };

        let _ = self.shared.status_tx.send(TrackingStatus::Active);
        *active = Some(ActiveTracking {
            tour_id,
            subscription,
            backstop,
        });
        Ok(true)
    }

    /// Stop tracking immediately: clears both tasks, takes no further
    /// samples. Idempotent.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        if let Some(tracking) = active.take() {
            tracking.subscription.abort();
            tracking.backstop.abort();
            info!("Stopped position tracking for {}", self.shared.driver_id);
        }
        let _ = self.shared.status_tx.send(TrackingStatus::Inactive);
    }

    pub async fn is_tracking(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// The tour currently being tracked, if any
    pub async fn tracked_tour(&self) -> Option<Uuid> {
        self.active.lock().await.as_ref().map(|a| a.tour_id)
    }

    pub fn status(&self) -> watch::Receiver<TrackingStatus> {
        self.shared.status_tx.subscribe()
    }

    /// One-shot current position, distinct from continuous tracking.
    ///
    /// Used e.g. to stamp a stop completion with the courier's location at
    /// that instant. Does not touch the tracking state.
    pub async fn current_position(&self) -> std::result::Result<PositionFix, PositionError> {
        self.shared.source.current().await
    }
}
