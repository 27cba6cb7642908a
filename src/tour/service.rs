//! Tour and stop lifecycle
//!
//! Owns the status state machines and all stop mutations. Constructed with
//! its dependencies (pool, change feed, geocoding client, lock registry) and
//! shared by reference; there is no ambient state.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::models::{
    Coordinates, Customer, Stop, StopStatus, Tour, TourStats, TourStatus,
};
use crate::db::stops::{NewStop, StopUpdate};
use crate::db::tours::{NewTour, TourUpdate};
use crate::db::{customers, stops, tours};
use crate::error::{Error, Result};
use crate::events::{ChangeFeed, DeliveryEvent};
use crate::geo::GeocodingClient;
use crate::tour::locks::TourLocks;

/// Lifecycle manager for tours and their stops
pub struct TourService {
    db: SqlitePool,
    feed: ChangeFeed,
    geocoding: Option<Arc<GeocodingClient>>,
    locks: Arc<TourLocks>,
}

impl TourService {
    pub fn new(
        db: SqlitePool,
        feed: ChangeFeed,
        geocoding: Option<Arc<GeocodingClient>>,
        locks: Arc<TourLocks>,
    ) -> Self {
        Self {
            db,
            feed,
            geocoding,
            locks,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    // ------------------------------------------------------------------
    // Tours
    // ------------------------------------------------------------------

    pub async fn create_tour(&self, new: NewTour) -> Result<Tour> {
        let tour = tours::insert(&self.db, &new).await?;
        info!("Created tour {} '{}' for {}", tour.id, tour.name, tour.date);
        self.publish_tour_changed(&tour);
        Ok(tour)
    }

    pub async fn get_tour(&self, tour_id: Uuid) -> Result<Tour> {
        tours::get(&self.db, tour_id).await
    }

    pub async fn list_tours(
        &self,
        pharmacy_id: Uuid,
        status: Option<TourStatus>,
    ) -> Result<Vec<Tour>> {
        tours::list(&self.db, pharmacy_id, status).await
    }

    pub async fn update_tour(&self, tour_id: Uuid, update: TourUpdate) -> Result<Tour> {
        let tour = tours::update_fields(&self.db, tour_id, &update).await?;
        self.publish_tour_changed(&tour);
        Ok(tour)
    }

    /// `draft → active`, stamping `started_at`
    pub async fn start_tour(&self, tour_id: Uuid) -> Result<Tour> {
        self.transition_tour(tour_id, TourStatus::Active).await
    }

    /// `active → completed`, stamping `completed_at`
    pub async fn complete_tour(&self, tour_id: Uuid) -> Result<Tour> {
        self.transition_tour(tour_id, TourStatus::Completed).await
    }

    /// `draft|active → cancelled`
    pub async fn cancel_tour(&self, tour_id: Uuid) -> Result<Tour> {
        self.transition_tour(tour_id, TourStatus::Cancelled).await
    }

    async fn transition_tour(&self, tour_id: Uuid, target: TourStatus) -> Result<Tour> {
        let current = tours::get(&self.db, tour_id).await?;

        if !current.status.can_transition_to(target) {
            return Err(Error::InvalidState(format!(
                "tour {} cannot go from {} to {}",
                tour_id,
                current.status.as_str(),
                target.as_str()
            )));
        }

        let tour = tours::set_status(&self.db, tour_id, target, None).await?;
        info!("Tour {} is now {}", tour_id, target.as_str());
        self.publish_tour_changed(&tour);
        Ok(tour)
    }

    pub async fn delete_tour(&self, tour_id: Uuid) -> Result<()> {
        let tour = tours::get(&self.db, tour_id).await?;
        tours::delete(&self.db, tour_id).await?;
        info!("Deleted tour {}", tour_id);
        self.feed.publish(DeliveryEvent::TourDeleted {
            tour_id,
            pharmacy_id: tour.pharmacy_id,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Aggregate counts over a tour's stops for dispatch overviews
    pub async fn tour_stats(&self, tour_id: Uuid) -> Result<TourStats> {
        let stops = stops::list_for_tour(&self.db, tour_id).await?;

        let mut stats = TourStats::default();
        for stop in &stops {
            stats.total_stops += 1;
            match stop.status {
                StopStatus::Completed => stats.completed_stops += 1,
                StopStatus::Pending => stats.pending_stops += 1,
                StopStatus::Skipped => stats.skipped_stops += 1,
                StopStatus::Rescheduled => stats.rescheduled_stops += 1,
            }
            stats.total_packages += stop.package_count;
            stats.total_cash += stop.cash_amount;
            if stop.cash_collected {
                stats.collected_cash += stop.cash_amount;
            }
        }
        if stats.total_stops > 0 {
            stats.progress_percent =
                (stats.completed_stops as f64 / stats.total_stops as f64 * 100.0).round() as i64;
        }

        Ok(stats)
    }

    /// The driver's single active tour with its stops in visiting order
    pub async fn active_tour_for_driver(
        &self,
        driver_id: Uuid,
    ) -> Result<Option<(Tour, Vec<Stop>)>> {
        let Some(tour) = tours::active_for_driver(&self.db, driver_id).await? else {
            return Ok(None);
        };
        let stops = stops::list_for_tour(&self.db, tour.id).await?;
        Ok(Some((tour, stops)))
    }

    // ------------------------------------------------------------------
    // Stops
    // ------------------------------------------------------------------

    pub async fn stops_for_tour(&self, tour_id: Uuid) -> Result<Vec<Stop>> {
        stops::list_for_tour(&self.db, tour_id).await
    }

    pub async fn get_stop(&self, stop_id: Uuid) -> Result<Stop> {
        stops::get(&self.db, stop_id).await
    }

    /// Append a stop to the tour's visiting order.
    ///
    /// When the stop names a customer without referencing one, the customer
    /// is found or created (exact name+street match) and its cached
    /// coordinates are inherited. Serializes against `reorder_stops` on the
    /// same tour.
    pub async fn add_stop(&self, tour_id: Uuid, mut new: NewStop) -> Result<Stop> {
        // Reject stops on tours that can no longer change
        let tour = tours::get(&self.db, tour_id).await?;
        if matches!(tour.status, TourStatus::Completed | TourStatus::Cancelled) {
            return Err(Error::InvalidState(format!(
                "tour {} is {}",
                tour_id,
                tour.status.as_str()
            )));
        }

        if new.customer_name.trim().is_empty() {
            return Err(Error::Validation("stop needs a customer name".into()));
        }

        if new.customer_id.is_none() {
            if let Some(customer) = self.find_or_create_customer(tour.pharmacy_id, &new).await? {
                new.customer_id = Some(customer.id);
                if new.latitude.is_none() || new.longitude.is_none() {
                    new.latitude = customer.latitude;
                    new.longitude = customer.longitude;
                }
            }
        }

        let _guard = self.locks.acquire(tour_id).await;
        let stop = stops::insert(&self.db, tour_id, &new).await?;
        drop(_guard);

        debug!(
            "Added stop {} '{}' to tour {} at position {}",
            stop.id, stop.customer_name, tour_id, stop.sort_order
        );
        self.publish_stops_changed(tour_id);
        Ok(stop)
    }

    pub async fn update_stop(&self, stop_id: Uuid, update: StopUpdate) -> Result<Stop> {
        let stop = stops::update_fields(&self.db, stop_id, &update).await?;
        self.publish_stops_changed(stop.tour_id);
        Ok(stop)
    }

    pub async fn delete_stop(&self, stop_id: Uuid) -> Result<()> {
        let stop = stops::get(&self.db, stop_id).await?;
        stops::delete(&self.db, stop_id).await?;
        debug!("Deleted stop {} from tour {}", stop_id, stop.tour_id);
        self.publish_stops_changed(stop.tour_id);
        Ok(())
    }

    /// Mark a stop delivered, optionally stamping where the courier stood.
    ///
    /// Idempotent in effect: a second call neither moves the completion
    /// timestamp nor overwrites the completion coordinates.
    pub async fn complete_stop(
        &self,
        stop_id: Uuid,
        position: Option<Coordinates>,
    ) -> Result<Stop> {
        let current = stops::get(&self.db, stop_id).await?;
        Self::ensure_stop_transition(&current, StopStatus::Completed)?;

        let stop = stops::set_completed(
            &self.db,
            stop_id,
            position.map(|p| p.latitude),
            position.map(|p| p.longitude),
        )
        .await?;

        self.publish_stops_changed(stop.tour_id);
        Ok(stop)
    }

    pub async fn skip_stop(&self, stop_id: Uuid, reason: Option<&str>) -> Result<Stop> {
        let current = stops::get(&self.db, stop_id).await?;
        Self::ensure_stop_transition(&current, StopStatus::Skipped)?;

        let notes = match reason {
            Some(reason) if !reason.trim().is_empty() => {
                format!("Übersprungen: {}", reason.trim())
            }
            _ => "Übersprungen".to_string(),
        };

        let stop = stops::set_skipped(&self.db, stop_id, &notes).await?;
        self.publish_stops_changed(stop.tour_id);
        Ok(stop)
    }

    /// Push a stop to another day. The target date must not precede the
    /// tour's date; the reason is optional.
    pub async fn reschedule_stop(
        &self,
        stop_id: Uuid,
        to: NaiveDate,
        reason: Option<&str>,
    ) -> Result<Stop> {
        let current = stops::get(&self.db, stop_id).await?;
        Self::ensure_stop_transition(&current, StopStatus::Rescheduled)?;

        let tour = tours::get(&self.db, current.tour_id).await?;
        if to < tour.date {
            return Err(Error::Validation(format!(
                "reschedule target {} is before the tour date {}",
                to, tour.date
            )));
        }

        let stop = stops::set_rescheduled(&self.db, stop_id, to, reason).await?;
        self.publish_stops_changed(stop.tour_id);
        Ok(stop)
    }

    /// Record collected cash. Touches only the cash fields; a completed,
    /// skipped, or rescheduled stop can be cash-marked independently.
    pub async fn mark_cash_collected(
        &self,
        stop_id: Uuid,
        amount: Option<f64>,
        notes: Option<&str>,
    ) -> Result<Stop> {
        let stop = stops::set_cash_collected(&self.db, stop_id, amount, notes).await?;
        self.publish_stops_changed(stop.tour_id);
        Ok(stop)
    }

    /// Rewrite the visiting order to the caller-supplied sequence.
    ///
    /// The order must cover every stop of the tour exactly once. Frozen
    /// stops are accepted anywhere in the sequence; only the optimizer
    /// guarantees the frozen prefix.
    pub async fn reorder_stops(&self, tour_id: Uuid, ordered_ids: &[Uuid]) -> Result<Vec<Stop>> {
        let _guard = self.locks.acquire(tour_id).await;
        stops::reorder(&self.db, tour_id, ordered_ids).await?;
        drop(_guard);

        self.feed.publish(DeliveryEvent::StopsReordered {
            tour_id,
            timestamp: Utc::now(),
        });

        stops::list_for_tour(&self.db, tour_id).await
    }

    // ------------------------------------------------------------------
    // Customers
    // ------------------------------------------------------------------

    /// Exact name+street find-or-create used by stop creation.
    ///
    /// An existing customer gets its coordinates backfilled when missing;
    /// a verified address is never re-geocoded or overwritten.
    async fn find_or_create_customer(
        &self,
        pharmacy_id: Uuid,
        new: &NewStop,
    ) -> Result<Option<Customer>> {
        let name = new.customer_name.trim();
        let street = new.street.as_deref().unwrap_or("").trim();

        // Name+street is the precise key; with no street to match on, name
        // alone has to do or every address-less re-add would duplicate the
        // customer
        let existing = if street.is_empty() {
            customers::find_by_name(&self.db, pharmacy_id, name).await?
        } else {
            customers::find_by_name_and_street(&self.db, pharmacy_id, name, street).await?
        };

        if let Some(customer) = existing {
            if customer.coordinates().is_none() {
                if let Some(coords) = self
                    .geocode(
                        customer.street.as_deref().unwrap_or(street),
                        customer
                            .postal_code
                            .as_deref()
                            .or(new.postal_code.as_deref())
                            .unwrap_or(""),
                        customer.city.as_deref().or(new.city.as_deref()).unwrap_or(""),
                    )
                    .await
                {
                    customers::set_coordinates_if_missing(
                        &self.db,
                        customer.id,
                        coords.latitude,
                        coords.longitude,
                    )
                    .await?;
                    return Ok(Some(customers::get(&self.db, customer.id).await?));
                }
            }
            return Ok(Some(customer));
        }

        let coords = match (new.latitude, new.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates { latitude, longitude }),
            _ if !street.is_empty() => {
                self.geocode(
                    street,
                    new.postal_code.as_deref().unwrap_or(""),
                    new.city.as_deref().unwrap_or(""),
                )
                .await
            }
            _ => None,
        };

        let customer = customers::insert(
            &self.db,
            pharmacy_id,
            &customers::NewCustomer {
                name: name.to_string(),
                street: new.street.clone(),
                postal_code: new.postal_code.clone(),
                city: new.city.clone(),
                phone: new.phone.clone(),
                // One-time stop notes stay on the stop; customer notes are
                // long-lived and maintained separately
                delivery_notes: None,
                access_info: None,
                latitude: coords.map(|c| c.latitude),
                longitude: coords.map(|c| c.longitude),
            },
        )
        .await?;

        self.feed.publish(DeliveryEvent::CustomerChanged {
            customer_id: customer.id,
            timestamp: Utc::now(),
        });
        Ok(Some(customer))
    }

    async fn geocode(&self, street: &str, postal_code: &str, city: &str) -> Option<Coordinates> {
        if street.is_empty() || (postal_code.is_empty() && city.is_empty()) {
            return None;
        }
        match &self.geocoding {
            Some(client) => client.resolve(street, postal_code, city).await,
            None => {
                warn!("No geocoding client configured, leaving address unresolved");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn ensure_stop_transition(current: &Stop, target: StopStatus) -> Result<()> {
        if current.status == StopStatus::Pending || current.status == target {
            return Ok(());
        }
        Err(Error::InvalidState(format!(
            "stop {} is {} and cannot become {}",
            current.id,
            current.status.as_str(),
            target.as_str()
        )))
    }

    fn publish_tour_changed(&self, tour: &Tour) {
        self.feed.publish(DeliveryEvent::TourChanged {
            tour_id: tour.id,
            pharmacy_id: tour.pharmacy_id,
            timestamp: Utc::now(),
        });
    }

    fn publish_stops_changed(&self, tour_id: Uuid) {
        self.feed.publish(DeliveryEvent::StopsChanged {
            tour_id,
            timestamp: Utc::now(),
        });
    }
}
