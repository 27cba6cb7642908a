//! Database models
//!
//! Entity structs and status enums. IDs are stored as TEXT UUIDs, instants
//! as RFC 3339 TEXT, dates as `YYYY-MM-DD` TEXT.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Tour lifecycle status
///
/// Transitions are monotonic: `draft → active → completed`, with
/// `draft|active → cancelled` as a side transition. Nothing leaves
/// `completed` or `cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TourStatus {
    Draft,
    Active,
    Completed,
    Cancelled,
}

impl TourStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TourStatus::Draft => "draft",
            TourStatus::Active => "active",
            TourStatus::Completed => "completed",
            TourStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(TourStatus::Draft),
            "active" => Some(TourStatus::Active),
            "completed" => Some(TourStatus::Completed),
            "cancelled" => Some(TourStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether this status may transition to `next`
    pub fn can_transition_to(&self, next: TourStatus) -> bool {
        matches!(
            (self, next),
            (TourStatus::Draft, TourStatus::Active)
                | (TourStatus::Active, TourStatus::Completed)
                | (TourStatus::Draft, TourStatus::Cancelled)
                | (TourStatus::Active, TourStatus::Cancelled)
        )
    }
}

/// Stop delivery status
///
/// `pending` is the only non-terminal state; a terminal stop never returns
/// to `pending` (delete and re-add instead).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopStatus {
    Pending,
    Completed,
    Skipped,
    Rescheduled,
}

impl StopStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StopStatus::Pending => "pending",
            StopStatus::Completed => "completed",
            StopStatus::Skipped => "skipped",
            StopStatus::Rescheduled => "rescheduled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(StopStatus::Pending),
            "completed" => Some(StopStatus::Completed),
            "skipped" => Some(StopStatus::Skipped),
            "rescheduled" => Some(StopStatus::Rescheduled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StopStatus::Pending)
    }
}

/// Stop priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Normal => "normal",
            Priority::Urgent => "urgent",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(Priority::Normal),
            "urgent" => Some(Priority::Urgent),
            _ => None,
        }
    }
}

/// WGS84 coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// One planned delivery run for one pharmacy on one date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tour {
    pub id: Uuid,
    pub pharmacy_id: Uuid,
    pub name: String,
    pub date: NaiveDate,
    pub driver_id: Option<Uuid>,
    pub status: TourStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub route_polyline: Option<String>,
    pub total_distance_km: Option<f64>,
    pub estimated_duration_minutes: Option<i64>,
    pub optimized_at: Option<DateTime<Utc>>,
    pub source_pdf_url: Option<String>,
    pub source_pdf_path: Option<String>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One delivery within a tour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stop {
    pub id: Uuid,
    pub tour_id: Uuid,
    pub customer_id: Option<Uuid>,
    pub customer_name: String,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub package_count: i64,
    pub cash_amount: f64,
    pub cash_collected: bool,
    pub cash_collected_amount: Option<f64>,
    pub cash_notes: Option<String>,
    pub priority: Priority,
    pub stop_notes: Option<String>,
    pub sort_order: i64,
    pub status: StopStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_latitude: Option<f64>,
    pub completed_longitude: Option<f64>,
    pub rescheduled_to: Option<NaiveDate>,
    pub rescheduled_reason: Option<String>,
    pub added_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Stop {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates { latitude, longitude }),
            _ => None,
        }
    }
}

/// Line item carried on a stop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopItem {
    pub id: Uuid,
    pub stop_id: Uuid,
    pub quantity: i64,
    pub article_name: String,
    pub package_size: Option<String>,
    pub manufacturer_code: Option<String>,
    pub sort_order: i64,
}

/// Reusable delivery address, keyed by name+street within a pharmacy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub pharmacy_id: Uuid,
    pub name: String,
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub phone: Option<String>,
    pub delivery_notes: Option<String>,
    pub access_info: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(Coordinates { latitude, longitude }),
            _ => None,
        }
    }
}

/// Immutable, append-only courier position sample
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverPosition {
    pub id: Uuid,
    pub driver_id: Uuid,
    pub tour_id: Option<Uuid>,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Photo evidence attached to a stop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopPhoto {
    pub id: Uuid,
    pub stop_id: Uuid,
    pub photo_url: String,
    pub storage_path: String,
    pub caption: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Signature evidence attached to a stop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopSignature {
    pub id: Uuid,
    pub stop_id: Uuid,
    pub signature_url: String,
    pub storage_path: String,
    pub signer_name: Option<String>,
    pub signed_latitude: Option<f64>,
    pub signed_longitude: Option<f64>,
    pub signed_at: DateTime<Utc>,
}

/// Aggregate view over a tour's stops for dispatch overviews
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TourStats {
    pub total_stops: i64,
    pub completed_stops: i64,
    pub pending_stops: i64,
    pub skipped_stops: i64,
    pub rescheduled_stops: i64,
    pub total_packages: i64,
    pub total_cash: f64,
    pub collected_cash: f64,
    pub progress_percent: i64,
}
