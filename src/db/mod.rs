//! Database access layer
//!
//! The persistence gateway: pool initialization plus typed CRUD and filtered
//! queries per entity. IDs are TEXT UUIDs, instants RFC 3339 TEXT, dates
//! `YYYY-MM-DD` TEXT; the helpers below convert on read.

pub mod customers;
pub mod evidence;
pub mod init;
pub mod models;
pub mod positions;
pub mod stops;
pub mod tours;

pub use init::{init_database, init_memory_database};

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};

pub(crate) fn parse_id(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Internal(format!("invalid uuid '{}': {}", s, e)))
}

pub(crate) fn parse_opt_id(s: Option<String>) -> Result<Option<Uuid>> {
    s.as_deref().map(parse_id).transpose()
}

pub(crate) fn parse_instant(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("invalid timestamp '{}': {}", s, e)))
}

pub(crate) fn parse_opt_instant(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_instant).transpose()
}

pub(crate) fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::Internal(format!("invalid date '{}': {}", s, e)))
}

pub(crate) fn parse_opt_date(s: Option<String>) -> Result<Option<NaiveDate>> {
    s.as_deref().map(parse_date).transpose()
}
