//! Delivery-tour orchestration for a pharmacy courier service
//!
//! Plans and executes multi-stop courier tours: tour/stop lifecycle, stop
//! import from scanned documents with interactive address repair, route
//! optimization with a deterministic offline fallback, and near-real-time
//! courier position tracking for dispatch oversight.
//!
//! # Components
//!
//! - [`db`] — persistence gateway over SQLite
//! - [`tour`] — lifecycle manager, stop sequencer, route optimizer
//! - [`import`] — sequential import/validation pipeline
//! - [`tracking`] — position reporter and latest-position aggregator
//! - [`geo`] — geocoding/routing clients, polyline codec, navigation links
//! - [`storage`] — object store adapter for PDFs, photos and signatures
//! - [`events`] / [`sse`] — change-notification feed and its SSE export
//! - [`api`] — REST surface over all of the above

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod geo;
pub mod import;
pub mod sse;
pub mod storage;
pub mod tour;
pub mod tracking;

pub use config::Config;
pub use error::{Error, Result};
