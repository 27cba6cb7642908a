//! Device position acquisition
//!
//! Abstracts over where fixes come from: a GPS receiver on the courier's
//! device, a device gateway, or a scripted source in tests. The reporter
//! consumes the continuous subscription and uses the one-shot as a backstop.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

/// One position fix from the device
#[derive(Debug, Clone, Serialize)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// Why a fix could not be acquired; all of these are non-fatal
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PositionError {
    #[error("Standortzugriff wurde verweigert")]
    PermissionDenied,
    #[error("Standort nicht verfügbar")]
    Unavailable,
    #[error("Standortabfrage Timeout")]
    Timeout,
}

/// Source of device position fixes
pub trait PositionSource: Send + Sync + 'static {
    /// Continuous subscription. Fixes arrive until the receiver is dropped;
    /// acquisition failures are not delivered here, the backstop surfaces
    /// them.
    fn watch(&self) -> mpsc::Receiver<PositionFix>;

    /// One-shot fix for point-in-time needs
    fn current(&self) -> BoxFuture<'static, Result<PositionFix, PositionError>>;
}

/// Source for deployments without device access; the one-shot always fails
/// and the subscription never yields. Position samples then arrive through
/// the reporting API instead.
pub struct UnavailableSource;

impl PositionSource for UnavailableSource {
    fn watch(&self) -> mpsc::Receiver<PositionFix> {
        // Keep the sender alive so the subscription stays open but silent
        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            tx.closed().await;
        });
        rx
    }

    fn current(&self) -> BoxFuture<'static, Result<PositionFix, PositionError>> {
        Box::pin(async { Err(PositionError::Unavailable) })
    }
}
