//! Location tracking
//!
//! Reporter side (courier) and aggregator side (dispatcher oversight) of
//! near-real-time position handling, plus the push/poll live-view
//! abstraction they share.

pub mod aggregator;
pub mod live_view;
pub mod manager;
pub mod reporter;
pub mod source;

pub use aggregator::PositionAggregator;
pub use live_view::LiveView;
pub use manager::TrackingManager;
pub use reporter::{TrackingReporter, TrackingStatus};
pub use source::{PositionError, PositionFix, PositionSource, UnavailableSource};
