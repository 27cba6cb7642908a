//! Tour orchestration
//!
//! Lifecycle management, per-tour serialization, stop sequencing, and route
//! optimization.

pub mod locks;
pub mod optimizer;
pub mod sequencer;
pub mod service;

pub use locks::TourLocks;
pub use optimizer::{OptimizeMethod, OptimizeOutcome, RouteOptimizer};
pub use service::TourService;
