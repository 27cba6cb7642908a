//! Import/validation pipeline
//!
//! Turns OCR-derived candidate batches into confirmed stops with minimal
//! dispatcher interaction: a sequential, resumable state machine with one
//! paused state awaiting human correction.

pub mod candidate;
pub mod pipeline;
pub mod registry;

pub use candidate::{CorrectedAddress, ImportBatch, StopCandidate};
pub use pipeline::{ImportPhase, ImportPipeline, ImportStatus, Resolution};
pub use registry::ImportRegistry;
