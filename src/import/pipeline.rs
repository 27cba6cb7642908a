//! Sequential import pipeline
//!
//! Walks an ordered candidate batch one stop at a time: candidates with a
//! complete address import immediately, incomplete ones pause the pipeline
//! for dispatcher correction. Cancelling discards only the unprocessed
//! remainder; stops already imported stay. The whole batch triggers a single
//! route optimization at the end instead of one per added stop.
//!
//! The pipeline is deliberately sequential. Candidates interact only through
//! customer lookups, and importing them in parallel could create duplicate
//! customers.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::customers;
use crate::db::models::Customer;
use crate::db::tours::TourUpdate;
use crate::error::{Error, Result};
use crate::events::{ChangeFeed, DeliveryEvent};
use crate::import::candidate::{
    is_address_complete, CorrectedAddress, ImportBatch, StopCandidate,
};
use crate::tour::{RouteOptimizer, TourService};

/// Where the pipeline currently stands
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Processing,
    AwaitingCorrection,
    Done,
    Cancelled,
}

/// Dispatcher's answer to a paused pipeline
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Import with the corrected fields applied
    Corrected(CorrectedAddress),
    /// Import the candidate as-is, incomplete address and all
    SkipAsIs,
}

/// Serializable snapshot of the pipeline for API responses
#[derive(Debug, Clone, Serialize)]
pub struct ImportStatus {
    pub batch_id: Uuid,
    pub tour_id: Uuid,
    pub phase: ImportPhase,
    pub index: usize,
    pub total: usize,
    pub imported: usize,
    /// The candidate awaiting correction, when paused
    pub pending_candidate: Option<StopCandidate>,
    /// Partial customer match exposed alongside the candidate, when paused
    pub matched_customer: Option<Customer>,
}

/// One import batch in flight
pub struct ImportPipeline {
    batch_id: Uuid,
    tour_id: Uuid,
    pharmacy_id: Uuid,
    tours: Arc<TourService>,
    optimizer: Arc<RouteOptimizer>,
    feed: ChangeFeed,
    candidates: Vec<StopCandidate>,
    index: usize,
    imported: usize,
    phase: ImportPhase,
    matched_customer: Option<Customer>,
}

impl ImportPipeline {
    pub fn new(
        tours: Arc<TourService>,
        optimizer: Arc<RouteOptimizer>,
        feed: ChangeFeed,
        tour_id: Uuid,
        pharmacy_id: Uuid,
        candidates: Vec<StopCandidate>,
    ) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            tour_id,
            pharmacy_id,
            tours,
            optimizer,
            feed,
            candidates,
            index: 0,
            imported: 0,
            phase: ImportPhase::Processing,
            matched_customer: None,
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Start the batch: apply detected tour metadata, then auto-resolve
    /// candidates until one needs correction or the batch is done.
    pub async fn start(&mut self, batch_meta: &ImportBatch) -> Result<ImportStatus> {
        if batch_meta.tour_date.is_some() || batch_meta.tour_name.is_some() {
            self.tours
                .update_tour(
                    self.tour_id,
                    TourUpdate {
                        name: batch_meta.tour_name.clone(),
                        date: batch_meta.tour_date,
                        driver_id: None,
                    },
                )
                .await?;
            debug!(
                "Applied detected tour metadata to {} before import",
                self.tour_id
            );
        }

        self.advance().await?;
        Ok(self.status())
    }

    /// Answer a paused pipeline and continue with the next candidate
    pub async fn resume(&mut self, resolution: Resolution) -> Result<ImportStatus> {
        if self.phase != ImportPhase::AwaitingCorrection {
            return Err(Error::InvalidState(format!(
                "import batch {} is not awaiting correction",
                self.batch_id
            )));
        }

        let candidate = match &resolution {
            Resolution::Corrected(corrected) => {
                self.candidates[self.index].with_corrections(corrected)
            }
            Resolution::SkipAsIs => self.candidates[self.index].clone(),
        };

        let matched = self.matched_customer.take();
        self.import_candidate(&candidate, matched.as_ref()).await?;

        self.index += 1;
        self.phase = ImportPhase::Processing;
        self.advance().await?;
        Ok(self.status())
    }

    /// Abandon the unprocessed remainder. Already-imported stops are kept;
    /// there is no rollback. Cancelling a cancelled batch is a no-op.
    pub fn cancel(&mut self) -> Result<ImportStatus> {
        match self.phase {
            ImportPhase::Done => {
                return Err(Error::InvalidState(format!(
                    "import batch {} already finished",
                    self.batch_id
                )))
            }
            ImportPhase::Cancelled => return Ok(self.status()),
            _ => {}
        }

        self.phase = ImportPhase::Cancelled;
        self.matched_customer = None;
        info!(
            "Import batch {} cancelled after {} of {} candidates",
            self.batch_id,
            self.imported,
            self.candidates.len()
        );
        self.feed.publish(DeliveryEvent::ImportFinished {
            tour_id: self.tour_id,
            imported: self.imported,
            cancelled: true,
            timestamp: Utc::now(),
        });
        Ok(self.status())
    }

    pub fn status(&self) -> ImportStatus {
        let paused = self.phase == ImportPhase::AwaitingCorrection;
        ImportStatus {
            batch_id: self.batch_id,
            tour_id: self.tour_id,
            phase: self.phase.clone(),
            index: self.index,
            total: self.candidates.len(),
            imported: self.imported,
            pending_candidate: paused.then(|| self.candidates[self.index].clone()),
            matched_customer: if paused { self.matched_customer.clone() } else { None },
        }
    }

    /// Auto-resolve candidates until a pause or the end of the batch
    async fn advance(&mut self) -> Result<()> {
        while self.index < self.candidates.len() {
            let candidate = self.candidates[self.index].clone();

            // Case-insensitive name lookup: scans are tolerant input, so this
            // match is looser than the exact name+street match of add_stop
            let customer = customers::find_by_name(
                self.tours.pool(),
                self.pharmacy_id,
                &candidate.customer_name,
            )
            .await?;

            if is_address_complete(&candidate, customer.as_ref()) {
                self.import_candidate(&candidate, customer.as_ref()).await?;
                self.index += 1;
            } else {
                debug!(
                    "Candidate {} '{}' needs correction, pausing import",
                    self.index, candidate.customer_name
                );
                self.phase = ImportPhase::AwaitingCorrection;
                self.matched_customer = customer;
                return Ok(());
            }
        }

        self.finish().await;
        Ok(())
    }

    async fn import_candidate(
        &mut self,
        candidate: &StopCandidate,
        customer: Option<&Customer>,
    ) -> Result<()> {
        let new_stop = candidate.to_new_stop(customer);
        self.tours.add_stop(self.tour_id, new_stop).await?;
        self.imported += 1;
        Ok(())
    }

    async fn finish(&mut self) {
        self.phase = ImportPhase::Done;
        info!(
            "Import batch {} done: {} stops imported into tour {}",
            self.batch_id, self.imported, self.tour_id
        );
        self.feed.publish(DeliveryEvent::ImportFinished {
            tour_id: self.tour_id,
            imported: self.imported,
            cancelled: false,
            timestamp: Utc::now(),
        });

        // One optimization for the whole batch; per-add optimization was
        // suppressed. Too few pending stops is fine here.
        if let Err(e) = self.optimizer.optimize_route(self.tour_id).await {
            debug!("Post-import optimization skipped for {}: {}", self.tour_id, e);
        }
    }
}
