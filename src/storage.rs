//! Object store client and evidence uploads
//!
//! Binary evidence (tour source PDFs, stop photos, signatures) lives in a
//! bucketed HTTP object store; the database keeps URL + path references.
//! Rows and objects are written sequentially, never atomically: a crash in
//! between leaves a detectable gap, not corrupt state.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::db::models::{Coordinates, StopPhoto, StopSignature};
use crate::db::{evidence, stops, tours};
use crate::error::{Error, Result};
use crate::events::{ChangeFeed, DeliveryEvent};

pub const PDF_BUCKET: &str = "delivery-pdfs";
pub const PHOTO_BUCKET: &str = "delivery-photos";
pub const SIGNATURE_BUCKET: &str = "delivery-signatures";

/// Thin client over the bucketed object store
pub struct ObjectStoreClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ObjectStoreClient {
    /// Build the client if a store is configured
    pub fn from_config(config: &StorageConfig) -> Result<Option<Self>> {
        let Some(base_url) = config.base_url.clone() else {
            return Ok(None);
        };

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Storage(e.to_string()))?;

        Ok(Some(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().unwrap_or_default(),
        }))
    }

    /// Upload bytes to `bucket/path`, returning the public URL
    pub async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let url = format!("{}/object/{}/{}", self.base_url, bucket, path);

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Storage(format!("upload failed: HTTP {}", status)));
        }

        Ok(self.public_url(bucket, path))
    }

    /// Public URL of an object without touching the network
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}/object/public/{}/{}", self.base_url, bucket, path)
    }

    /// Delete an object; not-found counts as success
    pub async fn delete(&self, bucket: &str, path: &str) -> Result<()> {
        let url = format!("{}/object/{}/{}", self.base_url, bucket, path);

        let response = self
            .http_client
            .delete(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;

        let status = response.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(Error::Storage(format!("delete failed: HTTP {}", status)));
        }
        Ok(())
    }
}

/// Evidence workflow on top of the object store
///
/// Uploads the object first, then writes the database row. Deletion removes
/// the row first and cleans the object best-effort.
pub struct MediaStore {
    store: Arc<ObjectStoreClient>,
    db: SqlitePool,
    feed: ChangeFeed,
}

impl MediaStore {
    pub fn new(store: Arc<ObjectStoreClient>, db: SqlitePool, feed: ChangeFeed) -> Self {
        Self { store, db, feed }
    }

    /// Attach a delivery photo to a stop
    pub async fn upload_stop_photo(
        &self,
        stop_id: Uuid,
        bytes: Vec<u8>,
        caption: Option<&str>,
    ) -> Result<StopPhoto> {
        let stop = stops::get(&self.db, stop_id).await?;
        let path = format!("{}/{}.jpg", stop_id, Utc::now().timestamp_millis());

        let url = self
            .store
            .upload(PHOTO_BUCKET, &path, bytes, "image/jpeg")
            .await?;
        let photo = evidence::insert_photo(&self.db, stop_id, &url, &path, caption).await?;

        info!("Stored photo {} for stop {}", photo.id, stop_id);
        self.publish_evidence_changed(stop_id, stop.tour_id);
        Ok(photo)
    }

    /// Attach a recipient signature to a stop
    pub async fn upload_signature(
        &self,
        stop_id: Uuid,
        bytes: Vec<u8>,
        signer_name: Option<&str>,
        position: Option<Coordinates>,
    ) -> Result<StopSignature> {
        let stop = stops::get(&self.db, stop_id).await?;
        let path = format!("{}/{}.png", stop_id, Utc::now().timestamp_millis());

        let url = self
            .store
            .upload(SIGNATURE_BUCKET, &path, bytes, "image/png")
            .await?;
        let signature = evidence::insert_signature(
            &self.db,
            stop_id,
            &url,
            &path,
            signer_name,
            position.map(|p| p.latitude),
            position.map(|p| p.longitude),
            Utc::now(),
        )
        .await?;

        info!("Stored signature {} for stop {}", signature.id, stop_id);
        self.publish_evidence_changed(stop_id, stop.tour_id);
        Ok(signature)
    }

    /// Store the scanned source document on its tour
    pub async fn upload_tour_pdf(&self, tour_id: Uuid, bytes: Vec<u8>) -> Result<String> {
        // Fails early when the tour is gone
        tours::get(&self.db, tour_id).await?;

        let path = format!("{}/{}.pdf", tour_id, Utc::now().timestamp_millis());
        let url = self
            .store
            .upload(PDF_BUCKET, &path, bytes, "application/pdf")
            .await?;
        tours::set_source_pdf(&self.db, tour_id, &url, &path).await?;

        info!("Stored source PDF for tour {}", tour_id);
        Ok(url)
    }

    /// Remove a photo row and its stored object (object best-effort)
    pub async fn delete_stop_photo(&self, stop_id: Uuid, photo_id: Uuid) -> Result<()> {
        let stop = stops::get(&self.db, stop_id).await?;
        let path = evidence::delete_photo(&self.db, photo_id).await?;

        if let Err(e) = self.store.delete(PHOTO_BUCKET, &path).await {
            warn!("Orphaned photo object {} after row delete: {}", path, e);
        }
        self.publish_evidence_changed(stop_id, stop.tour_id);
        Ok(())
    }

    fn publish_evidence_changed(&self, stop_id: Uuid, tour_id: Uuid) {
        self.feed.publish(DeliveryEvent::EvidenceChanged {
            stop_id,
            tour_id,
            timestamp: Utc::now(),
        });
    }
}
