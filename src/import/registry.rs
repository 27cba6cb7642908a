//! In-flight import batches
//!
//! The API layer creates a pipeline per uploaded batch and addresses it by
//! batch ID for resume/cancel/status calls. Each pipeline sits behind its
//! own mutex so two batches never block each other.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::import::pipeline::ImportPipeline;

/// Registry of active import pipelines
#[derive(Default)]
pub struct ImportRegistry {
    inner: Mutex<HashMap<Uuid, Arc<Mutex<ImportPipeline>>>>,
}

impl ImportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, pipeline: ImportPipeline) -> Arc<Mutex<ImportPipeline>> {
        let batch_id = pipeline.batch_id();
        let handle = Arc::new(Mutex::new(pipeline));
        self.inner.lock().await.insert(batch_id, handle.clone());
        handle
    }

    pub async fn get(&self, batch_id: Uuid) -> Result<Arc<Mutex<ImportPipeline>>> {
        self.inner
            .lock()
            .await
            .get(&batch_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("import batch {}", batch_id)))
    }

    /// Drop a finished batch from the registry
    pub async fn remove(&self, batch_id: Uuid) {
        self.inner.lock().await.remove(&batch_id);
    }
}
