//! Engine facade wiring the adapter pair into the persistence components

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use crate::capability::CapabilityHints;
use crate::capability::CapacityProfile;
use crate::chunker::DatasetChunker;
use crate::directory::SessionDirectory;
use crate::error::Result;
use crate::keys;
use crate::keys::BlobKind;
use crate::restore::ProgressiveRestorer;
use crate::restore::RestoreOptions;
use crate::restore::RestoreOutcome;
use crate::storage::KeyValueStore;
use crate::storage::StoreHandle;
use crate::types::Dataset;
use crate::types::SessionRecord;
use crate::types::SessionSummary;

/// Engine tuning knobs, independent of the capacity profile.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Application version tag stamped on new session records.
    pub app_version: String,
    /// Rows per chunk before clamping to the profile's row cap.
    pub chunk_size: usize,
    /// Chunks between memory-pressure checks during restore.
    pub memory_check_interval: usize,
    /// Chunks between scheduler yields during restore.
    pub gc_yield_interval: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            chunk_size: 50_000,
            memory_check_interval: 5,
            gc_yield_interval: 10,
        }
    }
}

/// The dataset persistence and session-restore engine.
///
/// Built over two injected key/value backends: a small store for session
/// records, the index, and the active pointer, and a large store for
/// dataset/filter/chart blobs and chunks. Callers hold and pass the engine
/// instance explicitly; there is no ambient singleton.
pub struct PersistenceEngine {
    directory: SessionDirectory,
    chunker: DatasetChunker,
    restorer: ProgressiveRestorer,
    blobs: StoreHandle,
    profile: CapacityProfile,
}

impl PersistenceEngine {
    pub fn new(
        meta_store: Arc<dyn KeyValueStore>,
        blob_store: Arc<dyn KeyValueStore>,
        profile: CapacityProfile,
        config: EngineConfig,
    ) -> Self {
        let meta = StoreHandle::new(meta_store);
        let blobs = StoreHandle::new(blob_store);

        Self {
            directory: SessionDirectory::new(
                meta,
                blobs.clone(),
                profile,
                config.app_version.clone(),
            ),
            chunker: DatasetChunker::new(blobs.clone(), profile, config.chunk_size),
            restorer: ProgressiveRestorer::new(
                blobs.clone(),
                profile,
                config.memory_check_interval,
                config.gc_yield_interval,
            ),
            blobs,
            profile,
        }
    }

    /// Construct with limits detected from the current host.
    pub fn with_host_profile(
        meta_store: Arc<dyn KeyValueStore>,
        blob_store: Arc<dyn KeyValueStore>,
        config: EngineConfig,
    ) -> Self {
        let profile = CapacityProfile::detect(CapabilityHints::from_host());
        Self::new(meta_store, blob_store, profile, config)
    }

    pub const fn profile(&self) -> &CapacityProfile {
        &self.profile
    }

    pub const fn directory(&self) -> &SessionDirectory {
        &self.directory
    }

    pub async fn create_or_update_session(&self, summary: SessionSummary) -> Result<SessionRecord> {
        self.directory.create_or_update(summary).await
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.directory.list().await
    }

    pub async fn get_session(&self, id: &str) -> Result<SessionRecord> {
        self.directory.get(id).await
    }

    pub async fn delete_session(&self, id: &str) -> Result<()> {
        self.directory.delete(id).await
    }

    pub async fn active_session(&self) -> Result<Option<SessionRecord>> {
        match self.directory.active_session_id().await? {
            Some(id) => self.directory.find(&id).await,
            None => Ok(None),
        }
    }

    pub async fn set_active_session(&self, id: &str) -> Result<()> {
        self.directory.get(id).await?;
        self.directory.set_active(id).await
    }

    pub async fn clear_active_session(&self) -> Result<()> {
        self.directory.clear_active().await
    }

    /// Persist `dataset` for the session, chunking when it exceeds the
    /// profile's row or size limits, and refresh the session summary.
    pub async fn save_dataset(&self, session_id: &str, dataset: &Dataset) -> Result<SessionRecord> {
        let mut record = self.directory.get(session_id).await?;
        self.chunker.save(&mut record, dataset).await?;
        record.summary = dataset.summary();
        record.updated_at = Utc::now();
        self.directory.commit(&record).await?;
        Ok(record)
    }

    /// Materialize the session's dataset with no intermediate progress.
    pub async fn load_dataset(&self, session_id: &str) -> Result<Dataset> {
        let record = self.directory.get(session_id).await?;
        self.chunker.load(&self.restorer, &record).await
    }

    /// Persist filter state. Blob write failures on this non-critical path
    /// are logged and swallowed.
    pub async fn save_filters(&self, session_id: &str, filters: &Value) -> Result<SessionRecord> {
        self.save_auxiliary(session_id, BlobKind::Filters, filters)
            .await
    }

    /// Persist chart configs. Blob write failures on this non-critical path
    /// are logged and swallowed.
    pub async fn save_charts(&self, session_id: &str, charts: &Value) -> Result<SessionRecord> {
        self.save_auxiliary(session_id, BlobKind::Charts, charts)
            .await
    }

    /// Run the progressive restore pipeline for `session_id`.
    pub async fn restore_session(
        &self,
        session_id: &str,
        options: RestoreOptions,
    ) -> Result<RestoreOutcome> {
        self.restorer
            .restore(&self.directory, session_id, options)
            .await
    }

    async fn save_auxiliary(
        &self,
        session_id: &str,
        kind: BlobKind,
        value: &Value,
    ) -> Result<SessionRecord> {
        let mut record = self.directory.get(session_id).await?;

        let existing = match kind {
            BlobKind::Filters => record.filters_key.clone(),
            _ => record.charts_key.clone(),
        };
        let key = existing.unwrap_or_else(|| keys::blob_key(kind, session_id));

        match self.blobs.set_payload(&key, value).await {
            Ok(_) => match kind {
                BlobKind::Filters => record.filters_key = Some(key),
                _ => record.charts_key = Some(key),
            },
            Err(e) => {
                warn!(
                    session_id = %session_id,
                    kind = kind.as_str(),
                    error = %e,
                    "failed to persist blob, session will restore without it"
                );
            }
        }

        record.updated_at = Utc::now();
        self.directory.commit(&record).await?;
        Ok(record)
    }
}
