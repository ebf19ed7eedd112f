//! Session directory: record CRUD, the ordered index, and eviction
//!
//! The directory owns the session index (most recently updated first) and the
//! persisted active-session pointer. Every write that can grow the index runs
//! eviction afterward; sessions are a cache, not an archive.

use chrono::Utc;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::capability::CapacityProfile;
use crate::chunker;
use crate::error::PersistenceError;
use crate::error::Result;
use crate::keys;
use crate::storage::StoreHandle;
use crate::types::SessionIndex;
use crate::types::SessionRecord;
use crate::types::SessionSummary;

pub struct SessionDirectory {
    meta: StoreHandle,
    blobs: StoreHandle,
    limits: CapacityProfile,
    app_version: String,
}

impl SessionDirectory {
    pub fn new(
        meta: StoreHandle,
        blobs: StoreHandle,
        limits: CapacityProfile,
        app_version: String,
    ) -> Self {
        Self {
            meta,
            blobs,
            limits,
            app_version,
        }
    }

    /// Update the active session's summary in place, or mint a fresh record
    /// and mark it active. Bumps the index and runs eviction either way.
    pub async fn create_or_update(&self, summary: SessionSummary) -> Result<SessionRecord> {
        if let Some(active_id) = self.active_session_id().await?
            && let Some(mut record) = self.find(&active_id).await?
        {
            record.summary = summary;
            record.updated_at = Utc::now();
            self.commit(&record).await?;
            return Ok(record);
        }

        let id = Uuid::new_v4().to_string();
        let record = SessionRecord::new(id.clone(), self.app_version.clone(), summary);
        self.set_active(&id).await?;
        self.commit(&record).await?;
        info!(session_id = %id, "created session");
        Ok(record)
    }

    /// Fetch a record, failing when the id is unknown.
    pub async fn get(&self, id: &str) -> Result<SessionRecord> {
        self.find(id)
            .await?
            .ok_or_else(|| PersistenceError::SessionNotFound(id.to_string()))
    }

    /// Fetch a record, `None` when the id is unknown. Records written under
    /// a different schema version are ignored rather than migrated.
    pub async fn find(&self, id: &str) -> Result<Option<SessionRecord>> {
        let record: Option<SessionRecord> = self.meta.get(&keys::session_key(id)).await?;
        if let Some(record) = &record
            && record.schema_version != crate::SCHEMA_VERSION
        {
            warn!(
                session_id = %id,
                version = record.schema_version,
                "session written under an unsupported schema version, ignoring"
            );
            return Ok(None);
        }
        Ok(record)
    }

    /// Sessions in index order, most recently updated first. Ids referenced
    /// by the index but unreadable from storage are skipped.
    pub async fn list(&self) -> Result<Vec<SessionRecord>> {
        let index = self.load_index().await?;
        let mut sessions = Vec::with_capacity(index.len());
        for entry in &index.entries {
            match self.find(&entry.id).await {
                Ok(Some(record)) => sessions.push(record),
                Ok(None) => {
                    warn!(session_id = %entry.id, "session in index but missing from storage, skipping");
                }
                Err(e) => {
                    warn!(session_id = %entry.id, error = %e, "failed to load session record, skipping");
                }
            }
        }
        Ok(sessions)
    }

    /// Persist `record` and bump its index position, then evict any surplus.
    pub async fn commit(&self, record: &SessionRecord) -> Result<()> {
        self.meta
            .set(&keys::session_key(&record.id), record)
            .await?;

        let mut index = self.load_index().await?;
        index.touch(&record.id, record.updated_at);
        self.save_index(&index).await?;

        self.evict_overflow().await
    }

    /// Remove a session and every blob it references: all chunks plus the
    /// chunk index for chunked datasets, the single dataset blob otherwise,
    /// then filters/charts blobs, the record, and the index entry. Clears
    /// the active pointer when it pointed here. Missing keys are logged,
    /// not fatal.
    pub async fn delete(&self, id: &str) -> Result<()> {
        match self.find(id).await {
            Ok(Some(record)) => {
                self.release_dataset_blobs(&record).await;
                if let Some(key) = &record.filters_key {
                    self.blobs.discard(key).await;
                }
                if let Some(key) = &record.charts_key {
                    self.blobs.discard(key).await;
                }
            }
            Ok(None) => debug!(session_id = %id, "deleting session with no stored record"),
            Err(e) => warn!(session_id = %id, error = %e, "session record unreadable during delete"),
        }

        self.meta.remove(&keys::session_key(id)).await?;

        let mut index = self.load_index().await?;
        if index.remove(id) {
            self.save_index(&index).await?;
        }

        if self.active_session_id().await?.as_deref() == Some(id) {
            self.clear_active().await?;
        }

        info!(session_id = %id, "deleted session");
        Ok(())
    }

    pub async fn active_session_id(&self) -> Result<Option<String>> {
        self.meta.get(keys::ACTIVE_SESSION_KEY).await
    }

    pub async fn set_active(&self, id: &str) -> Result<()> {
        self.meta.set(keys::ACTIVE_SESSION_KEY, id).await?;
        Ok(())
    }

    pub async fn clear_active(&self) -> Result<()> {
        self.meta.remove(keys::ACTIVE_SESSION_KEY).await?;
        Ok(())
    }

    pub async fn load_index(&self) -> Result<SessionIndex> {
        Ok(self
            .meta
            .get(keys::SESSION_INDEX_KEY)
            .await?
            .unwrap_or_default())
    }

    async fn save_index(&self, index: &SessionIndex) -> Result<()> {
        self.meta.set(keys::SESSION_INDEX_KEY, index).await?;
        Ok(())
    }

    /// Delete every session beyond the `max_sessions` most recent, oldest
    /// first. Unconditional: no confirmation, no favorites.
    async fn evict_overflow(&self) -> Result<()> {
        let index = self.load_index().await?;
        for id in index.overflow(self.limits.max_sessions) {
            info!(session_id = %id, "evicting session over the capacity limit");
            self.delete(&id).await?;
        }
        Ok(())
    }

    async fn release_dataset_blobs(&self, record: &SessionRecord) {
        let Some(key) = &record.dataset_key else {
            return;
        };
        if record.is_chunked {
            for chunk_key in chunker::chunk_keys_at(&self.blobs, key).await {
                self.blobs.discard(&chunk_key).await;
            }
        }
        self.blobs.discard(key).await;
    }
}
