//! Dataset chunking: split large datasets into row chunks and reassemble them
//!
//! Datasets within both the row-count and serialized-size limits are stored
//! as a single blob under the session's dataset key. Anything larger is split
//! into fixed-size row chunks, each under a freshly minted key, with a chunk
//! index stored under the dataset key. The decision checks the row count
//! first (cheap) and serializes only when that passes.

use chrono::Utc;
use tracing::debug;
use tracing::warn;

use crate::capability::CapacityProfile;
use crate::codec;
use crate::error::PersistenceError;
use crate::error::Result;
use crate::keys;
use crate::keys::BlobKind;
use crate::restore::ProgressiveRestorer;
use crate::storage::StoreHandle;
use crate::types::ChunkIndex;
use crate::types::Dataset;
use crate::types::DatasetChunk;
use crate::types::SessionRecord;

pub struct DatasetChunker {
    blobs: StoreHandle,
    limits: CapacityProfile,
    /// Configured chunk size; clamped to `max_rows_persisted` at save time.
    chunk_size: usize,
}

impl DatasetChunker {
    pub fn new(blobs: StoreHandle, limits: CapacityProfile, chunk_size: usize) -> Self {
        Self {
            blobs,
            limits,
            chunk_size,
        }
    }

    /// Persist `dataset` for the session behind `record`, choosing the inline
    /// or chunked representation. Mutates the record's dataset key and
    /// chunked flag; the caller persists the record afterward.
    pub async fn save(&self, record: &mut SessionRecord, dataset: &Dataset) -> Result<()> {
        if dataset.rows.len() <= self.limits.max_rows_persisted {
            let payload = codec::serialize(dataset)?;
            let size = codec::estimate_size(&payload);
            if size <= self.limits.max_dataset_bytes {
                return self.save_inline(record, payload).await;
            }
            debug!(
                session_id = %record.id,
                size,
                limit = self.limits.max_dataset_bytes,
                "dataset payload exceeds the inline size budget, chunking"
            );
        } else {
            debug!(
                session_id = %record.id,
                rows = dataset.rows.len(),
                limit = self.limits.max_rows_persisted,
                "dataset row count exceeds the persistence cap, chunking"
            );
        }
        self.save_chunked(record, dataset).await
    }

    /// Load the dataset behind `record`. The chunked path delegates to the
    /// progressive restorer with default options and returns the fully
    /// materialized result.
    pub async fn load(
        &self,
        restorer: &ProgressiveRestorer,
        record: &SessionRecord,
    ) -> Result<Dataset> {
        let key = record
            .dataset_key
            .as_deref()
            .ok_or_else(|| PersistenceError::DatasetMissing(record.id.clone()))?;

        if !record.is_chunked {
            return self
                .blobs
                .get_payload(key)
                .await?
                .ok_or_else(|| PersistenceError::DatasetMissing(record.id.clone()));
        }

        let index: ChunkIndex = self
            .blobs
            .get_payload(key)
            .await?
            .ok_or_else(|| PersistenceError::DatasetMissing(record.id.clone()))?;
        restorer.materialize(&index).await
    }

    async fn save_inline(&self, record: &mut SessionRecord, payload: codec::Payload) -> Result<()> {
        let stale_chunks = self.stale_chunk_keys(record).await;

        let key = record
            .dataset_key
            .clone()
            .unwrap_or_else(|| keys::blob_key(BlobKind::Dataset, &record.id));
        self.blobs.set(&key, &payload).await?;
        record.dataset_key = Some(key);
        record.is_chunked = false;

        for stale in stale_chunks {
            self.blobs.discard(&stale).await;
        }
        Ok(())
    }

    async fn save_chunked(&self, record: &mut SessionRecord, dataset: &Dataset) -> Result<()> {
        let stale_chunks = self.stale_chunk_keys(record).await;

        let chunk_size = self.chunk_size.min(self.limits.max_rows_persisted).max(1);
        let ranges = chunk_ranges(dataset.rows.len(), chunk_size);
        let mut chunk_keys = Vec::with_capacity(ranges.len());

        // Chunk writes are awaited one at a time; order matters for the
        // restorer's between-chunk memory checks to stay meaningful.
        for (i, (start, end)) in ranges.into_iter().enumerate() {
            let chunk = DatasetChunk {
                chunk_index: i,
                start_row: start,
                end_row: end,
                headers: dataset.headers.clone(),
                rows: dataset.rows[start..end].to_vec(),
                file_name: dataset.file_name.clone(),
                sheet_name: dataset.sheet_name.clone(),
                total_rows: dataset.rows.len(),
            };
            let key = keys::blob_key(BlobKind::Chunk, &record.id);
            self.blobs.set_payload(&key, &chunk).await?;
            chunk_keys.push(key);
        }

        let index = ChunkIndex {
            total_chunks: chunk_keys.len(),
            total_rows: dataset.rows.len(),
            chunk_size,
            created_at: Utc::now(),
            chunk_keys,
        };
        let key = record
            .dataset_key
            .clone()
            .unwrap_or_else(|| keys::blob_key(BlobKind::Dataset, &record.id));
        self.blobs.set_payload(&key, &index).await?;
        record.dataset_key = Some(key);
        record.is_chunked = true;

        debug!(
            session_id = %record.id,
            chunks = index.total_chunks,
            chunk_size,
            "stored chunked dataset"
        );

        for stale in stale_chunks {
            self.blobs.discard(&stale).await;
        }
        Ok(())
    }

    /// Chunk keys a previous chunked save left behind, to release once the
    /// new representation is written.
    async fn stale_chunk_keys(&self, record: &SessionRecord) -> Vec<String> {
        if !record.is_chunked {
            return Vec::new();
        }
        match &record.dataset_key {
            Some(key) => chunk_keys_at(&self.blobs, key).await,
            None => Vec::new(),
        }
    }
}

/// Chunk keys listed by the chunk index stored at `dataset_key`, empty when
/// the index is missing or unreadable.
pub(crate) async fn chunk_keys_at(blobs: &StoreHandle, dataset_key: &str) -> Vec<String> {
    match blobs.get_payload::<ChunkIndex>(dataset_key).await {
        Ok(Some(index)) => index.chunk_keys,
        Ok(None) => {
            warn!(key = %dataset_key, "chunk index missing, chunks cannot be released");
            Vec::new()
        }
        Err(e) => {
            warn!(key = %dataset_key, error = %e, "chunk index unreadable, chunks cannot be released");
            Vec::new()
        }
    }
}

/// Partition `[0, total_rows)` into contiguous ranges of at most
/// `chunk_size` rows.
pub fn chunk_ranges(total_rows: usize, chunk_size: usize) -> Vec<(usize, usize)> {
    let mut ranges = Vec::with_capacity(total_rows.div_ceil(chunk_size.max(1)));
    let mut start = 0;
    while start < total_rows {
        let end = (start + chunk_size).min(total_rows);
        ranges.push((start, end));
        start = end;
    }
    ranges
}
