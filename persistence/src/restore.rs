//! Progressive session restore
//!
//! Restores a session as a sequence of observable stages: validate, load the
//! dataset (chunk by chunk when chunked), load filters and charts
//! best-effort, then apply. The chunk walk checks a memory probe between
//! chunks, yields to the scheduler periodically, and paces itself with an
//! adaptive delay so back-to-back large allocations do not pile up. A
//! cancellation token is honored at the top of every chunk iteration and
//! during each inter-chunk wait.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::capability::CapacityProfile;
use crate::directory::SessionDirectory;
use crate::error::PersistenceError;
use crate::error::Result;
use crate::storage::StoreHandle;
use crate::types::ChunkIndex;
use crate::types::Dataset;
use crate::types::DatasetChunk;

/// Estimated bytes per cell when sizing a chunk's in-memory footprint.
const CELL_FOOTPRINT_BYTES: usize = 16;
/// Flat overhead per chunk for headers and metadata.
const HEADER_FOOTPRINT_BYTES: usize = 1024;

const EARLY_CHUNK_DELAY: Duration = Duration::from_millis(10);
const MID_CHUNK_DELAY: Duration = Duration::from_millis(25);
const LATE_CHUNK_DELAY: Duration = Duration::from_millis(50);

/// Restore pipeline stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStage {
    Validating,
    LoadingData,
    LoadingFilters,
    LoadingCharts,
    Applying,
    Complete,
}

impl RestoreStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::LoadingData => "loading-data",
            Self::LoadingFilters => "loading-filters",
            Self::LoadingCharts => "loading-charts",
            Self::Applying => "applying",
            Self::Complete => "complete",
        }
    }
}

/// One progress report delivered to the observer.
#[derive(Debug, Clone)]
pub struct RestoreProgress {
    pub stage: RestoreStage,
    pub message: String,
    pub percent: f32,
}

pub type ProgressObserver = Box<dyn Fn(RestoreProgress) + Send + Sync>;

pub type ApplyError = Box<dyn std::error::Error + Send + Sync>;

pub type ApplyDataset = Box<dyn FnMut(&Dataset) -> std::result::Result<(), ApplyError> + Send>;
pub type ApplyBlob = Box<dyn FnMut(&Value) -> std::result::Result<(), ApplyError> + Send>;

/// Apply callbacks provided by the UI collaborator. A dataset apply failure
/// is fatal to the restore; filter/chart failures are logged and swallowed.
#[derive(Default)]
pub struct RestoreSinks {
    pub on_dataset: Option<ApplyDataset>,
    pub on_filters: Option<ApplyBlob>,
    pub on_charts: Option<ApplyBlob>,
}

/// Memory pressure as reported by the host probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPressure {
    Normal,
    High,
}

pub trait MemoryProbe: Send + Sync {
    fn pressure(&self) -> MemoryPressure;
}

/// Default probe for hosts without a pressure signal.
pub struct NoopMemoryProbe;

impl MemoryProbe for NoopMemoryProbe {
    fn pressure(&self) -> MemoryPressure {
        MemoryPressure::Normal
    }
}

pub struct RestoreOptions {
    pub observer: Option<ProgressObserver>,
    pub sinks: RestoreSinks,
    pub cancel: CancellationToken,
    pub memory: Arc<dyn MemoryProbe>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            observer: None,
            sinks: RestoreSinks::default(),
            cancel: CancellationToken::new(),
            memory: Arc::new(NoopMemoryProbe),
        }
    }
}

/// Result of a completed restore.
pub struct RestoreOutcome {
    pub dataset: Dataset,
    pub filters: Option<Value>,
    pub charts: Option<Value>,
    /// Indices of chunks that were missing, corrupt, or over the per-chunk
    /// memory budget. A non-empty list means the dataset has a gap; callers
    /// should surface this as a data-integrity warning, not accept it
    /// silently.
    pub skipped_chunks: Vec<usize>,
}

pub struct ProgressiveRestorer {
    blobs: StoreHandle,
    limits: CapacityProfile,
    memory_check_interval: usize,
    gc_yield_interval: usize,
}

impl ProgressiveRestorer {
    pub fn new(
        blobs: StoreHandle,
        limits: CapacityProfile,
        memory_check_interval: usize,
        gc_yield_interval: usize,
    ) -> Self {
        Self {
            blobs,
            limits,
            memory_check_interval,
            gc_yield_interval,
        }
    }

    /// Run the full restore pipeline for `session_id`. A failed or cancelled
    /// restore never leaves the session marked active.
    pub async fn restore(
        &self,
        directory: &SessionDirectory,
        session_id: &str,
        options: RestoreOptions,
    ) -> Result<RestoreOutcome> {
        let result = self.run(directory, session_id, options).await;

        if result.is_err()
            && let Ok(Some(active)) = directory.active_session_id().await
            && active == session_id
            && let Err(e) = directory.clear_active().await
        {
            warn!(session_id = %session_id, error = %e, "failed to clear active pointer after aborted restore");
        }

        result
    }

    async fn run(
        &self,
        directory: &SessionDirectory,
        session_id: &str,
        options: RestoreOptions,
    ) -> Result<RestoreOutcome> {
        let RestoreOptions {
            observer,
            mut sinks,
            cancel,
            memory,
        } = options;
        let observer = observer.as_ref();

        notify(observer, RestoreStage::Validating, "Checking saved session", 0.0);
        let record = directory.get(session_id).await?;
        let dataset_key = record
            .dataset_key
            .clone()
            .ok_or_else(|| PersistenceError::DatasetMissing(session_id.to_string()))?;
        notify(observer, RestoreStage::Validating, "Session verified", 10.0);

        let (dataset, skipped_chunks) = if record.is_chunked {
            let index: ChunkIndex = self
                .blobs
                .get_payload(&dataset_key)
                .await?
                .ok_or_else(|| PersistenceError::DatasetMissing(session_id.to_string()))?;
            let (chunks, skipped) = self
                .collect_chunks(&index, &cancel, memory.as_ref(), observer)
                .await?;
            (reassemble(chunks)?, skipped)
        } else {
            let dataset = self
                .blobs
                .get_payload(&dataset_key)
                .await?
                .ok_or_else(|| PersistenceError::DatasetMissing(session_id.to_string()))?;
            notify(observer, RestoreStage::LoadingData, "Dataset loaded", 60.0);
            (dataset, Vec::new())
        };

        notify(observer, RestoreStage::LoadingFilters, "Loading filters", 60.0);
        let filters = match &record.filters_key {
            Some(key) => self.load_optional(key, "filters").await,
            None => None,
        };

        notify(observer, RestoreStage::LoadingCharts, "Loading charts", 65.0);
        let charts = match &record.charts_key {
            Some(key) => self.load_optional(key, "charts").await,
            None => None,
        };

        if cancel.is_cancelled() {
            return Err(PersistenceError::Cancelled);
        }
        notify(observer, RestoreStage::Applying, "Applying restored session", 80.0);

        if let Some(on_dataset) = sinks.on_dataset.as_mut() {
            on_dataset(&dataset).map_err(PersistenceError::ApplyFailed)?;
        }
        if let Some(on_filters) = sinks.on_filters.as_mut()
            && let Some(filters) = &filters
            && let Err(e) = on_filters(filters)
        {
            warn!(session_id = %session_id, error = %e, "filter apply failed, continuing without filters");
        }
        if let Some(on_charts) = sinks.on_charts.as_mut()
            && let Some(charts) = &charts
            && let Err(e) = on_charts(charts)
        {
            warn!(session_id = %session_id, error = %e, "chart apply failed, continuing without charts");
        }

        directory.set_active(session_id).await?;
        notify(observer, RestoreStage::Complete, "Session restored", 100.0);

        Ok(RestoreOutcome {
            dataset,
            filters,
            charts,
            skipped_chunks,
        })
    }

    /// Materialize a chunked dataset without progress reporting; used by the
    /// non-progressive load path.
    pub(crate) async fn materialize(&self, index: &ChunkIndex) -> Result<Dataset> {
        let (chunks, skipped) = self
            .collect_chunks(index, &CancellationToken::new(), &NoopMemoryProbe, None)
            .await?;
        if !skipped.is_empty() {
            warn!(skipped = skipped.len(), "dataset materialized with missing chunks");
        }
        reassemble(chunks)
    }

    /// Walk the chunk keys in index order, one awaited read at a time.
    async fn collect_chunks(
        &self,
        index: &ChunkIndex,
        cancel: &CancellationToken,
        memory: &dyn MemoryProbe,
        observer: Option<&ProgressObserver>,
    ) -> Result<(Vec<DatasetChunk>, Vec<usize>)> {
        let total = index.chunk_keys.len();
        let mut chunks = Vec::with_capacity(total);
        let mut skipped = Vec::new();

        notify(
            observer,
            RestoreStage::LoadingData,
            &format!("Loading {total} chunks"),
            10.0,
        );

        for (i, key) in index.chunk_keys.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(PersistenceError::Cancelled);
            }
            if self.memory_check_interval > 0
                && i % self.memory_check_interval == 0
                && memory.pressure() == MemoryPressure::High
            {
                return Err(PersistenceError::InsufficientMemory);
            }

            let loaded = match self.blobs.get_payload::<DatasetChunk>(key).await {
                Ok(Some(chunk)) => Ok(chunk),
                Ok(None) => Err(PersistenceError::ChunkMissing { index: i }),
                Err(e) => Err(e),
            };
            match loaded {
                Ok(chunk) => {
                    let footprint = estimate_chunk_footprint(&chunk);
                    if footprint > self.limits.max_chunk_memory_bytes {
                        warn!(
                            chunk = i,
                            footprint,
                            limit = self.limits.max_chunk_memory_bytes,
                            "chunk exceeds the per-chunk memory budget, skipping"
                        );
                        skipped.push(i);
                    } else {
                        chunks.push(chunk);
                    }
                }
                Err(
                    e @ (PersistenceError::ChunkMissing { .. } | PersistenceError::CorruptPayload(_)),
                ) => {
                    warn!(chunk = i, key = %key, error = %e, "skipping unrecoverable chunk");
                    skipped.push(i);
                }
                Err(e) => return Err(e),
            }

            let done = i + 1;
            notify(
                observer,
                RestoreStage::LoadingData,
                &format!("Loaded chunk {done} of {total}"),
                10.0 + 50.0 * done as f32 / total as f32,
            );

            // Yield point in place of host GC triggering.
            if self.gc_yield_interval > 0 && done % self.gc_yield_interval == 0 {
                tokio::task::yield_now().await;
            }

            if done < total {
                let delay = inter_chunk_delay(done as f32 / total as f32);
                tokio::select! {
                    () = cancel.cancelled() => return Err(PersistenceError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }

        if chunks.is_empty() {
            return Err(PersistenceError::NoValidChunks);
        }
        debug!(
            loaded = chunks.len(),
            skipped = skipped.len(),
            "chunk walk complete"
        );
        Ok((chunks, skipped))
    }

    async fn load_optional(&self, key: &str, kind: &'static str) -> Option<Value> {
        match self.blobs.get_payload::<Value>(key).await {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                warn!(key = %key, kind, "blob referenced by session is missing");
                None
            }
            Err(e) => {
                warn!(key = %key, kind, error = %e, "blob unreadable, restoring without it");
                None
            }
        }
    }
}

fn notify(observer: Option<&ProgressObserver>, stage: RestoreStage, message: &str, percent: f32) {
    if let Some(observer) = observer {
        observer(RestoreProgress {
            stage,
            message: message.to_string(),
            percent,
        });
    }
}

/// Rebuild the dataset from collected chunks: sort by chunk index (chunks may
/// be stored out of order), concatenate rows, and take headers and metadata
/// from the first chunk.
fn reassemble(mut chunks: Vec<DatasetChunk>) -> Result<Dataset> {
    chunks.sort_by_key(|chunk| chunk.chunk_index);

    let Some(first) = chunks.first() else {
        return Err(PersistenceError::NoValidChunks);
    };
    let file_name = first.file_name.clone();
    let sheet_name = first.sheet_name.clone();
    let headers = first.headers.clone();

    let mut rows = Vec::with_capacity(chunks.iter().map(|chunk| chunk.rows.len()).sum());
    for chunk in chunks {
        rows.extend(chunk.rows);
    }

    Ok(Dataset {
        file_name,
        sheet_name,
        headers,
        rows,
    })
}

fn estimate_chunk_footprint(chunk: &DatasetChunk) -> usize {
    chunk.rows.len() * chunk.headers.len().max(1) * CELL_FOOTPRINT_BYTES + HEADER_FOOTPRINT_BYTES
}

/// Inter-chunk pacing: short early, longer as the walk approaches completion
/// and cumulative allocations peak.
fn inter_chunk_delay(progress: f32) -> Duration {
    if progress >= 0.8 {
        LATE_CHUNK_DELAY
    } else if progress >= 0.5 {
        MID_CHUNK_DELAY
    } else {
        EARLY_CHUNK_DELAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chunk(index: usize, rows: Vec<Vec<Value>>) -> DatasetChunk {
        let start = index * 2;
        DatasetChunk {
            chunk_index: index,
            start_row: start,
            end_row: start + rows.len(),
            headers: vec!["a".to_string()],
            rows,
            file_name: "f.xlsx".to_string(),
            sheet_name: "S1".to_string(),
            total_rows: 6,
        }
    }

    #[test]
    fn reassemble_sorts_by_chunk_index() {
        let chunks = vec![
            chunk(2, vec![vec![json!(5)], vec![json!(6)]]),
            chunk(0, vec![vec![json!(1)], vec![json!(2)]]),
            chunk(1, vec![vec![json!(3)], vec![json!(4)]]),
        ];

        let dataset = reassemble(chunks).unwrap();
        let values: Vec<i64> = dataset
            .rows
            .iter()
            .map(|row| row[0].as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(dataset.headers, vec!["a"]);
    }

    #[test]
    fn reassemble_of_nothing_is_an_error() {
        assert!(matches!(
            reassemble(Vec::new()),
            Err(PersistenceError::NoValidChunks)
        ));
    }

    #[test]
    fn delay_rises_toward_completion() {
        assert_eq!(inter_chunk_delay(0.1), EARLY_CHUNK_DELAY);
        assert_eq!(inter_chunk_delay(0.6), MID_CHUNK_DELAY);
        assert_eq!(inter_chunk_delay(0.9), LATE_CHUNK_DELAY);
        assert!(inter_chunk_delay(0.1) < inter_chunk_delay(0.9));
    }

    #[test]
    fn footprint_scales_with_cells() {
        let small = chunk(0, vec![vec![json!(1)]]);
        let large = chunk(0, (0..100).map(|i| vec![json!(i)]).collect());
        assert!(estimate_chunk_footprint(&small) < estimate_chunk_footprint(&large));
    }

    #[test]
    fn stage_names_match_the_wire_protocol() {
        assert_eq!(RestoreStage::Validating.as_str(), "validating");
        assert_eq!(RestoreStage::LoadingData.as_str(), "loading-data");
        assert_eq!(RestoreStage::Complete.as_str(), "complete");
    }
}
