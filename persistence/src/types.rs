//! Core types for session persistence

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Column names kept on a session summary for listing without loading the
/// full dataset.
pub const MAX_SUMMARY_COLUMNS: usize = 50;

/// An in-memory tabular dataset: one sheet of a loaded spreadsheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub file_name: String,
    pub sheet_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Dataset {
    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn total_columns(&self) -> usize {
        self.headers.len()
    }

    /// Derive the listing summary for this dataset.
    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            file_name: self.file_name.clone(),
            sheet_name: self.sheet_name.clone(),
            total_rows: self.rows.len(),
            total_columns: self.headers.len(),
            column_names: self
                .headers
                .iter()
                .take(MAX_SUMMARY_COLUMNS)
                .cloned()
                .collect(),
        }
    }
}

/// Lightweight session description used for listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub file_name: String,
    pub sheet_name: String,
    pub total_rows: usize,
    pub total_columns: usize,
    pub column_names: Vec<String>,
}

/// One persisted session record.
///
/// When `is_chunked` is true the dataset key addresses a [`ChunkIndex`]
/// payload instead of the dataset itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub app_version: String,
    pub schema_version: u16,
    pub dataset_key: Option<String>,
    pub filters_key: Option<String>,
    pub charts_key: Option<String>,
    pub is_chunked: bool,
    pub summary: SessionSummary,
}

impl SessionRecord {
    pub fn new(id: String, app_version: String, summary: SessionSummary) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            app_version,
            schema_version: crate::SCHEMA_VERSION,
            dataset_key: None,
            filters_key: None,
            charts_key: None,
            is_chunked: false,
            summary,
        }
    }
}

/// One entry of the session index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub updated_at: DateTime<Utc>,
}

/// Ordered list of `(id, updated_at)` pairs, most recently updated first.
///
/// The index is the sole source of session ordering and the sole input to
/// eviction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionIndex {
    pub entries: Vec<IndexEntry>,
}

impl SessionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    /// Record an update for `id`, keeping the list ordered by recency.
    pub fn touch(&mut self, id: &str, at: DateTime<Utc>) {
        self.entries.retain(|entry| entry.id != id);
        let position = self
            .entries
            .iter()
            .position(|entry| entry.updated_at <= at)
            .unwrap_or(self.entries.len());
        self.entries.insert(
            position,
            IndexEntry {
                id: id.to_string(),
                updated_at: at,
            },
        );
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    /// Ids beyond the `max` most recent entries, oldest first.
    pub fn overflow(&self, max: usize) -> Vec<String> {
        if self.entries.len() <= max {
            return Vec::new();
        }
        self.entries[max..]
            .iter()
            .rev()
            .map(|entry| entry.id.clone())
            .collect()
    }
}

/// Index record for a chunked dataset, stored under the session's dataset
/// key. Chunks are addressed only through this record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkIndex {
    pub total_chunks: usize,
    pub total_rows: usize,
    pub chunk_size: usize,
    pub created_at: DateTime<Utc>,
    pub chunk_keys: Vec<String>,
}

/// A contiguous row range of a chunked dataset, reconstructable on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetChunk {
    pub chunk_index: usize,
    pub start_row: usize,
    pub end_row: usize,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub file_name: String,
    pub sheet_name: String,
    pub total_rows: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn stamp(offset_secs: i64) -> DateTime<Utc> {
        Utc::now() + Duration::seconds(offset_secs)
    }

    #[test]
    fn index_orders_most_recent_first() {
        let mut index = SessionIndex::new();
        index.touch("a", stamp(0));
        index.touch("b", stamp(10));
        index.touch("c", stamp(5));

        let ids: Vec<&str> = index.entries.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }

    #[test]
    fn touch_moves_existing_entry() {
        let mut index = SessionIndex::new();
        index.touch("a", stamp(0));
        index.touch("b", stamp(1));
        index.touch("a", stamp(2));

        assert_eq!(index.len(), 2);
        assert_eq!(index.entries[0].id, "a");
    }

    #[test]
    fn overflow_returns_oldest_first() {
        let mut index = SessionIndex::new();
        for (i, id) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            index.touch(id, stamp(i as i64));
        }

        // Entries are e, d, c, b, a; keeping 3 evicts a then b.
        assert_eq!(index.overflow(3), vec!["a".to_string(), "b".to_string()]);
        assert!(index.overflow(5).is_empty());
    }

    #[test]
    fn summary_caps_column_names() {
        let dataset = Dataset {
            file_name: "wide.xlsx".to_string(),
            sheet_name: "Sheet1".to_string(),
            headers: (0..80).map(|i| format!("col{i}")).collect(),
            rows: vec![],
        };

        let summary = dataset.summary();
        assert_eq!(summary.total_columns, 80);
        assert_eq!(summary.column_names.len(), MAX_SUMMARY_COLUMNS);
        assert_eq!(summary.column_names[0], "col0");
    }
}
