//! Key naming scheme for the two storage backends
//!
//! Session records live under `session:<id>`; the session index and active
//! pointer use fixed well-known keys; dataset/filter/chart/chunk blobs get a
//! random six-character suffix so re-saving never collides with a previous
//! save unless a key is deliberately reused.

use rand::distr::Alphanumeric;
use rand::distr::SampleString;

/// Well-known key for the ordered session index.
pub const SESSION_INDEX_KEY: &str = "tabula:session-index";

/// Well-known key for the active-session pointer.
pub const ACTIVE_SESSION_KEY: &str = "tabula:active-session";

const SUFFIX_LEN: usize = 6;

/// Kinds of session-scoped blobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    Dataset,
    Filters,
    Charts,
    Chunk,
}

impl BlobKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dataset => "dataset",
            Self::Filters => "filters",
            Self::Charts => "charts",
            Self::Chunk => "chunk",
        }
    }
}

/// Key of a session record.
pub fn session_key(id: &str) -> String {
    format!("session:{id}")
}

/// Mint a fresh blob key for `session_id`.
pub fn blob_key(kind: BlobKind, session_id: &str) -> String {
    let suffix = Alphanumeric.sample_string(&mut rand::rng(), SUFFIX_LEN);
    format!("{}:{session_id}:{suffix}", kind.as_str())
}
