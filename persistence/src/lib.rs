//! Dataset persistence and session restore for Tabula.
//!
//! This crate stores a loaded spreadsheet (plus its filter and chart state)
//! across browser-style reloads under strict capacity limits, and restores it
//! progressively with cancellation and backpressure. Large datasets are split
//! into row chunks, large payloads are Zstd-compressed, and old sessions are
//! evicted once the capacity profile's session cap is exceeded.

pub mod capability;
pub mod chunker;
pub mod codec;
pub mod directory;
pub mod engine;
pub mod error;
pub mod keys;
pub mod restore;
pub mod storage;
pub mod types;


pub use capability::CapabilityHints;
pub use capability::CapacityProfile;
pub use capability::CapacityTier;
pub use chunker::DatasetChunker;
pub use codec::Payload;
pub use directory::SessionDirectory;
pub use engine::EngineConfig;
pub use engine::PersistenceEngine;
pub use error::PersistenceError;
pub use error::Result;
pub use restore::MemoryPressure;
pub use restore::MemoryProbe;
pub use restore::NoopMemoryProbe;
pub use restore::ProgressiveRestorer;
pub use restore::RestoreOptions;
pub use restore::RestoreOutcome;
pub use restore::RestoreProgress;
pub use restore::RestoreSinks;
pub use restore::RestoreStage;
pub use storage::FileStore;
pub use storage::KeyValueStore;
pub use storage::MemoryStore;
pub use storage::StoreHandle;
pub use types::ChunkIndex;
pub use types::Dataset;
pub use types::DatasetChunk;
pub use types::SessionIndex;
pub use types::SessionRecord;
pub use types::SessionSummary;

/// Current session schema version, stored on every record. Records carrying a
/// different tag are treated as unreadable rather than migrated.
pub const SCHEMA_VERSION: u16 = 1;
