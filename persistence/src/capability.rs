//! Host capability detection
//!
//! Classifies the host as low/medium/high capacity from two optional hints
//! and produces the fixed limit profile the rest of the engine obeys. The
//! classification is a pure function of the hints: absent host capability
//! APIs degrade to the conservative default, never to an error.

const GIB: u64 = 1024 * 1024 * 1024;

/// Assumed memory when the host exposes no hint.
const DEFAULT_MEMORY_BYTES: u64 = 4 * GIB;
const LOW_MEMORY_BYTES: u64 = 2 * GIB;
const HIGH_MEMORY_BYTES: u64 = 8 * GIB;
const LOW_CONCURRENCY: usize = 4;
const HIGH_CONCURRENCY: usize = 8;

/// Raw host hints, both optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilityHints {
    pub memory_bytes: Option<u64>,
    pub concurrency: Option<usize>,
}

impl CapabilityHints {
    /// Read what the host exposes. The memory hint is supplied by the host
    /// shell when available; only the concurrency hint can be sensed here.
    pub fn from_host() -> Self {
        Self {
            memory_bytes: None,
            concurrency: std::thread::available_parallelism()
                .ok()
                .map(std::num::NonZeroUsize::get),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityTier {
    Low,
    Medium,
    High,
}

/// Size and count limits for the current host, read-only for the lifetime of
/// an engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityProfile {
    pub tier: CapacityTier,
    /// Sessions retained before eviction kicks in
    pub max_sessions: usize,
    /// Serialized dataset size storable as a single blob
    pub max_dataset_bytes: usize,
    /// Row count storable as a single blob
    pub max_rows_persisted: usize,
    /// Estimated in-memory footprint allowed per restored chunk
    pub max_chunk_memory_bytes: usize,
}

impl CapacityProfile {
    pub const fn low() -> Self {
        Self {
            tier: CapacityTier::Low,
            max_sessions: 2,
            max_dataset_bytes: 1024 * 1024,
            max_rows_persisted: 10_000,
            max_chunk_memory_bytes: 8 * 1024 * 1024,
        }
    }

    pub const fn medium() -> Self {
        Self {
            tier: CapacityTier::Medium,
            max_sessions: 3,
            max_dataset_bytes: 3 * 1024 * 1024,
            max_rows_persisted: 50_000,
            max_chunk_memory_bytes: 16 * 1024 * 1024,
        }
    }

    pub const fn high() -> Self {
        Self {
            tier: CapacityTier::High,
            max_sessions: 5,
            max_dataset_bytes: 4608 * 1024,
            max_rows_persisted: 75_000,
            max_chunk_memory_bytes: 32 * 1024 * 1024,
        }
    }

    /// Classify the host. Deterministic for a given hint pair and never
    /// fails: a missing memory hint assumes the mid-tier default, while a
    /// missing or low concurrency hint classifies as low-end.
    pub fn detect(hints: CapabilityHints) -> Self {
        let memory = hints.memory_bytes.unwrap_or(DEFAULT_MEMORY_BYTES);
        if memory < LOW_MEMORY_BYTES || hints.concurrency.is_none_or(|c| c < LOW_CONCURRENCY) {
            return Self::low();
        }
        if memory >= HIGH_MEMORY_BYTES
            && hints.concurrency.is_some_and(|c| c >= HIGH_CONCURRENCY)
        {
            return Self::high();
        }
        Self::medium()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hints(memory_gib: Option<u64>, concurrency: Option<usize>) -> CapabilityHints {
        CapabilityHints {
            memory_bytes: memory_gib.map(|g| g * GIB),
            concurrency,
        }
    }

    #[test]
    fn low_memory_classifies_low() {
        let profile = CapacityProfile::detect(hints(Some(1), Some(8)));
        assert_eq!(profile.tier, CapacityTier::Low);
        assert_eq!(profile.max_sessions, 2);
    }

    #[test]
    fn absent_concurrency_classifies_low() {
        let profile = CapacityProfile::detect(hints(Some(16), None));
        assert_eq!(profile.tier, CapacityTier::Low);
    }

    #[test]
    fn absent_memory_defaults_to_mid_tier() {
        let profile = CapacityProfile::detect(hints(None, Some(8)));
        assert_eq!(profile.tier, CapacityTier::Medium);
    }

    #[test]
    fn high_requires_memory_and_concurrency() {
        assert_eq!(
            CapacityProfile::detect(hints(Some(16), Some(12))).tier,
            CapacityTier::High
        );
        assert_eq!(
            CapacityProfile::detect(hints(Some(16), Some(4))).tier,
            CapacityTier::Medium
        );
        assert_eq!(
            CapacityProfile::detect(hints(Some(4), Some(12))).tier,
            CapacityTier::Medium
        );
    }

    #[test]
    fn limits_scale_monotonically() {
        let low = CapacityProfile::low();
        let medium = CapacityProfile::medium();
        let high = CapacityProfile::high();

        assert!(low.max_sessions < medium.max_sessions);
        assert!(medium.max_sessions < high.max_sessions);
        assert!(low.max_dataset_bytes < medium.max_dataset_bytes);
        assert!(medium.max_dataset_bytes < high.max_dataset_bytes);
        assert!(low.max_rows_persisted < medium.max_rows_persisted);
        assert!(medium.max_rows_persisted < high.max_rows_persisted);
    }

    #[test]
    fn detection_is_deterministic() {
        let pair = hints(Some(8), Some(8));
        assert_eq!(CapacityProfile::detect(pair), CapacityProfile::detect(pair));
    }
}
