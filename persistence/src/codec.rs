//! Serialization codec with size-gated Zstd compression
//!
//! Values are JSON-encoded; payloads whose encoded text exceeds the
//! compression threshold are stored Zstd-compressed. Decompression losslessly
//! inverts compression, and any decode-side failure is reported as a corrupt
//! payload rather than leaked as a backend error.

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::PersistenceError;
use crate::error::Result;

/// Uncompressed JSON length above which payloads are compressed.
pub const COMPRESSION_THRESHOLD: usize = 50 * 1024;

/// Zstd level for payload compression.
const ZSTD_LEVEL: i32 = 3;

/// A storable payload: plain JSON text, or the Zstd-compressed bytes of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Plain(String),
    Compressed(Vec<u8>),
}

impl Payload {
    pub const fn is_compressed(&self) -> bool {
        matches!(self, Self::Compressed(_))
    }
}

/// JSON-encode `value`, compressing when the encoded text exceeds
/// [`COMPRESSION_THRESHOLD`].
pub fn serialize<T: Serialize>(value: &T) -> Result<Payload> {
    let text = serde_json::to_string(value)?;
    if text.len() > COMPRESSION_THRESHOLD {
        let compressed = zstd::encode_all(text.as_bytes(), ZSTD_LEVEL)
            .map_err(|e| PersistenceError::Compression(e.to_string()))?;
        Ok(Payload::Compressed(compressed))
    } else {
        Ok(Payload::Plain(text))
    }
}

/// Invert [`serialize`]. Empty or invalid decompression output and JSON
/// decode failures surface as [`PersistenceError::CorruptPayload`].
pub fn deserialize<T: DeserializeOwned>(payload: &Payload) -> Result<T> {
    match payload {
        Payload::Plain(text) => serde_json::from_str(text)
            .map_err(|e| PersistenceError::CorruptPayload(format!("JSON decode failed: {e}"))),
        Payload::Compressed(bytes) => {
            let decompressed = zstd::decode_all(bytes.as_slice()).map_err(|e| {
                PersistenceError::CorruptPayload(format!("decompression failed: {e}"))
            })?;
            if decompressed.is_empty() {
                return Err(PersistenceError::CorruptPayload(
                    "decompression produced no output".to_string(),
                ));
            }
            let text = String::from_utf8(decompressed).map_err(|e| {
                PersistenceError::CorruptPayload(format!("decompressed payload is not UTF-8: {e}"))
            })?;
            serde_json::from_str(&text)
                .map_err(|e| PersistenceError::CorruptPayload(format!("JSON decode failed: {e}")))
        }
    }
}

/// Approximate stored size in bytes. Plain text is counted at two bytes per
/// character (UTF-16-class strings); used for threshold decisions only.
pub fn estimate_size(payload: &Payload) -> usize {
    match payload {
        Payload::Plain(text) => text.chars().count() * 2,
        Payload::Compressed(bytes) => bytes.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn small_values_stay_plain() {
        let value = vec!["alpha", "beta", "gamma"];
        let payload = serialize(&value).unwrap();

        assert!(!payload.is_compressed());
        let decoded: Vec<String> = deserialize(&payload).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn large_values_are_compressed() {
        // JSON text comfortably past the 50 KiB threshold.
        let value = "x".repeat(COMPRESSION_THRESHOLD + 100);
        let payload = serialize(&value).unwrap();

        assert!(payload.is_compressed());
        let decoded: String = deserialize(&payload).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn threshold_is_exact() {
        // A JSON string of n chars encodes to n + 2 bytes (quotes).
        let below = "y".repeat(COMPRESSION_THRESHOLD - 2);
        let above = "y".repeat(COMPRESSION_THRESHOLD - 1);

        assert!(!serialize(&below).unwrap().is_compressed());
        assert!(serialize(&above).unwrap().is_compressed());
    }

    #[test]
    fn garbage_bytes_are_corrupt() {
        let payload = Payload::Compressed(b"definitely not zstd".to_vec());
        let result: Result<String> = deserialize(&payload);

        assert!(matches!(result, Err(PersistenceError::CorruptPayload(_))));
    }

    #[test]
    fn empty_decompression_is_corrupt() {
        let empty = zstd::encode_all(std::io::empty(), 3).unwrap();
        let payload = Payload::Compressed(empty);
        let result: Result<String> = deserialize(&payload);

        assert!(matches!(result, Err(PersistenceError::CorruptPayload(_))));
    }

    #[test]
    fn invalid_json_is_corrupt() {
        let payload = Payload::Plain("{not json".to_string());
        let result: Result<serde_json::Value> = deserialize(&payload);

        assert!(matches!(result, Err(PersistenceError::CorruptPayload(_))));
    }

    #[test]
    fn estimate_counts_two_bytes_per_char() {
        let payload = Payload::Plain("abcd".to_string());
        assert_eq!(estimate_size(&payload), 8);

        let payload = Payload::Compressed(vec![0u8; 17]);
        assert_eq!(estimate_size(&payload), 17);
    }
}
