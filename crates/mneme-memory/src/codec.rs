//! Column encodings for vectors and timestamps.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

use crate::error::{MemoryError, Result};

/// Encode a vector as base64 over packed little-endian f32.
pub fn encode_vector(vector: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for x in vector {
        bytes.extend_from_slice(&x.to_le_bytes());
    }
    STANDARD.encode(bytes)
}

/// Decode a vector written by [`encode_vector`].
pub fn decode_vector(encoded: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| MemoryError::InvalidData(format!("Invalid embedding encoding: {}", e)))?;

    if bytes.len() % 4 != 0 {
        return Err(MemoryError::InvalidData(format!(
            "Embedding byte length {} is not a multiple of 4",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Format a timestamp so lexical order equals chronological order.
///
/// `2024-05-01T09:30:00.000000Z`
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored timestamp.
///
/// Accepts RFC 3339 with any offset, and naive ISO-8601 (assumed UTC).
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| MemoryError::InvalidData(format!("Invalid timestamp '{}': {}", s, e)))
}
