//! Lossless codec for task result payloads.
//!
//! Task results carry three value classes that naive JSON handling mangles:
//! timestamps (stored as RFC 3339 strings via chrono's serde impls),
//! arbitrary-precision numerics (preserved digit-for-digit by serde_json's
//! `arbitrary_precision` representation rather than being forced through
//! f64), and closed enum tags (snake_case serde tags on the enums in
//! `db::types`). Everything that writes or reads the `tasks.result` column
//! goes through these two functions so the round-trip stays lossless.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a result value for storage in the `tasks.result` column.
pub fn encode_result(value: &serde_json::Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(value)
}

/// Decode a stored result payload.
pub fn decode_result(text: &str) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::from_str(text)
}

/// Convert any serializable result into the storable value form.
pub fn to_result_value<T: Serialize>(value: &T) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(value)
}

/// Read a typed structure back out of a stored result value.
pub fn from_result_value<T: DeserializeOwned>(
    value: serde_json::Value,
) -> Result<T, serde_json::Error> {
    serde_json::from_value(value)
}
