//! Canonical JSON serialization and plaintext hashing.
//!
//! Object keys are sorted recursively so the integrity hash of a record does
//! not depend on field insertion order.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

/// Serialize a JSON value with recursively sorted object keys.
pub fn canonical_json(value: &Value) -> Result<String, CryptoError> {
    match value {
        Value::Null => Ok("null".to_string()),
        Value::Bool(b) => Ok(if *b { "true" } else { "false" }.to_string()),
        Value::Number(n) => {
            let f = n.as_f64().unwrap_or(f64::NAN);
            if !f.is_finite() {
                return Err(CryptoError::NonFiniteNumber);
            }
            serde_json::to_string(n).map_err(|e| CryptoError::SerializationError(e.to_string()))
        }
        Value::String(s) => {
            serde_json::to_string(s).map_err(|e| CryptoError::SerializationError(e.to_string()))
        }
        Value::Array(arr) => {
            let items: Result<Vec<String>, _> = arr.iter().map(canonical_json).collect();
            Ok(format!("[{}]", items?.join(",")))
        }
        Value::Object(obj) => {
            let mut keys: Vec<&String> = obj.keys().collect();
            keys.sort();
            let pairs: Result<Vec<String>, CryptoError> = keys
                .iter()
                .map(|k| {
                    let v = canonical_json(&obj[*k])?;
                    let key = serde_json::to_string(*k)
                        .map_err(|e| CryptoError::SerializationError(e.to_string()))?;
                    Ok(format!("{}:{}", key, v))
                })
                .collect();
            Ok(format!("{{{}}}", pairs?.join(",")))
        }
    }
}

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
