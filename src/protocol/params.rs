//! Typed protocol parameters.
//!
//! Defaults come first; caller overrides are laid over them key by key and
//! the result is deserialized strictly, so unknown keys and ill-typed values
//! are rejected.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PirError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BasicParams {
    pub noise_level: f64,
    pub query_expansion: u32,
    pub database_padding: u32,
}

impl Default for BasicParams {
    fn default() -> Self {
        Self {
            noise_level: 0.0,
            query_expansion: 1,
            database_padding: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HomomorphicParams {
    pub encryption_bits: u32,
    pub noise_level: f64,
    pub polynomial_degree: u32,
}

impl Default for HomomorphicParams {
    fn default() -> Self {
        Self {
            encryption_bits: 1024,
            noise_level: 0.1,
            polynomial_degree: 4096,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HybridParams {
    pub encryption_bits: u32,
    pub noise_level: f64,
    pub compression_ratio: f64,
    pub database_partitions: u32,
}

impl Default for HybridParams {
    fn default() -> Self {
        Self {
            encryption_bits: 2048,
            noise_level: 0.05,
            compression_ratio: 0.8,
            database_partitions: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OnionParams {
    pub layers: u32,
    pub nodes_per_layer: u32,
    /// Per-relay timeout. Validated and stored with the config, but relays
    /// run in-process and never wait, so it changes neither cost nor results.
    pub timeout_ms: u64,
}

impl Default for OnionParams {
    fn default() -> Self {
        Self {
            layers: 3,
            nodes_per_layer: 5,
            timeout_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolParams {
    Basic(BasicParams),
    Homomorphic(HomomorphicParams),
    Hybrid(HybridParams),
    Onion(OnionParams),
}

/// Lay `overrides` over `defaults` and deserialize the merged object.
pub fn merge_params<P>(defaults: &P, overrides: &Map<String, Value>) -> Result<P>
where
    P: Serialize + DeserializeOwned,
{
    let mut merged = serde_json::to_value(defaults)?;
    if let Value::Object(fields) = &mut merged {
        for (key, value) in overrides {
            fields.insert(key.clone(), value.clone());
        }
    }
    serde_json::from_value(merged).map_err(|e| PirError::InvalidParameter(e.to_string()))
}

pub(crate) fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PirError::InvalidParameter(format!(
            "{name} must be within [0, 1], got {value}"
        )))
    }
}

pub(crate) fn check_range<T>(name: &str, value: T, min: T, max: T) -> Result<()>
where
    T: PartialOrd + std::fmt::Display + Copy,
{
    if value < min || value > max {
        Err(PirError::InvalidParameter(format!(
            "{name} must be between {min} and {max}, got {value}"
        )))
    } else {
        Ok(())
    }
}
