//! Engine configuration.
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PirError, Result};

/// Hard ceiling on generated dataset size.
pub const MAX_DATASET_SIZE: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PirConfig {
    /// Concurrent items in the batch worker pool.
    pub pool_size: usize,
    /// Per-item timeout for pool work, in milliseconds.
    pub item_timeout_ms: u64,
    pub max_dataset_size: usize,
    /// Fixed noise count for every query. `None` draws 1..=3 per query.
    pub noise_count: Option<usize>,
    /// Multiplicative jitter applied to simulated query time.
    pub jitter: f64,
    /// Largest relative comm-cost increase accepted for a privacy gain.
    pub comm_cost_threshold: f64,
    /// Fixed seed for dataset generation and query sampling.
    pub seed: Option<u64>,
}

impl Default for PirConfig {
    fn default() -> Self {
        Self {
            pool_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            item_timeout_ms: 30_000,
            max_dataset_size: MAX_DATASET_SIZE,
            noise_count: None,
            jitter: 0.02,
            comm_cost_threshold: 1000.0,
            seed: None,
        }
    }
}

impl PirConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PirConfig =
            serde_json::from_str(json).map_err(|e| PirError::InvalidParameter(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(PirError::InvalidParameter("pool_size must be at least 1".into()));
        }
        if self.item_timeout_ms == 0 {
            return Err(PirError::InvalidParameter(
                "item_timeout_ms must be positive".into(),
            ));
        }
        if self.max_dataset_size == 0 || self.max_dataset_size > MAX_DATASET_SIZE {
            return Err(PirError::InvalidParameter(format!(
                "max_dataset_size must be between 1 and {MAX_DATASET_SIZE}"
            )));
        }
        if let Some(k) = self.noise_count {
            if !(1..=3).contains(&k) {
                return Err(PirError::InvalidParameter(format!(
                    "noise_count must be between 1 and 3, got {k}"
                )));
            }
        }
        if !(0.0..0.5).contains(&self.jitter) {
            return Err(PirError::InvalidParameter(format!(
                "jitter must be in [0, 0.5), got {}",
                self.jitter
            )));
        }
        if !self.comm_cost_threshold.is_finite() || self.comm_cost_threshold < 0.0 {
            return Err(PirError::InvalidParameter(
                "comm_cost_threshold must be a non-negative number".into(),
            ));
        }
        Ok(())
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_millis(self.item_timeout_ms)
    }
}
