//! Cost model shared by every protocol.
//!
//! Each protocol reduces its parameters to a [`CostCoefficients`] table at
//! configure time; estimates are then a pure function of the coefficients,
//! the workload shape and a bounded jitter draw. Only query time is jittered.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::rng::PirRng;

pub const MIN_PRIVACY: f64 = 1.0;
pub const MAX_PRIVACY: f64 = 10.0;

/// Bytes used to name one record index on the wire.
pub const INDEX_BYTES: f64 = 8.0;

/// Simulated seconds to touch one record for one query entry.
pub const BASE_SCAN_SECONDS: f64 = 5e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostCoefficients {
    pub key_bits: u32,
    /// Seconds per scanned record per entry.
    pub scan_seconds: f64,
    /// Fixed cryptographic seconds per query.
    pub crypto_seconds: f64,
    /// Share of the dataset one entry touches.
    pub scan_fraction: f64,
    /// Extra records scanned on top of the dataset.
    pub padding_records: f64,
    /// Upload bytes per scanned record per entry.
    pub upload_per_record: f64,
    /// Fixed upload bytes per entry.
    pub upload_per_entry: f64,
    /// Download bytes per entry, as a multiple of the average record size.
    pub download_expansion: f64,
    /// Fixed bytes per query independent of entries.
    pub route_overhead: f64,
    pub server_load_factor: f64,
    pub client_load_factor: f64,
    pub privacy_level: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkloadShape {
    pub dataset_size: usize,
    pub entries: usize,
    pub avg_record_size: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub query_time: f64,
    pub comm_cost: f64,
    pub server_load: f64,
    pub client_load: f64,
    pub privacy_level: f64,
}

pub fn clamp_privacy(level: f64) -> f64 {
    level.clamp(MIN_PRIVACY, MAX_PRIVACY)
}

/// Deterministic estimate with jitter fixed at zero.
pub fn estimate_exact(c: &CostCoefficients, shape: &WorkloadShape) -> CostEstimate {
    estimate_scaled(c, shape, 1.0)
}

/// Estimate with query time scaled by a factor drawn uniformly from
/// `[1 - jitter, 1 + jitter]`.
pub fn estimate(c: &CostCoefficients, shape: &WorkloadShape, jitter: f64, rng: &mut PirRng) -> CostEstimate {
    let scale = if jitter > 0.0 {
        1.0 + rng.gen_range(-jitter..=jitter)
    } else {
        1.0
    };
    estimate_scaled(c, shape, scale)
}

fn estimate_scaled(c: &CostCoefficients, shape: &WorkloadShape, scale: f64) -> CostEstimate {
    let entries = shape.entries as f64;
    let scanned = (shape.dataset_size as f64 * c.scan_fraction).max(1.0) + c.padding_records;

    let query_time = (entries * scanned * c.scan_seconds + c.crypto_seconds) * scale;
    let comm_cost = entries
        * (scanned * c.upload_per_record
            + c.upload_per_entry
            + shape.avg_record_size * c.download_expansion)
        + c.route_overhead;

    CostEstimate {
        query_time,
        comm_cost,
        server_load: scanned * c.server_load_factor * query_time,
        client_load: c.client_load_factor * query_time,
        privacy_level: clamp_privacy(c.privacy_level),
    }
}
