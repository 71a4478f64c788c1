//! Partitioned PIR: the dataset is split into buckets and only the bucket
//! holding each entry is combined under a masked selection.

use std::ops::Range;

use serde_json::{Map, Value};

use super::cost::{CostCoefficients, BASE_SCAN_SECONDS, INDEX_BYTES};
use super::masking::{combine, random_mask, selection_vector};
use super::params::{check_range, check_unit_interval, merge_params, HybridParams, ProtocolParams};
use super::{mismatched, BucketQuery, ClientSecrets, PirProtocol, ProtocolType, ResultForm, TransformedQuery};
use crate::dataset::PirDatabase;
use crate::error::{PirError, Result};
use crate::query::{IndexVisibility, QueryVector};
use crate::rng::PirRng;

#[derive(Debug, Clone, Copy, Default)]
pub struct HybridPir;

impl HybridPir {
    pub fn coefficients(params: &HybridParams) -> CostCoefficients {
        let bits = f64::from(params.encryption_bits);
        let partitions = f64::from(params.database_partitions);
        let key_scale = bits / 1024.0;
        CostCoefficients {
            key_bits: params.encryption_bits,
            scan_seconds: BASE_SCAN_SECONDS * 2.0 * key_scale * (1.0 + params.noise_level),
            crypto_seconds: key_scale * 0.01,
            scan_fraction: 1.0 / partitions,
            padding_records: 0.0,
            upload_per_record: bits / 16.0,
            upload_per_entry: INDEX_BYTES,
            download_expansion: 8.0 * params.compression_ratio,
            route_overhead: 0.0,
            server_load_factor: 1.5e-4,
            client_load_factor: 0.3,
            privacy_level: 5.0
                + ((partitions - 2.0) / 4.0).min(2.0)
                + ((bits - 512.0) / 1024.0).min(1.0),
        }
    }
}

/// Rows per bucket when `len` rows are split into `partitions` buckets.
pub fn partition_size(len: usize, partitions: u32) -> usize {
    let partitions = (partitions as usize).clamp(1, len.max(1));
    len.div_ceil(partitions).max(1)
}

fn bucket_range(bucket: usize, size: usize, len: usize) -> Result<Range<usize>> {
    let start = bucket * size;
    if start >= len {
        return Err(PirError::InvalidIndex(format!("bucket {bucket} out of range")));
    }
    Ok(start..(start + size).min(len))
}

fn partitions_of(params: &ProtocolParams) -> Result<u32> {
    match params {
        ProtocolParams::Hybrid(p) => Ok(p.database_partitions),
        _ => Err(PirError::InvalidParameter("hybrid protocol needs hybrid parameters".into())),
    }
}

impl PirProtocol for HybridPir {
    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Hybrid
    }

    fn index_visibility(&self) -> IndexVisibility {
        IndexVisibility::Plain
    }

    fn configure(&self, overrides: &Map<String, Value>) -> Result<(ProtocolParams, CostCoefficients)> {
        let params = merge_params(&HybridParams::default(), overrides)?;
        check_range("encryption_bits", params.encryption_bits, 512, 16384)?;
        check_unit_interval("noise_level", params.noise_level)?;
        check_range("compression_ratio", params.compression_ratio, 0.01, 1.0)?;
        check_range("database_partitions", params.database_partitions, 1, 1024)?;
        let coefficients = Self::coefficients(&params);
        Ok((ProtocolParams::Hybrid(params), coefficients))
    }

    fn transform_query(
        &self,
        params: &ProtocolParams,
        query: &QueryVector,
        db: &PirDatabase,
        rng: &mut PirRng,
    ) -> Result<(TransformedQuery, ClientSecrets)> {
        let size = partition_size(db.len(), partitions_of(params)?);
        let mask = random_mask(rng);
        let buckets = query
            .entries()
            .iter()
            .map(|entry| {
                let index = entry.index as usize;
                let bucket = index / size;
                let range = bucket_range(bucket, size, db.len())?;
                Ok(BucketQuery {
                    bucket,
                    selection: selection_vector(range.len(), index - range.start, mask, rng),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok((
            TransformedQuery::Hybrid {
                partition_size: size,
                buckets,
            },
            ClientSecrets {
                mask: Some(mask),
                ..ClientSecrets::default()
            },
        ))
    }

    fn execute(&self, _params: &ProtocolParams, db: &PirDatabase, query: &TransformedQuery) -> Result<Vec<ResultForm>> {
        let TransformedQuery::Hybrid {
            partition_size,
            buckets,
        } = query
        else {
            return Err(mismatched(ProtocolType::Hybrid, query.kind()));
        };
        buckets
            .iter()
            .map(|b| {
                let range = bucket_range(b.bucket, *partition_size, db.len())?;
                Ok(ResultForm::Masked {
                    words: combine(db, range, &b.selection)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::build_query_vector;
    use crate::rng::seeded;
    use serde_json::json;

    #[test]
    fn partition_sizes() {
        assert_eq!(partition_size(1000, 4), 250);
        assert_eq!(partition_size(10, 4), 3);
        assert_eq!(partition_size(3, 8), 1);
        assert_eq!(partition_size(0, 4), 1);
    }

    #[test]
    fn default_privacy() {
        let (_, c) = HybridPir.configure(&Map::new()).unwrap();
        // 5 + min(2, 0.5) + min(1, 1.5)
        assert_eq!(c.privacy_level, 6.5);
        assert_eq!(c.scan_fraction, 0.25);
    }

    #[test]
    fn only_the_bucket_is_combined() {
        let db = PirDatabase::from_rows((0..23).map(|i| format!("item-{i}").into_bytes()).collect());
        let overrides = json!({"database_partitions": 5});
        let (params, _) = HybridPir.configure(overrides.as_object().unwrap()).unwrap();
        let mut rng = seeded(5);
        let qv = build_query_vector(22, db.len(), Some(3), &mut rng).unwrap();
        let (tq, secrets) = HybridPir.transform_query(&params, &qv, &db, &mut rng).unwrap();

        let TransformedQuery::Hybrid { partition_size, buckets } = &tq else {
            panic!("wrong transform");
        };
        assert_eq!(*partition_size, 5);
        assert!(buckets.iter().all(|b| b.selection.len() <= 5));

        let results = HybridPir.execute(&params, &db, &tq).unwrap();
        for (entry, result) in qv.entries().iter().zip(&results) {
            assert_eq!(result.reveal(&secrets).unwrap(), db.row(entry.index).unwrap());
        }
    }

    #[test]
    fn rejects_zero_partitions() {
        let overrides = json!({"database_partitions": 0});
        assert!(HybridPir.configure(overrides.as_object().unwrap()).is_err());
    }

    #[test]
    fn noise_level_slows_the_scan() {
        let (_, quiet) = HybridPir.configure(json!({"noise_level": 0.0}).as_object().unwrap()).unwrap();
        let (_, noisy) = HybridPir.configure(json!({"noise_level": 1.0}).as_object().unwrap()).unwrap();
        assert!((noisy.scan_seconds / quiet.scan_seconds - 2.0).abs() < 1e-12);
        assert_eq!(noisy.upload_per_record, quiet.upload_per_record);
        assert_eq!(noisy.privacy_level, quiet.privacy_level);
    }
}
