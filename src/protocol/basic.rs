//! Linear-scan PIR: every entry is answered by a pass over the whole dataset.

use serde_json::{Map, Value};

use super::cost::{CostCoefficients, BASE_SCAN_SECONDS, INDEX_BYTES};
use super::params::{check_range, check_unit_interval, merge_params, BasicParams, ProtocolParams};
use super::{mismatched, ClientSecrets, PirProtocol, ProtocolType, ResultForm, TransformedQuery};
use crate::dataset::PirDatabase;
use crate::error::{PirError, Result};
use crate::query::{IndexVisibility, QueryVector};
use crate::rng::PirRng;

#[derive(Debug, Clone, Copy, Default)]
pub struct BasicPir;

impl BasicPir {
    pub fn coefficients(params: &BasicParams) -> CostCoefficients {
        CostCoefficients {
            key_bits: 128,
            scan_seconds: BASE_SCAN_SECONDS,
            crypto_seconds: 0.0,
            scan_fraction: 1.0,
            padding_records: f64::from(params.database_padding),
            upload_per_record: 0.0,
            upload_per_entry: INDEX_BYTES * f64::from(params.query_expansion),
            download_expansion: 1.0,
            route_overhead: 0.0,
            server_load_factor: 1e-5,
            client_load_factor: 0.1,
            privacy_level: 3.0 + (params.noise_level * 10.0).min(2.0),
        }
    }
}

/// Copy row `index` out of a full pass over the rows.
pub(crate) fn scan_for(db: &PirDatabase, index: u64) -> Result<Vec<u8>> {
    let mut found = None;
    for (i, row) in db.rows().iter().enumerate() {
        if i as u64 == index {
            found = Some(row.clone());
        }
    }
    found.ok_or_else(|| {
        PirError::InvalidIndex(format!(
            "index {index} out of range for dataset of {} records",
            db.len()
        ))
    })
}

impl PirProtocol for BasicPir {
    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Basic
    }

    fn index_visibility(&self) -> IndexVisibility {
        IndexVisibility::Plain
    }

    fn configure(&self, overrides: &Map<String, Value>) -> Result<(ProtocolParams, CostCoefficients)> {
        let params = merge_params(&BasicParams::default(), overrides)?;
        check_unit_interval("noise_level", params.noise_level)?;
        check_range("query_expansion", params.query_expansion, 1, 16)?;
        check_range("database_padding", params.database_padding, 0, 1_000_000)?;
        let coefficients = Self::coefficients(&params);
        Ok((ProtocolParams::Basic(params), coefficients))
    }

    fn transform_query(
        &self,
        _params: &ProtocolParams,
        query: &QueryVector,
        _db: &PirDatabase,
        _rng: &mut PirRng,
    ) -> Result<(TransformedQuery, ClientSecrets)> {
        Ok((
            TransformedQuery::Basic {
                indices: query.indices(),
            },
            ClientSecrets::default(),
        ))
    }

    fn execute(&self, _params: &ProtocolParams, db: &PirDatabase, query: &TransformedQuery) -> Result<Vec<ResultForm>> {
        let TransformedQuery::Basic { indices } = query else {
            return Err(mismatched(ProtocolType::Basic, query.kind()));
        };
        indices
            .iter()
            .map(|&index| Ok(ResultForm::Plain { bytes: scan_for(db, index)? }))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::build_query_vector;
    use crate::rng::seeded;
    use serde_json::json;

    fn db() -> PirDatabase {
        PirDatabase::from_rows((0..10).map(|i| format!("record {i}").into_bytes()).collect())
    }

    #[test]
    fn answers_every_entry() {
        let db = db();
        let mut rng = seeded(1);
        let qv = build_query_vector(4, db.len(), Some(3), &mut rng).unwrap();
        let (params, _) = BasicPir.configure(&Map::new()).unwrap();
        let (tq, secrets) = BasicPir.transform_query(&params, &qv, &db, &mut rng).unwrap();
        assert_eq!(secrets, ClientSecrets::default());

        let results = BasicPir.execute(&params, &db, &tq).unwrap();
        assert_eq!(results.len(), 4);
        for (entry, result) in qv.entries().iter().zip(&results) {
            assert_eq!(result.reveal(&secrets).unwrap(), db.row(entry.index).unwrap());
        }
    }

    #[test]
    fn privacy_follows_noise_level() {
        let (_, low) = BasicPir.configure(&Map::new()).unwrap();
        assert_eq!(low.privacy_level, 3.0);
        let overrides = json!({"noise_level": 0.5});
        let (_, high) = BasicPir.configure(overrides.as_object().unwrap()).unwrap();
        assert_eq!(high.privacy_level, 5.0);
    }

    #[test]
    fn rejects_out_of_range_params() {
        let overrides = json!({"query_expansion": 0});
        assert!(BasicPir.configure(overrides.as_object().unwrap()).is_err());
    }

    #[test]
    fn rejects_foreign_queries() {
        let (params, _) = BasicPir.configure(&Map::new()).unwrap();
        let foreign = TransformedQuery::Homomorphic { selections: vec![] };
        assert!(BasicPir.execute(&params, &db(), &foreign).is_err());
    }

    #[test]
    fn out_of_range_index() {
        assert_eq!(scan_for(&db(), 10).unwrap_err().code(), "INVALID_INDEX");
    }
}
