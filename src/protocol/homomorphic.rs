//! Homomorphic-style PIR, simulated with masked selection vectors.
//!
//! Every entry becomes a weight per record and the server combines all rows.
//! The masking only stands in for encryption: the weights are scrambled but
//! not hidden against a determined server. Cost charges one ciphertext of
//! `encryption_bits / 8` bytes per selection element.

use serde_json::{Map, Value};

use super::cost::{CostCoefficients, BASE_SCAN_SECONDS};
use super::masking::{combine, random_mask, selection_vector};
use super::params::{check_range, check_unit_interval, merge_params, HomomorphicParams, ProtocolParams};
use super::{mismatched, ClientSecrets, PirProtocol, ProtocolType, ResultForm, TransformedQuery};
use crate::dataset::PirDatabase;
use crate::error::Result;
use crate::query::{IndexVisibility, QueryVector};
use crate::rng::PirRng;

#[derive(Debug, Clone, Copy, Default)]
pub struct HomomorphicPir;

impl HomomorphicPir {
    pub fn coefficients(params: &HomomorphicParams) -> CostCoefficients {
        let bits = f64::from(params.encryption_bits);
        let key_scale = bits / 1024.0;
        let degree_scale = f64::from(params.polynomial_degree) / 4096.0;
        CostCoefficients {
            key_bits: params.encryption_bits,
            // noise management adds work to every ciphertext operation
            scan_seconds: BASE_SCAN_SECONDS * 4.0 * key_scale * degree_scale * (1.0 + params.noise_level),
            // encryption plus decryption
            crypto_seconds: key_scale * 0.05 + key_scale * 0.03,
            scan_fraction: 1.0,
            padding_records: 0.0,
            upload_per_record: bits / 8.0,
            upload_per_entry: 0.0,
            download_expansion: 8.0 * key_scale,
            route_overhead: 0.0,
            server_load_factor: 2e-4,
            client_load_factor: 0.6,
            privacy_level: 7.0 + ((bits - 1024.0) / 1024.0).min(3.0),
        }
    }
}

impl PirProtocol for HomomorphicPir {
    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Homomorphic
    }

    fn index_visibility(&self) -> IndexVisibility {
        IndexVisibility::Sealed
    }

    fn configure(&self, overrides: &Map<String, Value>) -> Result<(ProtocolParams, CostCoefficients)> {
        let params = merge_params(&HomomorphicParams::default(), overrides)?;
        check_range("encryption_bits", params.encryption_bits, 512, 16384)?;
        check_unit_interval("noise_level", params.noise_level)?;
        check_range("polynomial_degree", params.polynomial_degree, 1024, 65536)?;
        let coefficients = Self::coefficients(&params);
        Ok((ProtocolParams::Homomorphic(params), coefficients))
    }

    fn transform_query(
        &self,
        _params: &ProtocolParams,
        query: &QueryVector,
        db: &PirDatabase,
        rng: &mut PirRng,
    ) -> Result<(TransformedQuery, ClientSecrets)> {
        let mask = random_mask(rng);
        let selections = query
            .entries()
            .iter()
            .map(|entry| selection_vector(db.len(), entry.index as usize, mask, rng))
            .collect();
        Ok((
            TransformedQuery::Homomorphic { selections },
            ClientSecrets {
                mask: Some(mask),
                ..ClientSecrets::default()
            },
        ))
    }

    fn execute(&self, _params: &ProtocolParams, db: &PirDatabase, query: &TransformedQuery) -> Result<Vec<ResultForm>> {
        let TransformedQuery::Homomorphic { selections } = query else {
            return Err(mismatched(ProtocolType::Homomorphic, query.kind()));
        };
        selections
            .iter()
            .map(|selection| Ok(ResultForm::Masked { words: combine(db, 0..db.len(), selection)? }))
            .collect()
    }
}
