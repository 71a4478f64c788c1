//! Onion-routed PIR.
//!
//! The index list is wrapped in one AES-GCM layer per relay. Relays peel
//! their layer on the way in and add it back to each response on the way
//! out; only the client holds every layer key.

use pir_crypto::{hkdf_derive, open_combined, seal_combined, CryptoError};
use rand::{Rng, RngCore};
use serde_json::{Map, Value};

use super::basic::scan_for;
use super::cost::{CostCoefficients, BASE_SCAN_SECONDS, INDEX_BYTES};
use super::params::{check_range, merge_params, OnionParams, ProtocolParams};
use super::{mismatched, ClientSecrets, PirProtocol, ProtocolType, ResultForm, TransformedQuery};
use crate::dataset::PirDatabase;
use crate::error::{PirError, Result};
use crate::query::{IndexVisibility, QueryVector};
use crate::rng::PirRng;

const LAYER_KEY_INFO: &[u8] = b"pir:onion-layer:v1";
const REQUEST_AAD: &[u8] = b"pir:onion:request";
const RESPONSE_AAD: &[u8] = b"pir:onion:response";
/// IV plus tag added by each layer.
const LAYER_OVERHEAD: f64 = 28.0;
/// Per-hop routing header.
const HOP_HEADER: f64 = 32.0;

/// The relays a packet passes through, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnionCircuit {
    pub hops: Vec<RelayHop>,
}

#[derive(Clone, PartialEq, Eq)]
pub struct RelayHop {
    /// Relay chosen among `nodes_per_layer` candidates.
    pub node: u32,
    pub key: [u8; 32],
}

impl std::fmt::Debug for RelayHop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHop").field("node", &self.node).finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OnionPir;

impl OnionPir {
    pub fn coefficients(params: &OnionParams) -> CostCoefficients {
        let layers = f64::from(params.layers);
        let nodes = f64::from(params.nodes_per_layer);
        // Σ 0.01·(l+1) inbound plus Σ 0.008·(L−l) outbound
        let hop_seconds = (0.01 + 0.008) * layers * (layers + 1.0) / 2.0;
        CostCoefficients {
            key_bits: 256,
            scan_seconds: BASE_SCAN_SECONDS,
            crypto_seconds: hop_seconds,
            scan_fraction: 1.0,
            padding_records: 0.0,
            upload_per_record: 0.0,
            upload_per_entry: INDEX_BYTES,
            download_expansion: 1.0,
            route_overhead: layers * (nodes * HOP_HEADER + 2.0 * LAYER_OVERHEAD),
            server_load_factor: 1e-4 * layers,
            client_load_factor: 0.4 * layers,
            privacy_level: 7.0 + ((layers - 1.0) / 2.0).min(3.0),
        }
    }
}

fn layer_aad(label: &[u8], layer: usize) -> Vec<u8> {
    let mut aad = label.to_vec();
    aad.extend_from_slice(&(layer as u32).to_be_bytes());
    aad
}

fn layer_key(circuit_secret: &[u8; 32], layer: usize) -> Result<[u8; 32]> {
    Ok(hkdf_derive(circuit_secret, &(layer as u32).to_be_bytes(), LAYER_KEY_INFO)?)
}

fn encode_indices(indices: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + indices.len() * 8);
    out.extend_from_slice(&(indices.len() as u32).to_be_bytes());
    for index in indices {
        out.extend_from_slice(&index.to_be_bytes());
    }
    out
}

fn decode_indices(bytes: &[u8]) -> Result<Vec<u64>> {
    let malformed = || PirError::from(CryptoError::Format("malformed onion payload".into()));
    let (count, rest) = bytes.split_first_chunk::<4>().ok_or_else(malformed)?;
    let count = u32::from_be_bytes(*count) as usize;
    if rest.len() != count * 8 {
        return Err(malformed());
    }
    Ok(rest
        .chunks_exact(8)
        .map(|chunk| {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            u64::from_be_bytes(word)
        })
        .collect())
}

/// Client side: peel every response layer, outermost first.
pub(crate) fn unwrap_response(blob: &[u8], secrets: &ClientSecrets) -> Result<Vec<u8>> {
    let secret = secrets
        .circuit_secret
        .as_ref()
        .ok_or_else(|| PirError::InvalidState("layered result without a circuit secret".into()))?;
    let mut payload = blob.to_vec();
    for layer in 0..secrets.layers as usize {
        let key = layer_key(secret, layer)?;
        payload = open_combined(&key, &payload, &layer_aad(RESPONSE_AAD, layer))?;
    }
    Ok(payload)
}

impl PirProtocol for OnionPir {
    fn protocol_type(&self) -> ProtocolType {
        ProtocolType::Onion
    }

    fn index_visibility(&self) -> IndexVisibility {
        IndexVisibility::Sealed
    }

    fn configure(&self, overrides: &Map<String, Value>) -> Result<(ProtocolParams, CostCoefficients)> {
        let params = merge_params(&OnionParams::default(), overrides)?;
        check_range("layers", params.layers, 1, 10)?;
        check_range("nodes_per_layer", params.nodes_per_layer, 1, 100)?;
        check_range("timeout_ms", params.timeout_ms, 1, 60_000)?;
        let coefficients = Self::coefficients(&params);
        Ok((ProtocolParams::Onion(params), coefficients))
    }

    fn transform_query(
        &self,
        params: &ProtocolParams,
        query: &QueryVector,
        _db: &PirDatabase,
        rng: &mut PirRng,
    ) -> Result<(TransformedQuery, ClientSecrets)> {
        let ProtocolParams::Onion(params) = params else {
            return Err(PirError::InvalidParameter("onion protocol needs onion parameters".into()));
        };
        let mut secret = [0u8; 32];
        rng.fill_bytes(&mut secret);

        let layers = params.layers as usize;
        let hops = (0..layers)
            .map(|layer| {
                Ok(RelayHop {
                    node: rng.gen_range(0..params.nodes_per_layer),
                    key: layer_key(&secret, layer)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        // innermost layer belongs to the last relay
        let mut packet = encode_indices(&query.indices());
        for (layer, hop) in hops.iter().enumerate().rev() {
            packet = seal_combined(&hop.key, &packet, &layer_aad(REQUEST_AAD, layer))?;
        }

        Ok((
            TransformedQuery::Onion {
                packet,
                circuit: OnionCircuit { hops },
            },
            ClientSecrets {
                mask: None,
                circuit_secret: Some(secret),
                layers: params.layers,
            },
        ))
    }

    fn execute(&self, _params: &ProtocolParams, db: &PirDatabase, query: &TransformedQuery) -> Result<Vec<ResultForm>> {
        let TransformedQuery::Onion { packet, circuit } = query else {
            return Err(mismatched(ProtocolType::Onion, query.kind()));
        };

        let mut payload = packet.clone();
        for (layer, hop) in circuit.hops.iter().enumerate() {
            payload = open_combined(&hop.key, &payload, &layer_aad(REQUEST_AAD, layer))?;
        }

        decode_indices(&payload)?
            .into_iter()
            .map(|index| {
                let mut response = scan_for(db, index)?;
                for (layer, hop) in circuit.hops.iter().enumerate().rev() {
                    response = seal_combined(&hop.key, &response, &layer_aad(RESPONSE_AAD, layer))?;
                }
                Ok(ResultForm::Layered { blob: response })
            })
            .collect()
    }
}
