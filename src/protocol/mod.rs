//! Protocol strategies.
//!
//! A closed set of four PIR protocols behind one trait. [`ProtocolConfig`]
//! is the immutable, serialized result of configuring one of them.

pub mod basic;
pub mod cost;
pub mod homomorphic;
pub mod hybrid;
pub mod masking;
pub mod onion;
pub mod params;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dataset::PirDatabase;
use crate::error::{PirError, Result};
use crate::query::{IndexVisibility, QueryVector, MAX_NOISE, MIN_NOISE};
use crate::rng::PirRng;

pub use self::basic::BasicPir;
pub use self::cost::{CostCoefficients, CostEstimate, WorkloadShape};
pub use self::homomorphic::HomomorphicPir;
pub use self::hybrid::HybridPir;
pub use self::onion::{OnionCircuit, OnionPir};
pub use self::params::{BasicParams, HomomorphicParams, HybridParams, OnionParams, ProtocolParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    Basic,
    Homomorphic,
    Hybrid,
    Onion,
}

impl ProtocolType {
    pub const ALL: [ProtocolType; 4] = [
        ProtocolType::Basic,
        ProtocolType::Homomorphic,
        ProtocolType::Hybrid,
        ProtocolType::Onion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProtocolType::Basic => "basic",
            ProtocolType::Homomorphic => "homomorphic",
            ProtocolType::Hybrid => "hybrid",
            ProtocolType::Onion => "onion",
        }
    }

    pub fn strategy(self) -> &'static dyn PirProtocol {
        static BASIC: BasicPir = BasicPir;
        static HOMOMORPHIC: HomomorphicPir = HomomorphicPir;
        static HYBRID: HybridPir = HybridPir;
        static ONION: OnionPir = OnionPir;
        match self {
            ProtocolType::Basic => &BASIC,
            ProtocolType::Homomorphic => &HOMOMORPHIC,
            ProtocolType::Hybrid => &HYBRID,
            ProtocolType::Onion => &ONION,
        }
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolType {
    type Err = PirError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(ProtocolType::Basic),
            "homomorphic" => Ok(ProtocolType::Homomorphic),
            "hybrid" => Ok(ProtocolType::Hybrid),
            "onion" => Ok(ProtocolType::Onion),
            _ => Err(PirError::UnknownProtocol(s.to_string())),
        }
    }
}

/// What the server receives for one query.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformedQuery {
    Basic { indices: Vec<u64> },
    Homomorphic { selections: Vec<Vec<u64>> },
    Hybrid { partition_size: usize, buckets: Vec<BucketQuery> },
    Onion { packet: Vec<u8>, circuit: OnionCircuit },
}

impl TransformedQuery {
    pub fn kind(&self) -> ProtocolType {
        match self {
            TransformedQuery::Basic { .. } => ProtocolType::Basic,
            TransformedQuery::Homomorphic { .. } => ProtocolType::Homomorphic,
            TransformedQuery::Hybrid { .. } => ProtocolType::Hybrid,
            TransformedQuery::Onion { .. } => ProtocolType::Onion,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BucketQuery {
    pub bucket: usize,
    pub selection: Vec<u64>,
}

/// Client-side state needed to decode a protocol-form result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSecrets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_secret: Option<[u8; 32]>,
    #[serde(default)]
    pub layers: u32,
}

/// Server output for one query entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "snake_case")]
pub enum ResultForm {
    Plain {
        #[serde(with = "pir_crypto::base64::bytes")]
        bytes: Vec<u8>,
    },
    Masked {
        words: Vec<u64>,
    },
    Layered {
        #[serde(with = "pir_crypto::base64::bytes")]
        blob: Vec<u8>,
    },
}

impl ResultForm {
    /// Whether the raw form still has to be decoded client-side.
    pub fn needs_decrypt(&self) -> bool {
        !matches!(self, ResultForm::Plain { .. })
    }

    /// Raw bytes as they travelled from the server.
    pub fn raw_bytes(&self) -> Vec<u8> {
        match self {
            ResultForm::Plain { bytes } => bytes.clone(),
            ResultForm::Masked { words } => words.iter().flat_map(|w| w.to_le_bytes()).collect(),
            ResultForm::Layered { blob } => blob.clone(),
        }
    }

    /// Decode into the record bytes.
    pub fn reveal(&self, secrets: &ClientSecrets) -> Result<Vec<u8>> {
        match self {
            ResultForm::Plain { bytes } => Ok(bytes.clone()),
            ResultForm::Masked { words } => {
                let mask = secrets
                    .mask
                    .ok_or_else(|| PirError::InvalidState("masked result without a mask".into()))?;
                masking::unmask(words, mask)
            }
            ResultForm::Layered { blob } => onion::unwrap_response(blob, secrets),
        }
    }
}

/// One PIR protocol.
pub trait PirProtocol: Send + Sync {
    fn protocol_type(&self) -> ProtocolType;

    fn index_visibility(&self) -> IndexVisibility;

    /// Merge overrides onto the defaults, validate them and derive the cost
    /// coefficients.
    fn configure(&self, overrides: &Map<String, Value>) -> Result<(ProtocolParams, CostCoefficients)>;

    fn cost_model(
        &self,
        coefficients: &CostCoefficients,
        shape: &WorkloadShape,
        jitter: f64,
        rng: &mut PirRng,
    ) -> CostEstimate {
        cost::estimate(coefficients, shape, jitter, rng)
    }

    /// Client side: turn a query vector into what the server receives.
    fn transform_query(
        &self,
        params: &ProtocolParams,
        query: &QueryVector,
        db: &PirDatabase,
        rng: &mut PirRng,
    ) -> Result<(TransformedQuery, ClientSecrets)>;

    /// Server side: one result per query entry, in entry order.
    fn execute(&self, params: &ProtocolParams, db: &PirDatabase, query: &TransformedQuery) -> Result<Vec<ResultForm>>;
}

pub(crate) fn mismatched(expected: ProtocolType, got: ProtocolType) -> PirError {
    PirError::InvalidParameter(format!("{expected} protocol received {got} input"))
}

/// Immutable configuration attached to an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub protocol_type: ProtocolType,
    pub params: ProtocolParams,
    pub coefficients: CostCoefficients,
    /// Fixed noise count, or `None` to draw one per query.
    pub noise_count: Option<usize>,
}

impl ProtocolConfig {
    /// Configure `protocol_type`. A `noise_count` key in `overrides` pins
    /// the noise count; otherwise `default_noise` applies.
    pub fn configure(
        protocol_type: ProtocolType,
        overrides: &Map<String, Value>,
        default_noise: Option<usize>,
    ) -> Result<Self> {
        let mut overrides = overrides.clone();
        let noise_count = match overrides.remove("noise_count") {
            None | Some(Value::Null) => default_noise,
            Some(value) => {
                let k = value
                    .as_u64()
                    .and_then(|k| usize::try_from(k).ok())
                    .filter(|k| (MIN_NOISE..=MAX_NOISE).contains(k))
                    .ok_or_else(|| {
                        PirError::InvalidParameter(format!(
                            "noise_count must be an integer between {MIN_NOISE} and {MAX_NOISE}, got {value}"
                        ))
                    })?;
                Some(k)
            }
        };
        let (params, coefficients) = protocol_type.strategy().configure(&overrides)?;
        Ok(Self {
            protocol_type,
            params,
            coefficients,
            noise_count,
        })
    }

    pub fn parse(protocol_type: &str, overrides: &Map<String, Value>, default_noise: Option<usize>) -> Result<Self> {
        Self::configure(protocol_type.parse()?, overrides, default_noise)
    }

    pub fn strategy(&self) -> &'static dyn PirProtocol {
        self.protocol_type.strategy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::seeded;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => Map::new(),
        }
    }

    fn shape(n: usize) -> WorkloadShape {
        WorkloadShape {
            dataset_size: n,
            entries: 3,
            avg_record_size: 300.0,
        }
    }

    fn exact(p: ProtocolType, n: usize) -> CostEstimate {
        let config = ProtocolConfig::configure(p, &Map::new(), None).unwrap();
        cost::estimate_exact(&config.coefficients, &shape(n))
    }

    #[test]
    fn parses_protocol_names() {
        assert_eq!("basic".parse::<ProtocolType>().unwrap(), ProtocolType::Basic);
        assert_eq!(" Onion ".parse::<ProtocolType>().unwrap(), ProtocolType::Onion);
        let err = "quantum".parse::<ProtocolType>().unwrap_err();
        assert_eq!(err.code(), "UNKNOWN_PROTOCOL");
    }

    #[test]
    fn strategies_match_their_type() {
        for p in ProtocolType::ALL {
            assert_eq!(p.strategy().protocol_type(), p);
        }
    }

    #[test]
    fn configure_is_idempotent() {
        for p in ProtocolType::ALL {
            let a = ProtocolConfig::configure(p, &Map::new(), None).unwrap();
            let b = ProtocolConfig::configure(p, &Map::new(), None).unwrap();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn noise_count_override() {
        let config = ProtocolConfig::parse("basic", &obj(json!({"noise_count": 2})), None).unwrap();
        assert_eq!(config.noise_count, Some(2));
        assert!(ProtocolConfig::parse("basic", &obj(json!({"noise_count": 5})), None).is_err());
        let inherited = ProtocolConfig::parse("basic", &Map::new(), Some(3)).unwrap();
        assert_eq!(inherited.noise_count, Some(3));
    }

    #[test]
    fn privacy_is_monotone() {
        let basic = exact(ProtocolType::Basic, 1000).privacy_level;
        let hybrid = exact(ProtocolType::Hybrid, 1000).privacy_level;
        let homomorphic = exact(ProtocolType::Homomorphic, 1000).privacy_level;
        let onion = exact(ProtocolType::Onion, 1000).privacy_level;
        assert!(basic <= hybrid && hybrid <= homomorphic);
        assert!(basic <= onion);
    }

    #[test]
    fn comm_cost_is_monotone() {
        for n in [2usize, 10, 1000, 100_000] {
            assert!(exact(ProtocolType::Basic, n).comm_cost <= exact(ProtocolType::Homomorphic, n).comm_cost);
        }
    }

    #[test]
    fn basic_comm_tracks_record_size() {
        let e = exact(ProtocolType::Basic, 1000);
        assert_eq!(e.comm_cost, 3.0 * (300.0 + cost::INDEX_BYTES));
    }

    #[test]
    fn jittered_cost_stays_close() {
        let config = ProtocolConfig::configure(ProtocolType::Onion, &Map::new(), None).unwrap();
        let base = cost::estimate_exact(&config.coefficients, &shape(500));
        let mut rng = seeded(12);
        let e = config.strategy().cost_model(&config.coefficients, &shape(500), 0.02, &mut rng);
        assert!((e.query_time / base.query_time - 1.0).abs() <= 0.02 + 1e-12);
    }

    #[test]
    fn result_forms_report_decrypt_need() {
        assert!(!ResultForm::Plain { bytes: vec![1] }.needs_decrypt());
        assert!(ResultForm::Masked { words: vec![1] }.needs_decrypt());
        assert_eq!(ResultForm::Masked { words: vec![1, 2] }.raw_bytes().len(), 16);
        let err = ResultForm::Masked { words: vec![1] }.reveal(&ClientSecrets::default()).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = ProtocolConfig::parse("hybrid", &obj(json!({"database_partitions": 8})), None).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: ProtocolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
