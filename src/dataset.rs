//! Mock health-record datasets and the byte rows the PIR server holds.

use chrono::{Duration as ChronoDuration, NaiveDate};
use pir_crypto::{canonical_json, CryptoError, EncryptedRecord};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{PirError, Result};
use crate::padding::{pad_row, row_width};
use crate::rng::PirRng;

pub const DEFAULT_RECORD_TYPES: &[&str] = &[
    "GENERAL_CHECKUP",
    "LAB_RESULT",
    "IMAGING",
    "PRESCRIPTION",
    "SURGICAL",
    "DIAGNOSIS",
    "VITAL_SIGN",
    "VACCINATION",
    "ALLERGY",
    "MEDICAL_HISTORY",
    "FOLLOW_UP",
];

const DISEASES: &[&str] = &[
    "hypertension",
    "diabetes",
    "coronary heart disease",
    "pneumonia",
    "gastritis",
    "migraine",
    "influenza",
    "asthma",
    "depression",
    "tuberculosis",
    "stroke",
];
const MEDICATIONS: &[&str] = &[
    "aspirin",
    "ibuprofen",
    "loratadine",
    "metformin",
    "amlodipine",
    "simvastatin",
    "levothyroxine",
    "furosemide",
    "losartan",
];
const VACCINES: &[&str] = &["covid-19", "influenza", "hepatitis b", "measles", "pneumococcal"];
const SURGERIES: &[&str] = &[
    "appendectomy",
    "cholecystectomy",
    "bypass",
    "hip replacement",
    "cataract surgery",
    "tonsillectomy",
];
const ALLERGENS: &[&str] = &["pollen", "dust mites", "seafood", "peanuts", "milk", "penicillin"];
const SEVERITIES: &[&str] = &["mild", "moderate", "severe"];
const FOLLOW_UPS: &[&str] = &["post-operative", "medication", "rehabilitation", "chronic care"];

/// Records are dated uniformly over five years starting 2020-01-01.
const DATE_SPAN_DAYS: i64 = 1826;
const VECTOR_DIMENSIONS: usize = 50;

/// Request for a generated dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub count: usize,
    #[serde(default = "default_structured")]
    pub structured: bool,
    #[serde(default)]
    pub record_types: Vec<String>,
    /// Encrypt every record with the engine key before storing.
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_structured() -> bool {
    true
}

impl DatasetSpec {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            structured: true,
            record_types: Vec::new(),
            encrypt: false,
            seed: None,
        }
    }

    pub fn record_types(&self) -> Vec<String> {
        if self.record_types.is_empty() {
            DEFAULT_RECORD_TYPES.iter().map(|s| s.to_string()).collect()
        } else {
            self.record_types.clone()
        }
    }
}

/// One stored record: plaintext JSON or an encrypted envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum DatasetRecord {
    Plain(Value),
    Encrypted(EncryptedRecord),
}

impl DatasetRecord {
    pub fn is_encrypted(&self) -> bool {
        matches!(self, DatasetRecord::Encrypted(_))
    }

    /// The exact bytes the server holds for this record.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            DatasetRecord::Plain(value) => Ok(canonical_json(value)?.into_bytes()),
            DatasetRecord::Encrypted(record) => Ok(record.to_json()?.into_bytes()),
        }
    }

    /// Inverse of [`DatasetRecord::to_bytes`]. The caller says which kind
    /// the bytes were stored as; plaintext is never sniffed for envelope
    /// fields.
    pub fn from_bytes(bytes: &[u8], encrypted: bool) -> Result<Self> {
        if encrypted {
            let json = std::str::from_utf8(bytes)
                .map_err(|e| CryptoError::Format(format!("record is not UTF-8: {e}")))?;
            Ok(DatasetRecord::Encrypted(EncryptedRecord::from_json(json)?))
        } else {
            Ok(DatasetRecord::Plain(serde_json::from_slice(bytes)?))
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub records: Vec<DatasetRecord>,
}

impl Dataset {
    pub fn new(records: Vec<DatasetRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_encrypted(&self) -> bool {
        !self.records.is_empty() && self.records.iter().all(DatasetRecord::is_encrypted)
    }
}

/// Fetch one record by position.
pub fn get_record(dataset: &Dataset, index: u64) -> Result<&DatasetRecord> {
    usize::try_from(index)
        .ok()
        .and_then(|i| dataset.records.get(i))
        .ok_or_else(|| {
            PirError::InvalidIndex(format!(
                "index {index} out of range for dataset of {} records",
                dataset.len()
            ))
        })
}

/// Generate `spec.count` mock health records.
pub fn generate_dataset(spec: &DatasetSpec, max_size: usize, rng: &mut PirRng) -> Result<Vec<Value>> {
    if spec.count == 0 || spec.count > max_size {
        return Err(PirError::InvalidParameter(format!(
            "dataset count must be between 1 and {max_size}, got {}",
            spec.count
        )));
    }
    let record_types = spec.record_types();
    (0..spec.count)
        .map(|i| {
            if spec.structured {
                structured_record(i, &record_types, rng)
            } else {
                Ok(vector_record(i, &record_types, rng))
            }
        })
        .collect()
}

fn pick<'a>(items: &'a [&'a str], rng: &mut PirRng) -> &'a str {
    items.choose(rng).copied().unwrap_or_default()
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

fn blood_pressure(rng: &mut PirRng) -> String {
    format!("{}/{}", rng.gen_range(90..=140), rng.gen_range(60..=90))
}

fn structured_record(i: usize, record_types: &[String], rng: &mut PirRng) -> Result<Value> {
    let record_type = record_types
        .choose(rng)
        .cloned()
        .ok_or_else(|| PirError::InvalidParameter("record_types must not be empty".into()))?;
    let patient_id: u32 = rng.gen_range(1001..1050);
    let doctor_id: u32 = rng.gen_range(2001..2020);

    let epoch = NaiveDate::from_ymd_opt(2020, 1, 1)
        .ok_or_else(|| PirError::InvalidParameter("invalid epoch date".into()))?;
    let record_date = epoch + ChronoDuration::days(rng.gen_range(0..DATE_SPAN_DAYS));
    let record_date = record_date.format("%Y-%m-%d").to_string();

    let mut record = Map::new();
    record.insert("record_id".into(), json!(format!("rec-{i:06}")));
    record.insert("patient_id".into(), json!(patient_id));
    record.insert("doctor_id".into(), json!(doctor_id));
    record.insert("record_type".into(), json!(record_type));
    record.insert("title".into(), json!(format!("{} examination", pick(DISEASES, rng))));
    record.insert(
        "description".into(),
        json!(format!("{record_type} record for patient {patient_id} on {record_date}")),
    );
    record.insert("record_date".into(), json!(record_date));
    record.insert("visibility".into(), json!("researcher"));
    record.insert("pir_protected".into(), json!(true));

    let extra = match record_type.as_str() {
        "LAB_RESULT" => json!({
            "blood_pressure": blood_pressure(rng),
            "heart_rate": rng.gen_range(60..=100),
            "blood_sugar": round1(rng.gen_range(3.9..10.0)),
            "cholesterol": round1(rng.gen_range(2.8..6.5)),
        }),
        "PRESCRIPTION" => {
            let n = rng.gen_range(1..=3);
            let meds: Vec<&str> = MEDICATIONS.choose_multiple(rng, n).copied().collect();
            let dosage: Vec<String> = (0..n)
                .map(|_| format!("{} times/day", rng.gen_range(1..=3)))
                .collect();
            json!({
                "medications": meds,
                "dosage": dosage,
                "duration_days": rng.gen_range(1..=14),
            })
        }
        "DIAGNOSIS" => json!({
            "diagnosis": pick(DISEASES, rng),
            "severity": pick(SEVERITIES, rng),
        }),
        "VITAL_SIGN" => json!({
            "temperature": round1(rng.gen_range(36.5..37.5)),
            "blood_pressure": blood_pressure(rng),
            "heart_rate": rng.gen_range(60..=100),
        }),
        "VACCINATION" => json!({ "vaccine_type": pick(VACCINES, rng) }),
        "SURGICAL" => json!({ "surgery_type": pick(SURGERIES, rng) }),
        "ALLERGY" => json!({ "allergy_type": pick(ALLERGENS, rng) }),
        "MEDICAL_HISTORY" => json!({ "medical_history": pick(DISEASES, rng) }),
        "FOLLOW_UP" => json!({ "follow_up_type": pick(FOLLOW_UPS, rng) }),
        _ => json!({}),
    };
    if let Value::Object(fields) = extra {
        record.extend(fields);
    }
    Ok(Value::Object(record))
}

fn vector_record(i: usize, record_types: &[String], rng: &mut PirRng) -> Value {
    let vector: Vec<f64> = (0..VECTOR_DIMENSIONS)
        .map(|_| (rng.gen::<f64>() * 1e6).round() / 1e6)
        .collect();
    json!({
        "record_id": format!("rec-{i:06}"),
        "record_type": record_types.choose(rng).cloned().unwrap_or_default(),
        "data_vector": vector,
        "pir_protected": true,
    })
}

/// Server-side byte view of a dataset.
#[derive(Debug, Clone)]
pub struct PirDatabase {
    rows: Vec<Vec<u8>>,
    total_bytes: usize,
    max_len: usize,
}

impl PirDatabase {
    pub fn from_dataset(dataset: &Dataset) -> Result<Self> {
        let rows = dataset
            .records
            .iter()
            .map(DatasetRecord::to_bytes)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_rows(rows))
    }

    pub fn from_rows(rows: Vec<Vec<u8>>) -> Self {
        let total_bytes = rows.iter().map(Vec::len).sum();
        let max_len = rows.iter().map(Vec::len).max().unwrap_or(0);
        Self {
            rows,
            total_bytes,
            max_len,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Vec<u8>] {
        &self.rows
    }

    pub fn row(&self, index: u64) -> Result<&[u8]> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.rows.get(i))
            .map(Vec::as_slice)
            .ok_or_else(|| {
                PirError::InvalidIndex(format!(
                    "index {index} out of range for dataset of {} records",
                    self.rows.len()
                ))
            })
    }

    pub fn avg_record_size(&self) -> f64 {
        if self.rows.is_empty() {
            0.0
        } else {
            self.total_bytes as f64 / self.rows.len() as f64
        }
    }

    /// Width every padded row shares.
    pub fn row_width(&self) -> usize {
        row_width(self.max_len)
    }

    pub fn padded_row(&self, index: usize) -> Result<Vec<u8>> {
        let row = self.row(index as u64)?;
        pad_row(row, self.row_width())
    }
}
