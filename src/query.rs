//! Query obfuscation.
//!
//! A [`QueryVector`] hides one real index among 1..=3 noise indices. The
//! server only ever sees the [`OpaqueQueryVector`]: per entry a sealed marker
//! of identical length, and the index itself when the protocol needs it.

use std::fmt;

use pir_crypto::{open_combined, seal_combined, CryptoError};
use rand::seq::index::sample;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{PirError, Result};
use crate::rng::PirRng;

pub const MIN_NOISE: usize = 1;
pub const MAX_NOISE: usize = 3;
pub const NONCE_LENGTH: usize = 12;

/// Plaintext marker: `[1 byte: is_real][8 bytes: index u64 BE]`.
const MARKER_LENGTH: usize = 9;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryEntry {
    pub index: u64,
    pub is_real: bool,
    pub nonce: [u8; NONCE_LENGTH],
}

/// Client-side query: the only place `is_real` is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryVector {
    entries: Vec<QueryEntry>,
}

impl QueryVector {
    pub fn entries(&self) -> &[QueryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn indices(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.index).collect()
    }

    pub fn real_position(&self) -> Option<usize> {
        self.entries.iter().position(|e| e.is_real)
    }

    pub fn real_index(&self) -> Option<u64> {
        self.entries.iter().find(|e| e.is_real).map(|e| e.index)
    }
}

/// Smallest dataset able to hold a query with `noise_count` noise entries.
pub fn required_dataset_size(noise_count: Option<usize>) -> usize {
    noise_count.unwrap_or(MIN_NOISE) + 1
}

/// Build a query vector for `target_index`.
///
/// Noise indices are distinct, never equal to the target, and drawn
/// uniformly; the real entry lands at a uniformly random position.
pub fn build_query_vector(
    target_index: u64,
    dataset_size: usize,
    noise_count: Option<usize>,
    rng: &mut PirRng,
) -> Result<QueryVector> {
    let target = usize::try_from(target_index)
        .ok()
        .filter(|&t| t < dataset_size)
        .ok_or_else(|| {
            PirError::InvalidIndex(format!(
                "target {target_index} out of range for dataset of {dataset_size} records"
            ))
        })?;

    let noise = match noise_count {
        Some(k) if !(MIN_NOISE..=MAX_NOISE).contains(&k) => {
            return Err(PirError::InvalidIndex(format!(
                "noise count must be between {MIN_NOISE} and {MAX_NOISE}, got {k}"
            )));
        }
        Some(k) => k,
        None => {
            let max = MAX_NOISE.min(dataset_size.saturating_sub(1));
            if max < MIN_NOISE {
                return Err(PirError::InvalidIndex(format!(
                    "dataset of {dataset_size} records has no room for noise"
                )));
            }
            rng.gen_range(MIN_NOISE..=max)
        }
    };
    if dataset_size < noise + 1 {
        return Err(PirError::InvalidIndex(format!(
            "dataset of {dataset_size} records cannot hold {noise} noise indices"
        )));
    }

    let mut entries: Vec<QueryEntry> = sample(rng, dataset_size - 1, noise)
        .into_iter()
        .map(|i| if i >= target { i + 1 } else { i })
        .map(|i| QueryEntry {
            index: i as u64,
            is_real: false,
            nonce: fresh_nonce(rng),
        })
        .collect();

    let position = rng.gen_range(0..=entries.len());
    let real = QueryEntry {
        index: target_index,
        is_real: true,
        nonce: fresh_nonce(rng),
    };
    entries.insert(position, real);

    Ok(QueryVector { entries })
}

fn fresh_nonce(rng: &mut PirRng) -> [u8; NONCE_LENGTH] {
    let mut nonce = [0u8; NONCE_LENGTH];
    rng.fill_bytes(&mut nonce);
    nonce
}

/// Client-held key sealing the real/noise markers of one query.
pub struct ObfuscationKey(Zeroizing<[u8; 32]>);

impl ObfuscationKey {
    pub fn generate(rng: &mut PirRng) -> Self {
        let mut key = Zeroizing::new([0u8; 32]);
        rng.fill_bytes(&mut key[..]);
        Self(key)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl fmt::Debug for ObfuscationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ObfuscationKey([redacted])")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexVisibility {
    /// Indices travel in the clear next to their markers.
    Plain,
    /// Indices only exist inside the sealed markers.
    Sealed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueEntry {
    pub index: Option<u64>,
    #[serde(with = "pir_crypto::base64::bytes")]
    pub marker: Vec<u8>,
    pub nonce: [u8; NONCE_LENGTH],
}

/// Server-visible form of a query vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueQueryVector {
    pub entries: Vec<OpaqueEntry>,
}

impl OpaqueQueryVector {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visible indices in entry order. Fails for sealed vectors.
    pub fn plain_indices(&self) -> Result<Vec<u64>> {
        self.entries
            .iter()
            .map(|e| {
                e.index.ok_or_else(|| {
                    PirError::InvalidParameter("query vector indices are sealed".into())
                })
            })
            .collect()
    }
}

/// Seal every entry's marker. Real and noise markers have the same length
/// and a fresh IV each, so they are indistinguishable without the key.
pub fn encrypt_index(
    query: &QueryVector,
    key: &ObfuscationKey,
    visibility: IndexVisibility,
) -> Result<OpaqueQueryVector> {
    let entries = query
        .entries
        .iter()
        .map(|entry| {
            let mut marker = [0u8; MARKER_LENGTH];
            marker[0] = u8::from(entry.is_real);
            marker[1..].copy_from_slice(&entry.index.to_be_bytes());
            let sealed = seal_combined(key.as_bytes(), &marker, &entry.nonce)?;
            Ok(OpaqueEntry {
                index: match visibility {
                    IndexVisibility::Plain => Some(entry.index),
                    IndexVisibility::Sealed => None,
                },
                marker: sealed,
                nonce: entry.nonce,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(OpaqueQueryVector { entries })
}

fn open_marker(entry: &OpaqueEntry, key: &ObfuscationKey) -> Result<(bool, u64)> {
    let plain = open_combined(key.as_bytes(), &entry.marker, &entry.nonce)?;
    if plain.len() != MARKER_LENGTH || plain[0] > 1 {
        return Err(CryptoError::Format("malformed query marker".into()).into());
    }
    let mut index = [0u8; 8];
    index.copy_from_slice(&plain[1..]);
    let index = u64::from_be_bytes(index);
    if let Some(visible) = entry.index {
        if visible != index {
            return Err(CryptoError::Integrity(format!(
                "visible index {visible} does not match sealed index {index}"
            ))
            .into());
        }
    }
    Ok((plain[0] == 1, index))
}

/// Locate the real entry: `(position, index)`.
pub fn reveal_real_entry(opaque: &OpaqueQueryVector, key: &ObfuscationKey) -> Result<(usize, u64)> {
    let mut real = None;
    for (position, entry) in opaque.entries.iter().enumerate() {
        let (is_real, index) = open_marker(entry, key)?;
        if is_real {
            if real.is_some() {
                return Err(CryptoError::Format("more than one real marker".into()).into());
            }
            real = Some((position, index));
        }
    }
    real.ok_or_else(|| CryptoError::Format("no real marker in query vector".into()).into())
}

/// Keep the result produced for the real entry and drop the rest.
pub fn identify_real_result<T>(
    opaque: &OpaqueQueryVector,
    results: Vec<T>,
    key: &ObfuscationKey,
) -> Result<(u64, T)> {
    if results.len() != opaque.len() {
        return Err(CryptoError::Format(format!(
            "expected {} results, got {}",
            opaque.len(),
            results.len()
        ))
        .into());
    }
    let (position, index) = reveal_real_entry(opaque, key)?;
    results
        .into_iter()
        .nth(position)
        .map(|r| (index, r))
        .ok_or_else(|| CryptoError::Format("missing result for real entry".into()).into())
}
