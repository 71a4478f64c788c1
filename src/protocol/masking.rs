//! Masked selection vectors, a simulated stand-in for encrypted queries.
//!
//! The selected row gets weight `2^SCALE_SHIFT + e`, every other row gets a
//! small weight `e`, and all weights are multiplied by a secret odd mask.
//! The server forms `sum(w_i * row_i[j])` in wrapping u64 arithmetic; the
//! client multiplies by the mask inverse and shifts the noise away.
//!
//! The mask only scrambles the weights. With `e < 2^12` a server that
//! guesses one noise term recovers the mask, so this models the data flow
//! and cost of homomorphic selection, not its secrecy.

use std::ops::Range;

use pir_crypto::CryptoError;
use rand::{Rng, RngCore};

use crate::dataset::PirDatabase;
use crate::error::{PirError, Result};
use crate::padding::unpad_row;
use crate::rng::PirRng;

pub const SCALE_SHIFT: u32 = 40;
const NOISE_LIMIT: u64 = 1 << 12;

pub fn random_mask(rng: &mut PirRng) -> u64 {
    rng.next_u64() | 1
}

/// Inverse of an odd `k` modulo 2^64 by Newton iteration.
pub fn mask_inverse(k: u64) -> u64 {
    // k * k == 1 mod 8 for odd k; each round doubles the correct bits.
    let mut inv = k;
    for _ in 0..5 {
        inv = inv.wrapping_mul(2u64.wrapping_sub(k.wrapping_mul(inv)));
    }
    inv
}

/// Masked weights over `len` rows with `selected` as the target offset.
pub fn selection_vector(len: usize, selected: usize, mask: u64, rng: &mut PirRng) -> Vec<u64> {
    (0..len)
        .map(|i| {
            let noise = rng.gen_range(1..NOISE_LIMIT);
            let weight = if i == selected {
                (1u64 << SCALE_SHIFT) + noise
            } else {
                noise
            };
            weight.wrapping_mul(mask)
        })
        .collect()
}

/// Server side: weighted column sums over the padded rows in `rows`.
pub fn combine(db: &PirDatabase, rows: Range<usize>, selection: &[u64]) -> Result<Vec<u64>> {
    if selection.len() != rows.len() {
        return Err(PirError::InvalidParameter(format!(
            "selection of {} weights for {} rows",
            selection.len(),
            rows.len()
        )));
    }
    let mut acc = vec![0u64; db.row_width()];
    for (weight, i) in selection.iter().zip(rows) {
        let row = db.padded_row(i)?;
        for (slot, byte) in acc.iter_mut().zip(row) {
            *slot = slot.wrapping_add(weight.wrapping_mul(u64::from(byte)));
        }
    }
    Ok(acc)
}

/// Client side: strip the mask and the noise, then the row padding.
pub fn unmask(words: &[u64], mask: u64) -> Result<Vec<u8>> {
    let inverse = mask_inverse(mask);
    let padded = words
        .iter()
        .map(|w| {
            let value = w.wrapping_mul(inverse) >> SCALE_SHIFT;
            u8::try_from(value)
                .map_err(|_| PirError::from(CryptoError::Integrity("masked word out of range".into())))
        })
        .collect::<Result<Vec<u8>>>()?;
    unpad_row(&padded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::seeded;

    #[test]
    fn inverse_is_exact() {
        let mut rng = seeded(1);
        for _ in 0..1000 {
            let k = random_mask(&mut rng);
            assert_eq!(k.wrapping_mul(mask_inverse(k)), 1);
        }
        assert_eq!(mask_inverse(1), 1);
        assert_eq!(u64::MAX.wrapping_mul(mask_inverse(u64::MAX)), 1);
    }

    #[test]
    fn recovers_selected_row() {
        let rows: Vec<Vec<u8>> = (0..50u8).map(|i| vec![i; (i as usize % 7) + 1]).collect();
        let db = PirDatabase::from_rows(rows);
        let mut rng = seeded(2);
        let mask = random_mask(&mut rng);
        let selection = selection_vector(db.len(), 17, mask, &mut rng);
        let words = combine(&db, 0..db.len(), &selection).unwrap();
        assert_eq!(unmask(&words, mask).unwrap(), db.row(17).unwrap());
    }

    #[test]
    fn recovers_within_a_range() {
        let rows: Vec<Vec<u8>> = (0..20u8).map(|i| format!("row-{i}").into_bytes()).collect();
        let db = PirDatabase::from_rows(rows);
        let mut rng = seeded(3);
        let mask = random_mask(&mut rng);
        let selection = selection_vector(5, 2, mask, &mut rng);
        let words = combine(&db, 10..15, &selection).unwrap();
        assert_eq!(unmask(&words, mask).unwrap(), b"row-12");
    }

    #[test]
    fn wrong_mask_is_detected() {
        let db = PirDatabase::from_rows(vec![b"alpha".to_vec(), b"beta".to_vec()]);
        let mut rng = seeded(4);
        let mask = random_mask(&mut rng);
        let selection = selection_vector(2, 0, mask, &mut rng);
        let words = combine(&db, 0..2, &selection).unwrap();
        assert!(unmask(&words, mask ^ 0b10).is_err());
    }

    #[test]
    fn length_mismatch_rejected() {
        let db = PirDatabase::from_rows(vec![b"a".to_vec()]);
        assert!(combine(&db, 0..1, &[1, 2]).is_err());
    }

    #[test]
    fn mask_falls_to_a_guessed_noise_term() {
        let mut rng = seeded(5);
        let mask = random_mask(&mut rng);
        let selection = selection_vector(50, 9, mask, &mut rng);
        let recovered = selection.iter().any(|&w| {
            (1..NOISE_LIMIT)
                .step_by(2)
                .any(|e| w.wrapping_mul(mask_inverse(e)) == mask)
        });
        assert!(recovered);
    }
}
