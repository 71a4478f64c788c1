//! Seeded randomness.
//!
//! Every sampler in the engine takes an explicit [`PirRng`]. A [`SeedSource`]
//! hands out per-operation seeds: from a fixed-seed ChaCha stream when the
//! config pins one, from the OS otherwise.

use parking_lot::Mutex;
use rand::rngs::OsRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

pub type PirRng = ChaCha20Rng;

pub fn seeded(seed: u64) -> PirRng {
    ChaCha20Rng::seed_from_u64(seed)
}

pub struct SeedSource {
    fixed: Option<Mutex<ChaCha20Rng>>,
}

impl SeedSource {
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            fixed: seed.map(|s| Mutex::new(seeded(s))),
        }
    }

    pub fn is_deterministic(&self) -> bool {
        self.fixed.is_some()
    }

    pub fn next_seed(&self) -> u64 {
        match &self.fixed {
            Some(rng) => rng.lock().next_u64(),
            None => OsRng.next_u64(),
        }
    }
}
