//! services/api/src/adapters/rng.rs
//!
//! Seedable implementation of the `RandomSource` port. Production wiring
//! seeds from entropy; tests seed explicitly to pin the difficulty and
//! cache-vs-generate draws.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

use medquiz_core::ports::RandomSource;

pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StdRng> {
        // A poisoned RNG lock is still a usable RNG.
        self.rng.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl RandomSource for SeededRandom {
    fn chance(&self, p: f64) -> bool {
        self.lock().gen_bool(p.clamp(0.0, 1.0))
    }

    fn pick(&self, n: usize) -> usize {
        self.lock().gen_range(0..n)
    }
}
