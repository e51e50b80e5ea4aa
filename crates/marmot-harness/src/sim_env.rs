//! Seeded Environment implementation for deterministic testing.

#![allow(clippy::disallowed_types, reason = "Synchronous RNG access only")]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use marmot_core::Environment;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Wall clock value a fresh simulation starts at.
pub const SIM_EPOCH_SECS: u64 = 1_700_000_000;

/// Simulation environment with a seeded RNG and a manual clock.
///
/// Clones share the RNG stream and the clock, so every client in a scenario
/// built from one `SimEnv` draws from the same reproducible sequence.
///
/// The clock only moves when [`SimEnv::advance`] is called.
///
/// # Panics
///
/// `random_bytes()` panics if the RNG mutex is poisoned. Acceptable for test
/// code.
#[derive(Clone, Debug)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    clock: Arc<AtomicU64>,
}

impl SimEnv {
    /// Environment seeded with `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            clock: Arc::new(AtomicU64::new(SIM_EPOCH_SECS)),
        }
    }

    /// Move the clock forward by `secs`.
    pub fn advance(&self, secs: u64) {
        self.clock.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl Environment for SimEnv {
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().expect("Mutex poisoned").fill_bytes(buffer);
    }

    fn wall_clock_secs(&self) -> u64 {
        self.clock.load(Ordering::SeqCst)
    }
}
