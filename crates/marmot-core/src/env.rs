//! Environment abstraction for deterministic testing.
//!
//! Decouples group logic from system resources (randomness, wall clock). MLS
//! key generation, group ids and event timestamps all flow through this trait,
//! so a seeded implementation reproduces a whole run byte for byte.

/// Abstract environment providing randomness and time.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `random_bytes()` uses cryptographically secure entropy in production
/// - `wall_clock_secs()` never goes backwards within one process
pub trait Environment: Clone + Send + Sync + 'static {
    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Seconds since the Unix epoch, used for event timestamps.
    fn wall_clock_secs(&self) -> u64;

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a random 32-byte identifier.
    ///
    /// Used for MLS group ids and transport group ids.
    fn random_id(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        self.random_bytes(&mut bytes);
        bytes
    }
}

/// Production environment using the system clock and OS RNG.
///
/// # Panics
///
/// Panics if the OS RNG fails. A client without working randomness cannot
/// generate keys, and continuing would compromise every group it touches.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("invariant: OS RNG failure is unrecoverable");
    }

    #[allow(clippy::disallowed_methods)]
    fn wall_clock_secs(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default()
    }
}
