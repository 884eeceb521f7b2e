//! Environment abstraction for deterministic testing.
//!
//! Decouples protocol logic from system resources (time, randomness).
//! Protocol code takes `now` as a parameter and draws entropy through the
//! injected environment, so the same operations run identically under a
//! virtual clock and a seeded generator in tests.

use std::{ops::{Add, Sub}, time::Duration};

/// Abstract environment providing time and randomness.
///
/// # Safety
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `random_bytes()` uses cryptographically secure entropy in production
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production environments use `std::time::Instant`, while simulation
    /// environments use virtual time.
    type Instant: Copy
        + Ord
        + Send
        + Sync
        + Add<Duration, Output = Self::Instant>
        + Sub<Self::Instant, Output = Duration>;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// - Subsequent calls must return times >= previous calls within a
    ///   single execution context.
    fn now(&self) -> Self::Instant;

    /// Fills the provided buffer with random bytes.
    ///
    /// # Invariants
    ///
    /// - Given the same RNG seed, this produces the same sequence of bytes
    /// - Uses cryptographically secure RNG in production
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    ///
    /// Convenience for session and request identifiers.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a random fixed-size array.
    ///
    /// Convenience for key seeds and nonces.
    fn random_array<const N: usize>(&self) -> [u8; N] {
        let mut bytes = [0u8; N];
        self.random_bytes(&mut bytes);
        bytes
    }
}
