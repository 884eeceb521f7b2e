//! Production environment: monotonic clock and OS entropy.

use std::time::Instant;

use rand::RngCore;

use latchkey_core::Environment;

/// The production [`Environment`].
///
/// `now` is the system monotonic clock; `random_bytes` draws from the
/// operating system's CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create the system environment.
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        rand::rngs::OsRng.fill_bytes(buffer);
    }
}
