//! Chaotic storage wrapper for fault injection testing.
//!
//! Storage wrapper that randomly fails operations to test error handling
//! and crash recovery. Used by chaos tests to verify that a failed shadow
//! write or commit never corrupts committed metadata.

use std::sync::{Arc, Mutex};

use latchkey_core::{ShadowHandle, StorageError, VaultMetadata, VaultStorage};

/// Chaotic storage wrapper that randomly injects failures.
///
/// Delegates to an underlying storage implementation but fails operations
/// based on a configured failure rate, using a seeded deterministic RNG
/// so chaos runs are reproducible. `read_committed` is never failed: the
/// invariants under test concern the write path, and a readable committed
/// document is what the assertions inspect.
#[derive(Clone)]
pub struct ChaoticVaultStorage<S: VaultStorage> {
    inner: S,
    /// Failure rate (0.0 = never fail, 1.0 = always fail)
    failure_rate: f64,
    /// RNG state for deterministic chaos
    rng: Arc<Mutex<ChaoticRng>>,
}

/// Simple deterministic RNG for chaos injection.
///
/// Linear congruential generator: fast and reproducible with the same
/// seed.
struct ChaoticRng {
    state: u64,
}

impl ChaoticRng {
    fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    /// Next value in [0.0, 1.0)
    fn next(&mut self) -> f64 {
        // LCG constants from Numerical Recipes
        const A: u64 = 1_664_525;
        const C: u64 = 1_013_904_223;
        const M: u64 = 1u64 << 32;

        self.state = (A.wrapping_mul(self.state).wrapping_add(C)) % M;
        (self.state as f64) / (M as f64)
    }

    fn should_fail(&mut self, failure_rate: f64) -> bool {
        self.next() < failure_rate
    }
}

impl<S: VaultStorage> ChaoticVaultStorage<S> {
    /// Create a chaotic wrapper with a fixed default seed.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0].
    pub fn new(inner: S, failure_rate: f64) -> Self {
        Self::with_seed(inner, failure_rate, 0x1234_5678_9ABC_DEF0)
    }

    /// Create with an explicit seed for reproducible chaos.
    ///
    /// # Panics
    ///
    /// Panics if `failure_rate` is not in [0.0, 1.0].
    pub fn with_seed(inner: S, failure_rate: f64, seed: u64) -> Self {
        assert!(
            (0.0..=1.0).contains(&failure_rate),
            "failure_rate must be between 0.0 and 1.0, got {failure_rate}"
        );

        Self { inner, failure_rate, rng: Arc::new(Mutex::new(ChaoticRng::new(seed))) }
    }

    /// Underlying storage (for checking invariants after chaos).
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// # Panics
    ///
    /// Panics if the RNG mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    fn should_fail(&self) -> bool {
        self.rng.lock().expect("chaos rng mutex poisoned").should_fail(self.failure_rate)
    }
}

impl<S: VaultStorage> VaultStorage for ChaoticVaultStorage<S> {
    fn shadow_write(&self, metadata: &VaultMetadata) -> Result<ShadowHandle, StorageError> {
        if self.should_fail() {
            return Err(StorageError::Io("injected shadow-write fault".to_string()));
        }
        self.inner.shadow_write(metadata)
    }

    fn atomic_commit(&self, handle: ShadowHandle) -> Result<(), StorageError> {
        if self.should_fail() {
            return Err(StorageError::Io("injected commit fault".to_string()));
        }
        self.inner.atomic_commit(handle)
    }

    fn discard_shadow(&self, handle: ShadowHandle) -> Result<(), StorageError> {
        if self.should_fail() {
            return Err(StorageError::Io("injected discard fault".to_string()));
        }
        self.inner.discard_shadow(handle)
    }

    fn read_committed(&self) -> Result<Option<VaultMetadata>, StorageError> {
        self.inner.read_committed()
    }

    fn pending_shadow(&self) -> Result<Option<(ShadowHandle, VaultMetadata)>, StorageError> {
        if self.should_fail() {
            return Err(StorageError::Io("injected pending-shadow fault".to_string()));
        }
        self.inner.pending_shadow()
    }
}
