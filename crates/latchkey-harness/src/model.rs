//! Reference model for model-based testing.
//!
//! [`ModelVault`] is a deliberately naive re-statement of the protocol's
//! observable behavior: plain fields, no crypto, no storage. Tests drive
//! the same operation sequence through the model and the real vault and
//! assert the observables stay equal. Divergence means one of the two is
//! wrong, and the model is small enough to audit by eye.

use std::{collections::BTreeSet, time::Duration};

use arbitrary::Arbitrary;
use ed25519_dalek::{Signer, SigningKey};

use latchkey_core::{
    DeviceHeader, DeviceId, DevicePublicKeys, Environment, Epoch, RecoveryOutcome,
    veto_signing_payload,
};
use latchkey_crypto::{DecapsulationKey, VaultKey, keypair_from_entropy, unwrap_vault_key};

/// A simulated device: holds the private halves of the capabilities a
/// real device would keep in its secure enclave.
pub struct SimDevice {
    device_id: DeviceId,
    kem_seed: [u8; 32],
    signing_key: SigningKey,
}

impl SimDevice {
    /// Generate a device with entropy from the environment.
    pub fn generate<E: Environment>(device_id: DeviceId, env: &E) -> Self {
        Self {
            device_id,
            kem_seed: env.random_array(),
            signing_key: SigningKey::from_bytes(&env.random_array()),
        }
    }

    /// This device's identifier.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    /// The public capabilities to register with the vault.
    pub fn public_keys(&self) -> DevicePublicKeys {
        let (_, public) = keypair_from_entropy(self.kem_seed);
        DevicePublicKeys {
            encapsulation_key: *public.as_bytes(),
            verifying_key: self.signing_key.verifying_key().to_bytes(),
        }
    }

    /// Sign a veto for the given recovery request.
    pub fn sign_veto(&self, request_id: u64) -> [u8; 64] {
        let payload = veto_signing_payload(request_id, self.device_id);
        self.signing_key.sign(&payload).to_bytes()
    }

    /// Unwrap this device's header, recovering the vault key.
    ///
    /// # Errors
    ///
    /// Propagates the crypto error if the header was not wrapped for this
    /// device (the property tests assert exactly that for revoked ones).
    pub fn unwrap_header(
        &self,
        header: &DeviceHeader,
    ) -> Result<VaultKey, latchkey_crypto::CryptoError> {
        let (private, _): (DecapsulationKey, _) = keypair_from_entropy(self.kem_seed);
        unwrap_vault_key(&private, &header.wrapped_key)
    }
}

/// One step of a model-based test run.
///
/// `slot` indexes into the test's device pool modulo its size, so any
/// byte sequence from the fuzzer or proptest is a valid program.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Register the device in the given pool slot
    Register {
        /// Pool index
        slot: u8,
    },

    /// Revoke the device in the given pool slot
    Revoke {
        /// Pool index
        slot: u8,
    },

    /// Open a recovery window (authorized role)
    InitiateRecovery,

    /// Submit a veto from the device in the given pool slot
    SubmitVeto {
        /// Pool index
        slot: u8,
    },

    /// Advance the simulated clock
    AdvanceHours {
        /// Hours to advance
        hours: u8,
    },

    /// Poll the open recovery window
    FinalizeRecovery,
}

/// Model state: the protocol's observable mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    /// No transition in flight
    Idle,
    /// A recovery window is open until the stored deadline
    RecoveryOpen {
        /// Elapsed-time deadline of the window
        deadline: Duration,
    },
}

/// The reference model.
#[derive(Debug, Clone)]
pub struct ModelVault {
    /// Current epoch
    pub epoch: Epoch,
    /// Active device identifiers (shadow slot included)
    pub devices: BTreeSet<DeviceId>,
    /// Observable protocol mode
    pub state: ModelState,
    /// Elapsed simulated time
    pub now: Duration,
    window_length: Duration,
    tolerance: Duration,
}

impl ModelVault {
    /// Create a model with the genesis device set.
    pub fn new(
        initial_devices: BTreeSet<DeviceId>,
        window_length: Duration,
        tolerance: Duration,
    ) -> Self {
        Self {
            epoch: 0,
            devices: initial_devices,
            state: ModelState::Idle,
            now: Duration::ZERO,
            window_length,
            tolerance,
        }
    }

    /// Advance model time.
    pub fn advance(&mut self, duration: Duration) {
        self.now += duration;
    }

    /// Register a device. Returns whether the model accepts.
    pub fn register(&mut self, device_id: DeviceId) -> bool {
        if self.state != ModelState::Idle || self.devices.contains(&device_id) {
            return false;
        }
        self.devices.insert(device_id);
        true
    }

    /// Revoke a device, advancing the epoch. Returns whether the model
    /// accepts.
    pub fn revoke(&mut self, device_id: DeviceId) -> bool {
        if self.state != ModelState::Idle || !self.devices.contains(&device_id) {
            return false;
        }
        self.devices.remove(&device_id);
        self.epoch += 1;
        true
    }

    /// Open a recovery window. Returns whether the model accepts.
    pub fn initiate_recovery(&mut self) -> bool {
        if self.state != ModelState::Idle {
            return false;
        }
        self.state = ModelState::RecoveryOpen { deadline: self.now + self.window_length };
        true
    }

    /// Veto the open window. Returns whether the model accepts.
    pub fn veto(&mut self, device_id: DeviceId) -> bool {
        let ModelState::RecoveryOpen { deadline } = self.state else {
            return false;
        };
        if !self.devices.contains(&device_id) {
            return false;
        }
        if self.now > deadline + self.tolerance {
            return false;
        }
        self.state = ModelState::Idle;
        true
    }

    /// Poll the open window.
    pub fn finalize(&mut self) -> Option<RecoveryOutcome> {
        let ModelState::RecoveryOpen { deadline } = self.state else {
            return None;
        };
        if self.now + self.tolerance >= deadline {
            self.state = ModelState::Idle;
            Some(RecoveryOutcome::Committed)
        } else {
            Some(RecoveryOutcome::Pending)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(48 * 3600);
    const TOLERANCE: Duration = Duration::from_secs(300);

    fn model() -> ModelVault {
        ModelVault::new([1u64, 2].into_iter().collect(), WINDOW, TOLERANCE)
    }

    #[test]
    fn revoke_advances_epoch() {
        let mut model = model();
        assert!(model.revoke(2));
        assert_eq!(model.epoch, 1);
        assert!(!model.revoke(2)); // already gone
        assert_eq!(model.epoch, 1);
    }

    #[test]
    fn second_recovery_is_rejected() {
        let mut model = model();
        assert!(model.initiate_recovery());
        assert!(!model.initiate_recovery());
    }

    #[test]
    fn veto_within_tolerance_rejects_window() {
        let mut model = model();
        model.initiate_recovery();
        model.advance(WINDOW + Duration::from_secs(200));

        assert!(model.veto(1));
        assert_eq!(model.state, ModelState::Idle);
    }

    #[test]
    fn late_veto_is_refused() {
        let mut model = model();
        model.initiate_recovery();
        model.advance(WINDOW + TOLERANCE + Duration::from_secs(1));

        assert!(!model.veto(1));
    }

    #[test]
    fn finalize_commits_after_deadline() {
        let mut model = model();
        model.initiate_recovery();

        assert_eq!(model.finalize(), Some(RecoveryOutcome::Pending));

        model.advance(WINDOW + Duration::from_secs(60));
        assert_eq!(model.finalize(), Some(RecoveryOutcome::Committed));
        assert_eq!(model.finalize(), None); // exactly once
    }
}
