//! Core data model: epochs, devices, headers, and persisted metadata.

use std::collections::BTreeMap;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use latchkey_crypto::{EncapsulationKey, WrappedKey};

/// Monotonically increasing version of the data-encryption key.
pub type Epoch = u64;

/// Opaque device identifier.
pub type DeviceId = u64;

/// Upper guard for epoch values; leaves headroom for the `+1` in every
/// upgrade without overflow.
pub const MAX_EPOCH: Epoch = u64::MAX - 1;

/// Role assigned to a session at authentication time.
///
/// Fixed for the lifetime of the session. `Recovery` grants decrypt
/// capability only; the causal entropy barrier blocks it from every
/// root-authority-changing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Full device session unlocked with the root credential
    Authorized,
    /// Session unlocked through the physical-recovery path
    Recovery,
}

/// A device's public capabilities, persisted in the vault metadata.
///
/// The encapsulation key receives wrapped vault keys; the verifying key
/// authenticates the device's veto signals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePublicKeys {
    /// X25519 public key the vault key is wrapped to
    pub encapsulation_key: [u8; 32],

    /// Ed25519 public key veto signatures are verified against
    pub verifying_key: [u8; 32],
}

impl DevicePublicKeys {
    /// Typed encapsulation key.
    pub fn encapsulation_key(&self) -> EncapsulationKey {
        EncapsulationKey::from_bytes(self.encapsulation_key)
    }

    /// Typed Ed25519 verifying key. `None` if the stored bytes are not a
    /// valid curve point.
    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        VerifyingKey::from_bytes(&self.verifying_key).ok()
    }
}

/// One device's wrapped copy of the vault key at one epoch.
///
/// Created when a device is registered and re-created for every active
/// device whenever the epoch advances. Omitted from the new header set
/// when the device is revoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHeader {
    /// Device this header is addressed to
    pub device_id: DeviceId,

    /// Epoch of the key wrapped inside
    pub epoch: Epoch,

    /// The vault key, wrapped to the device's encapsulation key.
    /// Always exactly `WRAPPED_KEY_SIZE` bytes.
    pub wrapped_key: WrappedKey,
}

/// The single persisted vault document.
///
/// Owned by the storage collaborator; the protocol core reads and writes
/// it only through the shadow-write/atomic-rename contract, so readers
/// never observe a partially-updated document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultMetadata {
    /// Highest committed epoch
    pub current_epoch: Epoch,

    /// One header per active device (the shadow slot included), all at
    /// `current_epoch`
    pub headers: BTreeMap<DeviceId, DeviceHeader>,

    /// Public capabilities of every active device
    pub device_keys: BTreeMap<DeviceId, DevicePublicKeys>,

    /// X25519 public key of the current root authority
    pub root_encapsulation_key: [u8; 32],

    /// The vault key wrapped to the root authority
    pub wrapped_root_key: WrappedKey,
}

impl VaultMetadata {
    /// Check whether a device is in the active set.
    pub fn is_active(&self, device_id: DeviceId) -> bool {
        self.device_keys.contains_key(&device_id)
    }

    /// Number of active devices (shadow slot included).
    pub fn device_count(&self) -> usize {
        self.device_keys.len()
    }
}

/// Opaque handle to an unlocked session.
///
/// Carries no key material; the role is fixed at unlock time and
/// consulted by the causal-barrier check on root-authority operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionHandle {
    session_id: u64,
    role: Role,
    epoch_at_unlock: Epoch,
}

impl SessionHandle {
    /// Create a session handle. Called only by the vault's unlock path.
    pub(crate) fn new(session_id: u64, role: Role, epoch_at_unlock: Epoch) -> Self {
        Self { session_id, role, epoch_at_unlock }
    }

    /// Session identifier.
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Role fixed at authentication time.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Epoch observed when the session was opened.
    pub fn epoch_at_unlock(&self) -> Epoch {
        self.epoch_at_unlock
    }
}
