//! Error types for the Latchkey protocol core.
//!
//! Two layers with different handling policies:
//!
//! - [`InvariantViolation`]: one of the four global invariants (or a
//!   derived header-integrity condition) does not hold. When detected in
//!   committed state these are never retried or locally corrected; the
//!   vault escalates to the meltdown sequence. When returned for an
//!   *attempted* operation they simply reject it with state untouched.
//! - [`ProtocolError`]: ordinary operational failures (I/O, bad
//!   arguments, transitions out of order). Retryable by the caller; the
//!   state machine is always left at its pre-transition state.

use thiserror::Error;

use latchkey_crypto::CryptoError;

use crate::{
    state::StateKind,
    storage::StorageError,
    transport::TransportError,
    types::{DeviceId, Epoch},
};

/// A violation of one of the protocol's global invariants.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    /// Attempted epoch is not strictly greater than the current epoch
    #[error("epoch regression: current {current}, attempted {attempted}")]
    EpochRegression {
        /// Epoch the vault currently observes
        current: Epoch,
        /// Epoch the operation tried to move to
        attempted: Epoch,
    },

    /// An active device has no header for the current epoch
    #[error("missing header for device {0}")]
    MissingHeader(DeviceId),

    /// An active device has more than one header
    #[error("device {device_id} has {count} headers")]
    MultipleHeaders {
        /// Device with duplicate headers
        device_id: DeviceId,
        /// Number of headers found
        count: usize,
    },

    /// A header exists but is pinned to the wrong epoch
    #[error("stale header for device {device_id}: header epoch {header_epoch}, expected {expected_epoch}")]
    StaleHeader {
        /// Device whose header is stale
        device_id: DeviceId,
        /// Epoch recorded in the header
        header_epoch: Epoch,
        /// Epoch the header set is supposed to be at
        expected_epoch: Epoch,
    },

    /// A header exists for a device that is not in the active set
    #[error("stray header for inactive device {0}")]
    StrayHeader(DeviceId),

    /// A recovery-role session attempted a root-authority operation
    #[error("causal entropy barrier: recovery role cannot change root authority")]
    CausalEntropyBarrier,

    /// A veto is recorded for the window; the outcome is forced to rejected
    #[error("veto supremacy: window has at least one recorded veto")]
    VetoSupremacy,

    /// The veto window has not yet elapsed; commit is not allowed
    #[error("veto window still active")]
    VetoWindowActive,

    /// A veto arrived after the window (plus drift tolerance) closed
    #[error("veto window expired")]
    VetoWindowExpired,
}

impl InvariantViolation {
    /// Returns true if this violation, found in *committed* state, means
    /// the persisted vault is corrupt and the meltdown sequence must run.
    ///
    /// Window-lifecycle signals (`VetoSupremacy`, `VetoWindowActive`,
    /// `VetoWindowExpired`) and rejected attempts (`CausalEntropyBarrier`)
    /// describe refused operations, not corruption.
    pub fn is_state_corruption(&self) -> bool {
        matches!(
            self,
            Self::EpochRegression { .. }
                | Self::MissingHeader(_)
                | Self::MultipleHeaders { .. }
                | Self::StaleHeader { .. }
                | Self::StrayHeader(_)
        )
    }
}

/// Errors returned by protocol operations.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// The requested state transition is not in the transition table
    #[error("invalid transition: cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        /// State the machine was in
        from: StateKind,
        /// State the caller requested
        to: StateKind,
    },

    /// A global invariant rejected the operation
    #[error("invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),

    /// Writing the shadow copy of new metadata failed
    #[error("shadow write failed: {0}")]
    ShadowWriteFailed(StorageError),

    /// The atomic rename/replace of committed metadata failed
    #[error("atomic commit failed: {0}")]
    AtomicCommitFailed(StorageError),

    /// Re-wrapping the vault key for a device failed; the batch was
    /// rolled back and no device moved to the new epoch
    #[error("header update failed for device {device_id}: {source}")]
    HeaderUpdateFailed {
        /// Device whose re-wrap failed
        device_id: DeviceId,
        /// Underlying cryptographic failure
        source: CryptoError,
    },

    /// The vault key is not present in memory (no unlocked session)
    #[error("vault is locked")]
    VaultLocked,

    /// No committed metadata exists at the storage location
    #[error("no committed vault metadata found")]
    VaultNotFound,

    /// The session's vault is in the terminal revoked state
    #[error("vault is revoked")]
    VaultRevoked,

    /// The supplied credential failed to unwrap the vault key
    #[error("credential rejected")]
    CredentialRejected,

    /// No active device with this identity
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),

    /// A device with this identity is already registered
    #[error("device {0} is already registered")]
    DuplicateDevice(DeviceId),

    /// No open recovery window with this request identifier
    #[error("unknown recovery request {0}")]
    UnknownRecoveryRequest(u64),

    /// The veto could not be authenticated
    #[error("veto rejected: {reason}")]
    InvalidVeto {
        /// Why the veto was refused
        reason: &'static str,
    },

    /// Pass-through storage failure outside the two-phase commit
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Pass-through cryptographic failure
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Pass-through transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

impl ProtocolError {
    /// Returns true if this error is transient and the same call may
    /// succeed on retry.
    ///
    /// Only I/O-backed failures are transient; invariant violations and
    /// argument errors never are.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ShadowWriteFailed(_) | Self::AtomicCommitFailed(_) | Self::Storage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_classification() {
        assert!(InvariantViolation::EpochRegression { current: 5, attempted: 4 }
            .is_state_corruption());
        assert!(InvariantViolation::MissingHeader(7).is_state_corruption());
        assert!(InvariantViolation::MultipleHeaders { device_id: 7, count: 2 }
            .is_state_corruption());

        assert!(!InvariantViolation::CausalEntropyBarrier.is_state_corruption());
        assert!(!InvariantViolation::VetoSupremacy.is_state_corruption());
        assert!(!InvariantViolation::VetoWindowActive.is_state_corruption());
        assert!(!InvariantViolation::VetoWindowExpired.is_state_corruption());
    }

    #[test]
    fn io_failures_are_transient() {
        let err = ProtocolError::ShadowWriteFailed(StorageError::Io("disk full".to_string()));
        assert!(err.is_transient());

        let err = ProtocolError::Invariant(InvariantViolation::VetoSupremacy);
        assert!(!err.is_transient());

        let err = ProtocolError::VaultLocked;
        assert!(!err.is_transient());
    }
}
