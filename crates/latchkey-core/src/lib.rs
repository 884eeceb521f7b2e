//! Latchkey protocol core.
//!
//! Manages the cryptographic key lifecycle of a multi-device,
//! end-to-end-encrypted vault: issuing and revoking per-device decryption
//! capability, rotating the data-encryption key forward in time so a
//! revoked device can never decrypt future data, and gating the "lost all
//! devices" recovery path behind a multi-day veto window any surviving
//! device can reject.
//!
//! # Architecture
//!
//! - [`validator::InvariantValidator`] — pure checks for the four global
//!   invariants, consumed before every committed transition
//! - [`headers::DeviceHeaderStore`] — the current epoch's map from device
//!   identity to its wrapped copy of the vault key
//! - [`upgrade::EpochUpgradeCoordinator`] — new-epoch generation,
//!   re-wrapping for every active device, and the crash-consistent
//!   two-phase commit
//! - [`recovery::RecoveryWindowManager`] — the in-flight recovery request,
//!   its fixed-length veto window, and incoming veto signals
//! - [`machine::ProtocolStateMachine`] — the single top-level state
//!   holder, refusing any transition the validator rejects
//! - [`vault::Vault`] — the dependency-injected per-vault context tying
//!   the above together under the concurrency model
//!
//! Storage, transport, and the cryptographic primitives are collaborators
//! behind traits ([`storage::VaultStorage`], [`transport::HeaderBroadcast`],
//! and the `latchkey-crypto` crate).

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod env;
pub mod error;
pub mod headers;
pub mod machine;
pub mod recovery;
pub mod state;
pub mod storage;
pub mod transport;
pub mod types;
pub mod upgrade;
pub mod validator;
pub mod vault;

pub use env::Environment;
pub use error::{InvariantViolation, ProtocolError};
pub use headers::DeviceHeaderStore;
pub use machine::{ProtocolStateMachine, TransitionCtx};
pub use recovery::{
    DEFAULT_DRIFT_TOLERANCE, DEFAULT_RECOVERY_WINDOW, RecoveryOutcome, RecoveryWindow,
    RecoveryWindowManager, VetoMessage, veto_signing_payload,
};
pub use state::{ProtocolState, RekeyingContext, StateKind};
pub use storage::{ShadowHandle, StorageError, VaultStorage};
pub use transport::{HeaderBroadcast, NullBroadcast, TransportError};
pub use types::{
    DeviceHeader, DeviceId, DevicePublicKeys, Epoch, MAX_EPOCH, Role, SessionHandle,
    VaultMetadata,
};
pub use upgrade::EpochUpgradeCoordinator;
pub use validator::InvariantValidator;
pub use vault::{Credential, StateObserver, Vault, VaultConfig};
