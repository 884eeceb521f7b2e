//! Protocol state representation.
//!
//! `ProtocolState` is a sum type with per-variant payloads: `Rekeying`
//! carries its progress context and `RecoveryInitiated` carries the open
//! window. Invalid combinations (a rekeying context without a rekeying
//! state, a window without an open recovery) are unrepresentable.

use std::collections::BTreeSet;

use crate::{
    recovery::RecoveryWindow,
    types::{DeviceId, Epoch},
};

/// Coarse state label, safe to expose to calling layers.
///
/// Carries no payloads, timestamps, or veto detail; end users see only
/// secure/degraded/revoked-level information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// No transition in flight
    Idle,
    /// An epoch upgrade is in progress
    Rekeying,
    /// A recovery window is open
    RecoveryInitiated,
    /// Read-only safe mode after an integrity failure
    Degraded,
    /// Terminal: this session accepts no further key operations
    Revoked,
}

/// Progress context for an in-flight epoch upgrade.
///
/// Created on entering `Rekeying`, consumed and discarded on the return
/// to `Idle` (or superseded by crash recovery on restart).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RekeyingContext {
    /// Epoch being upgraded from
    pub old_epoch: Epoch,

    /// Epoch being upgraded to
    pub new_epoch: Epoch,

    /// Devices still awaiting a header at the new epoch
    pub pending: BTreeSet<DeviceId>,

    /// Devices already re-wrapped at the new epoch
    pub completed: BTreeSet<DeviceId>,
}

impl RekeyingContext {
    /// Start a context covering the given device set.
    pub fn new(old_epoch: Epoch, new_epoch: Epoch, devices: BTreeSet<DeviceId>) -> Self {
        Self { old_epoch, new_epoch, pending: devices, completed: BTreeSet::new() }
    }

    /// Mark one device as re-wrapped.
    pub fn complete(&mut self, device_id: DeviceId) {
        if self.pending.remove(&device_id) {
            self.completed.insert(device_id);
        }
    }

    /// True when every device has a header at the new epoch.
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

/// The protocol state of one open vault.
///
/// Exactly one instance exists per vault, owned by the state machine and
/// mutated only by validated transitions.
#[derive(Debug, Clone)]
pub enum ProtocolState<I> {
    /// No transition in flight; all operations available
    Idle,

    /// Epoch upgrade in progress
    Rekeying(RekeyingContext),

    /// "Lost all devices" recovery window open
    RecoveryInitiated(RecoveryWindow<I>),

    /// Read-only safe mode entered after an integrity failure
    Degraded {
        /// Sanitized description of what failed
        reason: String,
    },

    /// Terminal state; no further key operations accepted
    Revoked,
}

impl<I> ProtocolState<I> {
    /// Coarse label for this state.
    pub fn kind(&self) -> StateKind {
        match self {
            Self::Idle => StateKind::Idle,
            Self::Rekeying(_) => StateKind::Rekeying,
            Self::RecoveryInitiated(_) => StateKind::RecoveryInitiated,
            Self::Degraded { .. } => StateKind::Degraded,
            Self::Revoked => StateKind::Revoked,
        }
    }
}
