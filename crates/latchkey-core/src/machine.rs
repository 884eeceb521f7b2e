//! The protocol state machine.
//!
//! Holds the single `ProtocolState` instance for an open vault and
//! refuses any transition the invariant validator rejects. On error the
//! state is left untouched and the error is returned unchanged, so no
//! partial transition is ever observable.
//!
//! # State Machine
//!
//! ```text
//!            ┌──────────────── Rekeying ◄──────────────┐
//!            │ all headers at new epoch    epoch > cur │
//!            ▼                                         │
//! ┌────────────────────────────── Idle ────────────────┴──┐
//! │ veto / elapsed    ▲                  │ role=Authorized │
//! │                   │                  ▼                 │
//! │           RecoveryInitiated ◄────────┘                 │
//! │                                                        │
//! │ integrity failed                      revoke-self      │
//! ▼                                                        ▼
//! Degraded ──────── integrity persists ─────────────► Revoked
//!    └──────────── integrity re-verified ──► Idle
//! ```

use std::{collections::BTreeMap, ops::Add, time::Duration};

use tracing::{debug, error};

use crate::{
    error::ProtocolError,
    recovery::RecoveryWindow,
    state::{ProtocolState, RekeyingContext, StateKind},
    types::{DeviceHeader, DeviceId, DevicePublicKeys, Epoch},
    validator::InvariantValidator,
};

/// Read-only context a transition is validated against.
///
/// Snapshot of the vault's committed view at the instant of the
/// transition; the machine itself stores none of it.
pub struct TransitionCtx<'a> {
    /// Committed epoch at the time of the transition
    pub current_epoch: Epoch,

    /// Active device set (shadow slot included)
    pub active_devices: &'a BTreeMap<DeviceId, DevicePublicKeys>,

    /// Header set the transition is entering with
    pub headers: &'a BTreeMap<DeviceId, DeviceHeader>,
}

/// The single top-level protocol orchestrator state holder.
///
/// Pure and synchronous: time is passed as a parameter, validation is
/// in-memory, and no I/O happens inside a transition. The vault facade
/// wraps this in a mutex and performs I/O between transitions.
#[derive(Debug)]
pub struct ProtocolStateMachine<I> {
    state: ProtocolState<I>,
    veto_tolerance: Duration,
}

impl<I> ProtocolStateMachine<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    /// Create a machine in `Idle` with the given veto drift tolerance.
    pub fn new(veto_tolerance: Duration) -> Self {
        Self { state: ProtocolState::Idle, veto_tolerance }
    }

    /// Current state (with payloads). Internal consumers only; calling
    /// layers receive the coarse [`StateKind`].
    pub fn state(&self) -> &ProtocolState<I> {
        &self.state
    }

    /// Coarse label of the current state.
    pub fn kind(&self) -> StateKind {
        self.state.kind()
    }

    /// Open recovery window, if the machine is in `RecoveryInitiated`.
    pub fn recovery_window(&self) -> Option<&RecoveryWindow<I>> {
        match &self.state {
            ProtocolState::RecoveryInitiated(window) => Some(window),
            _ => None,
        }
    }

    /// Mutable access to the open recovery window, for veto recording.
    pub fn recovery_window_mut(&mut self) -> Option<&mut RecoveryWindow<I>> {
        match &mut self.state {
            ProtocolState::RecoveryInitiated(window) => Some(window),
            _ => None,
        }
    }

    /// In-flight rekeying context, if the machine is in `Rekeying`.
    pub fn rekeying_context(&self) -> Option<&RekeyingContext> {
        match &self.state {
            ProtocolState::Rekeying(context) => Some(context),
            _ => None,
        }
    }

    /// Attempt a validated transition to `target`.
    ///
    /// Consults the validator function matching the (current, target)
    /// pair. On any error the state is untouched and the error is
    /// returned unchanged to the caller.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` if the pair is not in the transition table
    /// - The validator's `InvariantViolation` if its check fails
    pub fn transition(
        &mut self,
        target: ProtocolState<I>,
        ctx: &TransitionCtx<'_>,
        now: I,
    ) -> Result<(), ProtocolError> {
        match (&self.state, &target) {
            // Idle -> Rekeying: the new epoch must move strictly forward.
            (ProtocolState::Idle, ProtocolState::Rekeying(context)) => {
                InvariantValidator::check_epoch_monotonicity(ctx.current_epoch, context.new_epoch)?;
            },

            // Idle -> RecoveryInitiated: recovery role cannot initiate.
            (ProtocolState::Idle, ProtocolState::RecoveryInitiated(window)) => {
                InvariantValidator::check_causal_barrier(window.initiator_role())?;
            },

            // Idle -> Degraded: integrity check failed.
            (ProtocolState::Idle, ProtocolState::Degraded { .. }) => {},

            // Idle -> Revoked: explicit revoke-self instruction.
            (ProtocolState::Idle, ProtocolState::Revoked) => {},

            // Rekeying -> Idle: every active device has a header at the
            // new epoch.
            (ProtocolState::Rekeying(context), ProtocolState::Idle) => {
                InvariantValidator::check_header_completeness(
                    ctx.active_devices,
                    ctx.headers.values(),
                    context.new_epoch,
                )?;
            },

            // RecoveryInitiated -> Idle: either a veto arrived (rejected)
            // or the window elapsed with zero vetoes (committed).
            (ProtocolState::RecoveryInitiated(window), ProtocolState::Idle) => {
                if !window.has_vetoes() {
                    InvariantValidator::check_veto_supremacy(window, now, self.veto_tolerance)?;
                }
            },

            // Degraded -> Revoked: integrity failure persists.
            (ProtocolState::Degraded { .. }, ProtocolState::Revoked) => {},

            // Degraded -> Idle: integrity re-verified against the
            // committed header set.
            (ProtocolState::Degraded { .. }, ProtocolState::Idle) => {
                InvariantValidator::check_header_completeness(
                    ctx.active_devices,
                    ctx.headers.values(),
                    ctx.current_epoch,
                )?;
            },

            (from, to) => {
                return Err(ProtocolError::InvalidTransition {
                    from: from.kind(),
                    to: to.kind(),
                });
            },
        }

        debug!(from = ?self.state.kind(), to = ?target.kind(), "state transition");
        self.state = target;
        Ok(())
    }

    /// Abort an in-flight rekeying whose I/O failed before anything was
    /// committed, restoring `Idle`.
    ///
    /// The committed metadata was never touched (nothing is committed
    /// until the atomic rename succeeds), so the pre-transition view
    /// still holds and the caller can safely retry. Returns false if the
    /// machine was not in `Rekeying`.
    pub fn abort_rekeying(&mut self) -> bool {
        match self.state {
            ProtocolState::Rekeying(_) => {
                debug!("rekeying aborted, restoring idle");
                self.state = ProtocolState::Idle;
                true
            },
            _ => false,
        }
    }

    /// Force the machine into `Degraded`, bypassing the transition table.
    ///
    /// This is the meltdown escape hatch: invariant violations detected
    /// in committed state must halt the vault from whatever state it is
    /// in. `Revoked` is terminal and is never overwritten.
    pub fn force_degraded(&mut self, reason: String) {
        if matches!(self.state, ProtocolState::Revoked) {
            return;
        }
        error!(from = ?self.state.kind(), "forcing degraded state");
        self.state = ProtocolState::Degraded { reason };
    }
}
