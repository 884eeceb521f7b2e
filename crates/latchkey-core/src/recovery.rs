//! Recovery windows and the veto protocol.
//!
//! A "lost all devices" recovery request opens a fixed-length window.
//! During the window (plus a small clock-drift tolerance on both ends)
//! any active device may submit a signed veto; a single recorded veto
//! forces the window's outcome to rejected, regardless of arrival order
//! or how many other signals exist. Only if the window elapses with zero
//! vetoes does the recovery commit.

use std::{collections::BTreeMap, ops::Add, time::Duration};

use ed25519_dalek::{Signature, Verifier};
use tracing::{debug, info};

use crate::{
    env::Environment,
    error::{InvariantViolation, ProtocolError},
    machine::{ProtocolStateMachine, TransitionCtx},
    state::ProtocolState,
    types::{DeviceId, DevicePublicKeys, Role},
    validator::InvariantValidator,
};

/// Length of the recovery veto window.
pub const DEFAULT_RECOVERY_WINDOW: Duration = Duration::from_secs(48 * 60 * 60);

/// Clock drift accepted on both ends of the window, so devices with
/// unsynchronized clocks neither spuriously reject a timely veto nor
/// prematurely commit.
pub const DEFAULT_DRIFT_TOLERANCE: Duration = Duration::from_secs(5 * 60);

/// Domain-separation label for veto signatures (exactly 16 bytes).
const VETO_LABEL: &[u8; 16] = b"latchkey-veto-v1";

/// A veto signal recorded against an open window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VetoMessage<I> {
    /// Device that issued the veto
    pub device_id: DeviceId,

    /// When the veto was recorded locally
    pub received_at: I,

    /// Optional operator-facing reason; never logged
    pub reason: Option<String>,
}

/// An open recovery window.
///
/// Created when a recovery request is accepted; destroyed when the window
/// is committed or rejected. The veto list is append-only.
#[derive(Debug, Clone)]
pub struct RecoveryWindow<I> {
    request_id: u64,
    opened_at: I,
    deadline: I,
    initiator_role: Role,
    vetoes: Vec<VetoMessage<I>>,
}

impl<I> RecoveryWindow<I>
where
    I: Copy + Ord + Add<Duration, Output = I>,
{
    /// Open a window of the given length starting now.
    pub fn open(request_id: u64, initiator_role: Role, now: I, length: Duration) -> Self {
        Self { request_id, opened_at: now, deadline: now + length, initiator_role, vetoes: Vec::new() }
    }

    /// Request identifier this window belongs to.
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    /// When the window opened.
    pub fn opened_at(&self) -> I {
        self.opened_at
    }

    /// When the window closes (before drift tolerance).
    pub fn deadline(&self) -> I {
        self.deadline
    }

    /// Role of the session that opened the window.
    pub fn initiator_role(&self) -> Role {
        self.initiator_role
    }

    /// Recorded vetoes, in arrival order.
    pub fn vetoes(&self) -> &[VetoMessage<I>] {
        &self.vetoes
    }

    /// True once any veto is recorded; the outcome is then forced to
    /// rejected.
    pub fn has_vetoes(&self) -> bool {
        !self.vetoes.is_empty()
    }

    /// Whether a veto arriving `now` is still within the window plus the
    /// drift tolerance.
    pub fn accepts_veto_at(&self, now: I, tolerance: Duration) -> bool {
        now <= self.deadline + tolerance
    }

    /// Append a veto. Append-only; vetoes are never removed.
    ///
    /// Callers outside the manager must have authenticated the veto
    /// first; the manager's `add_veto` is the normal path.
    pub fn record_veto(&mut self, veto: VetoMessage<I>) {
        self.vetoes.push(veto);
    }
}

/// Bytes a device signs to veto a recovery request.
///
/// Domain-separated and bound to both the request and the vetoing device,
/// so a veto cannot be replayed against another window or attributed to
/// another device.
pub fn veto_signing_payload(request_id: u64, device_id: DeviceId) -> [u8; 32] {
    let mut payload = [0u8; 32];
    payload[..16].copy_from_slice(VETO_LABEL);
    payload[16..24].copy_from_slice(&request_id.to_be_bytes());
    payload[24..32].copy_from_slice(&device_id.to_be_bytes());
    payload
}

/// Outcome of a finalize check on a recovery window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The window has not elapsed and no veto is recorded
    Pending,

    /// The window elapsed with zero vetoes; recovery may proceed
    Committed,

    /// A veto forced the window to rejected
    Rejected,
}

/// Tracks the in-flight recovery request and applies the veto protocol.
///
/// All methods operate under the caller's state-machine lock, so a veto
/// and a concurrent finalize are serialized: if the veto is recorded
/// first, the finalize check sees it and the veto wins.
pub struct RecoveryWindowManager<E: Environment> {
    env: E,
    window_length: Duration,
    tolerance: Duration,
}

impl<E: Environment> RecoveryWindowManager<E> {
    /// Create a manager with the given window length and drift tolerance.
    pub fn new(env: E, window_length: Duration, tolerance: Duration) -> Self {
        Self { env, window_length, tolerance }
    }

    /// Open a recovery window.
    ///
    /// # Errors
    ///
    /// - `CausalEntropyBarrier` if the initiator's role is `Recovery`
    /// - `InvalidTransition` if the machine is not idle (including a
    ///   second concurrent recovery request, which is rejected, not
    ///   queued)
    pub fn initiate(
        &self,
        machine: &mut ProtocolStateMachine<E::Instant>,
        ctx: &TransitionCtx<'_>,
        initiator_role: Role,
    ) -> Result<RecoveryWindow<E::Instant>, ProtocolError> {
        let now = self.env.now();
        let request_id = self.env.random_u64();
        let window = RecoveryWindow::open(request_id, initiator_role, now, self.window_length);

        machine.transition(ProtocolState::RecoveryInitiated(window.clone()), ctx, now)?;

        info!(request_id, "recovery window opened");
        Ok(window)
    }

    /// Record a veto and terminate the window.
    ///
    /// This is the only write path that can end a window early. The veto
    /// is authenticated against the issuing device's stored verifying key
    /// before it is recorded; once recorded, the window is marked
    /// rejected and the machine is driven back to idle in the same
    /// operation.
    ///
    /// # Errors
    ///
    /// - `UnknownRecoveryRequest` if no window with this id is open
    /// - `VetoWindowExpired` if `now` is past the deadline plus tolerance
    /// - `InvalidVeto` if the device is not active or the signature fails
    pub fn add_veto(
        &self,
        machine: &mut ProtocolStateMachine<E::Instant>,
        ctx: &TransitionCtx<'_>,
        device_keys: &BTreeMap<DeviceId, DevicePublicKeys>,
        request_id: u64,
        device_id: DeviceId,
        signature: &[u8; 64],
        reason: Option<String>,
    ) -> Result<(), ProtocolError> {
        let now = self.env.now();

        let Some(window) = machine.recovery_window_mut() else {
            return Err(ProtocolError::UnknownRecoveryRequest(request_id));
        };
        if window.request_id() != request_id {
            return Err(ProtocolError::UnknownRecoveryRequest(request_id));
        }

        if !window.accepts_veto_at(now, self.tolerance) {
            return Err(InvariantViolation::VetoWindowExpired.into());
        }

        let Some(keys) = device_keys.get(&device_id) else {
            return Err(ProtocolError::InvalidVeto { reason: "device not in active set" });
        };
        let Some(verifying_key) = keys.verifying_key() else {
            return Err(ProtocolError::InvalidVeto { reason: "stored verifying key invalid" });
        };

        let payload = veto_signing_payload(request_id, device_id);
        let signature = Signature::from_bytes(signature);
        if verifying_key.verify(&payload, &signature).is_err() {
            return Err(ProtocolError::InvalidVeto { reason: "signature verification failed" });
        }

        window.record_veto(VetoMessage { device_id, received_at: now, reason });
        debug!(request_id, device_id, "veto recorded");

        // Rejection is immediate: the window ends in the same operation.
        machine.transition(ProtocolState::Idle, ctx, now)?;
        info!(request_id, "recovery window rejected by veto");
        Ok(())
    }

    /// Apply the veto-supremacy check and finalize if the window is due.
    ///
    /// Called on any access (polling or event). Commits exactly once when
    /// the window has elapsed with zero vetoes; rejects if any veto is
    /// recorded; otherwise reports the window as still pending.
    ///
    /// # Errors
    ///
    /// - `UnknownRecoveryRequest` if no window with this id is open
    pub fn check_and_finalize(
        &self,
        machine: &mut ProtocolStateMachine<E::Instant>,
        ctx: &TransitionCtx<'_>,
        request_id: u64,
    ) -> Result<RecoveryOutcome, ProtocolError> {
        let now = self.env.now();

        let Some(window) = machine.recovery_window() else {
            return Err(ProtocolError::UnknownRecoveryRequest(request_id));
        };
        if window.request_id() != request_id {
            return Err(ProtocolError::UnknownRecoveryRequest(request_id));
        }

        match InvariantValidator::check_veto_supremacy(window, now, self.tolerance) {
            Ok(()) => {
                machine.transition(ProtocolState::Idle, ctx, now)?;
                info!(request_id, "recovery window committed");
                Ok(RecoveryOutcome::Committed)
            },
            Err(InvariantViolation::VetoSupremacy) => {
                machine.transition(ProtocolState::Idle, ctx, now)?;
                info!(request_id, "recovery window rejected");
                Ok(RecoveryOutcome::Rejected)
            },
            Err(InvariantViolation::VetoWindowActive) => Ok(RecoveryOutcome::Pending),
            Err(violation) => Err(violation.into()),
        }
    }

    /// Drift tolerance applied on both ends of the window.
    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn window_at(now: Instant) -> RecoveryWindow<Instant> {
        RecoveryWindow::open(42, Role::Authorized, now, DEFAULT_RECOVERY_WINDOW)
    }

    #[test]
    fn deadline_is_window_length_after_open() {
        let t0 = Instant::now();
        let window = window_at(t0);

        assert_eq!(window.deadline(), t0 + DEFAULT_RECOVERY_WINDOW);
        assert_eq!(window.request_id(), 42);
        assert_eq!(window.initiator_role(), Role::Authorized);
        assert!(!window.has_vetoes());
    }

    #[test]
    fn veto_accepted_within_window_and_tolerance() {
        let t0 = Instant::now();
        let window = window_at(t0);

        // Mid-window
        assert!(window.accepts_veto_at(t0 + Duration::from_secs(10 * 3600), DEFAULT_DRIFT_TOLERANCE));

        // Just inside the tolerance past the deadline
        let late = t0 + DEFAULT_RECOVERY_WINDOW + Duration::from_secs(4 * 60);
        assert!(window.accepts_veto_at(late, DEFAULT_DRIFT_TOLERANCE));

        // Past deadline plus tolerance
        let too_late = t0 + DEFAULT_RECOVERY_WINDOW + Duration::from_secs(6 * 60);
        assert!(!window.accepts_veto_at(too_late, DEFAULT_DRIFT_TOLERANCE));
    }

    #[test]
    fn veto_payload_is_domain_separated() {
        let a = veto_signing_payload(1, 100);
        let b = veto_signing_payload(2, 100);
        let c = veto_signing_payload(1, 200);

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(&a[..16], VETO_LABEL);
    }
}
