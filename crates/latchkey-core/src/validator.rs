//! The invariant-enforcement layer.
//!
//! Four pure, side-effect-free checks consumed by every other component
//! before it commits a transition. Validation failures for an *attempted*
//! operation reject it with state untouched; the same violations detected
//! in committed state mean corruption and trigger the meltdown sequence
//! (see `InvariantViolation::is_state_corruption`).

use std::{collections::BTreeMap, ops::Add, time::Duration};

use crate::{
    error::InvariantViolation,
    recovery::RecoveryWindow,
    types::{DeviceHeader, DeviceId, DevicePublicKeys, Epoch, MAX_EPOCH, Role},
};

/// Pure checks implementing the four global invariants.
///
/// Stateless: every check receives everything it needs as arguments and
/// performs no I/O, so checks complete in-memory without blocking.
pub struct InvariantValidator;

impl InvariantValidator {
    /// Invariant #1: every accepted epoch is strictly greater than the
    /// previous; no path lowers the current epoch.
    pub fn check_epoch_monotonicity(
        current: Epoch,
        attempted: Epoch,
    ) -> Result<(), InvariantViolation> {
        debug_assert!(current <= MAX_EPOCH);

        if attempted <= current {
            return Err(InvariantViolation::EpochRegression { current, attempted });
        }
        Ok(())
    }

    /// Invariant #2: every member of the active-device set has exactly
    /// one valid header for the expected epoch; no stray headers exist
    /// for devices outside the set.
    pub fn check_header_completeness<'a, H>(
        active_devices: &BTreeMap<DeviceId, DevicePublicKeys>,
        headers: H,
        expected_epoch: Epoch,
    ) -> Result<(), InvariantViolation>
    where
        H: IntoIterator<Item = &'a DeviceHeader>,
    {
        let mut counts: BTreeMap<DeviceId, usize> = BTreeMap::new();

        for header in headers {
            if !active_devices.contains_key(&header.device_id) {
                return Err(InvariantViolation::StrayHeader(header.device_id));
            }
            if header.epoch != expected_epoch {
                return Err(InvariantViolation::StaleHeader {
                    device_id: header.device_id,
                    header_epoch: header.epoch,
                    expected_epoch,
                });
            }
            *counts.entry(header.device_id).or_insert(0) += 1;
        }

        for (&device_id, _) in active_devices {
            match counts.get(&device_id) {
                None => return Err(InvariantViolation::MissingHeader(device_id)),
                Some(1) => {},
                Some(&count) => {
                    return Err(InvariantViolation::MultipleHeaders { device_id, count });
                },
            }
        }

        Ok(())
    }

    /// Invariant #3: a `Recovery` session can never invoke a
    /// root-authority-changing operation.
    pub fn check_causal_barrier(role: Role) -> Result<(), InvariantViolation> {
        match role {
            Role::Authorized => Ok(()),
            Role::Recovery => Err(InvariantViolation::CausalEntropyBarrier),
        }
    }

    /// Invariant #4: a recorded veto forces the outcome to rejected.
    ///
    /// Returns `Ok(())` (commit allowed) only when the window has elapsed
    /// (minus drift tolerance) with zero vetoes. Returns `VetoSupremacy`
    /// whenever any veto is present, regardless of time, and
    /// `VetoWindowActive` while neither condition holds.
    pub fn check_veto_supremacy<I>(
        window: &RecoveryWindow<I>,
        now: I,
        tolerance: Duration,
    ) -> Result<(), InvariantViolation>
    where
        I: Copy + Ord + Add<Duration, Output = I>,
    {
        if window.has_vetoes() {
            return Err(InvariantViolation::VetoSupremacy);
        }

        // `now >= deadline - tolerance`, rewritten to avoid requiring
        // subtraction on the instant type.
        if now + tolerance >= window.deadline() {
            return Ok(());
        }

        Err(InvariantViolation::VetoWindowActive)
    }
}
