//! Standard invariant checks.
//!
//! These capture behavioral properties that must always hold, verifying
//! WHAT must be true rather than specific test scenarios.

use latchkey_crypto::WRAPPED_KEY_SIZE;

use super::{Invariant, InvariantResult, VaultSnapshot, Violation};

/// Observed epochs must never decrease.
///
/// A decreasing epoch indicates a protocol violation or state corruption:
/// a revoked device could decrypt again.
pub struct EpochMonotonicity;

impl Invariant for EpochMonotonicity {
    fn name(&self) -> &'static str {
        "epoch-monotonicity"
    }

    fn check(&self, snapshot: &VaultSnapshot) -> InvariantResult {
        for window in snapshot.epoch_history.windows(2) {
            if window[1] < window[0] {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("epoch decreased {} -> {}", window[0], window[1]),
                });
            }
        }
        Ok(())
    }
}

/// Every active device has exactly one header at the current epoch, and
/// no header exists for a device outside the active set.
pub struct HeaderCompleteness;

impl Invariant for HeaderCompleteness {
    fn name(&self) -> &'static str {
        "header-completeness"
    }

    fn check(&self, snapshot: &VaultSnapshot) -> InvariantResult {
        for &device_id in &snapshot.active_devices {
            match snapshot.header_epochs.get(&device_id) {
                None => {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!("device {device_id} has no header"),
                    });
                },
                Some(&epoch) if epoch != snapshot.current_epoch => {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "device {device_id} header at epoch {epoch}, current is {}",
                            snapshot.current_epoch
                        ),
                    });
                },
                Some(_) => {},
            }
        }

        for &device_id in snapshot.header_epochs.keys() {
            if !snapshot.active_devices.contains(&device_id) {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!("stray header for inactive device {device_id}"),
                });
            }
        }

        Ok(())
    }
}

/// Every wrapped key blob has the canonical fixed size.
///
/// Uniform size is what keeps the physical-recovery slot
/// indistinguishable from ordinary devices; a single differently-sized
/// blob would single it out to any observer of the stored document.
pub struct UniformHeaderSize;

impl Invariant for UniformHeaderSize {
    fn name(&self) -> &'static str {
        "uniform-header-size"
    }

    fn check(&self, snapshot: &VaultSnapshot) -> InvariantResult {
        for (&device_id, &size) in &snapshot.header_sizes {
            if size != WRAPPED_KEY_SIZE {
                return Err(Violation {
                    invariant: self.name(),
                    message: format!(
                        "device {device_id} blob is {size} bytes, expected {WRAPPED_KEY_SIZE}"
                    ),
                });
            }
        }
        Ok(())
    }
}

/// At most one recovery window is open at any time.
pub struct SingleRecoveryWindow;

impl Invariant for SingleRecoveryWindow {
    fn name(&self) -> &'static str {
        "single-recovery-window"
    }

    fn check(&self, snapshot: &VaultSnapshot) -> InvariantResult {
        if snapshot.open_window_count > 1 {
            return Err(Violation {
                invariant: self.name(),
                message: format!("{} windows open", snapshot.open_window_count),
            });
        }
        if snapshot.recovery_open && snapshot.open_window_count == 0 {
            return Err(Violation {
                invariant: self.name(),
                message: "state says recovery open but no window tracked".to_string(),
            });
        }
        Ok(())
    }
}
