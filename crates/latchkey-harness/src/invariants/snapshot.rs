//! Observable-state snapshots for invariant checking.

use std::collections::{BTreeMap, BTreeSet};

use latchkey_core::{
    DeviceId, Environment, Epoch, HeaderBroadcast, StateKind, Vault, VaultStorage,
};

/// What an observer can see of a vault at one instant, plus the epoch
/// history the observer has accumulated across the run.
#[derive(Debug, Clone)]
pub struct VaultSnapshot {
    /// Coarse protocol state
    pub state: StateKind,

    /// Committed epoch at capture time
    pub current_epoch: Epoch,

    /// Every epoch observed so far, in observation order
    pub epoch_history: Vec<Epoch>,

    /// Active device identifiers (shadow slot included)
    pub active_devices: BTreeSet<DeviceId>,

    /// Epoch recorded in each device's header
    pub header_epochs: BTreeMap<DeviceId, Epoch>,

    /// Size in bytes of each device's wrapped key blob
    pub header_sizes: BTreeMap<DeviceId, usize>,

    /// Whether a recovery window is currently open
    pub recovery_open: bool,

    /// Number of recovery windows the observer believes are open
    /// (tracked externally; the vault itself can hold at most one)
    pub open_window_count: usize,
}

impl VaultSnapshot {
    /// Capture a snapshot of the vault, extending the given epoch
    /// history.
    pub fn capture<E, S, B>(vault: &Vault<E, S, B>, epoch_history: &[Epoch]) -> Self
    where
        E: Environment,
        S: VaultStorage,
        B: HeaderBroadcast,
    {
        let state = vault.current_state();
        let current_epoch = vault.current_epoch();

        let headers = vault.export_headers();
        let header_epochs = headers.iter().map(|(&id, h)| (id, h.epoch)).collect();
        let header_sizes = headers.iter().map(|(&id, h)| (id, h.wrapped_key.len())).collect();

        let mut history = epoch_history.to_vec();
        history.push(current_epoch);

        let recovery_open = state == StateKind::RecoveryInitiated;
        Self {
            state,
            current_epoch,
            epoch_history: history,
            active_devices: vault.device_ids(),
            header_epochs,
            header_sizes,
            recovery_open,
            open_window_count: usize::from(recovery_open),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_snapshot_construction() {
        let snapshot = VaultSnapshot {
            state: StateKind::Idle,
            current_epoch: 3,
            epoch_history: vec![1, 2, 3],
            active_devices: [10u64, 20].into_iter().collect(),
            header_epochs: [(10u64, 3), (20, 3)].into_iter().collect(),
            header_sizes: [(10u64, 128), (20, 128)].into_iter().collect(),
            recovery_open: false,
            open_window_count: 0,
        };

        assert_eq!(snapshot.active_devices.len(), 2);
        assert_eq!(snapshot.epoch_history.last(), Some(&3));
    }
}
