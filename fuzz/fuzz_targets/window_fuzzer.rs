//! Fuzz the recovery-window state machine.
//!
//! Arbitrary interleavings of open/veto/advance/finalize must keep the
//! machine in a declared state, never panic, and never let a window
//! survive a recorded veto.

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use latchkey_core::{
    DEFAULT_DRIFT_TOLERANCE, DEFAULT_RECOVERY_WINDOW, Environment, ProtocolState,
    ProtocolStateMachine, RecoveryOutcome, RecoveryWindow, Role, StateKind, TransitionCtx,
    RecoveryWindowManager, VetoMessage,
};
use latchkey_harness::SimEnv;

#[derive(Debug, Arbitrary)]
enum Step {
    Initiate { recovery_role: bool },
    RecordVeto { device_id: u64 },
    AdvanceMinutes { minutes: u16 },
    Finalize,
}

fuzz_target!(|steps: Vec<Step>| {
    let env = SimEnv::new(0xFEED);
    let manager =
        RecoveryWindowManager::new(env.clone(), DEFAULT_RECOVERY_WINDOW, DEFAULT_DRIFT_TOLERANCE);
    let mut machine = ProtocolStateMachine::new(DEFAULT_DRIFT_TOLERANCE);

    let active = std::collections::BTreeMap::new();
    let headers = std::collections::BTreeMap::new();
    let ctx = TransitionCtx { current_epoch: 0, active_devices: &active, headers: &headers };

    let mut vetoed = false;

    for step in steps {
        match step {
            Step::Initiate { recovery_role } => {
                let role = if recovery_role { Role::Recovery } else { Role::Authorized };
                let result = manager.initiate(&mut machine, &ctx, role);
                if result.is_ok() {
                    assert_eq!(machine.kind(), StateKind::RecoveryInitiated);
                    vetoed = false;
                }
            },
            Step::RecordVeto { device_id } => {
                // Bypass signature checks: drive the window payload
                // directly, as a hostile in-process caller could not.
                let now = env.now();
                if let Some(window) = machine.recovery_window_mut() {
                    if window.accepts_veto_at(now, DEFAULT_DRIFT_TOLERANCE) {
                        window.record_veto(VetoMessage {
                            device_id,
                            received_at: now,
                            reason: None,
                        });
                        vetoed = true;
                    }
                }
            },
            Step::AdvanceMinutes { minutes } => {
                env.advance(Duration::from_secs(u64::from(minutes) * 60));
            },
            Step::Finalize => {
                let request_id =
                    machine.recovery_window().map(RecoveryWindow::request_id).unwrap_or(0);
                if let Ok(outcome) = manager.check_and_finalize(&mut machine, &ctx, request_id) {
                    match outcome {
                        RecoveryOutcome::Committed => {
                            // A recorded veto can never commit.
                            assert!(!vetoed);
                            assert_eq!(machine.kind(), StateKind::Idle);
                        },
                        RecoveryOutcome::Rejected => {
                            assert!(vetoed);
                            assert_eq!(machine.kind(), StateKind::Idle);
                        },
                        RecoveryOutcome::Pending => {
                            assert_eq!(machine.kind(), StateKind::RecoveryInitiated);
                        },
                    }
                }
            },
        }

        // The machine is always in a declared state.
        assert!(matches!(
            machine.state(),
            ProtocolState::Idle | ProtocolState::RecoveryInitiated(_)
        ));
    }
});
