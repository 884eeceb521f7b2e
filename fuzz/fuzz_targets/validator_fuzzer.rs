//! Fuzz the invariant validator.
//!
//! The checks are pure and must never panic on any input; their verdicts
//! must also be internally consistent (a passing header set really is
//! one-header-per-device at the expected epoch).

#![no_main]

use std::collections::BTreeMap;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use latchkey_core::{DeviceHeader, DevicePublicKeys, InvariantValidator};
use latchkey_crypto::{WRAPPED_KEY_SIZE, WrappedKey};

#[derive(Debug, Arbitrary)]
struct FuzzHeader {
    device_id: u64,
    epoch: u64,
}

#[derive(Debug, Arbitrary)]
struct Input {
    current_epoch: u64,
    attempted_epoch: u64,
    expected_epoch: u64,
    active: Vec<u64>,
    headers: Vec<FuzzHeader>,
}

fuzz_target!(|input: Input| {
    let _ = InvariantValidator::check_epoch_monotonicity(
        input.current_epoch,
        input.attempted_epoch,
    );

    let active: BTreeMap<u64, DevicePublicKeys> = input
        .active
        .iter()
        .map(|&id| {
            (id, DevicePublicKeys { encapsulation_key: [0u8; 32], verifying_key: [0u8; 32] })
        })
        .collect();

    let headers: Vec<DeviceHeader> = input
        .headers
        .iter()
        .map(|h| DeviceHeader {
            device_id: h.device_id,
            epoch: h.epoch,
            wrapped_key: WrappedKey::try_from(vec![0u8; WRAPPED_KEY_SIZE])
                .expect("constant-size blob"),
        })
        .collect();

    let verdict =
        InvariantValidator::check_header_completeness(&active, &headers, input.expected_epoch);

    if verdict.is_ok() {
        // A passing set has exactly one header per active device, all at
        // the expected epoch, and nothing else.
        assert_eq!(headers.len(), active.len());
        for header in &headers {
            assert!(active.contains_key(&header.device_id));
            assert_eq!(header.epoch, input.expected_epoch);
        }
    }
});
