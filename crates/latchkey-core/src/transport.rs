//! Transport boundary for header distribution.
//!
//! The wire framing between devices is an external collaborator; the
//! protocol core only needs a fire-and-forget broadcast hook invoked
//! after a successful commit. A broadcast failure never un-commits
//! metadata; the vault logs it and other devices catch up on their next
//! sync.

use thiserror::Error;

use crate::types::{DeviceHeader, DeviceId};

/// Transport failure while broadcasting a header.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transport error: {0}")]
pub struct TransportError(pub String);

/// Outbound header distribution after a committed epoch upgrade.
pub trait HeaderBroadcast: Send + Sync + 'static {
    /// Announce a device's new header.
    ///
    /// Called once per active device after the atomic commit succeeds.
    fn broadcast(&self, device_id: DeviceId, header: &DeviceHeader) -> Result<(), TransportError>;
}

/// Broadcast sink that drops everything; for single-device vaults and
/// tests that don't observe distribution.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullBroadcast;

impl HeaderBroadcast for NullBroadcast {
    fn broadcast(
        &self,
        _device_id: DeviceId,
        _header: &DeviceHeader,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}
