//! Deterministic test harness for the Latchkey protocol.
//!
//! Three building blocks:
//!
//! - [`SimEnv`] — a virtual-clock, seeded-entropy `Environment`, so
//!   protocol runs are fully deterministic and 48-hour veto windows
//!   elapse instantly
//! - [`invariants`] — behavioral properties that must hold at every
//!   observation point, checked against [`VaultSnapshot`]s
//! - [`model`] — a small reference model of the protocol for model-based
//!   testing against the real implementation

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod env;
pub mod invariants;
pub mod model;

pub use env::{SimEnv, SimInstant};
pub use invariants::{Invariant, InvariantRegistry, VaultSnapshot, Violation};
pub use model::{ModelState, ModelVault, Operation, SimDevice};
