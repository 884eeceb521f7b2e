//! Storage collaborators for the Latchkey vault.
//!
//! Implementations of the `VaultStorage` two-phase contract from
//! `latchkey-core`:
//!
//! - [`FsVaultStorage`] — production store: shadow file with durable
//!   flush, then one atomic rename
//! - [`MemoryVaultStorage`] — in-memory store for tests and simulation
//! - [`ChaoticVaultStorage`] — fault-injection wrapper for chaos testing
//!
//! Plus [`SystemEnv`], the production `Environment` (monotonic clock, OS
//! entropy).

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod chaotic;
mod fs;
mod memory;
mod system_env;

pub use chaotic::ChaoticVaultStorage;
pub use fs::FsVaultStorage;
pub use memory::MemoryVaultStorage;
pub use system_env::SystemEnv;
