//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are properties that must always hold during system
//! execution. Unlike example-based tests that check specific scenarios,
//! invariants verify behavioral properties across all execution paths:
//! snapshot the vault at an observation point, run every registered check
//! against it.

mod checks;
mod snapshot;

pub use checks::{
    EpochMonotonicity, HeaderCompleteness, SingleRecoveryWindow, UniformHeaderSize,
};
pub use snapshot::VaultSnapshot;

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// An invariant that can be checked against a vault snapshot.
///
/// Invariants capture WHAT must be true, not specific test scenarios.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// Check the invariant against the snapshot.
    fn check(&self, snapshot: &VaultSnapshot) -> InvariantResult;
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Create a registry with the standard protocol invariants:
    ///
    /// - [`EpochMonotonicity`]: observed epochs never decrease
    /// - [`HeaderCompleteness`]: active set and header set always agree
    /// - [`UniformHeaderSize`]: every wrapped blob has the same size
    /// - [`SingleRecoveryWindow`]: at most one window open at a time
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(EpochMonotonicity);
        registry.add(HeaderCompleteness);
        registry.add(UniformHeaderSize);
        registry.add(SingleRecoveryWindow);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants against the snapshot.
    ///
    /// Returns `Ok(())` if all invariants hold, or every violation found.
    pub fn check_all(&self, snapshot: &VaultSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(snapshot).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking on the first violation.
    ///
    /// Use in tests where immediate failure with context is wanted.
    ///
    /// # Panics
    ///
    /// Panics with the collected violation messages if any check fails.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, snapshot: &VaultSnapshot, context: &str) {
        if let Err(violations) = self.check_all(snapshot) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }
}
