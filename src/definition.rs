//! Transaction definitions: propagation behavior plus the per-transaction
//! attributes a caller can request.

use std::time::Duration;

use crate::driver::IsolationLevel;

/// How a requested transaction relates to one already in progress on the
/// same execution context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Propagation {
    /// Join the current transaction; start a new one if none exists.
    #[default]
    Required,
    /// Always start a new transaction, suspending the current one if present.
    RequiresNew,
    /// Execute within a savepoint of the current transaction if one exists;
    /// otherwise behave like [`Propagation::Required`].
    Nested,
    /// Join the current transaction if present; otherwise run without one.
    Supports,
    /// Run without a transaction, suspending the current one if present.
    NotSupported,
    /// Run without a transaction; fail if one is present.
    Never,
    /// Join the current transaction; fail if none exists.
    Mandatory,
}

/// The caller-side description of a transactional unit of work.
///
/// All fields are optional refinements over the defaults: `REQUIRED`
/// propagation, driver-default isolation, read-write, no timeout, unnamed.
///
/// ```
/// use std::time::Duration;
/// use txn_coordinator::{Propagation, TransactionDefinition};
///
/// let def = TransactionDefinition {
///     propagation: Propagation::RequiresNew,
///     read_only: true,
///     timeout: Some(Duration::from_secs(5)),
///     ..TransactionDefinition::default()
/// };
/// assert!(def.read_only);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TransactionDefinition {
    pub propagation: Propagation,
    /// Isolation to apply to a newly started transaction. `None` keeps the
    /// connection's current level.
    pub isolation: Option<IsolationLevel>,
    pub read_only: bool,
    /// Deadline for the whole transaction, measured from `begin`. Falls back
    /// to the manager's default timeout when unset.
    pub timeout: Option<Duration>,
    /// Diagnostic name exposed on the execution context while active.
    pub name: Option<String>,
}

impl TransactionDefinition {
    /// A definition with everything defaulted except the propagation mode.
    pub fn with_propagation(propagation: Propagation) -> Self {
        Self {
            propagation,
            ..Self::default()
        }
    }
}
