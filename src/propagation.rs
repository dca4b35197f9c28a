//! The propagation state machine.
//!
//! Propagation is a closed set, so the decision is a pure function from
//! (outer transaction present, requested mode) to a plan; the manager then
//! executes the plan against the driver. Definition-level validation
//! (isolation and read-only compatibility when joining) needs context state
//! and stays with the manager.

use crate::definition::Propagation;
use crate::error::{Result, TransactionError};

/// What `begin` must do for a requested propagation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Plan {
    /// Participate in the existing transaction.
    Join,
    /// Start a new physical transaction; `suspend_outer` is set when an
    /// existing transaction must be suspended first.
    StartNew { suspend_outer: bool },
    /// Create a savepoint on the existing transaction's connection.
    Savepoint,
    /// Run without a transaction; `suspend_outer` is set when an existing
    /// transaction must be suspended first.
    NonTransactional { suspend_outer: bool },
}

pub(crate) fn resolve(existing: bool, propagation: Propagation) -> Result<Plan> {
    let plan = match (existing, propagation) {
        (true, Propagation::Required)
        | (true, Propagation::Supports)
        | (true, Propagation::Mandatory) => Plan::Join,
        (true, Propagation::RequiresNew) => Plan::StartNew { suspend_outer: true },
        (true, Propagation::Nested) => Plan::Savepoint,
        (true, Propagation::NotSupported) => Plan::NonTransactional { suspend_outer: true },
        (true, Propagation::Never) => {
            return Err(TransactionError::IllegalTransactionState(
                "existing transaction found for transaction marked with propagation 'never'"
                    .into(),
            ))
        }

        (false, Propagation::Required)
        | (false, Propagation::RequiresNew)
        | (false, Propagation::Nested) => Plan::StartNew { suspend_outer: false },
        (false, Propagation::Supports)
        | (false, Propagation::NotSupported)
        | (false, Propagation::Never) => Plan::NonTransactional { suspend_outer: false },
        (false, Propagation::Mandatory) => {
            return Err(TransactionError::IllegalTransactionState(
                "no existing transaction found for transaction marked with propagation 'mandatory'"
                    .into(),
            ))
        }
    };
    Ok(plan)
}
