//! Lifecycle listeners for the active transaction.

use async_trait::async_trait;

use crate::error::TransactionError;

/// Final outcome reported to [`TransactionSynchronization::after_completion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Committed,
    RolledBack,
    /// The outcome could not be determined, e.g. the listener belongs to a
    /// participating scope whose surrounding transaction completes later, or
    /// commit failed in a state where neither outcome is certain.
    Unknown,
}

/// An observer of transaction lifecycle events, registered against the
/// current execution context for the duration of one transaction.
///
/// Within a transaction, listeners fire in registration order for every
/// phase. Only [`before_commit`](Self::before_commit) can veto the commit:
/// an `Err` there routes the transaction to rollback and surfaces the error.
/// The remaining phases are observational; a listener that fails internally
/// during them should record that failure itself rather than expect the
/// coordinator to alter the outcome.
///
/// Listener code may re-enter the coordinator (start transactions, acquire
/// connections). The one restriction is that registering *further*
/// synchronizations from inside `after_completion` fails with
/// [`TransactionError::IllegalState`], because the synchronization list has
/// already been detached at that point.
#[async_trait]
pub trait TransactionSynchronization: Send + Sync {
    /// The owning transaction is being suspended for an inner independent
    /// transaction.
    async fn suspend(&self) {}

    /// The owning transaction was restored after an inner independent
    /// transaction completed.
    async fn resume(&self) {}

    /// Flush pending state to the underlying resource, on request.
    async fn flush(&self) {}

    /// About to commit. Returning `Err` aborts the commit and rolls back.
    async fn before_commit(&self, read_only: bool) -> Result<(), TransactionError> {
        let _ = read_only;
        Ok(())
    }

    /// About to complete, whatever the outcome.
    async fn before_completion(&self) {}

    /// Commit succeeded on the underlying resource.
    async fn after_commit(&self) {}

    /// The transaction completed with the given outcome. Fired exactly once
    /// per listener per transaction, after the synchronization list has been
    /// detached but before resources are unbound.
    async fn after_completion(&self, status: CompletionStatus) {
        let _ = status;
    }
}
