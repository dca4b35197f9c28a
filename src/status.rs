//! Representation of one in-flight transaction as seen by the caller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::driver::{IsolationLevel, Savepoint};
use crate::error::{Result, TransactionError};
use crate::holder::ConnectionHolder;
use crate::synchronization::TransactionSynchronization;

/// The coordinator-internal record created by one `begin` and consumed by the
/// matching `commit` or `rollback`.
pub(crate) struct TransactionObject {
    pub(crate) holder: Arc<ConnectionHolder>,
    /// Whether this `begin` created the holder (and therefore owns binding,
    /// restoration and release of the connection).
    pub(crate) new_holder: bool,
    /// Isolation level to restore on completion, when begin changed it.
    pub(crate) previous_isolation: Option<IsolationLevel>,
    /// Whether begin switched the connection out of auto-commit.
    pub(crate) must_restore_auto_commit: bool,
    /// Whether begin put the connection into read-only mode.
    pub(crate) read_only: bool,
    /// Savepoint held by a nested scope, released or rolled back on completion.
    pub(crate) savepoint: Option<Savepoint>,
}

impl TransactionObject {
    pub(crate) fn participating(holder: Arc<ConnectionHolder>) -> Self {
        Self {
            holder,
            new_holder: false,
            previous_isolation: None,
            must_restore_auto_commit: false,
            read_only: false,
            savepoint: None,
        }
    }
}

/// Snapshot of a suspended transaction: the unbound holder, the detached
/// synchronization list and the saved context flags. Restored atomically when
/// the inner scope completes.
pub struct SuspendedResources {
    pub(crate) holder: Option<Arc<ConnectionHolder>>,
    pub(crate) synchronizations: Option<Vec<Arc<dyn TransactionSynchronization>>>,
    pub(crate) name: Option<String>,
    pub(crate) read_only: bool,
    pub(crate) isolation: Option<IsolationLevel>,
    pub(crate) was_active: bool,
}

/// Status of one transactional scope, handed to the unit of work.
///
/// The status is consumed by [`TransactionManager::commit`] or
/// [`TransactionManager::rollback`], so completing a transaction twice is
/// impossible by construction. Inside the scope it offers rollback-only
/// marking, savepoint management and synchronization flushing through a
/// shared reference.
///
/// [`TransactionManager::commit`]: crate::TransactionManager::commit
/// [`TransactionManager::rollback`]: crate::TransactionManager::rollback
pub struct TransactionStatus {
    ctx: ExecutionContext,
    pub(crate) transaction: Option<TransactionObject>,
    pub(crate) new_transaction: bool,
    pub(crate) new_synchronization: bool,
    read_only: bool,
    local_rollback_only: AtomicBool,
    pub(crate) suspended: Option<SuspendedResources>,
}

impl TransactionStatus {
    pub(crate) fn new(
        ctx: ExecutionContext,
        transaction: Option<TransactionObject>,
        new_transaction: bool,
        new_synchronization: bool,
        read_only: bool,
        suspended: Option<SuspendedResources>,
    ) -> Self {
        Self {
            ctx,
            transaction,
            new_transaction,
            new_synchronization,
            read_only,
            local_rollback_only: AtomicBool::new(false),
            suspended,
        }
    }

    /// The execution context this transaction runs on.
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// Whether this scope started the physical transaction, as opposed to
    /// participating in a surrounding one or running non-transactionally.
    pub fn is_new_transaction(&self) -> bool {
        self.transaction.is_some() && self.new_transaction
    }

    /// Whether this scope runs inside a savepoint of a surrounding
    /// transaction.
    pub fn has_savepoint(&self) -> bool {
        self.transaction
            .as_ref()
            .is_some_and(|tx| tx.savepoint.is_some())
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Force the eventual outcome to be rollback, even if the unit of work
    /// returns successfully.
    pub fn set_rollback_only(&self) {
        self.local_rollback_only.store(true, Ordering::Relaxed);
    }

    /// Whether this scope or the shared transaction has been marked
    /// rollback-only.
    pub fn is_rollback_only(&self) -> bool {
        self.is_local_rollback_only() || self.is_global_rollback_only()
    }

    pub(crate) fn is_local_rollback_only(&self) -> bool {
        self.local_rollback_only.load(Ordering::Relaxed)
    }

    pub(crate) fn is_global_rollback_only(&self) -> bool {
        self.transaction
            .as_ref()
            .is_some_and(|tx| tx.holder.is_rollback_only())
    }

    pub(crate) fn has_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub(crate) fn holder(&self) -> Option<&Arc<ConnectionHolder>> {
        self.transaction.as_ref().map(|tx| &tx.holder)
    }

    /// Trigger the `flush` callback on all registered synchronizations.
    pub async fn flush(&self) {
        for synchronization in self.ctx.synchronizations() {
            synchronization.flush().await;
        }
    }

    /// Create a savepoint in the current transaction, for manual partial
    /// rollback within the scope.
    pub async fn create_savepoint(&self) -> Result<Savepoint> {
        let tx = self.require_transaction("cannot create savepoint")?;
        let supported = tx.holder.supports_savepoints().await.map_err(|cause| {
            TransactionError::TransactionSystem {
                task: "creating savepoint".into(),
                cause,
            }
        })?;
        if !supported {
            return Err(TransactionError::NestedTransactionNotSupported(
                "driver does not support savepoints".into(),
            ));
        }
        let name = tx.holder.next_savepoint_name();
        let connection = self.connection_of(tx)?;
        let savepoint = connection
            .lock()
            .await
            .create_savepoint(&name)
            .await
            .map_err(|cause| TransactionError::TransactionSystem {
                task: "creating savepoint".into(),
                cause,
            })?;
        Ok(savepoint)
    }

    /// Roll the current transaction back to a savepoint created with
    /// [`create_savepoint`](Self::create_savepoint).
    pub async fn rollback_to_savepoint(&self, savepoint: &Savepoint) -> Result<()> {
        let tx = self.require_transaction("cannot roll back to savepoint")?;
        let connection = self.connection_of(tx)?;
        let result = connection
            .lock()
            .await
            .rollback_to_savepoint(savepoint)
            .await
            .map_err(|cause| TransactionError::TransactionSystem {
                task: "rolling back to savepoint".into(),
                cause,
            });
        result
    }

    /// Release a savepoint created with
    /// [`create_savepoint`](Self::create_savepoint).
    pub async fn release_savepoint(&self, savepoint: &Savepoint) -> Result<()> {
        let tx = self.require_transaction("cannot release savepoint")?;
        let connection = self.connection_of(tx)?;
        let result = connection
            .lock()
            .await
            .release_savepoint(savepoint)
            .await
            .map_err(|cause| TransactionError::TransactionSystem {
                task: "releasing savepoint".into(),
                cause,
            });
        result
    }

    fn require_transaction(&self, action: &str) -> Result<&TransactionObject> {
        self.transaction.as_ref().ok_or_else(|| {
            TransactionError::IllegalTransactionState(format!(
                "{action} - transaction status does not carry an actual transaction"
            ))
        })
    }

    fn connection_of(&self, tx: &TransactionObject) -> Result<crate::driver::SharedConnection> {
        tx.holder.connection().ok_or_else(|| {
            TransactionError::IllegalState("connection holder has no connection".into())
        })
    }
}

impl std::fmt::Debug for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionStatus")
            .field("new_transaction", &self.is_new_transaction())
            .field("has_savepoint", &self.has_savepoint())
            .field("read_only", &self.read_only)
            .field("rollback_only", &self.is_rollback_only())
            .finish()
    }
}
