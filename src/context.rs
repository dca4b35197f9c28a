//! Per-execution-context transactional state.
//!
//! Each logical caller (request handler, task, worker) owns one
//! [`ExecutionContext`] and passes it to every coordinator call. The context
//! carries the resource registry (which connection holder is bound for which
//! source), the synchronization list for the active transaction, and the
//! flags describing the current transaction. A transaction begun on a
//! context must be completed on that same context.
//!
//! The handle is cheap to clone; clones share state. There is no ambient
//! (thread- or task-local) registry: the context is always explicit.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::driver::{IsolationLevel, SourceId};
use crate::error::{Result, TransactionError};
use crate::holder::ConnectionHolder;
use crate::synchronization::TransactionSynchronization;

type Synchronizations = Vec<Arc<dyn TransactionSynchronization>>;

#[derive(Default)]
struct ContextState {
    resources: HashMap<SourceId, Arc<ConnectionHolder>>,
    /// `None` while no synchronization is active; `Some` (possibly empty)
    /// while a transaction scope owns the context.
    synchronizations: Option<Synchronizations>,
    current_name: Option<String>,
    current_read_only: bool,
    current_isolation: Option<IsolationLevel>,
    actual_transaction_active: bool,
}

/// Handle to the transactional state of one execution context.
#[derive(Clone, Default)]
pub struct ExecutionContext {
    state: Arc<Mutex<ContextState>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a connection holder is bound for the given source.
    pub fn has_resource(&self, id: SourceId) -> bool {
        self.state.lock().resources.contains_key(&id)
    }

    pub fn resource(&self, id: SourceId) -> Option<Arc<ConnectionHolder>> {
        self.state.lock().resources.get(&id).cloned()
    }

    /// Bind a holder for a source. Binding over an occupied slot is a
    /// programming error and fails with [`TransactionError::IllegalState`].
    pub fn bind_resource(&self, id: SourceId, holder: Arc<ConnectionHolder>) -> Result<()> {
        let mut state = self.state.lock();
        if state.resources.contains_key(&id) {
            return Err(TransactionError::IllegalState(format!(
                "a connection holder is already bound for {id}"
            )));
        }
        state.resources.insert(id, holder);
        Ok(())
    }

    /// Remove and return the holder bound for a source.
    pub fn unbind_resource(&self, id: SourceId) -> Result<Arc<ConnectionHolder>> {
        self.state.lock().resources.remove(&id).ok_or_else(|| {
            TransactionError::IllegalState(format!("no connection holder bound for {id}"))
        })
    }

    pub fn is_synchronization_active(&self) -> bool {
        self.state.lock().synchronizations.is_some()
    }

    /// Register a lifecycle listener with the active transaction.
    ///
    /// Fails with [`TransactionError::IllegalState`] when no synchronization
    /// is active — notably from inside `after_completion`, where the list has
    /// already been detached.
    pub fn register_synchronization(
        &self,
        synchronization: Arc<dyn TransactionSynchronization>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        match &mut state.synchronizations {
            Some(list) => {
                list.push(synchronization);
                Ok(())
            }
            None => Err(TransactionError::IllegalState(
                "transaction synchronization is not active".into(),
            )),
        }
    }

    pub(crate) fn init_synchronization(&self) -> Result<()> {
        self.init_synchronization_with(Vec::new())
    }

    pub(crate) fn init_synchronization_with(
        &self,
        synchronizations: Synchronizations,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.synchronizations.is_some() {
            return Err(TransactionError::IllegalState(
                "cannot activate transaction synchronization - already active".into(),
            ));
        }
        state.synchronizations = Some(synchronizations);
        Ok(())
    }

    /// Snapshot of the currently registered listeners, empty when inactive.
    pub(crate) fn synchronizations(&self) -> Synchronizations {
        self.state
            .lock()
            .synchronizations
            .clone()
            .unwrap_or_default()
    }

    /// Detach the listener list, deactivating synchronization. Registration
    /// attempts fail from this point until a new transaction activates it.
    pub(crate) fn take_synchronizations(&self) -> Synchronizations {
        self.state.lock().synchronizations.take().unwrap_or_default()
    }

    /// Clear the synchronization list and all current-transaction flags.
    pub(crate) fn clear_synchronization(&self) {
        let mut state = self.state.lock();
        state.synchronizations = None;
        state.current_name = None;
        state.current_read_only = false;
        state.current_isolation = None;
        state.actual_transaction_active = false;
    }

    pub fn current_transaction_name(&self) -> Option<String> {
        self.state.lock().current_name.clone()
    }

    pub fn is_current_transaction_read_only(&self) -> bool {
        self.state.lock().current_read_only
    }

    pub fn current_transaction_isolation(&self) -> Option<IsolationLevel> {
        self.state.lock().current_isolation
    }

    /// Whether an actual (physical) transaction is active, as opposed to an
    /// empty transaction scope managed for synchronization only.
    pub fn is_actual_transaction_active(&self) -> bool {
        self.state.lock().actual_transaction_active
    }

    pub(crate) fn set_current_flags(
        &self,
        name: Option<String>,
        read_only: bool,
        isolation: Option<IsolationLevel>,
        actual_transaction_active: bool,
    ) {
        let mut state = self.state.lock();
        state.current_name = name;
        state.current_read_only = read_only;
        state.current_isolation = isolation;
        state.actual_transaction_active = actual_transaction_active;
    }

    /// Read and reset the current-transaction flags, for suspension.
    pub(crate) fn take_current_flags(
        &self,
    ) -> (Option<String>, bool, Option<IsolationLevel>, bool) {
        let mut state = self.state.lock();
        let flags = (
            state.current_name.take(),
            state.current_read_only,
            state.current_isolation,
            state.actual_transaction_active,
        );
        state.current_read_only = false;
        state.current_isolation = None;
        state.actual_transaction_active = false;
        flags
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ExecutionContext")
            .field("bound_sources", &state.resources.len())
            .field("synchronization_active", &state.synchronizations.is_some())
            .field("actual_transaction_active", &state.actual_transaction_active)
            .finish()
    }
}
