//! Per-source owner of a physical connection and its transactional state.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::driver::{share, Connection, SharedConnection};
use crate::error::{DriverError, Result, TransactionError};

/// Prefix for generated savepoint names; the first savepoint of a
/// transaction is `SAVEPOINT_1`.
pub const SAVEPOINT_NAME_PREFIX: &str = "SAVEPOINT_";

#[derive(Default)]
struct HolderState {
    connection: Option<SharedConnection>,
    reference_count: usize,
    transaction_active: bool,
    rollback_only: bool,
    synchronized_with_transaction: bool,
    savepoints_supported: Option<bool>,
    savepoint_counter: u64,
    deadline: Option<Instant>,
}

/// Wraps a single physical connection while it is bound to an execution
/// context.
///
/// The holder tracks how many handles currently reference the connection, a
/// sticky rollback-only flag, the transaction deadline, and the monotonic
/// counter used to name savepoints. It is shared (`Arc`) between the context
/// registry, the transaction status and transaction-aware connection handles;
/// all mutation goes through short internal critical sections.
pub struct ConnectionHolder {
    state: Mutex<HolderState>,
}

impl ConnectionHolder {
    /// A holder owning the given connection. `transaction_active` marks the
    /// connection as already inside a caller-managed transaction, which makes
    /// the coordinator join it instead of starting its own.
    pub fn new(connection: Box<dyn Connection>, transaction_active: bool) -> Self {
        Self {
            state: Mutex::new(HolderState {
                connection: Some(share(connection)),
                transaction_active,
                ..HolderState::default()
            }),
        }
    }

    pub fn connection(&self) -> Option<SharedConnection> {
        self.state.lock().connection.clone()
    }

    pub fn has_connection(&self) -> bool {
        self.state.lock().connection.is_some()
    }

    /// One more handle is using the held connection.
    pub fn requested(&self) {
        self.state.lock().reference_count += 1;
    }

    /// One handle released the held connection.
    pub fn released(&self) {
        let mut state = self.state.lock();
        state.reference_count = state.reference_count.saturating_sub(1);
    }

    pub fn reference_count(&self) -> usize {
        self.state.lock().reference_count
    }

    pub fn is_transaction_active(&self) -> bool {
        self.state.lock().transaction_active
    }

    pub(crate) fn set_transaction_active(&self, active: bool) {
        self.state.lock().transaction_active = active;
    }

    pub fn is_rollback_only(&self) -> bool {
        self.state.lock().rollback_only
    }

    /// Mark the whole transaction for rollback. The flag is sticky until the
    /// holder is cleared, or until a savepoint rollback consumes it.
    pub fn set_rollback_only(&self) {
        self.state.lock().rollback_only = true;
    }

    pub(crate) fn reset_rollback_only(&self) {
        self.state.lock().rollback_only = false;
    }

    pub(crate) fn is_synchronized_with_transaction(&self) -> bool {
        self.state.lock().synchronized_with_transaction
    }

    pub(crate) fn set_synchronized_with_transaction(&self, synchronized: bool) {
        self.state.lock().synchronized_with_transaction = synchronized;
    }

    /// Deadline handling. `set_deadline` anchors the timeout at now.
    pub(crate) fn set_deadline(&self, timeout: Duration) {
        self.state.lock().deadline = Some(Instant::now() + timeout);
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.state.lock().deadline
    }

    /// Time remaining until the deadline, if one is set.
    pub fn time_to_live(&self) -> Option<Duration> {
        self.state
            .lock()
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fails with [`TransactionError::TransactionTimedOut`] once the deadline
    /// has passed.
    pub fn check_deadline(&self) -> Result<()> {
        let deadline = self.state.lock().deadline;
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                return Err(TransactionError::TransactionTimedOut {
                    overdue_by: now.saturating_duration_since(deadline),
                });
            }
        }
        Ok(())
    }

    /// Next generated savepoint name; the counter never decreases within one
    /// transaction.
    pub(crate) fn next_savepoint_name(&self) -> String {
        let mut state = self.state.lock();
        state.savepoint_counter += 1;
        format!("{SAVEPOINT_NAME_PREFIX}{}", state.savepoint_counter)
    }

    /// Whether the held connection supports savepoints, probing the driver
    /// once and caching the answer.
    pub(crate) async fn supports_savepoints(&self) -> std::result::Result<bool, DriverError> {
        if let Some(known) = self.state.lock().savepoints_supported {
            return Ok(known);
        }
        let connection = self
            .connection()
            .ok_or_else(|| DriverError::new("connection holder has no connection"))?;
        let supported = connection.lock().await.supports_savepoints().await?;
        self.state.lock().savepoints_supported = Some(supported);
        Ok(supported)
    }

    /// Reset all transactional state. The connection itself and the reference
    /// count survive; they are managed by whoever bound the holder.
    pub(crate) fn clear(&self) {
        let mut state = self.state.lock();
        state.transaction_active = false;
        state.rollback_only = false;
        state.synchronized_with_transaction = false;
        state.savepoints_supported = None;
        state.savepoint_counter = 0;
        state.deadline = None;
    }
}

impl std::fmt::Debug for ConnectionHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ConnectionHolder")
            .field("has_connection", &state.connection.is_some())
            .field("reference_count", &state.reference_count)
            .field("transaction_active", &state.transaction_active)
            .field("rollback_only", &state.rollback_only)
            .field("savepoint_counter", &state.savepoint_counter)
            .finish()
    }
}
