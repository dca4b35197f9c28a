//! Shared fixture: a recording mock driver, a recording synchronization and
//! the post-condition every test ends with.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use txn_coordinator::{
    CompletionStatus, Connection, ConnectionSource, DriverError, ExecutionContext, IsolationLevel,
    Savepoint, SourceHandle, SourceId, TransactionManager, TransactionManagerConfig,
    TransactionSynchronization,
};

/// One recorded driver call. Getter calls are not recorded, mirroring how
/// the scenarios verify mutations and lifecycle calls only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    SetAutoCommit(bool),
    SetIsolation(IsolationLevel),
    SetReadOnly(bool),
    Commit,
    Rollback,
    CreateSavepoint(String),
    RollbackToSavepoint(String),
    ReleaseSavepoint(String),
    Execute(String),
    Close,
}

/// Handle onto the op log of one mock connection.
#[derive(Clone, Default)]
pub struct ConnectionLog(Arc<Mutex<Vec<Op>>>);

impl ConnectionLog {
    fn push(&self, op: Op) {
        self.0.lock().push(op);
    }

    pub fn ops(&self) -> Vec<Op> {
        self.0.lock().clone()
    }

    pub fn count(&self, op: &Op) -> usize {
        self.0.lock().iter().filter(|o| *o == op).count()
    }

    pub fn contains(&self, op: &Op) -> bool {
        self.count(op) > 0
    }
}

#[derive(Clone)]
struct MockSettings {
    auto_commit: bool,
    isolation: IsolationLevel,
    savepoints_supported: bool,
    fail_on_connect: Option<DriverError>,
    fail_on_auto_commit: Option<DriverError>,
    fail_on_set_read_only: Option<DriverError>,
    fail_on_commit: Option<DriverError>,
    fail_on_rollback: Option<DriverError>,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            auto_commit: true,
            isolation: IsolationLevel::ReadCommitted,
            savepoints_supported: true,
            fail_on_connect: None,
            fail_on_auto_commit: None,
            fail_on_set_read_only: None,
            fail_on_commit: None,
            fail_on_rollback: None,
        }
    }
}

/// A connection source whose connections record every call they receive.
///
/// Each `connection()` call produces a fresh connection with its own op log;
/// the logs stay accessible through the source afterwards, in acquisition
/// order.
#[derive(Clone, Default)]
pub struct MockSource {
    settings: Arc<Mutex<MockSettings>>,
    connections: Arc<Mutex<Vec<ConnectionLog>>>,
}

impl MockSource {
    pub fn auto_commit(&self, auto_commit: bool) -> &Self {
        self.settings.lock().auto_commit = auto_commit;
        self
    }

    pub fn isolation(&self, isolation: IsolationLevel) -> &Self {
        self.settings.lock().isolation = isolation;
        self
    }

    pub fn savepoints_supported(&self, supported: bool) -> &Self {
        self.settings.lock().savepoints_supported = supported;
        self
    }

    pub fn fail_on_connect(&self, err: DriverError) -> &Self {
        self.settings.lock().fail_on_connect = Some(err);
        self
    }

    pub fn fail_on_auto_commit(&self, err: DriverError) -> &Self {
        self.settings.lock().fail_on_auto_commit = Some(err);
        self
    }

    pub fn fail_on_set_read_only(&self, err: DriverError) -> &Self {
        self.settings.lock().fail_on_set_read_only = Some(err);
        self
    }

    pub fn fail_on_commit(&self, err: DriverError) -> &Self {
        self.settings.lock().fail_on_commit = Some(err);
        self
    }

    pub fn fail_on_rollback(&self, err: DriverError) -> &Self {
        self.settings.lock().fail_on_rollback = Some(err);
        self
    }

    /// Logs of every connection handed out so far, in order.
    pub fn connections(&self) -> Vec<ConnectionLog> {
        self.connections.lock().clone()
    }

    pub fn connection_log(&self, index: usize) -> ConnectionLog {
        self.connections.lock()[index].clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Build a connection outside the source, for caller-managed holders.
    pub fn raw_connection(&self) -> (Box<dyn Connection>, ConnectionLog) {
        let log = ConnectionLog::default();
        self.connections.lock().push(log.clone());
        let conn = MockConnection {
            log: log.clone(),
            settings: self.settings.lock().clone(),
        };
        (Box::new(conn), log)
    }
}

#[async_trait]
impl ConnectionSource for MockSource {
    async fn connection(&self) -> Result<Box<dyn Connection>, DriverError> {
        if let Some(err) = self.settings.lock().fail_on_connect.clone() {
            return Err(err);
        }
        let (conn, _log) = self.raw_connection();
        Ok(conn)
    }
}

struct MockConnection {
    log: ConnectionLog,
    settings: MockSettings,
}

#[async_trait]
impl Connection for MockConnection {
    async fn auto_commit(&mut self) -> Result<bool, DriverError> {
        if let Some(err) = self.settings.fail_on_auto_commit.clone() {
            return Err(err);
        }
        Ok(self.settings.auto_commit)
    }

    async fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), DriverError> {
        self.log.push(Op::SetAutoCommit(auto_commit));
        self.settings.auto_commit = auto_commit;
        Ok(())
    }

    async fn transaction_isolation(&mut self) -> Result<IsolationLevel, DriverError> {
        Ok(self.settings.isolation)
    }

    async fn set_transaction_isolation(
        &mut self,
        level: IsolationLevel,
    ) -> Result<(), DriverError> {
        self.log.push(Op::SetIsolation(level));
        self.settings.isolation = level;
        Ok(())
    }

    async fn set_read_only(&mut self, read_only: bool) -> Result<(), DriverError> {
        self.log.push(Op::SetReadOnly(read_only));
        if let Some(err) = self.settings.fail_on_set_read_only.clone() {
            return Err(err);
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.log.push(Op::Commit);
        if let Some(err) = self.settings.fail_on_commit.clone() {
            return Err(err);
        }
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.log.push(Op::Rollback);
        if let Some(err) = self.settings.fail_on_rollback.clone() {
            return Err(err);
        }
        Ok(())
    }

    async fn supports_savepoints(&mut self) -> Result<bool, DriverError> {
        Ok(self.settings.savepoints_supported)
    }

    async fn create_savepoint(&mut self, name: &str) -> Result<Savepoint, DriverError> {
        self.log.push(Op::CreateSavepoint(name.to_string()));
        Ok(Savepoint::new(name))
    }

    async fn rollback_to_savepoint(&mut self, savepoint: &Savepoint) -> Result<(), DriverError> {
        self.log
            .push(Op::RollbackToSavepoint(savepoint.name().to_string()));
        Ok(())
    }

    async fn release_savepoint(&mut self, savepoint: &Savepoint) -> Result<(), DriverError> {
        self.log
            .push(Op::ReleaseSavepoint(savepoint.name().to_string()));
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<u64, DriverError> {
        self.log.push(Op::Execute(sql.to_string()));
        Ok(0)
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.log.push(Op::Close);
        Ok(())
    }
}

/// Recording lifecycle listener, checking call uniqueness and the state the
/// coordinator promises during each phase.
pub struct RecordingSynchronization {
    expected: CompletionStatus,
    ctx: ExecutionContext,
    source_id: SourceId,
    before_commit_called: AtomicBool,
    before_completion_called: AtomicBool,
    after_commit_called: AtomicBool,
    after_completion_called: AtomicBool,
    suspend_count: AtomicUsize,
    resume_count: AtomicUsize,
    flush_count: AtomicUsize,
    completion_status: Mutex<Option<CompletionStatus>>,
    resource_bound_at_completion: AtomicBool,
    violations: Mutex<Vec<String>>,
}

impl RecordingSynchronization {
    pub fn new(expected: CompletionStatus, ctx: &ExecutionContext, source: &SourceHandle) -> Arc<Self> {
        Arc::new(Self {
            expected,
            ctx: ctx.clone(),
            source_id: source.id(),
            before_commit_called: AtomicBool::new(false),
            before_completion_called: AtomicBool::new(false),
            after_commit_called: AtomicBool::new(false),
            after_completion_called: AtomicBool::new(false),
            suspend_count: AtomicUsize::new(0),
            resume_count: AtomicUsize::new(0),
            flush_count: AtomicUsize::new(0),
            completion_status: Mutex::new(None),
            resource_bound_at_completion: AtomicBool::new(false),
            violations: Mutex::new(Vec::new()),
        })
    }

    fn violate(&self, message: &str) {
        self.violations.lock().push(message.to_string());
    }

    pub fn before_commit_called(&self) -> bool {
        self.before_commit_called.load(Ordering::SeqCst)
    }

    pub fn before_completion_called(&self) -> bool {
        self.before_completion_called.load(Ordering::SeqCst)
    }

    pub fn after_commit_called(&self) -> bool {
        self.after_commit_called.load(Ordering::SeqCst)
    }

    pub fn after_completion_called(&self) -> bool {
        self.after_completion_called.load(Ordering::SeqCst)
    }

    pub fn suspend_count(&self) -> usize {
        self.suspend_count.load(Ordering::SeqCst)
    }

    pub fn resume_count(&self) -> usize {
        self.resume_count.load(Ordering::SeqCst)
    }

    pub fn flush_count(&self) -> usize {
        self.flush_count.load(Ordering::SeqCst)
    }

    pub fn completion_status(&self) -> Option<CompletionStatus> {
        *self.completion_status.lock()
    }

    pub fn resource_bound_at_completion(&self) -> bool {
        self.resource_bound_at_completion.load(Ordering::SeqCst)
    }

    /// Assert the invariants the listener checked while the transaction ran.
    pub fn assert_no_violations(&self) {
        let violations = self.violations.lock();
        assert!(violations.is_empty(), "listener violations: {violations:?}");
    }
}

#[async_trait]
impl TransactionSynchronization for RecordingSynchronization {
    async fn suspend(&self) {
        self.suspend_count.fetch_add(1, Ordering::SeqCst);
    }

    async fn resume(&self) {
        self.resume_count.fetch_add(1, Ordering::SeqCst);
    }

    async fn flush(&self) {
        self.flush_count.fetch_add(1, Ordering::SeqCst);
    }

    async fn before_commit(&self, _read_only: bool) -> Result<(), txn_coordinator::TransactionError> {
        if self.expected != CompletionStatus::Committed {
            self.violate("before_commit fired for a transaction that should not commit");
        }
        if self.before_commit_called.swap(true, Ordering::SeqCst) {
            self.violate("before_commit fired twice");
        }
        Ok(())
    }

    async fn before_completion(&self) {
        if self.before_completion_called.swap(true, Ordering::SeqCst) {
            self.violate("before_completion fired twice");
        }
    }

    async fn after_commit(&self) {
        if self.expected != CompletionStatus::Committed {
            self.violate("after_commit fired for a transaction that should not commit");
        }
        if self.after_commit_called.swap(true, Ordering::SeqCst) {
            self.violate("after_commit fired twice");
        }
    }

    async fn after_completion(&self, status: CompletionStatus) {
        if self.after_completion_called.swap(true, Ordering::SeqCst) {
            self.violate("after_completion fired twice");
        }
        if status != self.expected {
            self.violate("after_completion fired with unexpected status");
        }
        *self.completion_status.lock() = Some(status);
        self.resource_bound_at_completion
            .store(self.ctx.has_resource(self.source_id), Ordering::SeqCst);
    }
}

/// Post-condition applied at the end of every test: no bound resources, no
/// active synchronization, all current-transaction flags reset.
pub fn assert_clean(ctx: &ExecutionContext, source: &SourceHandle) {
    assert!(
        !ctx.has_resource(source.id()),
        "connection holder still bound after transaction"
    );
    assert!(
        !ctx.is_synchronization_active(),
        "synchronization still active after transaction"
    );
    assert!(
        !ctx.is_current_transaction_read_only(),
        "read-only flag still set after transaction"
    );
    assert!(
        !ctx.is_actual_transaction_active(),
        "actual-transaction flag still set after transaction"
    );
}

/// Fresh mock source, handle, default manager and context.
pub fn fixture() -> (
    MockSource,
    SourceHandle,
    Arc<TransactionManager>,
    ExecutionContext,
) {
    fixture_with(TransactionManagerConfig::default())
}

pub fn fixture_with(
    config: TransactionManagerConfig,
) -> (
    MockSource,
    SourceHandle,
    Arc<TransactionManager>,
    ExecutionContext,
) {
    let mock = MockSource::default();
    let source = SourceHandle::new(mock.clone());
    let manager = Arc::new(TransactionManager::with_config(source.clone(), config));
    (mock, source, manager, ExecutionContext::new())
}
