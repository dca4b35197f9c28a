//! Driver seam: the interfaces a connection source and its connections must
//! implement for the coordinator to manage them.
//!
//! The pool, the wire protocol and query execution live behind these traits;
//! the coordinator only issues the transaction-control calls below. A mock
//! implementation is all the test suite needs, and the `mysql` feature ships
//! a binding over sqlx.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DriverError;

/// Transaction isolation levels understood by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// An intra-transaction marker permitting partial rollback.
///
/// SQL backends address savepoints by name, so the marker is its name. Names
/// are generated by the owning [`ConnectionHolder`](crate::ConnectionHolder)
/// as `SAVEPOINT_<n>` with `n` starting at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    name: String,
}

impl Savepoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// A single physical database connection.
///
/// Implementations are not expected to be re-entrant; the coordinator
/// serializes access through a [`SharedConnection`].
#[async_trait]
pub trait Connection: Send {
    async fn auto_commit(&mut self) -> Result<bool, DriverError>;

    async fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), DriverError>;

    async fn transaction_isolation(&mut self) -> Result<IsolationLevel, DriverError>;

    async fn set_transaction_isolation(
        &mut self,
        level: IsolationLevel,
    ) -> Result<(), DriverError>;

    async fn set_read_only(&mut self, read_only: bool) -> Result<(), DriverError>;

    async fn commit(&mut self) -> Result<(), DriverError>;

    async fn rollback(&mut self) -> Result<(), DriverError>;

    /// Whether the driver supports savepoints at all.
    async fn supports_savepoints(&mut self) -> Result<bool, DriverError>;

    async fn create_savepoint(&mut self, name: &str) -> Result<Savepoint, DriverError>;

    async fn rollback_to_savepoint(&mut self, savepoint: &Savepoint) -> Result<(), DriverError>;

    async fn release_savepoint(&mut self, savepoint: &Savepoint) -> Result<(), DriverError>;

    /// Execute a statement, returning the number of affected rows.
    async fn execute(&mut self, sql: &str) -> Result<u64, DriverError>;

    /// Return the connection to its source. For pooled connections this means
    /// handing the slot back, not tearing down the socket.
    async fn close(&mut self) -> Result<(), DriverError>;
}

/// A connection shared between the holder that owns it and the handles that
/// borrow it for statement execution.
pub type SharedConnection = Arc<tokio::sync::Mutex<Box<dyn Connection>>>;

pub(crate) fn share(connection: Box<dyn Connection>) -> SharedConnection {
    Arc::new(tokio::sync::Mutex::new(connection))
}

/// A source of physical connections, typically backed by a pool.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    async fn connection(&self) -> Result<Box<dyn Connection>, DriverError>;
}

/// Identity of a connection source within an execution context.
///
/// Two sources compare equal only if they originate from the same
/// [`SourceHandle`] (or clones of it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

static NEXT_SOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// A cloneable handle pairing a connection source with its identity.
///
/// The handle is the unit of resource binding: the execution context keys its
/// registry by [`SourceId`], so the same handle (however many times cloned)
/// always lands on the same slot, while two handles over the same underlying
/// pool are deliberately independent.
#[derive(Clone)]
pub struct SourceHandle {
    id: SourceId,
    inner: Arc<dyn ConnectionSource>,
}

impl SourceHandle {
    pub fn new(source: impl ConnectionSource + 'static) -> Self {
        Self::from_arc(Arc::new(source))
    }

    pub fn from_arc(source: Arc<dyn ConnectionSource>) -> Self {
        Self {
            id: SourceId(NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed)),
            inner: source,
        }
    }

    pub fn id(&self) -> SourceId {
        self.id
    }

    pub async fn connection(&self) -> Result<Box<dyn Connection>, DriverError> {
        self.inner.connection().await
    }
}

impl std::fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceHandle").field("id", &self.id).finish()
    }
}
