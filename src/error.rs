use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// An error reported by the underlying database driver.
///
/// Carries the driver's message, the SQLSTATE code when the driver provides
/// one, and optionally the original driver error as a shared source. The
/// coordinator never inspects anything beyond the SQLSTATE; everything else
/// is passed through for diagnostics.
#[derive(Debug, Clone)]
pub struct DriverError {
    message: String,
    sqlstate: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync + 'static>>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sqlstate: None,
            source: None,
        }
    }

    pub fn with_sqlstate(message: impl Into<String>, sqlstate: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            sqlstate: Some(sqlstate.into()),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        sqlstate: Option<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            sqlstate,
            source: Some(Arc::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn sqlstate(&self) -> Option<&str> {
        self.sqlstate.as_deref()
    }

    /// The two-character SQLSTATE class, e.g. `40` for serialization failures.
    pub fn sqlstate_class(&self) -> Option<&str> {
        self.sqlstate
            .as_deref()
            .filter(|s| s.len() >= 2)
            .map(|s| &s[..2])
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sqlstate {
            Some(state) => write!(f, "{} (SQLSTATE {})", self.message, state),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DriverError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Errors raised by the transaction coordinator.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// The driver failed while a new transaction was being opened: connection
    /// acquisition, the initial auto-commit probe, or isolation setup.
    #[error("could not open connection for transaction")]
    CannotCreateTransaction {
        #[source]
        cause: DriverError,
    },

    /// The driver failed during commit or rollback and no more specific
    /// translation applied.
    #[error("{task} failed")]
    TransactionSystem {
        task: String,
        #[source]
        cause: DriverError,
    },

    /// Commit was requested but the transaction had been marked rollback-only.
    #[error("{0}")]
    UnexpectedRollback(String),

    /// A propagation precondition was violated.
    #[error("{0}")]
    IllegalTransactionState(String),

    /// Nested execution was requested but savepoints are unavailable.
    #[error("{0}")]
    NestedTransactionNotSupported(String),

    /// The transaction deadline elapsed before the guarded operation ran.
    #[error("transaction timed out: deadline passed {overdue_by:?} ago")]
    TransactionTimedOut { overdue_by: Duration },

    /// A driver failure the translator classified as a serialization or
    /// deadlock conflict.
    #[error("concurrency failure during {task}")]
    ConcurrencyFailure {
        task: String,
        #[source]
        cause: DriverError,
    },

    /// A driver failure outside the transaction protocol itself, e.g. from a
    /// statement issued through a transaction-aware connection handle.
    #[error("uncategorized driver error during {task}")]
    UncategorizedSql {
        task: String,
        sql: Option<String>,
        #[source]
        cause: DriverError,
    },

    /// Coordinator state was used outside its lifecycle, e.g. registering a
    /// synchronization when none is active.
    #[error("{0}")]
    IllegalState(String),
}

impl TransactionError {
    /// Whether a retry of the whole transaction might succeed.
    pub fn is_concurrency_failure(&self) -> bool {
        matches!(self, Self::ConcurrencyFailure { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TransactionTimedOut { .. })
    }
}

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, TransactionError>;
