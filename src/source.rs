//! Transaction-aware access to a connection source.
//!
//! Code running inside a managed transaction should obtain its connection
//! through [`TransactionAwareSource`] rather than from the pool directly:
//! while a transaction is active on the context, `acquire` hands out the
//! transaction's own connection (reference-counted, deadline-checked) and
//! `close` becomes a bookkeeping operation, so the unit of work and the
//! coordinator can never fight over the physical connection.

use std::sync::Arc;

use tracing::debug;

use crate::context::ExecutionContext;
use crate::driver::{share, SharedConnection, SourceHandle};
use crate::error::{Result, TransactionError};
use crate::holder::ConnectionHolder;

/// Wraps a [`SourceHandle`] so acquisitions participate in the transaction
/// bound to the execution context.
#[derive(Clone)]
pub struct TransactionAwareSource {
    source: SourceHandle,
    reobtain_transactional_connections: bool,
}

impl TransactionAwareSource {
    pub fn new(source: SourceHandle) -> Self {
        Self {
            source,
            reobtain_transactional_connections: false,
        }
    }

    /// Re-fetch the holder's connection for every statement instead of
    /// caching it at acquisition. Useful when handles outlive suspension
    /// boundaries.
    pub fn reobtain_transactional_connections(mut self, reobtain: bool) -> Self {
        self.reobtain_transactional_connections = reobtain;
        self
    }

    pub fn source(&self) -> &SourceHandle {
        &self.source
    }

    /// Obtain a connection handle for the current context.
    ///
    /// If a transaction is active for this source, the returned handle uses
    /// the transaction's connection and its `close` only releases the
    /// reference. Otherwise a fresh connection is acquired and `close`
    /// really returns it to the source.
    pub async fn acquire(&self, ctx: &ExecutionContext) -> Result<ConnectionHandle> {
        if let Some(holder) = ctx
            .resource(self.source.id())
            .filter(|holder| holder.has_connection())
        {
            holder.requested();
            let cached = if self.reobtain_transactional_connections {
                None
            } else {
                holder.connection()
            };
            debug!("returning transaction-bound connection");
            return Ok(ConnectionHandle {
                inner: HandleInner::Transactional { holder, cached },
                closed: false,
            });
        }

        let connection = self.source.connection().await.map_err(|cause| {
            TransactionError::UncategorizedSql {
                task: "connection acquisition".into(),
                sql: None,
                cause,
            }
        })?;
        debug!("returning raw connection - no transaction bound for source");
        Ok(ConnectionHandle {
            inner: HandleInner::Raw {
                connection: Some(share(connection)),
            },
            closed: false,
        })
    }
}

enum HandleInner {
    Transactional {
        holder: Arc<ConnectionHolder>,
        /// Connection captured at acquisition; `None` in reobtain mode.
        cached: Option<SharedConnection>,
    },
    Raw {
        connection: Option<SharedConnection>,
    },
}

/// A connection obtained through [`TransactionAwareSource::acquire`].
pub struct ConnectionHandle {
    inner: HandleInner,
    closed: bool,
}

impl ConnectionHandle {
    /// Whether this handle rides on a context-bound transaction.
    pub fn is_transactional(&self) -> bool {
        matches!(self.inner, HandleInner::Transactional { .. })
    }

    /// The physical connection behind this handle.
    ///
    /// For transaction-bound handles this is the transaction's connection;
    /// repeated acquisitions within one transaction observe the same one.
    pub fn connection(&self) -> Result<SharedConnection> {
        match &self.inner {
            HandleInner::Transactional { holder, cached } => cached
                .clone()
                .or_else(|| holder.connection())
                .ok_or_else(|| {
                    TransactionError::IllegalState(
                        "transaction-bound connection is no longer available".into(),
                    )
                }),
            HandleInner::Raw { connection } => connection.clone().ok_or_else(|| {
                TransactionError::IllegalState("connection handle is already closed".into())
            }),
        }
    }

    /// Execute a statement on this handle's connection.
    ///
    /// For transaction-bound handles the transaction deadline is checked
    /// first; once it has elapsed this fails with
    /// [`TransactionError::TransactionTimedOut`] without touching the driver.
    pub async fn execute(&self, sql: &str) -> Result<u64> {
        if let HandleInner::Transactional { holder, .. } = &self.inner {
            holder.check_deadline()?;
        }
        let connection = self.connection()?;
        let result = connection.lock().await.execute(sql).await;
        result.map_err(|cause| TransactionError::UncategorizedSql {
            task: "statement execution".into(),
            sql: Some(sql.to_string()),
            cause,
        })
    }

    /// Release this handle.
    ///
    /// Decrements the holder's reference count for transaction-bound handles
    /// (the coordinator closes the connection when the transaction
    /// completes); closes the physical connection for raw handles.
    pub async fn close(mut self) -> Result<()> {
        self.closed = true;
        match &mut self.inner {
            HandleInner::Transactional { holder, .. } => {
                holder.released();
                Ok(())
            }
            HandleInner::Raw { connection } => match connection.take() {
                Some(connection) => {
                    let result = connection.lock().await.close().await;
                    result.map_err(|cause| TransactionError::UncategorizedSql {
                        task: "connection release".into(),
                        sql: None,
                        cause,
                    })
                }
                None => Ok(()),
            },
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        match &self.inner {
            HandleInner::Transactional { holder, .. } => {
                // A dropped handle still releases its reference.
                holder.released();
            }
            HandleInner::Raw { connection } => {
                if connection.is_some() {
                    debug!("raw connection handle dropped without close");
                }
            }
        }
    }
}
