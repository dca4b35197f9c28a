//! # txn-coordinator
//!
//! A propagation-aware transaction coordinator for pooled SQL connection
//! sources, with automatic commit/rollback, suspension and savepoint nesting.
//!
//! ## Features
//!
//! - **Propagation behaviors**: `REQUIRED`, `REQUIRES_NEW`, `NESTED`,
//!   `SUPPORTS`, `NOT_SUPPORTED`, `NEVER` and `MANDATORY` — a unit of work
//!   declares how it relates to a transaction already in progress, and the
//!   coordinator joins, suspends, nests via savepoint, or fails accordingly
//! - **Exactly-once resource handling**: the physical connection is acquired,
//!   configured (auto-commit, isolation, read-only), committed or rolled
//!   back, restored and released exactly once, whatever the outcome
//! - **Rollback-only marking**: any participant can force the shared
//!   transaction to roll back; an eventual commit surfaces
//!   [`TransactionError::UnexpectedRollback`]
//! - **Lifecycle synchronizations**: ordered callbacks around commit and
//!   completion, with suspend/resume notifications
//! - **Driver-agnostic**: the pool and connection sit behind small traits;
//!   the `mysql` feature ships a binding over sqlx
//!
//! ## Quick start
//!
//! ```ignore
//! use txn_coordinator::prelude::*;
//!
//! // One handle per pool, one context per logical caller.
//! let source = txn_coordinator::mysql::MySqlSource::handle(pool);
//! let manager = Arc::new(TransactionManager::new(source.clone()));
//! let ctx = ExecutionContext::new();
//! let connections = TransactionAwareSource::new(source);
//!
//! with_transaction(&manager, &ctx, |_status| {
//!     let ctx = ctx.clone();
//!     let connections = &connections;
//!     Box::pin(async move {
//!         let conn = connections.acquire(&ctx).await?;
//!         conn.execute("INSERT INTO audit (event) VALUES ('signup')").await?;
//!         conn.close().await?;
//!         Ok::<_, TransactionError>(())
//!     })
//! })
//! .await?;
//! ```
//!
//! ## Propagation
//!
//! ```ignore
//! let requires_new = TransactionTemplate::with_definition(
//!     &manager,
//!     TransactionDefinition::with_propagation(Propagation::RequiresNew),
//! );
//!
//! // Inside an outer transaction this suspends it, runs independently on a
//! // second connection, then resumes the outer transaction.
//! requires_new.execute(&ctx, |status| {
//!     Box::pin(async move {
//!         assert!(status.is_new_transaction());
//!         Ok::<_, TransactionError>(())
//!     })
//! })
//! .await?;
//! ```
//!
//! ## Rollback
//!
//! A unit of work that returns an error rolls the transaction back and the
//! error is rethrown unchanged; any error type with
//! `From<TransactionError>` works, including `anyhow::Error`. Alternatively,
//! [`TransactionStatus::set_rollback_only`] forces a rollback while the
//! callback still returns its value.
//!
//! ## How it works
//!
//! 1. [`TransactionManager::begin`] resolves the propagation plan against the
//!    [`ExecutionContext`], acquires and configures a connection when a new
//!    physical transaction is needed, and binds its
//!    [`ConnectionHolder`] into the context
//! 2. The unit of work runs, acquiring the bound connection through
//!    [`TransactionAwareSource`]
//! 3. [`TransactionManager::commit`] / [`rollback`](TransactionManager::rollback)
//!    drive the synchronization phases, complete the transaction (or its
//!    savepoint), restore the connection settings in reverse order, release
//!    the connection and resume any suspended outer transaction
//!
//! Completion consumes the [`TransactionStatus`], so a transaction cannot be
//! completed twice.

pub mod context;
pub mod definition;
pub mod driver;
pub mod error;
pub mod executor;
pub mod holder;
pub mod manager;
#[cfg(feature = "mysql")]
pub mod mysql;
mod propagation;
pub mod source;
pub mod status;
pub mod synchronization;
pub mod translator;

pub use context::ExecutionContext;
pub use definition::{Propagation, TransactionDefinition};
pub use driver::{
    Connection, ConnectionSource, IsolationLevel, Savepoint, SharedConnection, SourceHandle,
    SourceId,
};
pub use error::{DriverError, Result, TransactionError};
pub use executor::{with_transaction, TransactionTemplate};
pub use holder::{ConnectionHolder, SAVEPOINT_NAME_PREFIX};
pub use manager::{SynchronizationPolicy, TransactionManager, TransactionManagerConfig};
pub use source::{ConnectionHandle, TransactionAwareSource};
pub use status::{SuspendedResources, TransactionStatus};
pub use synchronization::{CompletionStatus, TransactionSynchronization};
pub use translator::{default_translate, ExceptionTranslator};

/// Convenience re-exports for common use cases
pub mod prelude {
    pub use crate::context::ExecutionContext;
    pub use crate::definition::{Propagation, TransactionDefinition};
    pub use crate::driver::SourceHandle;
    pub use crate::error::{Result, TransactionError};
    pub use crate::executor::{with_transaction, TransactionTemplate};
    pub use crate::manager::{TransactionManager, TransactionManagerConfig};
    pub use crate::source::TransactionAwareSource;
    pub use crate::status::TransactionStatus;
    pub use crate::synchronization::{CompletionStatus, TransactionSynchronization};
}
