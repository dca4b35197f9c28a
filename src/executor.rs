//! Template execution: run a unit of work inside a managed transaction.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::definition::TransactionDefinition;
use crate::error::TransactionError;
use crate::manager::TransactionManager;
use crate::status::TransactionStatus;

/// Binds a [`TransactionManager`] to a [`TransactionDefinition`] and runs
/// units of work under it.
///
/// The template owns the begin/complete pairing: it begins a scope, invokes
/// the callback with the [`TransactionStatus`], commits on success and rolls
/// back on error, and never swallows the callback's error. Templates are
/// cheap clones over a shared manager; create one per definition and reuse
/// it, including from inside another template's callback (that is how
/// propagation is exercised).
///
/// The callback's error type only needs `From<TransactionError>`, so
/// application errors (including `anyhow::Error`) travel through unchanged:
///
/// ```ignore
/// let manager = Arc::new(TransactionManager::new(source));
/// let ctx = ExecutionContext::new();
/// let template = TransactionTemplate::new(&manager);
///
/// let inserted = template
///     .execute(&ctx, |_status| {
///         Box::pin(async move {
///             // run statements through a TransactionAwareSource here
///             Ok::<_, TransactionError>(1)
///         })
///     })
///     .await?;
/// ```
#[derive(Clone)]
pub struct TransactionTemplate {
    manager: Arc<TransactionManager>,
    definition: TransactionDefinition,
}

impl TransactionTemplate {
    /// A template with the default definition (`REQUIRED`, read-write).
    pub fn new(manager: &Arc<TransactionManager>) -> Self {
        Self::with_definition(manager, TransactionDefinition::default())
    }

    pub fn with_definition(
        manager: &Arc<TransactionManager>,
        definition: TransactionDefinition,
    ) -> Self {
        Self {
            manager: Arc::clone(manager),
            definition,
        }
    }

    pub fn definition(&self) -> &TransactionDefinition {
        &self.definition
    }

    /// Execute the unit of work within a transaction on the given context.
    ///
    /// On callback success the transaction commits (which may still surface
    /// [`TransactionError::UnexpectedRollback`] if the transaction was marked
    /// rollback-only). On callback error the transaction rolls back and the
    /// callback's error is returned as-is; only a failure of the rollback
    /// itself replaces it.
    pub async fn execute<T, E, F>(&self, ctx: &ExecutionContext, f: F) -> Result<T, E>
    where
        F: for<'a> FnOnce(
            &'a TransactionStatus,
        ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>,
        E: From<TransactionError> + std::fmt::Display,
        T: Send,
    {
        let status = self
            .manager
            .begin(ctx, &self.definition)
            .await
            .map_err(E::from)?;

        match f(&status).await {
            Ok(value) => {
                self.manager.commit(status).await.map_err(E::from)?;
                Ok(value)
            }
            Err(err) => match self.manager.rollback(status).await {
                Ok(()) => Err(err),
                Err(rollback_err) => {
                    tracing::error!(error = %err, "application error overridden by rollback failure");
                    Err(E::from(rollback_err))
                }
            },
        }
    }
}

/// Execute a unit of work in a `REQUIRED` transaction on the given context.
///
/// Shorthand for a [`TransactionTemplate`] with the default definition.
pub async fn with_transaction<T, E, F>(
    manager: &Arc<TransactionManager>,
    ctx: &ExecutionContext,
    f: F,
) -> Result<T, E>
where
    F: for<'a> FnOnce(
        &'a TransactionStatus,
    ) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>,
    E: From<TransactionError> + std::fmt::Display,
    T: Send,
{
    TransactionTemplate::new(manager).execute(ctx, f).await
}
