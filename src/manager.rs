//! The transaction manager: begin / commit / rollback orchestration.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::context::ExecutionContext;
use crate::definition::TransactionDefinition;
use crate::driver::{IsolationLevel, Savepoint, SharedConnection, SourceHandle};
use crate::error::{DriverError, Result, TransactionError};
use crate::holder::ConnectionHolder;
use crate::propagation::{self, Plan};
use crate::status::{SuspendedResources, TransactionObject, TransactionStatus};
use crate::synchronization::CompletionStatus;
use crate::translator::{default_translate, ExceptionTranslator};

/// When the manager activates transaction synchronization on the execution
/// context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SynchronizationPolicy {
    /// Activate for every managed scope, including empty scopes without an
    /// actual transaction.
    #[default]
    Always,
    /// Activate only when an actual physical transaction exists.
    OnActualTransaction,
    /// Never activate synchronization.
    Never,
}

/// Configuration for [`TransactionManager`].
#[derive(Debug, Clone)]
pub struct TransactionManagerConfig {
    pub synchronization: SynchronizationPolicy,

    /// Deadline applied when the definition does not specify a timeout.
    pub default_timeout: Option<Duration>,

    /// Raise [`TransactionError::UnexpectedRollback`] at the boundary of the
    /// participating scope that observes the rollback-only marker, instead of
    /// waiting for the outermost commit.
    pub fail_early_on_global_rollback_only: bool,

    /// Attempt a rollback when the physical commit itself fails, before
    /// surfacing the commit error.
    pub rollback_on_commit_failure: bool,

    /// Execute `SET TRANSACTION READ ONLY` when beginning a read-only
    /// transaction, pushing enforcement into the database.
    pub enforce_read_only: bool,

    /// Reject joining an existing transaction whose isolation level or
    /// read-only mode is incompatible with the requested definition.
    pub validate_existing_transaction: bool,

    /// Allow `NESTED` propagation. Enabled by default: savepoint-based
    /// nesting works on any driver that supports savepoints.
    pub nested_transaction_allowed: bool,
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        Self {
            synchronization: SynchronizationPolicy::Always,
            default_timeout: None,
            fail_early_on_global_rollback_only: false,
            rollback_on_commit_failure: false,
            enforce_read_only: false,
            validate_existing_transaction: false,
            nested_transaction_allowed: true,
        }
    }
}

/// Coordinates transactions for one connection source.
///
/// The manager implements the propagation behaviors of
/// [`Propagation`](crate::Propagation) over the per-context resource
/// registry: it acquires and configures the physical connection, binds it to
/// the caller's [`ExecutionContext`], drives the synchronization callbacks,
/// and guarantees that configuration is restored and the connection released
/// exactly once whatever the outcome.
///
/// All state for an in-flight transaction lives on the
/// [`TransactionStatus`], so the manager is freely shareable and reentrant:
/// a unit of work may start further transactions on the same context.
pub struct TransactionManager {
    source: SourceHandle,
    config: TransactionManagerConfig,
    translator: Option<Arc<ExceptionTranslator>>,
}

impl TransactionManager {
    pub fn new(source: SourceHandle) -> Self {
        Self::with_config(source, TransactionManagerConfig::default())
    }

    pub fn with_config(source: SourceHandle, config: TransactionManagerConfig) -> Self {
        Self {
            source,
            config,
            translator: None,
        }
    }

    /// Install a custom driver-error translator, replacing the SQLSTATE-based
    /// default.
    pub fn with_translator(
        mut self,
        translator: impl Fn(&str, Option<&str>, &DriverError) -> Option<TransactionError>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.translator = Some(Arc::new(translator));
        self
    }

    pub fn source(&self) -> &SourceHandle {
        &self.source
    }

    pub fn config(&self) -> &TransactionManagerConfig {
        &self.config
    }

    /// Begin a transactional scope according to the definition's propagation
    /// behavior, against the given execution context.
    ///
    /// The returned status must be handed back to exactly one of
    /// [`commit`](Self::commit) or [`rollback`](Self::rollback) on the same
    /// context. [`TransactionTemplate`](crate::TransactionTemplate) wraps
    /// this pairing.
    pub async fn begin(
        &self,
        ctx: &ExecutionContext,
        definition: &TransactionDefinition,
    ) -> Result<TransactionStatus> {
        let existing = ctx
            .resource(self.source.id())
            .filter(|holder| holder.is_transaction_active());
        let plan = propagation::resolve(existing.is_some(), definition.propagation)?;

        match plan {
            Plan::Join => {
                let holder = self.existing_holder(existing)?;
                if self.config.validate_existing_transaction {
                    self.validate_participation(ctx, definition)?;
                }
                debug!("participating in existing transaction");
                let new_synchronization = self.config.synchronization
                    != SynchronizationPolicy::Never
                    && !ctx.is_synchronization_active();
                let status = TransactionStatus::new(
                    ctx.clone(),
                    Some(TransactionObject::participating(holder)),
                    false,
                    new_synchronization,
                    definition.read_only,
                    None,
                );
                self.prepare_synchronization(ctx, &status, definition)?;
                Ok(status)
            }
            Plan::Savepoint => {
                let holder = self.existing_holder(existing)?;
                self.begin_nested(ctx, definition, holder).await
            }
            Plan::StartNew { suspend_outer } => {
                let outer = if suspend_outer { existing.as_ref() } else { None };
                let suspended = self.suspend(ctx, outer).await?;
                match self.start_transaction(ctx, definition, suspended).await {
                    Ok(status) => Ok(status),
                    Err((err, suspended)) => {
                        if let Some(suspended) = suspended {
                            self.resume(ctx, suspended).await;
                        }
                        Err(err)
                    }
                }
            }
            Plan::NonTransactional { suspend_outer } => {
                let outer = if suspend_outer { existing.as_ref() } else { None };
                let suspended = self.suspend(ctx, outer).await?;
                if definition.isolation.is_some() {
                    warn!(
                        "custom isolation level specified but no actual transaction \
                         initiated - isolation level will be ignored"
                    );
                }
                debug!("running scope without an actual transaction");
                let new_synchronization = self.config.synchronization
                    == SynchronizationPolicy::Always
                    && !ctx.is_synchronization_active();
                let status = TransactionStatus::new(
                    ctx.clone(),
                    None,
                    true,
                    new_synchronization,
                    definition.read_only,
                    suspended,
                );
                self.prepare_synchronization(ctx, &status, definition)?;
                Ok(status)
            }
        }
    }

    /// Complete the transaction, honoring any rollback-only marker.
    ///
    /// If the scope (or a participant sharing its transaction) requested
    /// rollback-only, the transaction is rolled back instead; a commit
    /// request against a globally marked transaction surfaces
    /// [`TransactionError::UnexpectedRollback`] at the boundary that owns the
    /// physical transaction.
    pub async fn commit(&self, status: TransactionStatus) -> Result<()> {
        if status.is_local_rollback_only() {
            debug!("transactional code has requested rollback");
            return self.process_rollback(status, false).await;
        }
        if status.is_global_rollback_only() {
            debug!("transaction is marked as rollback-only but commit was requested");
            return self.process_rollback(status, true).await;
        }
        self.process_commit(status).await
    }

    /// Roll the transaction back: to its savepoint for a nested scope, by a
    /// physical rollback for a scope that owns the transaction, or by marking
    /// the shared transaction rollback-only for a participant.
    pub async fn rollback(&self, status: TransactionStatus) -> Result<()> {
        self.process_rollback(status, false).await
    }

    fn existing_holder(
        &self,
        existing: Option<Arc<ConnectionHolder>>,
    ) -> Result<Arc<ConnectionHolder>> {
        existing.ok_or_else(|| {
            TransactionError::IllegalState(
                "propagation plan requires an existing transaction but none is bound".into(),
            )
        })
    }

    fn validate_participation(
        &self,
        ctx: &ExecutionContext,
        definition: &TransactionDefinition,
    ) -> Result<()> {
        if let Some(requested) = definition.isolation {
            if ctx.current_transaction_isolation() != Some(requested) {
                return Err(TransactionError::IllegalTransactionState(format!(
                    "participating transaction specifies isolation level {requested:?} \
                     which is incompatible with the existing transaction"
                )));
            }
        }
        if !definition.read_only && ctx.is_current_transaction_read_only() {
            return Err(TransactionError::IllegalTransactionState(
                "participating transaction is not marked as read-only \
                 but the existing transaction is"
                    .into(),
            ));
        }
        Ok(())
    }

    async fn begin_nested(
        &self,
        ctx: &ExecutionContext,
        definition: &TransactionDefinition,
        holder: Arc<ConnectionHolder>,
    ) -> Result<TransactionStatus> {
        if !self.config.nested_transaction_allowed {
            return Err(TransactionError::NestedTransactionNotSupported(
                "nested transactions are disabled by the transaction manager configuration"
                    .into(),
            ));
        }
        let supported = holder
            .supports_savepoints()
            .await
            .map_err(|cause| TransactionError::CannotCreateTransaction { cause })?;
        if !supported {
            return Err(TransactionError::NestedTransactionNotSupported(
                "driver does not support savepoints".into(),
            ));
        }

        debug!("creating nested transaction with savepoint");
        let name = holder.next_savepoint_name();
        let connection = self.holder_connection(&holder)?;
        let savepoint = connection
            .lock()
            .await
            .create_savepoint(&name)
            .await
            .map_err(|cause| TransactionError::CannotCreateTransaction { cause })?;

        let mut transaction = TransactionObject::participating(holder);
        transaction.savepoint = Some(savepoint);
        Ok(TransactionStatus::new(
            ctx.clone(),
            Some(transaction),
            false,
            false,
            definition.read_only,
            None,
        ))
    }

    async fn start_transaction(
        &self,
        ctx: &ExecutionContext,
        definition: &TransactionDefinition,
        suspended: Option<SuspendedResources>,
    ) -> std::result::Result<TransactionStatus, (TransactionError, Option<SuspendedResources>)>
    {
        let new_synchronization = self.config.synchronization != SynchronizationPolicy::Never
            && !ctx.is_synchronization_active();
        let transaction = match self.do_begin(ctx, definition).await {
            Ok(transaction) => transaction,
            Err(err) => return Err((err, suspended)),
        };
        let mut status = TransactionStatus::new(
            ctx.clone(),
            Some(transaction),
            true,
            new_synchronization,
            definition.read_only,
            suspended,
        );
        if let Err(err) = self.prepare_synchronization(ctx, &status, definition) {
            return Err((err, status.suspended.take()));
        }
        Ok(status)
    }

    /// Acquire and configure a connection for a new physical transaction.
    async fn do_begin(
        &self,
        ctx: &ExecutionContext,
        definition: &TransactionDefinition,
    ) -> Result<TransactionObject> {
        let mut new_holder = false;
        let holder = match ctx.resource(self.source.id()) {
            Some(bound) if !bound.is_synchronized_with_transaction() => bound,
            _ => {
                let connection = self
                    .source
                    .connection()
                    .await
                    .map_err(|cause| TransactionError::CannotCreateTransaction { cause })?;
                debug!("acquired connection for new transaction");
                new_holder = true;
                Arc::new(ConnectionHolder::new(connection, false))
            }
        };
        holder.set_synchronized_with_transaction(true);

        let configured = self.configure_connection(&holder, definition).await;
        let (previous_isolation, must_restore_auto_commit) = match configured {
            Ok(saved) => saved,
            Err(cause) => {
                self.discard_failed_begin(&holder, new_holder).await;
                return Err(TransactionError::CannotCreateTransaction { cause });
            }
        };

        holder.set_transaction_active(true);
        if let Some(timeout) = definition.timeout.or(self.config.default_timeout) {
            holder.set_deadline(timeout);
        }
        if new_holder {
            if let Err(err) = ctx.bind_resource(self.source.id(), holder.clone()) {
                self.discard_failed_begin(&holder, true).await;
                return Err(err);
            }
        }

        Ok(TransactionObject {
            holder,
            new_holder,
            previous_isolation,
            must_restore_auto_commit,
            read_only: definition.read_only,
            savepoint: None,
        })
    }

    /// Apply the definition to the physical connection, in an order whose
    /// exact reverse is the restoration order of cleanup: read-only,
    /// isolation, auto-commit, then the optional read-only enforcement
    /// statement.
    async fn configure_connection(
        &self,
        holder: &ConnectionHolder,
        definition: &TransactionDefinition,
    ) -> std::result::Result<(Option<IsolationLevel>, bool), DriverError> {
        let shared = holder
            .connection()
            .ok_or_else(|| DriverError::new("connection holder has no connection"))?;
        let mut connection = shared.lock().await;

        if definition.read_only {
            // A driver that cannot switch to read-only is tolerable; the
            // definition-level flag still applies.
            if let Err(err) = connection.set_read_only(true).await {
                debug!(error = %err, "could not switch connection to read-only");
            }
        }

        let previous_isolation = match definition.isolation {
            Some(requested) => {
                let current = connection.transaction_isolation().await?;
                if current != requested {
                    debug!(?current, ?requested, "changing isolation level for transaction");
                    connection.set_transaction_isolation(requested).await?;
                    Some(current)
                } else {
                    None
                }
            }
            None => None,
        };

        let must_restore_auto_commit = connection.auto_commit().await?;
        if must_restore_auto_commit {
            debug!("switching connection to manual commit");
            connection.set_auto_commit(false).await?;
        }

        if self.config.enforce_read_only && definition.read_only {
            connection.execute("SET TRANSACTION READ ONLY").await?;
        }

        Ok((previous_isolation, must_restore_auto_commit))
    }

    async fn discard_failed_begin(&self, holder: &ConnectionHolder, new_holder: bool) {
        if new_holder {
            if let Some(connection) = holder.connection() {
                if let Err(err) = connection.lock().await.close().await {
                    debug!(error = %err, "could not close connection after failed begin");
                }
            }
            holder.clear();
        } else {
            holder.set_synchronized_with_transaction(false);
        }
    }

    fn prepare_synchronization(
        &self,
        ctx: &ExecutionContext,
        status: &TransactionStatus,
        definition: &TransactionDefinition,
    ) -> Result<()> {
        if status.new_synchronization {
            ctx.set_current_flags(
                definition.name.clone(),
                definition.read_only,
                definition.isolation,
                status.has_transaction(),
            );
            ctx.init_synchronization()?;
        }
        Ok(())
    }

    /// Snapshot and detach the current transactional bindings so an
    /// independent transaction can run. `holder` is the bound holder to
    /// unbind, or `None` to suspend only the synchronization scope.
    async fn suspend(
        &self,
        ctx: &ExecutionContext,
        holder: Option<&Arc<ConnectionHolder>>,
    ) -> Result<Option<SuspendedResources>> {
        if ctx.is_synchronization_active() {
            let synchronizations = ctx.take_synchronizations();
            for synchronization in &synchronizations {
                synchronization.suspend().await;
            }
            let suspended_holder = match holder {
                Some(_) => Some(ctx.unbind_resource(self.source.id())?),
                None => None,
            };
            let (name, read_only, isolation, was_active) = ctx.take_current_flags();
            debug!("suspended current transaction");
            Ok(Some(SuspendedResources {
                holder: suspended_holder,
                synchronizations: Some(synchronizations),
                name,
                read_only,
                isolation,
                was_active,
            }))
        } else if holder.is_some() {
            let suspended_holder = ctx.unbind_resource(self.source.id())?;
            debug!("suspended current transaction");
            Ok(Some(SuspendedResources {
                holder: Some(suspended_holder),
                synchronizations: None,
                name: None,
                read_only: false,
                isolation: None,
                was_active: false,
            }))
        } else {
            Ok(None)
        }
    }

    /// Restore a suspended transaction: rebind its holder, restore the
    /// context flags and reactivate its synchronizations.
    async fn resume(&self, ctx: &ExecutionContext, suspended: SuspendedResources) {
        if let Some(holder) = suspended.holder {
            if let Err(err) = ctx.bind_resource(self.source.id(), holder) {
                error!(error = %err, "could not rebind suspended connection holder");
            }
        }
        if let Some(synchronizations) = suspended.synchronizations {
            ctx.set_current_flags(
                suspended.name,
                suspended.read_only,
                suspended.isolation,
                suspended.was_active,
            );
            if let Err(err) = ctx.init_synchronization_with(synchronizations.clone()) {
                error!(error = %err, "could not reactivate suspended synchronizations");
            }
            for synchronization in synchronizations {
                synchronization.resume().await;
            }
        }
    }

    async fn process_commit(&self, mut status: TransactionStatus) -> Result<()> {
        if let Err(veto) = self.trigger_before_commit(&status).await {
            self.trigger_before_completion(&status).await;
            let surfaced = match self.rollback_after_commit_failure(&status).await {
                Ok(()) => veto,
                Err(rollback_err) => {
                    error!(error = %veto, "commit veto overridden by rollback failure");
                    rollback_err
                }
            };
            self.cleanup_after_completion(&mut status).await;
            return Err(surfaced);
        }
        self.trigger_before_completion(&status).await;

        let mut unexpected_rollback = false;
        let committed: Result<()> = if status.has_savepoint() {
            unexpected_rollback = status.is_global_rollback_only();
            self.release_held_savepoint(&mut status).await
        } else if status.is_new_transaction() {
            unexpected_rollback = status.is_global_rollback_only();
            self.do_commit(&status).await
        } else {
            // Participating in a surrounding transaction: nothing to commit
            // here. With fail-early configured, still surface a rollback-only
            // marker at this boundary.
            if self.config.fail_early_on_global_rollback_only {
                unexpected_rollback = status.is_global_rollback_only();
            }
            Ok(())
        };

        if let Err(err) = committed {
            let surfaced = self.handle_commit_failure(&status, err).await;
            self.cleanup_after_completion(&mut status).await;
            return Err(surfaced);
        }

        if unexpected_rollback {
            self.trigger_after_completion(&status, CompletionStatus::RolledBack)
                .await;
            self.cleanup_after_completion(&mut status).await;
            return Err(TransactionError::UnexpectedRollback(
                "transaction silently rolled back because it has been marked as rollback-only"
                    .into(),
            ));
        }

        self.trigger_after_commit(&status).await;
        self.trigger_after_completion(&status, CompletionStatus::Committed)
            .await;
        self.cleanup_after_completion(&mut status).await;
        Ok(())
    }

    async fn handle_commit_failure(
        &self,
        status: &TransactionStatus,
        err: TransactionError,
    ) -> TransactionError {
        let attempt_rollback = match &err {
            // A plain commit failure honors the configuration; a failure the
            // translator classified as a data-access condition always gets
            // the compensating rollback.
            TransactionError::TransactionSystem { .. } => self.config.rollback_on_commit_failure,
            _ => true,
        };
        if attempt_rollback {
            match self.rollback_after_commit_failure(status).await {
                Ok(()) => err,
                Err(rollback_err) => {
                    error!(error = %err, "commit failure overridden by rollback failure");
                    rollback_err
                }
            }
        } else {
            self.trigger_after_completion(status, CompletionStatus::Unknown)
                .await;
            err
        }
    }

    async fn rollback_after_commit_failure(&self, status: &TransactionStatus) -> Result<()> {
        let result = if status.is_new_transaction() {
            self.do_rollback(status).await
        } else if let Some(holder) = status.holder() {
            debug!("marking existing transaction as rollback-only after commit failure");
            holder.set_rollback_only();
            Ok(())
        } else {
            Ok(())
        };
        match result {
            Ok(()) => {
                self.trigger_after_completion(status, CompletionStatus::RolledBack)
                    .await;
                Ok(())
            }
            Err(err) => {
                self.trigger_after_completion(status, CompletionStatus::Unknown)
                    .await;
                Err(err)
            }
        }
    }

    async fn process_rollback(
        &self,
        mut status: TransactionStatus,
        unexpected: bool,
    ) -> Result<()> {
        let mut unexpected_rollback = unexpected;
        self.trigger_before_completion(&status).await;

        let rolled_back: Result<()> = if status.has_savepoint() {
            debug!("rolling back transaction to savepoint");
            self.rollback_to_held_savepoint(&mut status).await
        } else if status.is_new_transaction() {
            self.do_rollback(&status).await
        } else {
            if let Some(holder) = status.holder() {
                debug!("participating transaction failed - marking transaction as rollback-only");
                holder.set_rollback_only();
            } else {
                debug!("should roll back transaction but cannot - no transaction available");
            }
            // A participant surfaces the unexpected-rollback marker only when
            // configured to fail early; otherwise the owner's boundary does.
            if !self.config.fail_early_on_global_rollback_only {
                unexpected_rollback = false;
            }
            Ok(())
        };

        if let Err(err) = rolled_back {
            self.trigger_after_completion(&status, CompletionStatus::Unknown)
                .await;
            self.cleanup_after_completion(&mut status).await;
            return Err(err);
        }

        self.trigger_after_completion(&status, CompletionStatus::RolledBack)
            .await;
        let outcome = if unexpected_rollback {
            Err(TransactionError::UnexpectedRollback(
                "transaction rolled back because it has been marked as rollback-only".into(),
            ))
        } else {
            Ok(())
        };
        self.cleanup_after_completion(&mut status).await;
        outcome
    }

    async fn do_commit(&self, status: &TransactionStatus) -> Result<()> {
        debug!("committing transaction");
        let connection = self.status_connection(status)?;
        let result = connection.lock().await.commit().await;
        result.map_err(|cause| self.translate("commit", cause))
    }

    async fn do_rollback(&self, status: &TransactionStatus) -> Result<()> {
        debug!("rolling back transaction");
        let connection = self.status_connection(status)?;
        let result = connection.lock().await.rollback().await;
        result.map_err(|cause| self.translate("rollback", cause))
    }

    async fn release_held_savepoint(&self, status: &mut TransactionStatus) -> Result<()> {
        let savepoint = self.take_held_savepoint(status)?;
        let connection = self.status_connection(status)?;
        let result = connection.lock().await.release_savepoint(&savepoint).await;
        result.map_err(|cause| self.translate("releasing savepoint", cause))
    }

    async fn rollback_to_held_savepoint(&self, status: &mut TransactionStatus) -> Result<()> {
        let savepoint = self.take_held_savepoint(status)?;
        let connection = self.status_connection(status)?;
        {
            let mut guard = connection.lock().await;
            guard
                .rollback_to_savepoint(&savepoint)
                .await
                .map_err(|cause| self.translate("rolling back to savepoint", cause))?;
            guard
                .release_savepoint(&savepoint)
                .await
                .map_err(|cause| self.translate("releasing savepoint", cause))?;
        }
        // The savepoint rollback consumed the marker; the surrounding
        // transaction may still commit.
        if let Some(holder) = status.holder() {
            holder.reset_rollback_only();
        }
        Ok(())
    }

    fn take_held_savepoint(&self, status: &mut TransactionStatus) -> Result<Savepoint> {
        status
            .transaction
            .as_mut()
            .and_then(|tx| tx.savepoint.take())
            .ok_or_else(|| {
                TransactionError::IllegalState("transaction status holds no savepoint".into())
            })
    }

    fn status_connection(&self, status: &TransactionStatus) -> Result<SharedConnection> {
        let holder = status.holder().ok_or_else(|| {
            TransactionError::IllegalState(
                "transaction status does not carry an actual transaction".into(),
            )
        })?;
        self.holder_connection(holder)
    }

    fn holder_connection(&self, holder: &ConnectionHolder) -> Result<SharedConnection> {
        holder.connection().ok_or_else(|| {
            TransactionError::IllegalState("connection holder has no connection".into())
        })
    }

    fn translate(&self, task: &str, cause: DriverError) -> TransactionError {
        let translated = match &self.translator {
            Some(translator) => translator(task, None, &cause),
            None => default_translate(task, None, &cause),
        };
        translated.unwrap_or_else(|| TransactionError::TransactionSystem {
            task: task.to_string(),
            cause,
        })
    }

    async fn trigger_before_commit(&self, status: &TransactionStatus) -> Result<()> {
        if status.new_synchronization {
            for synchronization in status.context().synchronizations() {
                synchronization.before_commit(status.is_read_only()).await?;
            }
        }
        Ok(())
    }

    async fn trigger_before_completion(&self, status: &TransactionStatus) {
        if status.new_synchronization {
            for synchronization in status.context().synchronizations() {
                synchronization.before_completion().await;
            }
        }
    }

    async fn trigger_after_commit(&self, status: &TransactionStatus) {
        if status.new_synchronization {
            for synchronization in status.context().synchronizations() {
                synchronization.after_commit().await;
            }
        }
    }

    /// Detach the synchronization list and fire `after_completion`.
    ///
    /// Detaching first is what makes registering a new synchronization from
    /// inside the callback fail; the resource bindings are still in place
    /// until cleanup runs. A participating scope that owns the
    /// synchronization cannot know the final outcome of the surrounding
    /// transaction, so its listeners complete with
    /// [`CompletionStatus::Unknown`].
    async fn trigger_after_completion(
        &self,
        status: &TransactionStatus,
        completion: CompletionStatus,
    ) {
        if status.new_synchronization {
            let synchronizations = status.context().take_synchronizations();
            if !status.has_transaction() || status.is_new_transaction() {
                for synchronization in synchronizations {
                    synchronization.after_completion(completion).await;
                }
            } else if !synchronizations.is_empty() {
                debug!(
                    "cannot defer after-completion callbacks to the surrounding transaction - \
                     invoking immediately with unknown outcome"
                );
                for synchronization in synchronizations {
                    synchronization.after_completion(CompletionStatus::Unknown).await;
                }
            }
        }
    }

    /// Restore connection settings, unbind and release resources, and resume
    /// any suspended outer transaction. Failures here are logged and
    /// suppressed so they never mask the transaction outcome.
    async fn cleanup_after_completion(&self, status: &mut TransactionStatus) {
        let ctx = status.context().clone();
        if status.new_synchronization {
            ctx.clear_synchronization();
        }
        if status.is_new_transaction() {
            self.do_cleanup(status).await;
        }
        if let Some(suspended) = status.suspended.take() {
            debug!("resuming suspended transaction after completion of inner transaction");
            self.resume(&ctx, suspended).await;
        }
    }

    async fn do_cleanup(&self, status: &TransactionStatus) {
        let Some(tx) = status.transaction.as_ref() else {
            return;
        };
        if tx.new_holder {
            if let Err(err) = status.context().unbind_resource(self.source.id()) {
                warn!(error = %err, "connection holder was not bound at cleanup");
            }
        }
        if let Some(shared) = tx.holder.connection() {
            let mut connection = shared.lock().await;
            if tx.must_restore_auto_commit {
                if let Err(err) = connection.set_auto_commit(true).await {
                    debug!(error = %err, "could not restore auto-commit after transaction");
                }
            }
            if let Some(level) = tx.previous_isolation {
                if let Err(err) = connection.set_transaction_isolation(level).await {
                    debug!(error = %err, "could not restore isolation level after transaction");
                }
            }
            if tx.read_only {
                if let Err(err) = connection.set_read_only(false).await {
                    debug!(error = %err, "could not reset read-only flag after transaction");
                }
            }
            if tx.new_holder {
                debug!("releasing connection after transaction");
                if let Err(err) = connection.close().await {
                    debug!(error = %err, "could not close connection after transaction");
                }
            }
        }
        tx.holder.clear();
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("source", &self.source)
            .field("config", &self.config)
            .finish()
    }
}
