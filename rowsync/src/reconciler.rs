//! Drives a single `PostgresWriter` to convergence.
//!
//! A reconcile fetches the latest object and takes one of three paths:
//!
//! - a live object without the required finalizers first gets them, so that its row can never
//!   outlive it;
//! - an object marked for deletion has its row deleted, then its finalizer removed;
//! - any other live object has its row written and its status updated.
//!
//! Every external call is bounded by the deadline passed to [`Reconciler::reconcile`].

use rowsync_postgres::schema::TableName;
use std::future::Future;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, RowSyncResult};
use crate::k8s::ResourceClient;
use crate::resource::{
    PostgresWriter, PostgresWriterStatus, ResourceIdentity, ResourceLifecycle, WriteResult,
};
use crate::store::{DeleteResult, Row, RowStore, UpsertResult};

/// Result of a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The object no longer exists; nothing was done.
    ResourceAbsent,
    /// The row of a live object was written.
    Converged(UpsertResult),
    /// The row of an object being deleted was removed.
    CleanedUp(DeleteResult),
}

/// Awaits `future` until `deadline`, failing with a timeout error past it.
async fn with_deadline<F, T>(deadline: Instant, future: F) -> RowSyncResult<T>
where
    F: Future<Output = RowSyncResult<T>>,
{
    tokio::time::timeout_at(deadline, future).await?
}

#[derive(Debug)]
pub struct Reconciler<C, S> {
    client: C,
    store: S,
}

impl<C, S> Reconciler<C, S>
where
    C: ResourceClient,
    S: RowStore,
{
    pub fn new(client: C, store: S) -> Self {
        Self { client, store }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reconciles the resource identified by `identity`.
    ///
    /// An error means the resource must be reconciled again later. The operation is idempotent
    /// and may be invoked any number of times for the same identity.
    #[tracing::instrument(skip_all, fields(namespace = %identity.namespace, name = %identity.name))]
    pub async fn reconcile(
        &self,
        identity: &ResourceIdentity,
        deadline: Instant,
    ) -> RowSyncResult<ReconcileOutcome> {
        match self.reconcile_resource(identity, deadline).await {
            Err(err) if err.kind() == ErrorKind::ResourceNotFound => {
                debug!("resource disappeared while reconciling");
                Ok(ReconcileOutcome::ResourceAbsent)
            }
            result => result,
        }
    }

    async fn reconcile_resource(
        &self,
        identity: &ResourceIdentity,
        deadline: Instant,
    ) -> RowSyncResult<ReconcileOutcome> {
        let Some(mut resource) = with_deadline(deadline, self.client.get(identity)).await? else {
            debug!("resource no longer exists, nothing to reconcile");
            return Ok(ReconcileOutcome::ResourceAbsent);
        };

        if resource.lifecycle() == ResourceLifecycle::LiveUnfinalized {
            resource.set_required_finalizers();
            resource = with_deadline(deadline, self.client.update(&resource)).await?;

            info!("registered cleanup finalizer");
        }

        match resource.lifecycle() {
            ResourceLifecycle::Deleting => self.clean_up(identity, resource, deadline).await,
            ResourceLifecycle::LiveFinalized | ResourceLifecycle::LiveUnfinalized => {
                self.converge(identity, &resource, deadline).await
            }
        }
    }

    /// Deletes the row, then releases the resource by removing the cleanup finalizer.
    async fn clean_up(
        &self,
        identity: &ResourceIdentity,
        mut resource: PostgresWriter,
        deadline: Instant,
    ) -> RowSyncResult<ReconcileOutcome> {
        let table_name = TableName::parse(&resource.spec.table)?;
        let row_id = identity.row_id();

        let result = with_deadline(deadline, self.store.delete(&table_name, &row_id)).await?;

        info!(table = %table_name, row_id = %row_id, ?result, "deleted row of resource being deleted");

        if !resource.remove_cleanup_finalizer() {
            debug!("cleanup finalizer already removed");
            return Ok(ReconcileOutcome::CleanedUp(result));
        }

        with_deadline(deadline, self.client.update(&resource)).await?;

        info!("removed cleanup finalizer");

        Ok(ReconcileOutcome::CleanedUp(result))
    }

    /// Writes the row of a live resource and records the outcome in its status.
    async fn converge(
        &self,
        identity: &ResourceIdentity,
        resource: &PostgresWriter,
        deadline: Instant,
    ) -> RowSyncResult<ReconcileOutcome> {
        match self.write_row(identity, resource, deadline).await {
            Ok(result) => {
                self.record_result(identity, resource, WriteResult::Success, deadline)
                    .await;

                Ok(ReconcileOutcome::Converged(result))
            }
            Err(err) => {
                warn!(error = %err, "failed to write row");

                self.record_result(identity, resource, WriteResult::Failed, deadline)
                    .await;

                Err(err)
            }
        }
    }

    async fn write_row(
        &self,
        identity: &ResourceIdentity,
        resource: &PostgresWriter,
        deadline: Instant,
    ) -> RowSyncResult<UpsertResult> {
        let table_name = TableName::parse(&resource.spec.table)?;
        let row = Row::from_spec(identity, &resource.spec);

        let result = with_deadline(deadline, self.store.upsert(&table_name, &row)).await?;

        debug!(table = %table_name, row_id = %row.id, ?result, "upserted row");

        Ok(result)
    }

    /// Writes `result` into the status when it differs from the current one.
    ///
    /// Failures are logged and otherwise ignored.
    async fn record_result(
        &self,
        identity: &ResourceIdentity,
        resource: &PostgresWriter,
        result: WriteResult,
        deadline: Instant,
    ) {
        if resource.write_result() == Some(result) {
            return;
        }

        let status = PostgresWriterStatus {
            result: Some(result),
        };

        if let Err(err) = with_deadline(deadline, self.client.update_status(identity, &status)).await
        {
            warn!(error = %err, ?result, "failed to update resource status");
        }
    }
}
