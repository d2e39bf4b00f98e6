use rowsync_postgres::schema::TableName;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{ErrorKind, RowSyncResult};
use crate::rowsync_error;
use crate::store::{DeleteResult, Row, RowStore, UpsertResult};

/// A call made to a [`FaultyRowStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOperation {
    Upsert { table_name: TableName, row: Row },
    Delete { table_name: TableName, id: String },
}

#[derive(Debug, Default)]
struct Faults {
    failing_upserts: Option<(usize, ErrorKind)>,
    failing_deletes: Option<(usize, ErrorKind)>,
    delay: Option<Duration>,
}

/// Takes one failure from `fault`, returning the kind to fail with.
fn take_failure(fault: &mut Option<(usize, ErrorKind)>) -> Option<ErrorKind> {
    let (remaining, kind) = fault.as_mut()?;
    let kind = *kind;

    *remaining -= 1;
    if *remaining == 0 {
        *fault = None;
    }

    Some(kind)
}

#[derive(Debug)]
struct Inner {
    operations: Vec<StoreOperation>,
    faults: Faults,
}

/// Wraps a [`RowStore`], recording every call and injecting failures or delays on demand.
///
/// Failed calls are recorded too, injected failures never reach the wrapped store.
#[derive(Debug, Clone)]
pub struct FaultyRowStore<S> {
    wrapped_store: S,
    inner: Arc<Mutex<Inner>>,
}

impl<S> FaultyRowStore<S> {
    pub fn wrap(store: S) -> Self {
        let inner = Inner {
            operations: Vec::new(),
            faults: Faults::default(),
        };

        Self {
            wrapped_store: store,
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub fn inner(&self) -> &S {
        &self.wrapped_store
    }

    pub async fn operations(&self) -> Vec<StoreOperation> {
        self.inner.lock().await.operations.clone()
    }

    pub async fn clear_operations(&self) {
        self.inner.lock().await.operations.clear();
    }

    /// Makes the next `count` upserts fail with `kind`.
    pub async fn fail_next_upserts(&self, count: usize, kind: ErrorKind) {
        self.inner.lock().await.faults.failing_upserts = (count > 0).then_some((count, kind));
    }

    /// Makes the next `count` deletes fail with `kind`.
    pub async fn fail_next_deletes(&self, count: usize, kind: ErrorKind) {
        self.inner.lock().await.faults.failing_deletes = (count > 0).then_some((count, kind));
    }

    /// Delays every following operation by `delay`.
    pub async fn set_delay(&self, delay: Duration) {
        self.inner.lock().await.faults.delay = Some(delay);
    }
}

impl<S> RowStore for FaultyRowStore<S>
where
    S: RowStore + Sync,
{
    async fn upsert(&self, table_name: &TableName, row: &Row) -> RowSyncResult<UpsertResult> {
        let (failure, delay) = {
            let mut inner = self.inner.lock().await;
            inner.operations.push(StoreOperation::Upsert {
                table_name: table_name.clone(),
                row: row.clone(),
            });

            (
                take_failure(&mut inner.faults.failing_upserts),
                inner.faults.delay,
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(kind) = failure {
            return Err(rowsync_error!(kind, "Injected upsert failure"));
        }

        self.wrapped_store.upsert(table_name, row).await
    }

    async fn delete(&self, table_name: &TableName, id: &str) -> RowSyncResult<DeleteResult> {
        let (failure, delay) = {
            let mut inner = self.inner.lock().await;
            inner.operations.push(StoreOperation::Delete {
                table_name: table_name.clone(),
                id: id.to_owned(),
            });

            (
                take_failure(&mut inner.faults.failing_deletes),
                inner.faults.delay,
            )
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(kind) = failure {
            return Err(rowsync_error!(kind, "Injected delete failure"));
        }

        self.wrapped_store.delete(table_name, id).await
    }

    async fn close(&self) {
        self.wrapped_store.close().await
    }
}
