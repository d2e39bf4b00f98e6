//! Hosts the [`Reconciler`] inside a kube-runtime [`Controller`].
//!
//! The controller watches `PostgresWriter` objects, serializes reconciles per object and requeues
//! failed ones with an exponential backoff tracked per identity.

use futures::StreamExt;
use kube::Api;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use rowsync_config::shared::{BackoffConfig, ControllerConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel, wait_for_shutdown};
use crate::error::{ErrorKind, RowSyncError, RowSyncResult};
use crate::k8s::ResourceClient;
use crate::reconciler::Reconciler;
use crate::resource::{PostgresWriter, ResourceIdentity};
use crate::rowsync_error;
use crate::store::RowStore;

/// Tracks consecutive failures per identity to compute requeue delays.
#[derive(Debug)]
pub struct RequeueBackoff {
    config: BackoffConfig,
    failures: Mutex<HashMap<ResourceIdentity, u32>>,
}

impl RequeueBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Records a failed reconcile of `identity` and returns the delay before the next attempt.
    pub fn record_failure(&self, identity: &ResourceIdentity) -> Duration {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(identity.clone()).or_default();
        *count = count.saturating_add(1);

        self.config.delay_for(*count)
    }

    /// Forgets the failures of `identity` after a successful reconcile or once it is gone.
    pub fn reset(&self, identity: &ResourceIdentity) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity);
    }

    pub fn consecutive_failures(&self, identity: &ResourceIdentity) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .copied()
            .unwrap_or_default()
    }
}

/// State shared by every reconcile run by the controller.
#[derive(Debug)]
struct Context<C, S> {
    reconciler: Reconciler<C, S>,
    backoff: RequeueBackoff,
    reconcile_timeout: Duration,
    resync_interval: Option<Duration>,
}

impl<C, S> Context<C, S>
where
    C: ResourceClient,
    S: RowStore,
{
    fn new(reconciler: Reconciler<C, S>, config: &ControllerConfig) -> Self {
        Self {
            reconciler,
            backoff: RequeueBackoff::new(config.backoff.clone()),
            reconcile_timeout: config.reconcile_timeout(),
            resync_interval: config.resync_interval(),
        }
    }

    fn success_action(&self) -> Action {
        match self.resync_interval {
            Some(interval) => Action::requeue(interval),
            None => Action::await_change(),
        }
    }
}

async fn reconcile_writer<C, S>(
    writer: Arc<PostgresWriter>,
    context: Arc<Context<C, S>>,
) -> RowSyncResult<Action>
where
    C: ResourceClient,
    S: RowStore,
{
    let identity = ResourceIdentity::of(&writer);
    let deadline = Instant::now() + context.reconcile_timeout;

    let outcome = context.reconciler.reconcile(&identity, deadline).await?;
    debug!(%identity, ?outcome, "reconcile succeeded");

    context.backoff.reset(&identity);

    Ok(context.success_action())
}

fn requeue_on_error<C, S>(
    writer: Arc<PostgresWriter>,
    err: &RowSyncError,
    context: Arc<Context<C, S>>,
) -> Action {
    let identity = ResourceIdentity::of(&writer);
    let delay = context.backoff.record_failure(&identity);

    warn!(%identity, error = %err, ?delay, "reconcile failed, requeueing");

    Action::requeue(delay)
}

/// Drops the backoff state of objects the controller found gone before reconciling them.
///
/// Such objects never reach [`reconcile_writer`], so their failure count would otherwise stay.
fn forget_vanished_object(
    backoff: &RequeueBackoff,
    err: &controller::Error<RowSyncError, watcher::Error>,
) {
    if let controller::Error::ObjectNotFound(object) = err {
        let namespace = object.namespace.as_deref().unwrap_or("default");
        let identity = ResourceIdentity::new(namespace, object.name.as_str());

        debug!(%identity, "object no longer exists, dropping its backoff state");
        backoff.reset(&identity);
    }
}

#[derive(Debug)]
enum OperatorState {
    NotStarted,
    Started { controller: JoinHandle<()> },
}

/// Runs the reconcile loop for every `PostgresWriter` visible to the kube client.
///
/// The operator follows a start, shutdown and wait lifecycle: [`Operator::start`] spawns the
/// controller, [`Operator::shutdown`] asks it to stop once in-flight reconciles are done and
/// [`Operator::wait`] resolves when it stopped.
pub struct Operator<C, S> {
    config: Arc<ControllerConfig>,
    kube_client: kube::Client,
    context: Arc<Context<C, S>>,
    state: OperatorState,
    shutdown_tx: ShutdownTx,
}

impl<C, S> Operator<C, S>
where
    C: ResourceClient + 'static,
    S: RowStore + Send + Sync + 'static,
{
    pub fn new(
        config: ControllerConfig,
        kube_client: kube::Client,
        resource_client: C,
        store: S,
    ) -> Self {
        let (shutdown_tx, _) = create_shutdown_channel();

        let context = Context::new(Reconciler::new(resource_client, store), &config);

        Self {
            config: Arc::new(config),
            kube_client,
            context: Arc::new(context),
            state: OperatorState::NotStarted,
            shutdown_tx,
        }
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    pub fn store(&self) -> &S {
        self.context.reconciler.store()
    }

    /// Spawns the controller. Calling it on a started operator is a no-op.
    pub fn start(&mut self) {
        if matches!(self.state, OperatorState::Started { .. }) {
            return;
        }

        let api: Api<PostgresWriter> = match &self.config.watch_namespace {
            Some(namespace) => {
                info!(namespace = %namespace, "starting controller for a single namespace");
                Api::namespaced(self.kube_client.clone(), namespace)
            }
            None => {
                info!("starting controller for all namespaces");
                Api::all(self.kube_client.clone())
            }
        };

        let context = self.context.clone();
        let controller = Controller::new(api, watcher::Config::default())
            .graceful_shutdown_on(wait_for_shutdown(self.shutdown_tx.subscribe()))
            .run(
                reconcile_writer::<C, S>,
                requeue_on_error::<C, S>,
                self.context.clone(),
            )
            .for_each(move |result| {
                if let Err(err) = &result {
                    forget_vanished_object(&context.backoff, err);
                    // Reconcile errors were already logged by the error policy.
                    debug!(error = %err, "controller reported an error");
                }

                futures::future::ready(())
            });

        self.state = OperatorState::Started {
            controller: tokio::spawn(controller),
        };
    }

    /// Waits for the controller to stop. Returns immediately when it was never started.
    pub async fn wait(self) -> RowSyncResult<()> {
        let OperatorState::Started { controller } = self.state else {
            info!("operator was not started, nothing to wait for");

            return Ok(());
        };

        if let Err(err) = controller.await {
            error!("controller task failed: {}", err);

            return Err(rowsync_error!(
                ErrorKind::ControllerFailed,
                "Controller task failed",
                err
            ));
        }

        info!("controller stopped");

        Ok(())
    }

    /// Asks the controller to stop. In-flight reconciles are allowed to finish.
    pub fn shutdown(&self) {
        info!("trying to shut down the operator");

        if let Err(err) = self.shutdown_tx.shutdown() {
            error!("failed to send shutdown signal to the controller: {}", err);
            return;
        }

        info!("shut down signal successfully sent to the controller");
    }

    pub async fn shutdown_and_wait(self) -> RowSyncResult<()> {
        self.shutdown();
        self.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::memory::MemoryResourceClient;
    use crate::store::memory::MemoryRowStore;
    use crate::test_utils::resource::{create_writer, writer, writer_spec};
    use crate::test_utils::store::FaultyRowStore;
    use kube::runtime::reflector::ObjectRef;

    type TestContext = Context<MemoryResourceClient, FaultyRowStore<MemoryRowStore>>;

    fn context(resync_interval_secs: Option<u64>) -> Arc<TestContext> {
        let config = ControllerConfig {
            resync_interval_secs,
            backoff: BackoffConfig {
                initial_delay_ms: 100,
                max_delay_ms: 1_000,
                backoff_factor: 2.0,
            },
            ..ControllerConfig::default()
        };
        let reconciler = Reconciler::new(
            MemoryResourceClient::new(),
            FaultyRowStore::wrap(MemoryRowStore::new()),
        );

        Arc::new(Context::new(reconciler, &config))
    }

    fn students_writer() -> Arc<PostgresWriter> {
        Arc::new(writer(
            "default",
            "s1",
            writer_spec("students", "Alex", 30, "India"),
        ))
    }

    fn backoff() -> RequeueBackoff {
        RequeueBackoff::new(BackoffConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_factor: 2.0,
        })
    }

    #[test]
    fn delays_grow_per_identity_until_the_ceiling() {
        let backoff = backoff();
        let first = ResourceIdentity::new("default", "s1");
        let second = ResourceIdentity::new("default", "s2");

        assert_eq!(backoff.record_failure(&first), Duration::from_millis(100));
        assert_eq!(backoff.record_failure(&first), Duration::from_millis(200));
        assert_eq!(backoff.record_failure(&first), Duration::from_millis(400));
        assert_eq!(backoff.record_failure(&second), Duration::from_millis(100));

        for _ in 0..10 {
            backoff.record_failure(&first);
        }
        assert_eq!(backoff.record_failure(&first), Duration::from_secs(1));
        assert_eq!(backoff.consecutive_failures(&second), 1);
    }

    #[test]
    fn success_resets_the_delay() {
        let backoff = backoff();
        let identity = ResourceIdentity::new("default", "s1");

        backoff.record_failure(&identity);
        backoff.record_failure(&identity);
        backoff.reset(&identity);

        assert_eq!(backoff.consecutive_failures(&identity), 0);
        assert_eq!(backoff.record_failure(&identity), Duration::from_millis(100));
    }

    #[tokio::test]
    async fn failed_reconciles_requeue_with_growing_delay() {
        let context = context(None);
        let writer = students_writer();
        create_writer(context.reconciler.client(), (*writer).clone()).await;
        context
            .reconciler
            .store()
            .fail_next_upserts(2, ErrorKind::StoreConnectionFailed)
            .await;

        let err = reconcile_writer(writer.clone(), context.clone())
            .await
            .unwrap_err();
        assert_eq!(
            requeue_on_error(writer.clone(), &err, context.clone()),
            Action::requeue(Duration::from_millis(100))
        );

        let err = reconcile_writer(writer.clone(), context.clone())
            .await
            .unwrap_err();
        assert_eq!(
            requeue_on_error(writer.clone(), &err, context.clone()),
            Action::requeue(Duration::from_millis(200))
        );

        let identity = ResourceIdentity::of(&writer);
        assert_eq!(context.backoff.consecutive_failures(&identity), 2);

        // Success awaits the next change and starts the backoff over.
        let action = reconcile_writer(writer.clone(), context.clone())
            .await
            .unwrap();
        assert_eq!(action, Action::await_change());
        assert_eq!(context.backoff.consecutive_failures(&identity), 0);
    }

    #[tokio::test]
    async fn success_requeues_after_resync_interval() {
        let context = context(Some(300));
        let writer = students_writer();
        create_writer(context.reconciler.client(), (*writer).clone()).await;

        let action = reconcile_writer(writer, context).await.unwrap();

        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn absent_resource_drops_backoff_state() {
        let context = context(None);
        let writer = students_writer();
        let identity = ResourceIdentity::of(&writer);
        context.backoff.record_failure(&identity);

        let action = reconcile_writer(writer, context.clone()).await.unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(context.backoff.consecutive_failures(&identity), 0);
    }

    #[test]
    fn vanished_objects_drop_backoff_state() {
        let backoff = backoff();
        let identity = ResourceIdentity::new("default", "s1");
        let other = ResourceIdentity::new("default", "s2");
        backoff.record_failure(&identity);
        backoff.record_failure(&other);

        let object = ObjectRef::<PostgresWriter>::new("s1")
            .within("default")
            .erase();
        forget_vanished_object(&backoff, &controller::Error::ObjectNotFound(object));

        assert_eq!(backoff.consecutive_failures(&identity), 0);
        assert_eq!(backoff.consecutive_failures(&other), 1);
    }
}
