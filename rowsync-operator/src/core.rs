use crate::health::{Readiness, start_health_server};
use rowsync::controller::Operator;
use rowsync::k8s::ResourceClient;
use rowsync::k8s::http::HttpResourceClient;
use rowsync::store::RowStore;
use rowsync::store::postgres::PostgresRowStore;
use rowsync_config::shared::{ControllerConfig, HealthConfig, OperatorConfig, PgConnectionConfig};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, info, warn};

/// Starts the operator with the provided configuration.
///
/// Serves the health endpoints, runs the controller until a shutdown signal arrives and then
/// releases the row store connection.
pub async fn start_operator_with_config(operator_config: OperatorConfig) -> anyhow::Result<()> {
    info!("starting operator service");

    log_config(&operator_config);

    let kube_client = kube::Client::try_default().await?;
    let resource_client = HttpResourceClient::new(kube_client.clone());
    let store = PostgresRowStore::new(operator_config.database);

    let readiness = Readiness::new();
    let health_server = start_health_server(&operator_config.health, readiness.clone())?;
    let health_handle = health_server.handle();
    let health_task = tokio::spawn(health_server);

    let operator = Operator::new(
        operator_config.controller,
        kube_client,
        resource_client,
        store.clone(),
    );
    let result = start_operator(operator, readiness).await;

    health_handle.stop(true).await;
    match health_task.await {
        Ok(Ok(())) => info!("health server stopped"),
        Ok(Err(err)) => warn!("health server failed: {}", err),
        Err(err) => warn!("health server task failed: {}", err),
    }

    store.close().await;

    result?;

    info!("operator service completed");

    Ok(())
}

fn log_config(config: &OperatorConfig) {
    log_pg_connection_config(&config.database);
    log_controller_config(&config.controller);
    log_health_config(&config.health);
}

fn log_pg_connection_config(config: &PgConnectionConfig) {
    debug!(
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        tls_enabled = config.tls.enabled,
        "row store postgres connection config",
    );
}

fn log_controller_config(config: &ControllerConfig) {
    debug!(
        watch_namespace = config.watch_namespace.as_deref().unwrap_or("*"),
        reconcile_timeout_ms = config.reconcile_timeout_ms,
        resync_interval_secs = config.resync_interval_secs,
        initial_delay_ms = config.backoff.initial_delay_ms,
        max_delay_ms = config.backoff.max_delay_ms,
        backoff_factor = config.backoff.backoff_factor,
        "controller config"
    );
}

fn log_health_config(config: &HealthConfig) {
    debug!(host = config.host, port = config.port, "health config");
}

/// Runs the operator until SIGTERM or SIGINT, then shuts it down gracefully.
///
/// Readiness is reported while the controller runs and withdrawn as soon as a shutdown starts.
async fn start_operator<C, S>(mut operator: Operator<C, S>, readiness: Readiness) -> anyhow::Result<()>
where
    C: ResourceClient + 'static,
    S: RowStore + Send + Sync + 'static,
{
    // Listen for SIGTERM, sent by Kubernetes before SIGKILL during pod termination.
    let mut sigterm = signal(SignalKind::terminate())?;

    operator.start();
    readiness.set_ready(true);

    let shutdown_tx = operator.shutdown_tx();
    let shutdown_readiness = readiness.clone();
    let shutdown_handle = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT (Ctrl+C) received, shutting down operator");
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down operator");
            }
        }

        shutdown_readiness.set_ready(false);

        if let Err(e) = shutdown_tx.shutdown() {
            warn!("failed to send shutdown signal: {:?}", e);
            return;
        }

        info!("operator shutdown signal sent")
    });

    // Waits for in-flight reconciles once shutdown was requested.
    let result = operator.wait().await;
    readiness.set_ready(false);

    // The controller may stop on its own, in which case the signal listener is still running.
    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    result?;

    Ok(())
}
