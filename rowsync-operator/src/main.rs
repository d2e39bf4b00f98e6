use crate::config::load_operator_config;
use crate::core::start_operator_with_config;
use kube::CustomResourceExt;
use rowsync::resource::PostgresWriter;
use rowsync_config::Environment;
use rowsync_config::shared::OperatorConfig;
use rowsync_telemetry::tracing::init_tracing_with_instance;
use std::sync::Arc;
use tracing::{error, info};

mod config;
mod core;
mod health;

fn main() -> anyhow::Result<()> {
    // `crd` prints the custom resource definition and exits, without touching configuration.
    if std::env::args().nth(1).as_deref() == Some("crd") {
        println!("{}", serde_json::to_string_pretty(&PostgresWriter::crd())?);

        return Ok(());
    }

    let operator_config = load_operator_config()?;

    let _log_flusher =
        init_tracing_with_instance(env!("CARGO_BIN_NAME"), operator_config.instance.clone())?;

    // Initialize Sentry before the async runtime starts
    let _sentry_guard = init_sentry(&operator_config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(operator_config))?;

    Ok(())
}

async fn async_main(operator_config: OperatorConfig) -> anyhow::Result<()> {
    if let Err(err) = start_operator_with_config(operator_config).await {
        sentry::integrations::anyhow::capture_anyhow(&err);
        error!("an error occurred in the operator: {err}");

        return Err(err);
    }

    Ok(())
}

/// Initializes Sentry when a DSN is configured.
///
/// Panics are captured and every event is tagged with the "operator" service.
fn init_sentry(config: &OperatorConfig) -> anyhow::Result<Option<sentry::ClientInitGuard>> {
    let Some(sentry_config) = &config.sentry else {
        info!("sentry not configured for operator, skipping initialization");

        return Ok(None);
    };

    info!("initializing sentry with supplied dsn");

    let environment = Environment::load()?;
    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(sentry_config.dsn.parse()?),
        environment: Some(environment.to_string().into()),
        integrations: vec![Arc::new(
            sentry::integrations::panic::PanicIntegration::new(),
        )],
        ..Default::default()
    });

    sentry::configure_scope(|scope| {
        scope.set_tag("service", "operator");
        if let Some(instance) = &config.instance {
            scope.set_tag("instance", instance);
        }
    });

    Ok(Some(guard))
}
