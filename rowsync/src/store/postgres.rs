use rowsync_config::shared::{IntoConnectOptions, PgConnectionConfig};
use rowsync_postgres::schema::TableName;
use rustls::ClientConfig;
use std::io::BufReader;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_postgres::tls::MakeTlsConnect;
use tokio_postgres::{Client, Config, Connection, NoTls, Socket};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::{Instrument, debug, error, info, warn};

use crate::crypto::install_crypto_provider;
use crate::error::RowSyncResult;
use crate::store::{DeleteResult, Row, RowStore, UpsertResult, validate_table_name};

/// Spawns a background task driving a Postgres connection until it terminates.
fn spawn_postgres_connection<T>(connection: Connection<Socket, T::Stream>)
where
    T: MakeTlsConnect<Socket>,
    T::Stream: Send + 'static,
{
    let span = tracing::Span::current();
    let task = async move {
        if let Err(e) = connection.await {
            error!("an error occurred during the Postgres connection: {}", e);
            return;
        }

        info!("postgres connection terminated successfully")
    }
    .instrument(span);

    tokio::spawn(task);
}

/// Opens a new connection described by `pg_connection_config`, using TLS when enabled.
async fn connect(pg_connection_config: &PgConnectionConfig) -> RowSyncResult<Client> {
    let config: Config = pg_connection_config.with_db();

    if !pg_connection_config.tls.enabled {
        let (client, connection) = config.connect(NoTls).await?;
        spawn_postgres_connection::<NoTls>(connection);

        info!("successfully connected to postgres without tls");

        return Ok(client);
    }

    install_crypto_provider();

    let mut root_store = rustls::RootCertStore::empty();
    let mut root_certs_reader =
        BufReader::new(pg_connection_config.tls.trusted_root_certs.as_bytes());
    for cert in rustls_pemfile::certs(&mut root_certs_reader) {
        let cert = cert?;
        root_store.add(cert)?;
    }

    let tls_config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let (client, connection) = config.connect(MakeRustlsConnect::new(tls_config)).await?;
    spawn_postgres_connection::<MakeRustlsConnect>(connection);

    info!("successfully connected to postgres with tls");

    Ok(client)
}

/// Returns `true` when the connection is open and answers a trivial query.
async fn is_alive(client: &Client) -> bool {
    if client.is_closed() {
        return false;
    }

    match client.simple_query("select 1").await {
        Ok(_) => true,
        Err(err) => {
            warn!(error = %err, "postgres liveness check failed");
            false
        }
    }
}

/// [`RowStore`] writing to Postgres over a single lazily opened connection.
///
/// The connection is checked before every operation and replaced once when it is found dead.
/// Clones share the connection.
#[derive(Debug, Clone)]
pub struct PostgresRowStore {
    config: Arc<PgConnectionConfig>,
    client: Arc<Mutex<Option<Arc<Client>>>>,
}

impl PostgresRowStore {
    pub fn new(config: PgConnectionConfig) -> Self {
        Self {
            config: Arc::new(config),
            client: Arc::new(Mutex::new(None)),
        }
    }

    /// Returns a live client, connecting or reconnecting as needed.
    async fn client(&self) -> RowSyncResult<Arc<Client>> {
        let current = self.client.lock().await.clone();

        if let Some(client) = &current {
            if is_alive(client).await {
                return Ok(client.clone());
            }

            warn!("postgres connection is no longer usable, reconnecting");
        }

        let mut guard = self.client.lock().await;

        // Another reconcile may have replaced the connection while the lock was released.
        match (guard.as_ref(), current.as_ref()) {
            (Some(latest), Some(stale)) if !Arc::ptr_eq(latest, stale) => {
                return Ok(latest.clone());
            }
            (Some(latest), None) => return Ok(latest.clone()),
            _ => {}
        }

        let client = Arc::new(connect(&self.config).await?);
        *guard = Some(client.clone());

        Ok(client)
    }
}

impl RowStore for PostgresRowStore {
    async fn upsert(&self, table_name: &TableName, row: &Row) -> RowSyncResult<UpsertResult> {
        validate_table_name(table_name)?;
        let age = row.age_column()?;

        let query = format!(
            "insert into {} (id, name, age, country) values ($1, $2, $3, $4) on conflict (id) do nothing",
            table_name.as_quoted_identifier()
        );

        let client = self.client().await?;
        let inserted = client
            .execute(&query, &[&row.id, &row.name, &age, &row.country])
            .await?;

        debug!(table = %table_name, id = %row.id, inserted, "row upserted");

        if inserted == 0 {
            Ok(UpsertResult::AlreadyPresent)
        } else {
            Ok(UpsertResult::Inserted)
        }
    }

    async fn delete(&self, table_name: &TableName, id: &str) -> RowSyncResult<DeleteResult> {
        validate_table_name(table_name)?;

        let query = format!(
            "delete from {} where id = $1",
            table_name.as_quoted_identifier()
        );

        let client = self.client().await?;
        let deleted = client.execute(&query, &[&id]).await?;

        debug!(table = %table_name, id, deleted, "row deleted");

        if deleted == 0 {
            Ok(DeleteResult::Absent)
        } else {
            Ok(DeleteResult::Deleted)
        }
    }

    async fn close(&self) {
        if self.client.lock().await.take().is_some() {
            info!("closed postgres connection");
        }
    }
}
