use rowsync_config::shared::{PgConnectionConfig, TlsConfig};
use rowsync_postgres::schema::TableName;
use rowsync_postgres::tokio::test_utils::PgDatabase;
use uuid::Uuid;

/// Schema holding the tables created by tests.
const TEST_DATABASE_SCHEMA: &str = "test";

/// Creates a [`TableName`] in the test schema.
pub fn test_table_name(name: &str) -> TableName {
    TableName::new(Some(TEST_DATABASE_SCHEMA.to_owned()), name.to_owned())
}

/// Returns the [`PgConnectionConfig`] to connect to the local instance of Postgres.
///
/// Every call picks a fresh random database name.
pub fn local_pg_connection_config() -> PgConnectionConfig {
    PgConnectionConfig {
        host: "localhost".to_owned(),
        port: 5430,
        name: Uuid::new_v4().to_string(),
        username: "postgres".to_owned(),
        password: Some("postgres".to_owned().into()),
        tls: TlsConfig::disabled(),
        connect_timeout_ms: Some(5_000),
    }
}

/// Creates a new database with a unique name, dropped when the returned value is dropped.
pub async fn spawn_database() -> PgDatabase {
    PgDatabase::new(local_pg_connection_config()).await
}
