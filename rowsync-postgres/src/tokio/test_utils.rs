use crate::schema::TableName;
use rowsync_config::shared::{IntoConnectOptions, PgConnectionConfig};
use tokio::runtime::Handle;
use tokio_postgres::{Client, NoTls};
use tracing::info;

/// A row as stored in a writer table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRow {
    pub id: String,
    pub name: String,
    pub age: i32,
    pub country: String,
}

/// Postgres database wrapper for tests.
///
/// The database is created on construction and dropped together with the wrapper.
pub struct PgDatabase {
    pub config: PgConnectionConfig,
    pub client: Client,
}

impl PgDatabase {
    /// Creates a new database described by `config` and connects to it.
    pub async fn new(config: PgConnectionConfig) -> Self {
        let client = create_pg_database(&config).await;

        Self { config, client }
    }

    /// Creates a table with the layout the row store writes to.
    pub async fn create_writer_table(&self, table_name: &TableName) {
        if let Some(schema) = &table_name.schema {
            let query = format!(
                "create schema if not exists {}",
                pg_escape::quote_identifier(schema)
            );
            self.client
                .execute(&query, &[])
                .await
                .expect("Failed to create schema");
        }

        let query = format!(
            "create table {} (id text primary key, name text, age integer, country text)",
            table_name.as_quoted_identifier()
        );
        self.client
            .execute(&query, &[])
            .await
            .expect("Failed to create writer table");
    }

    /// Returns the row stored under `id`, if any.
    pub async fn fetch_row(&self, table_name: &TableName, id: &str) -> Option<StoredRow> {
        let query = format!(
            "select id, name, age, country from {} where id = $1",
            table_name.as_quoted_identifier()
        );

        self.client
            .query_opt(&query, &[&id])
            .await
            .expect("Failed to fetch row")
            .map(|row| StoredRow {
                id: row.get(0),
                name: row.get(1),
                age: row.get(2),
                country: row.get(3),
            })
    }

    /// Returns the number of rows in the table.
    pub async fn count_rows(&self, table_name: &TableName) -> i64 {
        let query = format!(
            "select count(*) from {}",
            table_name.as_quoted_identifier()
        );

        self.client
            .query_one(&query, &[])
            .await
            .expect("Failed to count rows")
            .get(0)
    }

    /// Terminates every other session connected to this database.
    ///
    /// Used to simulate a server side connection loss.
    pub async fn terminate_other_connections(&self) -> u64 {
        self.client
            .query(
                "select pg_terminate_backend(pid) from pg_stat_activity \
                 where datname = $1 and pid <> pg_backend_pid()",
                &[&self.config.name],
            )
            .await
            .expect("Failed to terminate connections")
            .len() as u64
    }

    /// Executes arbitrary SQL on the database.
    pub async fn run_sql(&self, sql: &str) -> Result<u64, tokio_postgres::Error> {
        self.client.execute(sql, &[]).await
    }
}

impl Drop for PgDatabase {
    fn drop(&mut self) {
        // `block_in_place` needs a multithreaded runtime to offload the current tasks.
        let config = self.config.clone();
        tokio::task::block_in_place(move || {
            Handle::current().block_on(async move { drop_pg_database(&config).await });
        });
    }
}

/// Creates a new Postgres database and returns a client connected to it.
///
/// # Panics
/// Panics if connection or database creation fails.
pub async fn create_pg_database(config: &PgConnectionConfig) -> Client {
    let (client, connection) = {
        let config: tokio_postgres::Config = config.without_db();
        config
            .connect(NoTls)
            .await
            .expect("Failed to connect to Postgres")
    };

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            info!("connection error: {e}");
        }
    });

    client
        .execute(
            &*format!(
                "create database {}",
                pg_escape::quote_identifier(&config.name)
            ),
            &[],
        )
        .await
        .expect("Failed to create database");

    connect_to_pg_database(config).await
}

/// Connects to an existing Postgres database.
pub async fn connect_to_pg_database(config: &PgConnectionConfig) -> Client {
    let (client, connection) = {
        let config: tokio_postgres::Config = config.with_db();
        config
            .connect(NoTls)
            .await
            .expect("Failed to connect to Postgres")
    };

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            info!("connection error: {e}");
        }
    });

    client
}

/// Drops a Postgres database after terminating its remaining sessions.
///
/// # Panics
/// Panics if any database operation fails.
pub async fn drop_pg_database(config: &PgConnectionConfig) {
    let (client, connection) = {
        let config: tokio_postgres::Config = config.without_db();
        config
            .connect(NoTls)
            .await
            .expect("Failed to connect to Postgres")
    };

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            info!("connection error: {e}");
        }
    });

    client
        .execute(
            "select pg_terminate_backend(pg_stat_activity.pid) from pg_stat_activity \
             where pg_stat_activity.datname = $1 and pid <> pg_backend_pid()",
            &[&config.name],
        )
        .await
        .expect("Failed to terminate database connections");

    client
        .execute(
            &*format!(
                "drop database if exists {}",
                pg_escape::quote_identifier(&config.name)
            ),
            &[],
        )
        .await
        .expect("Failed to destroy database");
}
