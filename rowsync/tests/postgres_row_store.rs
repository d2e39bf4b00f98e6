#![cfg(feature = "test-utils")]

use rowsync::error::ErrorKind;
use rowsync::k8s::ResourceClient;
use rowsync::k8s::memory::MemoryResourceClient;
use rowsync::reconciler::{ReconcileOutcome, Reconciler};
use rowsync::store::postgres::PostgresRowStore;
use rowsync::store::{DeleteResult, Row, RowStore, UpsertResult};
use rowsync::test_utils::database::{spawn_database, test_table_name};
use rowsync::test_utils::resource::{create_writer, writer, writer_spec};
use rowsync_postgres::schema::TableName;
use rowsync_postgres::tokio::test_utils::StoredRow;
use rowsync_telemetry::tracing::init_test_tracing;
use std::time::Duration;
use tokio::time::Instant;

fn row(id: &str, name: &str, age: u32, country: &str) -> Row {
    Row {
        id: id.to_owned(),
        name: name.to_owned(),
        age,
        country: country.to_owned(),
    }
}

fn stored(id: &str, name: &str, age: i32, country: &str) -> StoredRow {
    StoredRow {
        id: id.to_owned(),
        name: name.to_owned(),
        age,
        country: country.to_owned(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upsert_keeps_first_write() {
    init_test_tracing();

    let database = spawn_database().await;
    let table_name = test_table_name("students");
    database.create_writer_table(&table_name).await;

    let store = PostgresRowStore::new(database.config.clone());

    let result = store
        .upsert(&table_name, &row("ns/a", "Alex", 30, "India"))
        .await
        .unwrap();
    assert_eq!(result, UpsertResult::Inserted);

    let result = store
        .upsert(&table_name, &row("ns/a", "Alex", 31, "France"))
        .await
        .unwrap();
    assert_eq!(result, UpsertResult::AlreadyPresent);

    assert_eq!(
        database.fetch_row(&table_name, "ns/a").await,
        Some(stored("ns/a", "Alex", 30, "India"))
    );
    assert_eq!(database.count_rows(&table_name).await, 1);

    store.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_delete_is_idempotent() {
    init_test_tracing();

    let database = spawn_database().await;
    let table_name = test_table_name("students");
    database.create_writer_table(&table_name).await;

    let store = PostgresRowStore::new(database.config.clone());
    store
        .upsert(&table_name, &row("ns/a", "Alex", 30, "India"))
        .await
        .unwrap();

    let result = store.delete(&table_name, "ns/a").await.unwrap();
    assert_eq!(result, DeleteResult::Deleted);

    let result = store.delete(&table_name, "ns/a").await.unwrap();
    assert_eq!(result, DeleteResult::Absent);

    assert_eq!(database.count_rows(&table_name).await, 0);

    store.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_store_reconnects_after_connection_loss() {
    init_test_tracing();

    let database = spawn_database().await;
    let table_name = test_table_name("students");
    database.create_writer_table(&table_name).await;

    let store = PostgresRowStore::new(database.config.clone());
    store
        .upsert(&table_name, &row("ns/a", "Alex", 30, "India"))
        .await
        .unwrap();

    assert!(database.terminate_other_connections().await >= 1);

    let result = store
        .upsert(&table_name, &row("ns/b", "Sam", 25, "Peru"))
        .await
        .unwrap();
    assert_eq!(result, UpsertResult::Inserted);
    assert_eq!(database.count_rows(&table_name).await, 2);

    // A closed store connects again on the next operation.
    store.close().await;
    let result = store.delete(&table_name, "ns/b").await.unwrap();
    assert_eq!(result, DeleteResult::Deleted);

    store.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_values_and_table_names_are_not_interpolated() {
    init_test_tracing();

    let database = spawn_database().await;
    let table_name = TableName::parse("Demo Schema.Writers \"v1\"").unwrap();
    database.create_writer_table(&table_name).await;

    let store = PostgresRowStore::new(database.config.clone());
    let name = "Robert'); drop table students; --";
    let country = "Côte d'Ivoire";

    store
        .upsert(&table_name, &row("ns/a", name, 30, country))
        .await
        .unwrap();

    assert_eq!(
        database.fetch_row(&table_name, "ns/a").await,
        Some(stored("ns/a", name, 30, country))
    );

    store.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_table_is_a_schema_error() {
    init_test_tracing();

    let database = spawn_database().await;
    let store = PostgresRowStore::new(database.config.clone());

    let err = store
        .upsert(
            &test_table_name("missing"),
            &row("ns/a", "Alex", 30, "India"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreSchemaError);
    // The server message names the relation.
    assert!(err.detail().unwrap().contains("test.missing"));

    let err = store
        .upsert(
            &TableName::new(None, "missing".to_owned()),
            &row("ns/a", "Alex", 30, "India"),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreSchemaError);

    store.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_age_outside_column_range_is_rejected() {
    init_test_tracing();

    let database = spawn_database().await;
    let table_name = test_table_name("students");
    database.create_writer_table(&table_name).await;

    let store = PostgresRowStore::new(database.config.clone());

    let err = store
        .upsert(&table_name, &row("ns/a", "Alex", u32::MAX, "India"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidData);
    assert_eq!(database.count_rows(&table_name).await, 0);

    store.close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reconciler_syncs_row_with_resource_lifecycle() {
    init_test_tracing();

    let database = spawn_database().await;
    let table_name = test_table_name("students");
    database.create_writer_table(&table_name).await;

    let reconciler = Reconciler::new(
        MemoryResourceClient::new(),
        PostgresRowStore::new(database.config.clone()),
    );
    let identity = create_writer(
        reconciler.client(),
        writer("default", "s1", writer_spec("test.students", "Alex", 30, "India")),
    )
    .await;
    let deadline = || Instant::now() + Duration::from_secs(10);

    let outcome = reconciler.reconcile(&identity, deadline()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Converged(UpsertResult::Inserted));
    assert_eq!(
        database.fetch_row(&table_name, "default/s1").await,
        Some(stored("default/s1", "Alex", 30, "India"))
    );

    reconciler.client().request_deletion(&identity).await.unwrap();
    let outcome = reconciler.reconcile(&identity, deadline()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::CleanedUp(DeleteResult::Deleted));

    assert_eq!(database.fetch_row(&table_name, "default/s1").await, None);
    assert!(reconciler.client().get(&identity).await.unwrap().is_none());

    reconciler.store().close().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_mixed_case_table_resolves_like_unquoted_sql() {
    init_test_tracing();

    let database = spawn_database().await;
    database
        .run_sql("create table Students (id text primary key, name text, age integer, country text)")
        .await
        .unwrap();
    let table_name = TableName::new(None, "students".to_owned());

    let reconciler = Reconciler::new(
        MemoryResourceClient::new(),
        PostgresRowStore::new(database.config.clone()),
    );
    let identity = create_writer(
        reconciler.client(),
        writer("default", "s1", writer_spec("Students", "Alex", 30, "India")),
    )
    .await;
    let deadline = || Instant::now() + Duration::from_secs(10);

    let outcome = reconciler.reconcile(&identity, deadline()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Converged(UpsertResult::Inserted));
    assert_eq!(
        database.fetch_row(&table_name, "default/s1").await,
        Some(stored("default/s1", "Alex", 30, "India"))
    );

    reconciler.client().request_deletion(&identity).await.unwrap();
    let outcome = reconciler.reconcile(&identity, deadline()).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::CleanedUp(DeleteResult::Deleted));

    assert_eq!(database.count_rows(&table_name).await, 0);
    assert!(reconciler.client().get(&identity).await.unwrap().is_none());

    reconciler.store().close().await;
}
