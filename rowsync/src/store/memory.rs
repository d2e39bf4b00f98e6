use rowsync_postgres::schema::TableName;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::RowSyncResult;
use crate::store::{DeleteResult, Row, RowStore, UpsertResult, validate_table_name};

#[derive(Debug, Default)]
struct Inner {
    tables: HashMap<TableName, BTreeMap<String, Row>>,
}

/// [`RowStore`] keeping rows in memory, with the same first-write-wins semantics as Postgres.
#[derive(Debug, Clone, Default)]
pub struct MemoryRowStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_row(&self, table_name: &TableName, id: &str) -> Option<Row> {
        let inner = self.inner.lock().await;

        inner
            .tables
            .get(table_name)
            .and_then(|rows| rows.get(id))
            .cloned()
    }

    /// Returns all rows of a table ordered by id.
    pub async fn get_rows(&self, table_name: &TableName) -> Vec<Row> {
        let inner = self.inner.lock().await;

        inner
            .tables
            .get(table_name)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl RowStore for MemoryRowStore {
    async fn upsert(&self, table_name: &TableName, row: &Row) -> RowSyncResult<UpsertResult> {
        validate_table_name(table_name)?;
        row.age_column()?;

        let mut inner = self.inner.lock().await;
        let rows = inner.tables.entry(table_name.clone()).or_default();

        if rows.contains_key(&row.id) {
            return Ok(UpsertResult::AlreadyPresent);
        }

        rows.insert(row.id.clone(), row.clone());

        Ok(UpsertResult::Inserted)
    }

    async fn delete(&self, table_name: &TableName, id: &str) -> RowSyncResult<DeleteResult> {
        validate_table_name(table_name)?;

        let mut inner = self.inner.lock().await;
        let removed = inner
            .tables
            .get_mut(table_name)
            .and_then(|rows| rows.remove(id));

        match removed {
            Some(_) => Ok(DeleteResult::Deleted),
            None => Ok(DeleteResult::Absent),
        }
    }

    async fn close(&self) {}
}
