use rowsync_postgres::schema::TableName;
use std::future::Future;

use crate::bail;
use crate::error::{ErrorKind, RowSyncResult};
use crate::resource::{PostgresWriterSpec, ResourceIdentity};

/// A row mirroring one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// `namespace/name` of the resource.
    pub id: String,
    pub name: String,
    pub age: u32,
    pub country: String,
}

impl Row {
    /// Builds the row for `identity` with the fields of `spec` taken verbatim.
    pub fn from_spec(identity: &ResourceIdentity, spec: &PostgresWriterSpec) -> Self {
        Self {
            id: identity.row_id(),
            name: spec.name.clone(),
            age: spec.age,
            country: spec.country.clone(),
        }
    }

    /// Returns the age as stored in the `integer` column.
    pub fn age_column(&self) -> RowSyncResult<i32> {
        match i32::try_from(self.age) {
            Ok(age) => Ok(age),
            Err(_) => bail!(
                ErrorKind::InvalidData,
                "Age does not fit the age column",
                format!("age {} of row {} exceeds {}", self.age, self.id, i32::MAX)
            ),
        }
    }
}

/// Outcome of [`RowStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    Inserted,
    /// A row with the same id existed and was left untouched.
    AlreadyPresent,
}

/// Outcome of [`RowStore::delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteResult {
    Deleted,
    Absent,
}

/// Rejects table names with empty parts before they reach the database.
pub fn validate_table_name(table_name: &TableName) -> RowSyncResult<()> {
    if table_name.name.is_empty() {
        bail!(
            ErrorKind::InvalidData,
            "Invalid table name",
            "table part is empty"
        );
    }

    if table_name.schema.as_deref() == Some("") {
        bail!(
            ErrorKind::InvalidData,
            "Invalid table name",
            format!("schema part of `{table_name}` is empty")
        );
    }

    Ok(())
}

/// Storage for the rows mirroring resources.
///
/// Both operations are idempotent: the first write of an id wins and deleting an absent row
/// succeeds. Implementations are shared between concurrent reconciles.
pub trait RowStore {
    /// Inserts `row` into `table_name` unless a row with the same id exists.
    fn upsert(
        &self,
        table_name: &TableName,
        row: &Row,
    ) -> impl Future<Output = RowSyncResult<UpsertResult>> + Send;

    /// Deletes the row with `id` from `table_name` if present.
    fn delete(
        &self,
        table_name: &TableName,
        id: &str,
    ) -> impl Future<Output = RowSyncResult<DeleteResult>> + Send;

    /// Releases held connections. Later operations may establish new ones.
    fn close(&self) -> impl Future<Output = ()> + Send;
}
