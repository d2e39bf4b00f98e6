use async_trait::async_trait;

use crate::error::RowSyncResult;
use crate::resource::{PostgresWriter, PostgresWriterStatus, ResourceIdentity};

/// Operations the reconciler needs on `PostgresWriter` objects.
///
/// Updates are optimistic: they carry the `resourceVersion` of the object they were derived from
/// and fail with [`crate::error::ErrorKind::ResourceConflict`] when the object changed meanwhile.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Returns the current object, or `None` when it does not exist (anymore).
    async fn get(&self, identity: &ResourceIdentity) -> RowSyncResult<Option<PostgresWriter>>;

    /// Replaces the object's metadata and spec, returning the stored object.
    async fn update(&self, resource: &PostgresWriter) -> RowSyncResult<PostgresWriter>;

    /// Writes the status subresource.
    async fn update_status(
        &self,
        identity: &ResourceIdentity,
        status: &PostgresWriterStatus,
    ) -> RowSyncResult<()>;
}
