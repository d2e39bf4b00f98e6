use async_trait::async_trait;
use kube::Api;
use kube::api::{Patch, PatchParams, PostParams};
use tracing::debug;

use crate::error::{ErrorKind, RowSyncError, RowSyncResult};
use crate::k8s::ResourceClient;
use crate::resource::{PostgresWriter, PostgresWriterStatus, ResourceIdentity};
use crate::{bail, rowsync_error};

/// [`ResourceClient`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct HttpResourceClient {
    client: kube::Client,
}

impl HttpResourceClient {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<PostgresWriter> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Keeps conflicts and missing objects distinguishable, every other failure becomes an update
/// failure.
fn update_error(err: kube::Error) -> RowSyncError {
    let err = RowSyncError::from(err);
    if matches!(
        err.kind(),
        ErrorKind::ResourceConflict | ErrorKind::ResourceNotFound
    ) {
        return err;
    }

    rowsync_error!(ErrorKind::ResourceUpdateFailed, "Failed to update resource", err)
}

#[async_trait]
impl ResourceClient for HttpResourceClient {
    async fn get(&self, identity: &ResourceIdentity) -> RowSyncResult<Option<PostgresWriter>> {
        let resource = self.api(&identity.namespace).get_opt(&identity.name).await?;

        Ok(resource)
    }

    async fn update(&self, resource: &PostgresWriter) -> RowSyncResult<PostgresWriter> {
        let identity = ResourceIdentity::of(resource);
        if resource.metadata.resource_version.is_none() {
            bail!(
                ErrorKind::ResourceUpdateFailed,
                "Resource has no resource version",
                identity
            );
        }

        let updated = self
            .api(&identity.namespace)
            .replace(&identity.name, &PostParams::default(), resource)
            .await
            .map_err(update_error)?;

        debug!(%identity, "resource updated");

        Ok(updated)
    }

    async fn update_status(
        &self,
        identity: &ResourceIdentity,
        status: &PostgresWriterStatus,
    ) -> RowSyncResult<()> {
        let patch = serde_json::json!({ "status": status });

        self.api(&identity.namespace)
            .patch_status(
                &identity.name,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(update_error)?;

        Ok(())
    }
}
