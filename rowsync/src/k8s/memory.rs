use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{ErrorKind, RowSyncResult};
use crate::k8s::ResourceClient;
use crate::resource::{PostgresWriter, PostgresWriterStatus, ResourceIdentity};
use crate::{bail, rowsync_error};

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<ResourceIdentity, PostgresWriter>,
    next_version: u64,
    failing_updates: usize,
    failing_status_updates: bool,
    updates: usize,
    status_updates: Vec<(ResourceIdentity, PostgresWriterStatus)>,
}

impl Inner {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }
}

/// In-memory [`ResourceClient`] mimicking the API server semantics the reconciler relies on.
///
/// Updates are rejected with a conflict when their `resourceVersion` is stale, deletion only
/// sets the deletion marker while finalizers are present, and an object is erased as soon as it
/// is marked for deletion without finalizers.
#[derive(Debug, Clone, Default)]
pub struct MemoryResourceClient {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryResourceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new object, assigning it a resource version.
    pub async fn create(&self, mut resource: PostgresWriter) -> RowSyncResult<PostgresWriter> {
        let mut inner = self.inner.lock().await;

        if resource.metadata.namespace.is_none() {
            resource.metadata.namespace = Some("default".to_owned());
        }

        let identity = ResourceIdentity::of(&resource);
        if inner.objects.contains_key(&identity) {
            bail!(
                ErrorKind::ResourceConflict,
                "Resource already exists",
                identity
            );
        }

        resource.metadata.resource_version = Some(inner.bump_version());
        resource.metadata.deletion_timestamp = None;
        inner.objects.insert(identity, resource.clone());

        Ok(resource)
    }

    /// Requests deletion the way `kubectl delete` does.
    ///
    /// Objects without finalizers are erased right away.
    pub async fn request_deletion(&self, identity: &ResourceIdentity) -> RowSyncResult<()> {
        let mut inner = self.inner.lock().await;
        let version = inner.bump_version();

        let Some(resource) = inner.objects.get_mut(identity) else {
            bail!(ErrorKind::ResourceNotFound, "Resource not found", identity);
        };

        if resource.metadata.finalizers.as_ref().is_none_or(Vec::is_empty) {
            inner.objects.remove(identity);
            return Ok(());
        }

        if resource.metadata.deletion_timestamp.is_none() {
            resource.metadata.deletion_timestamp = Some(Time(Utc::now()));
            resource.metadata.resource_version = Some(version);
        }

        Ok(())
    }

    /// Simulates a write by another actor, making copies held by others stale.
    pub async fn touch(&self, identity: &ResourceIdentity) {
        let mut inner = self.inner.lock().await;
        let version = inner.bump_version();

        if let Some(resource) = inner.objects.get_mut(identity) {
            resource.metadata.resource_version = Some(version);
        }
    }

    /// Makes the next `count` calls to [`ResourceClient::update`] fail.
    pub async fn fail_next_updates(&self, count: usize) {
        self.inner.lock().await.failing_updates = count;
    }

    /// Makes every status update fail until turned off again.
    pub async fn fail_status_updates(&self, failing: bool) {
        self.inner.lock().await.failing_status_updates = failing;
    }

    pub async fn exists(&self, identity: &ResourceIdentity) -> bool {
        self.inner.lock().await.objects.contains_key(identity)
    }

    /// Number of successful calls to [`ResourceClient::update`].
    pub async fn update_count(&self) -> usize {
        self.inner.lock().await.updates
    }

    /// Status updates that were applied, in order.
    pub async fn status_updates(&self) -> Vec<(ResourceIdentity, PostgresWriterStatus)> {
        self.inner.lock().await.status_updates.clone()
    }
}

#[async_trait]
impl ResourceClient for MemoryResourceClient {
    async fn get(&self, identity: &ResourceIdentity) -> RowSyncResult<Option<PostgresWriter>> {
        let inner = self.inner.lock().await;

        Ok(inner.objects.get(identity).cloned())
    }

    async fn update(&self, resource: &PostgresWriter) -> RowSyncResult<PostgresWriter> {
        let mut inner = self.inner.lock().await;

        if inner.failing_updates > 0 {
            inner.failing_updates -= 1;
            bail!(ErrorKind::ResourceUpdateFailed, "Injected update failure");
        }

        let identity = ResourceIdentity::of(resource);
        let version = inner.bump_version();

        let Some(stored) = inner.objects.get_mut(&identity) else {
            bail!(ErrorKind::ResourceNotFound, "Resource not found", identity);
        };

        if stored.metadata.resource_version != resource.metadata.resource_version {
            return Err(rowsync_error!(
                ErrorKind::ResourceConflict,
                "Resource was modified concurrently",
                identity
            ));
        }

        let new_finalizers = resource.metadata.finalizers.clone().unwrap_or_default();
        if stored.is_deleting() {
            let current = stored.finalizers();
            if new_finalizers.iter().any(|f| !current.contains(f)) {
                bail!(
                    ErrorKind::ResourceUpdateFailed,
                    "Finalizers cannot be added to a resource being deleted",
                    identity
                );
            }
        }

        // Only spec and finalizers are writable through this call.
        stored.spec = resource.spec.clone();
        stored.metadata.finalizers = Some(new_finalizers);
        stored.metadata.resource_version = Some(version);

        let updated = stored.clone();
        if updated.is_deleting() && updated.finalizers().is_empty() {
            inner.objects.remove(&identity);
        }
        inner.updates += 1;

        Ok(updated)
    }

    async fn update_status(
        &self,
        identity: &ResourceIdentity,
        status: &PostgresWriterStatus,
    ) -> RowSyncResult<()> {
        let mut inner = self.inner.lock().await;

        if inner.failing_status_updates {
            bail!(ErrorKind::ResourceUpdateFailed, "Injected status update failure");
        }

        let version = inner.bump_version();
        let Some(stored) = inner.objects.get_mut(identity) else {
            bail!(ErrorKind::ResourceNotFound, "Resource not found", identity);
        };

        stored.status = Some(status.clone());
        stored.metadata.resource_version = Some(version);
        inner
            .status_updates
            .push((identity.clone(), status.clone()));

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{CLEANUP_ROW_FINALIZER, PostgresWriterSpec, WriteResult};

    fn writer(name: &str) -> PostgresWriter {
        PostgresWriter::new(
            name,
            PostgresWriterSpec {
                table: "students".to_owned(),
                name: "Alex".to_owned(),
                age: 30,
                country: "India".to_owned(),
            },
        )
    }

    #[tokio::test]
    async fn stale_updates_conflict() {
        let client = MemoryResourceClient::new();
        let created = client.create(writer("s1")).await.unwrap();
        let identity = ResourceIdentity::of(&created);

        client.touch(&identity).await;

        let err = client.update(&created).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceConflict);

        let fresh = client.get(&identity).await.unwrap().unwrap();
        client.update(&fresh).await.unwrap();
        assert_eq!(client.update_count().await, 1);
    }

    #[tokio::test]
    async fn deletion_waits_for_finalizers() {
        let client = MemoryResourceClient::new();
        let mut created = client.create(writer("s1")).await.unwrap();
        let identity = ResourceIdentity::of(&created);

        created.set_required_finalizers();
        client.update(&created).await.unwrap();
        client.request_deletion(&identity).await.unwrap();

        let mut deleting = client.get(&identity).await.unwrap().unwrap();
        assert!(deleting.is_deleting());

        deleting.metadata.finalizers = Some(vec![
            CLEANUP_ROW_FINALIZER.to_owned(),
            "example.com/new".to_owned(),
        ]);
        let err = client.update(&deleting).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceUpdateFailed);

        let mut deleting = client.get(&identity).await.unwrap().unwrap();
        assert!(deleting.remove_cleanup_finalizer());
        client.update(&deleting).await.unwrap();

        assert!(!client.exists(&identity).await);
    }

    #[tokio::test]
    async fn deleting_unfinalized_object_erases_it() {
        let client = MemoryResourceClient::new();
        let created = client.create(writer("s1")).await.unwrap();
        let identity = ResourceIdentity::of(&created);

        client.request_deletion(&identity).await.unwrap();

        assert!(client.get(&identity).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn status_updates_are_recorded() {
        let client = MemoryResourceClient::new();
        let created = client.create(writer("s1")).await.unwrap();
        let identity = ResourceIdentity::of(&created);
        let status = PostgresWriterStatus {
            result: Some(WriteResult::Success),
        };

        client.update_status(&identity, &status).await.unwrap();

        let stored = client.get(&identity).await.unwrap().unwrap();
        assert_eq!(stored.write_result(), Some(WriteResult::Success));
        assert_eq!(client.status_updates().await, vec![(identity, status)]);

        client.fail_status_updates(true).await;
        let err = client
            .update_status(&ResourceIdentity::new("default", "s1"), &PostgresWriterStatus::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceUpdateFailed);
    }
}
