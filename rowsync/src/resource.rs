//! The `PostgresWriter` custom resource and helpers to classify its lifecycle.

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Finalizer that keeps a resource around until its row has been deleted.
pub const CLEANUP_ROW_FINALIZER: &str = "finalizers.postgreswriters.demo.yash.com/cleanup-row";

/// Finalizers a live resource must carry, in the order they are written.
pub const REQUIRED_FINALIZERS: &[&str] = &[CLEANUP_ROW_FINALIZER];

/// Desired state of a `PostgresWriter`: the table to write to and the row contents.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[kube(
    group = "demo.yash.com",
    version = "v1",
    kind = "PostgresWriter",
    namespaced,
    status = "PostgresWriterStatus",
    shortname = "pgw",
    printcolumn = r#"{"name":"WriteResult","type":"string","jsonPath":".status.result"}"#
)]
pub struct PostgresWriterSpec {
    /// Target table, optionally qualified with a schema (`schema.table`).
    pub table: String,
    pub name: String,
    pub age: u32,
    pub country: String,
}

/// Outcome of the last attempt to write the row.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WriteResult {
    Success,
    Failed,
}

/// Observed state of a `PostgresWriter`.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct PostgresWriterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<WriteResult>,
}

/// Identity of a namespaced resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceIdentity {
    pub namespace: String,
    pub name: String,
}

impl ResourceIdentity {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Builds the identity of a resource object.
    ///
    /// Objects without a namespace are placed in `default`, which is where the API server puts
    /// namespaced objects created without one.
    pub fn of(resource: &PostgresWriter) -> Self {
        Self {
            namespace: resource.namespace().unwrap_or_else(|| "default".to_owned()),
            name: resource.name_any(),
        }
    }

    /// Primary key of the row mirroring this resource.
    pub fn row_id(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Phase of a resource as far as the deletion protocol is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLifecycle {
    /// Live, but its finalizers differ from [`REQUIRED_FINALIZERS`].
    LiveUnfinalized,
    /// Live and carrying exactly the required finalizers.
    LiveFinalized,
    /// Deletion was requested; only cleanup may happen from now on.
    Deleting,
}

impl PostgresWriter {
    pub fn lifecycle(&self) -> ResourceLifecycle {
        if self.is_deleting() {
            ResourceLifecycle::Deleting
        } else if has_required_finalizers(self.finalizers()) {
            ResourceLifecycle::LiveFinalized
        } else {
            ResourceLifecycle::LiveUnfinalized
        }
    }

    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    pub fn has_cleanup_finalizer(&self) -> bool {
        self.finalizers()
            .iter()
            .any(|finalizer| finalizer == CLEANUP_ROW_FINALIZER)
    }

    /// Replaces all finalizers with [`REQUIRED_FINALIZERS`].
    pub fn set_required_finalizers(&mut self) {
        self.metadata.finalizers = Some(
            REQUIRED_FINALIZERS
                .iter()
                .map(|finalizer| (*finalizer).to_owned())
                .collect(),
        );
    }

    /// Removes [`CLEANUP_ROW_FINALIZER`], keeping any other finalizer.
    ///
    /// Returns `false` when the finalizer was not present.
    pub fn remove_cleanup_finalizer(&mut self) -> bool {
        let Some(finalizers) = self.metadata.finalizers.as_mut() else {
            return false;
        };

        let before = finalizers.len();
        finalizers.retain(|finalizer| finalizer != CLEANUP_ROW_FINALIZER);

        finalizers.len() != before
    }

    pub fn write_result(&self) -> Option<WriteResult> {
        self.status.as_ref().and_then(|status| status.result)
    }
}

/// Compares finalizers with [`REQUIRED_FINALIZERS`] as sets, ignoring order and duplicates.
pub fn has_required_finalizers(finalizers: &[String]) -> bool {
    let current: BTreeSet<&str> = finalizers.iter().map(String::as_str).collect();
    let required: BTreeSet<&str> = REQUIRED_FINALIZERS.iter().copied().collect();

    current == required
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::CustomResourceExt;

    fn writer() -> PostgresWriter {
        let mut writer = PostgresWriter::new(
            "s1",
            PostgresWriterSpec {
                table: "students".to_owned(),
                name: "Alex".to_owned(),
                age: 30,
                country: "India".to_owned(),
            },
        );
        writer.metadata.namespace = Some("default".to_owned());
        writer
    }

    #[test]
    fn identity_builds_row_id() {
        let identity = ResourceIdentity::of(&writer());

        assert_eq!(identity, ResourceIdentity::new("default", "s1"));
        assert_eq!(identity.row_id(), "default/s1");
        assert_eq!(identity.to_string(), "default/s1");
    }

    #[test]
    fn finalizers_are_compared_as_sets() {
        assert!(has_required_finalizers(&[CLEANUP_ROW_FINALIZER.to_owned()]));
        assert!(has_required_finalizers(&[
            CLEANUP_ROW_FINALIZER.to_owned(),
            CLEANUP_ROW_FINALIZER.to_owned()
        ]));
        assert!(!has_required_finalizers(&[]));
        assert!(!has_required_finalizers(&[
            "example.com/other".to_owned(),
            CLEANUP_ROW_FINALIZER.to_owned()
        ]));
    }

    #[test]
    fn lifecycle_follows_finalizers_and_deletion_marker() {
        let mut writer = writer();
        assert_eq!(writer.lifecycle(), ResourceLifecycle::LiveUnfinalized);

        writer.set_required_finalizers();
        assert_eq!(writer.lifecycle(), ResourceLifecycle::LiveFinalized);

        writer.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert_eq!(writer.lifecycle(), ResourceLifecycle::Deleting);
    }

    #[test]
    fn removing_cleanup_finalizer_keeps_foreign_ones() {
        let mut writer = writer();
        assert!(!writer.remove_cleanup_finalizer());

        writer.metadata.finalizers = Some(vec![
            "example.com/other".to_owned(),
            CLEANUP_ROW_FINALIZER.to_owned(),
        ]);
        assert!(writer.remove_cleanup_finalizer());
        assert_eq!(writer.finalizers(), ["example.com/other".to_owned()]);
        assert!(!writer.has_cleanup_finalizer());
    }

    #[test]
    fn status_serializes_in_lowercase() {
        let status = PostgresWriterStatus {
            result: Some(WriteResult::Failed),
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!({ "result": "failed" })
        );
    }

    #[test]
    fn crd_describes_the_resource() {
        let crd = PostgresWriter::crd();

        assert_eq!(crd.spec.group, "demo.yash.com");
        assert_eq!(crd.spec.names.kind, "PostgresWriter");
        assert_eq!(crd.spec.names.plural, "postgreswriters");
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(
            crd.spec.names.short_names,
            Some(vec!["pgw".to_owned()])
        );

        let version = &crd.spec.versions[0];
        assert_eq!(version.name, "v1");
        assert!(version.subresources.as_ref().unwrap().status.is_some());
        assert_eq!(
            version.additional_printer_columns.as_ref().unwrap()[0].name,
            "WriteResult"
        );
    }
}
