use crate::k8s::memory::MemoryResourceClient;
use crate::resource::{PostgresWriter, PostgresWriterSpec, ResourceIdentity};

pub fn writer_spec(table: &str, name: &str, age: u32, country: &str) -> PostgresWriterSpec {
    PostgresWriterSpec {
        table: table.to_owned(),
        name: name.to_owned(),
        age,
        country: country.to_owned(),
    }
}

/// Builds a namespaced `PostgresWriter` without finalizers or status.
pub fn writer(namespace: &str, name: &str, spec: PostgresWriterSpec) -> PostgresWriter {
    let mut writer = PostgresWriter::new(name, spec);
    writer.metadata.namespace = Some(namespace.to_owned());

    writer
}

/// Stores `writer` in `client` and returns its identity.
///
/// # Panics
///
/// Panics if an object with the same identity already exists.
pub async fn create_writer(
    client: &MemoryResourceClient,
    writer: PostgresWriter,
) -> ResourceIdentity {
    let created = client
        .create(writer)
        .await
        .expect("Failed to create writer");

    ResourceIdentity::of(&created)
}
