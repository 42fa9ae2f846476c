//! Collaborator interfaces
//!
//! The engine never talks to a concrete metadata service, datastore, cache
//! or job runner. Everything goes through the traits below so that the job
//! pipeline can run against the in-memory implementations in tests and
//! against real services in deployment.

pub mod executor;
pub mod memory;
pub mod postgres;
pub mod status;

use crate::model::{EntityTypeSummary, FieldDescriptor, Record, SchemaDefinition, TableStats};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::time::Duration;

pub use executor::TokioExecutor;
pub use memory::{CatalogSnapshot, MemoryCatalog};
pub use postgres::PgStatusStore;
pub use status::MemoryStatusStore;

/// Typed view over the schema metadata service.
#[async_trait]
pub trait MetadataAdapter: Send + Sync {
    /// Field list of an entity type. `Ok(None)` means the type is unknown,
    /// which is distinct from a known type with no fields.
    async fn get_fields(&self, entity_type: &str) -> anyhow::Result<Option<Vec<FieldDescriptor>>>;

    async fn is_container_type(&self, entity_type: &str) -> anyhow::Result<bool>;

    async fn is_child_table_type(&self, entity_type: &str) -> anyhow::Result<bool>;

    async fn get_definition(&self, entity_type: &str) -> anyhow::Result<Option<SchemaDefinition>>;

    async fn create_definition(&self, definition: &SchemaDefinition) -> anyhow::Result<()>;

    async fn update_definition(&self, definition: &SchemaDefinition) -> anyhow::Result<()>;

    /// Every registered entity type, child tables included.
    async fn list_entity_types(&self) -> anyhow::Result<Vec<EntityTypeSummary>>;
}

/// Row-level access to the relational datastore.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn list_identifiers(&self, entity_type: &str) -> anyhow::Result<Vec<String>>;

    async fn read_record(&self, entity_type: &str, id: &str) -> anyhow::Result<Record>;

    async fn exists(&self, entity_type: &str, id: &str) -> anyhow::Result<bool>;

    async fn insert_record(&self, record: &Record) -> anyhow::Result<()>;

    async fn exec_raw_statement(&self, sql: &str) -> anyhow::Result<()>;

    /// `CREATE TABLE` statement describing the live table.
    async fn table_ddl(&self, table_name: &str) -> anyhow::Result<String>;

    async fn table_stats(&self, table_name: &str) -> anyhow::Result<TableStats>;

    /// Paths registered as attachments of one record.
    async fn attachments_for(&self, entity_type: &str, id: &str) -> anyhow::Result<Vec<String>>;
}

/// Binary content behind attachment paths.
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn read_file(&self, path: &str) -> anyhow::Result<Vec<u8>>;

    async fn write_file(&self, path: &str, content: &[u8]) -> anyhow::Result<()>;

    async fn file_exists(&self, path: &str) -> anyhow::Result<bool>;
}

/// TTL'd key-value store holding job state between invocations.
///
/// `get` returning `None` means "no data yet" and is never an error.
#[async_trait]
pub trait JobStatusStore: Send + Sync {
    async fn set(&self, key: &str, value: serde_json::Value, ttl: Duration) -> anyhow::Result<()>;

    async fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>>;
}

/// Unit of work handed to a [`TaskExecutor`].
pub type TaskFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Fire-and-forget task runner. Results are only observable through the
/// job status store.
pub trait TaskExecutor: Send + Sync {
    fn enqueue(&self, name: &str, task: TaskFuture, timeout: Duration);
}
