//! Shared fixtures for the engine integration tests.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use pbk_engine::adapters::{MemoryCatalog, MemoryStatusStore, TokioExecutor};
use pbk_engine::jobs::{Job, JobOrchestrator};
use pbk_engine::model::{FieldDescriptor, FieldKind, Record, SchemaDefinition};
use pbk_engine::{EngineConfig, EngineContext};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

pub struct Harness {
    pub catalog: Arc<MemoryCatalog>,
    pub status: Arc<MemoryStatusStore>,
    pub jobs: JobOrchestrator,
    pub artifact_dir: TempDir,
}

impl Harness {
    pub async fn new(catalog: MemoryCatalog) -> Self {
        Self::with_config(catalog, |_| {}).await
    }

    pub async fn with_config(catalog: MemoryCatalog, tweak: impl FnOnce(&mut EngineConfig)) -> Self {
        let artifact_dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig {
            artifact_dir: artifact_dir.path().to_path_buf(),
            document_batch_size: 2,
            sql_rows_per_statement: 2,
            ..EngineConfig::default()
        };
        tweak(&mut config);
        let catalog = Arc::new(catalog);
        let status = Arc::new(MemoryStatusStore::new());
        let ctx = EngineContext::from_catalog(catalog.clone(), status.clone(), config);
        let jobs = JobOrchestrator::new(ctx, Arc::new(TokioExecutor::current().unwrap()));
        Self {
            catalog,
            status,
            jobs,
            artifact_dir,
        }
    }

    pub async fn wait(&self, id: Uuid) -> Job {
        self.jobs
            .wait_for_terminal(id, Duration::from_millis(10), Duration::from_secs(10))
            .await
            .unwrap()
    }
}

/// Sales Invoice -> Customer -> Territory and Sales Invoice -> Item -> Item Group
pub fn sales_definitions() -> Vec<SchemaDefinition> {
    vec![
        SchemaDefinition::new("Territory")
            .with_module("Setup")
            .with_field(FieldDescriptor::new("territory_name", FieldKind::Data)),
        SchemaDefinition::new("Item Group")
            .with_module("Stock")
            .with_field(FieldDescriptor::new("group_name", FieldKind::Data)),
        SchemaDefinition::new("Customer")
            .with_module("Selling")
            .custom()
            .with_field(FieldDescriptor::new("customer_name", FieldKind::Data))
            .with_field(FieldDescriptor::link("territory", "Territory")),
        SchemaDefinition::new("Item")
            .with_module("Stock")
            .with_field(FieldDescriptor::new("item_name", FieldKind::Data))
            .with_field(FieldDescriptor::link("item_group", "Item Group"))
            .with_field(FieldDescriptor::new("image", FieldKind::AttachImage)),
        SchemaDefinition::new("Sales Invoice")
            .with_module("Accounts")
            .with_field(FieldDescriptor::link("customer", "Customer"))
            .with_field(FieldDescriptor::link("item", "Item"))
            .with_field(FieldDescriptor::new("grand_total", FieldKind::Float)),
    ]
}

pub async fn sales_catalog() -> MemoryCatalog {
    let catalog = MemoryCatalog::new();
    for def in sales_definitions() {
        catalog.add_definition(def).await;
    }
    for record in sales_records() {
        catalog.add_record(record).await;
    }
    catalog.add_file("/files/widget.png", b"png-bytes".to_vec()).await;
    catalog
}

pub fn sales_records() -> Vec<Record> {
    vec![
        Record::from_pairs("Territory", [("name", "North"), ("territory_name", "North")]),
        Record::from_pairs("Territory", [("name", "South"), ("territory_name", "South")]),
        Record::from_pairs("Item Group", [("name", "Products"), ("group_name", "Products")]),
        Record::from_pairs(
            "Customer",
            [("name", "CUST-1"), ("customer_name", "Acme"), ("territory", "North")],
        ),
        Record::from_pairs(
            "Customer",
            [("name", "CUST-2"), ("customer_name", "Globex"), ("territory", "South")],
        ),
        Record::from_pairs(
            "Item",
            [
                ("name", "ITEM-1"),
                ("item_name", "Widget"),
                ("item_group", "Products"),
                ("image", "/files/widget.png"),
            ],
        ),
        Record::from_pairs("Sales Invoice", [("name", "SINV-1"), ("customer", "CUST-1"), ("item", "ITEM-1")]),
        Record::from_pairs("Sales Invoice", [("name", "SINV-2"), ("customer", "CUST-2"), ("item", "ITEM-1")]),
        Record::from_pairs("Sales Invoice", [("name", "SINV-3"), ("customer", "CUST-1"), ("item", "ITEM-1")]),
    ]
}

/// Destination with no entity types at all.
pub fn empty_catalog() -> MemoryCatalog {
    MemoryCatalog::new()
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
