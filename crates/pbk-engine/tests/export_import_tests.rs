//! Export and restore round trips through the job orchestrator.

mod common;

use common::{empty_catalog, sales_catalog, strings, Harness};
use pbk_engine::adapters::{Datastore, FileStore, MemoryCatalog};
use pbk_engine::archive::{ArchiveFormat, ArchiveReader};
use pbk_engine::jobs::{ArtifactDelivery, ExportRequest, ImportRequest, JobStatus};
use pbk_engine::model::{FieldDescriptor, FieldKind, Record, SchemaDefinition, Value};
use pbk_engine::restore::{LogStatus, ALL_ENTITIES};
use pbk_engine::transform::{FieldRule, TableRule};
use std::path::PathBuf;

async fn export(harness: &Harness, request: ExportRequest) -> (PathBuf, pbk_engine::jobs::ExportResult) {
    let id = harness.jobs.submit_export(request).await.unwrap();
    let job = harness.wait(id).await;
    assert_eq!(job.status, JobStatus::Completed, "export failed: {:?}", job.error);
    let result = job.export_result().cloned().unwrap();
    (result.path.clone(), result)
}

async fn import(harness: &Harness, request: ImportRequest) -> pbk_engine::restore::RestoreLog {
    let id = harness.jobs.submit_import(request).await.unwrap();
    let job = harness.wait(id).await;
    assert_eq!(job.status, JobStatus::Completed, "import failed: {:?}", job.error);
    job.import_result().cloned().unwrap().log
}

fn position(order: &[String], entity_type: &str) -> usize {
    order.iter().position(|t| t == entity_type).unwrap()
}

async fn stored(harness: &Harness, entity_type: &str, id: &str, field: &str) -> Option<Value> {
    let record = harness.catalog.read_record(entity_type, id).await.unwrap();
    record.get(field).cloned()
}

#[tokio::test]
async fn test_document_round_trip_restores_dependencies_first() {
    let source = Harness::new(sales_catalog().await).await;
    let mut request = ExportRequest::new(strings(&["Sales Invoice"]), ArchiveFormat::Document, "admin");
    request.include_dependencies = true;
    request.include_files = true;
    let (path, result) = export(&source, request).await;

    assert_eq!(result.total_entities, 5);
    assert_eq!(result.total_records, 9);
    assert_eq!(result.files_bundled, 1);
    assert!(result.failed_entities.is_empty());
    assert!(matches!(result.artifact, ArtifactDelivery::Inline { .. }));
    assert!(position(&result.order, "Territory") < position(&result.order, "Customer"));
    assert!(position(&result.order, "Customer") < position(&result.order, "Sales Invoice"));
    assert!(position(&result.order, "Item Group") < position(&result.order, "Item"));

    let destination = Harness::new(empty_catalog()).await;
    let log = import(&destination, ImportRequest::new(&path, "admin")).await;

    assert_eq!(log.summary.imported, 9);
    assert_eq!(log.summary.errors, 0);
    assert!(log.cyclic.is_empty());
    assert!(position(&log.order, "Customer") < position(&log.order, "Sales Invoice"));
    assert_eq!(destination.catalog.record_count("Sales Invoice").await, 3);
    assert_eq!(stored(&destination, "Customer", "CUST-1", "customer_name").await, Some(Value::from("Acme")));
    assert_eq!(stored(&destination, "Sales Invoice", "SINV-3", "customer").await, Some(Value::from("CUST-1")));
    assert!(destination.catalog.file_exists("/files/widget.png").await.unwrap());
    assert_eq!(log.files.as_ref().map(|f| f.restored), Some(1));

    // Replaying the same archive only finds existing rows.
    let again = import(&destination, ImportRequest::new(&path, "admin")).await;
    assert_eq!(again.summary.imported, 0);
    assert_eq!(again.summary.skipped, 9);
    assert_eq!(again.files.as_ref().map(|f| f.skipped), Some(1));
}

#[tokio::test]
async fn test_selected_restore_only_touches_chosen_types() {
    let source = Harness::new(sales_catalog().await).await;
    let request = ExportRequest::new(strings(&["Territory", "Customer"]), ArchiveFormat::Document, "admin");
    let (path, _) = export(&source, request).await;

    let destination = Harness::new(empty_catalog()).await;
    let mut request = ImportRequest::new(&path, "admin");
    request.selected = Some(strings(&["Territory"]));
    let log = import(&destination, request).await;

    assert_eq!(log.order, strings(&["Territory"]));
    assert_eq!(destination.catalog.record_count("Territory").await, 2);
    assert_eq!(destination.catalog.record_count("Customer").await, 0);
}

#[tokio::test]
async fn test_field_rules_rewrite_matching_values_only() {
    let source = Harness::new(sales_catalog().await).await;
    let mut request = ExportRequest::new(strings(&["Customer"]), ArchiveFormat::Document, "admin");
    request.transform.field_rules.push(FieldRule {
        entity_type: "Customer".into(),
        field: "territory".into(),
        match_value: Some(Value::from("North")),
        new_value: Value::from("West"),
    });
    let (path, _) = export(&source, request).await;

    let mut reader = ArchiveReader::open(&path).unwrap();
    let section = reader.read_section("Customer").unwrap();
    let territories: Vec<Option<&str>> = section
        .records
        .iter()
        .map(|r| r.get("territory").and_then(Value::as_str))
        .collect();
    assert_eq!(territories, vec![Some("West"), Some("South")]);
    assert!(section.definition.is_some());
}

#[tokio::test]
async fn test_tabular_round_trip() {
    let source = Harness::new(sales_catalog().await).await;
    let request = ExportRequest::new(strings(&["Territory", "Customer"]), ArchiveFormat::Tabular, "admin");
    let (path, result) = export(&source, request).await;
    assert!(result.file_name.ends_with(".zip"));

    let destination = Harness::new(empty_catalog()).await;
    let log = import(&destination, ImportRequest::new(&path, "admin")).await;
    assert_eq!(log.summary.imported, 4);
    assert_eq!(destination.catalog.record_count("Customer").await, 2);
    assert_eq!(stored(&destination, "Customer", "CUST-1", "customer_name").await, Some(Value::from("Acme")));
    assert_eq!(stored(&destination, "Customer", "CUST-2", "territory").await, Some(Value::from("South")));
}

#[tokio::test]
async fn test_tabular_keeps_fields_missing_from_the_first_record() {
    let catalog = MemoryCatalog::new();
    catalog
        .add_definition(SchemaDefinition::new("Employee").with_field(FieldDescriptor::new("company", FieldKind::Data)))
        .await;
    catalog.add_record(Record::from_pairs("Employee", [("name", "r1")])).await;
    catalog
        .add_record(Record::from_pairs("Employee", [("name", "r2"), ("company", "Acme")]))
        .await;
    catalog
        .add_record(Record::from_pairs("Employee", [("name", "r3"), ("company", "Test")]))
        .await;

    let source = Harness::new(catalog).await;
    let request = ExportRequest::new(strings(&["Employee"]), ArchiveFormat::Tabular, "admin");
    let (path, result) = export(&source, request).await;
    assert_eq!(result.total_records, 3);

    let destination = Harness::with_config(empty_catalog(), |c| c.tabular_batch_size = 1).await;
    let log = import(&destination, ImportRequest::new(&path, "admin")).await;

    assert_eq!(log.summary.imported, 3);
    assert_eq!(stored(&destination, "Employee", "r1", "company").await, None);
    assert_eq!(stored(&destination, "Employee", "r2", "company").await, Some(Value::from("Acme")));
    assert_eq!(stored(&destination, "Employee", "r3", "company").await, Some(Value::from("Test")));
}

#[tokio::test]
async fn test_sql_table_rule_renames_every_statement() {
    let source = Harness::new(sales_catalog().await).await;
    let mut request = ExportRequest::new(strings(&["Customer"]), ArchiveFormat::Sql, "admin");
    request.transform.table_rules.push(TableRule {
        source_table_name: "tabCustomer".into(),
        target_table_name: "tabClient".into(),
    });
    let (path, result) = export(&source, request).await;
    assert!(result.file_name.ends_with(".sql"));

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("DROP TABLE IF EXISTS `tabClient`;"));
    assert!(text.contains("CREATE TABLE `tabClient`"));
    assert!(text.contains("INSERT INTO `tabClient`"));
    assert!(!text.contains("`tabCustomer`"));
    assert!(text.contains("-- Records exported: 2"));
}

#[tokio::test]
async fn test_sql_selection_warns_and_runs_everything() {
    let source = Harness::new(sales_catalog().await).await;
    let request = ExportRequest::new(strings(&["Territory", "Customer"]), ArchiveFormat::Sql, "admin");
    let (path, _) = export(&source, request).await;

    let destination = Harness::new(empty_catalog()).await;
    let mut request = ImportRequest::new(&path, "admin");
    request.selected = Some(strings(&["Customer"]));
    let log = import(&destination, request).await;

    let warning = log.entry(ALL_ENTITIES).unwrap();
    assert_eq!(warning.status, LogStatus::Warning);
    let journal = destination.catalog.sql_journal().await;
    assert!(journal.iter().any(|s| s.contains("INSERT INTO `tabTerritory`")));
    assert!(journal.iter().any(|s| s.contains("INSERT INTO `tabCustomer`")));
}

#[tokio::test]
async fn test_cyclic_types_are_still_restored() {
    let catalog = MemoryCatalog::new();
    catalog
        .add_definition(SchemaDefinition::new("Project").with_field(FieldDescriptor::link("lead_task", "Task")))
        .await;
    catalog
        .add_definition(SchemaDefinition::new("Task").with_field(FieldDescriptor::link("project", "Project")))
        .await;
    catalog
        .add_record(Record::from_pairs("Project", [("name", "PRJ-1"), ("lead_task", "TASK-1")]))
        .await;
    catalog
        .add_record(Record::from_pairs("Task", [("name", "TASK-1"), ("project", "PRJ-1")]))
        .await;

    let source = Harness::new(catalog).await;
    let request = ExportRequest::new(strings(&["Project", "Task"]), ArchiveFormat::Document, "admin");
    let (path, result) = export(&source, request).await;
    assert_eq!(result.order.len(), 2);

    let destination = Harness::new(empty_catalog()).await;
    let log = import(&destination, ImportRequest::new(&path, "admin")).await;
    assert_eq!(log.cyclic.len(), 2);
    assert_eq!(log.summary.imported, 2);
}
