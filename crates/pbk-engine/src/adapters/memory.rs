//! In-memory catalogue implementing the metadata, datastore and file traits
//!
//! Backs the test suites and the CLI. The CLI persists it as a JSON
//! [`CatalogSnapshot`] between runs.

use super::{Datastore, FileStore, MetadataAdapter};
use crate::model::{
    EntityTypeSummary, FieldDescriptor, FieldKind, FieldMap, Record,
    SchemaDefinition, TableStats, NAME_FIELD,
};
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tokio::sync::RwLock;

/// Serializable form of a [`MemoryCatalog`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogSnapshot {
    #[serde(default)]
    pub definitions: Vec<SchemaDefinition>,
    /// Rows per entity type, in insertion order
    #[serde(default)]
    pub records: BTreeMap<String, Vec<FieldMap>>,
    #[serde(default)]
    pub attachments: Vec<AttachmentLink>,
    /// Path to base64 content
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    /// Raw statements executed against the store, in order
    #[serde(default)]
    pub sql_journal: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentLink {
    pub entity_type: String,
    pub record: String,
    pub path: String,
}

/// Failures to inject, keyed by entity type or record.
#[derive(Debug, Default)]
struct Faults {
    metadata: HashSet<String>,
    stats: HashSet<String>,
    create_definition: HashSet<String>,
    reads: HashSet<(String, String)>,
    inserts: HashSet<(String, String)>,
    statements: Vec<String>,
}

#[derive(Debug, Default)]
struct CatalogState {
    definitions: BTreeMap<String, SchemaDefinition>,
    records: BTreeMap<String, Vec<FieldMap>>,
    attachments: Vec<AttachmentLink>,
    files: BTreeMap<String, Vec<u8>>,
    sql_journal: Vec<String>,
    faults: Faults,
}

impl CatalogState {
    fn rows(&self, entity_type: &str) -> &[FieldMap] {
        self.records.get(entity_type).map(Vec::as_slice).unwrap_or_default()
    }

    fn find(&self, entity_type: &str, id: &str) -> Option<&FieldMap> {
        self.rows(entity_type).iter().find(|row| row_name(row) == Some(id))
    }

    fn definition_for_table(&self, table: &str) -> Option<&SchemaDefinition> {
        self.definitions.values().find(|d| d.table_name() == table)
    }
}

fn row_name(row: &FieldMap) -> Option<&str> {
    row.get(NAME_FIELD).and_then(|v| v.as_str())
}

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    state: RwLock<CatalogState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: CatalogSnapshot) -> anyhow::Result<Self> {
        let mut files = BTreeMap::new();
        for (path, encoded) in snapshot.files {
            let bytes = STANDARD
                .decode(encoded.as_bytes())
                .with_context(|| format!("File '{path}' is not valid base64"))?;
            files.insert(path, bytes);
        }

        let state = CatalogState {
            definitions: snapshot
                .definitions
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
            records: snapshot.records,
            attachments: snapshot.attachments,
            files,
            sql_journal: snapshot.sql_journal,
            faults: Faults::default(),
        };

        Ok(Self {
            state: RwLock::new(state),
        })
    }

    pub async fn snapshot(&self) -> CatalogSnapshot {
        let state = self.state.read().await;
        CatalogSnapshot {
            definitions: state.definitions.values().cloned().collect(),
            records: state.records.clone(),
            attachments: state.attachments.clone(),
            files: state
                .files
                .iter()
                .map(|(path, bytes)| (path.clone(), STANDARD.encode(bytes)))
                .collect(),
            sql_journal: state.sql_journal.clone(),
        }
    }

    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read catalogue {}", path.display()))?;
        let snapshot: CatalogSnapshot = serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse catalogue {}", path.display()))?;
        Self::from_snapshot(snapshot)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_vec_pretty(&self.snapshot().await)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write catalogue {}", path.display()))
    }

    // ------------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------------

    pub async fn add_definition(&self, definition: SchemaDefinition) {
        let mut state = self.state.write().await;
        state.records.entry(definition.name.clone()).or_default();
        state.definitions.insert(definition.name.clone(), definition);
    }

    pub async fn add_record(&self, record: Record) {
        let mut state = self.state.write().await;
        state.records.entry(record.entity_type).or_default().push(record.fields);
    }

    pub async fn add_attachment(&self, entity_type: &str, record: &str, path: &str) {
        self.state.write().await.attachments.push(AttachmentLink {
            entity_type: entity_type.to_string(),
            record: record.to_string(),
            path: path.to_string(),
        });
    }

    pub async fn add_file(&self, path: &str, content: impl Into<Vec<u8>>) {
        self.state.write().await.files.insert(path.to_string(), content.into());
    }

    pub async fn record_count(&self, entity_type: &str) -> usize {
        self.state.read().await.rows(entity_type).len()
    }

    pub async fn sql_journal(&self) -> Vec<String> {
        self.state.read().await.sql_journal.clone()
    }

    // ------------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------------

    pub async fn fail_metadata_for(&self, entity_type: &str) {
        self.state.write().await.faults.metadata.insert(entity_type.to_string());
    }

    pub async fn fail_stats_for(&self, entity_type: &str) {
        self.state.write().await.faults.stats.insert(entity_type.to_string());
    }

    pub async fn fail_definition_create(&self, entity_type: &str) {
        self.state
            .write()
            .await
            .faults
            .create_definition
            .insert(entity_type.to_string());
    }

    pub async fn fail_read_of(&self, entity_type: &str, id: &str) {
        self.state
            .write()
            .await
            .faults
            .reads
            .insert((entity_type.to_string(), id.to_string()));
    }

    pub async fn fail_insert_of(&self, entity_type: &str, id: &str) {
        self.state
            .write()
            .await
            .faults
            .inserts
            .insert((entity_type.to_string(), id.to_string()));
    }

    pub async fn fail_statements_containing(&self, needle: &str) {
        self.state.write().await.faults.statements.push(needle.to_string());
    }
}

fn column_type(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Int => "bigint(20) DEFAULT NULL",
        FieldKind::Float => "decimal(21,9) NOT NULL DEFAULT 0.000000000",
        FieldKind::Check => "int(1) NOT NULL DEFAULT 0",
        FieldKind::Date => "date DEFAULT NULL",
        FieldKind::Datetime => "datetime(6) DEFAULT NULL",
        FieldKind::Text | FieldKind::Json => "longtext DEFAULT NULL",
        _ => "varchar(140) DEFAULT NULL",
    }
}

fn render_ddl(definition: &SchemaDefinition) -> String {
    let mut columns = vec![
        "  `name` varchar(140) NOT NULL".to_string(),
        "  `creation` datetime(6) DEFAULT NULL".to_string(),
        "  `modified` datetime(6) DEFAULT NULL".to_string(),
        "  `owner` varchar(140) DEFAULT NULL".to_string(),
        "  `modified_by` varchar(140) DEFAULT NULL".to_string(),
    ];
    columns.extend(
        definition
            .fields
            .iter()
            .filter(|f| !matches!(f.kind, FieldKind::Table | FieldKind::TableMultiSelect))
            .filter(|f| f.name != NAME_FIELD)
            .map(|f| format!("  `{}` {}", f.name, column_type(f.kind))),
    );
    columns.push("  PRIMARY KEY (`name`)".to_string());

    format!(
        "CREATE TABLE `{}` (\n{}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4",
        definition.table_name(),
        columns.join(",\n")
    )
}

#[async_trait]
impl MetadataAdapter for MemoryCatalog {
    async fn get_fields(&self, entity_type: &str) -> anyhow::Result<Option<Vec<FieldDescriptor>>> {
        let state = self.state.read().await;
        if state.faults.metadata.contains(entity_type) {
            bail!("metadata service unavailable for {entity_type}");
        }
        Ok(state.definitions.get(entity_type).map(|d| d.fields.clone()))
    }

    async fn is_container_type(&self, entity_type: &str) -> anyhow::Result<bool> {
        let state = self.state.read().await;
        Ok(state.definitions.get(entity_type).is_some_and(|d| d.is_container))
    }

    async fn is_child_table_type(&self, entity_type: &str) -> anyhow::Result<bool> {
        let state = self.state.read().await;
        Ok(state.definitions.get(entity_type).is_some_and(|d| d.is_child_table))
    }

    async fn get_definition(&self, entity_type: &str) -> anyhow::Result<Option<SchemaDefinition>> {
        let state = self.state.read().await;
        if state.faults.metadata.contains(entity_type) {
            bail!("metadata service unavailable for {entity_type}");
        }
        Ok(state.definitions.get(entity_type).cloned())
    }

    async fn create_definition(&self, definition: &SchemaDefinition) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        if state.faults.create_definition.contains(&definition.name) {
            bail!("refusing to create {}", definition.name);
        }
        if state.definitions.contains_key(&definition.name) {
            bail!("entity type {} already exists", definition.name);
        }
        state.records.entry(definition.name.clone()).or_default();
        state.definitions.insert(definition.name.clone(), definition.clone());
        Ok(())
    }

    async fn update_definition(&self, definition: &SchemaDefinition) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        let slot = state
            .definitions
            .get_mut(&definition.name)
            .ok_or_else(|| anyhow!("entity type {} does not exist", definition.name))?;
        *slot = definition.clone();
        Ok(())
    }

    async fn list_entity_types(&self) -> anyhow::Result<Vec<EntityTypeSummary>> {
        let state = self.state.read().await;
        Ok(state.definitions.values().map(EntityTypeSummary::from).collect())
    }
}

#[async_trait]
impl Datastore for MemoryCatalog {
    async fn list_identifiers(&self, entity_type: &str) -> anyhow::Result<Vec<String>> {
        let state = self.state.read().await;
        if !state.definitions.contains_key(entity_type) {
            bail!("no table for entity type {entity_type}");
        }
        Ok(state
            .rows(entity_type)
            .iter()
            .filter_map(row_name)
            .map(str::to_string)
            .collect())
    }

    async fn read_record(&self, entity_type: &str, id: &str) -> anyhow::Result<Record> {
        let state = self.state.read().await;
        if state.faults.reads.contains(&(entity_type.to_string(), id.to_string())) {
            bail!("simulated read failure for {entity_type}/{id}");
        }
        state
            .find(entity_type, id)
            .map(|row| Record::new(entity_type, row.clone()))
            .ok_or_else(|| anyhow!("{entity_type} {id} not found"))
    }

    async fn exists(&self, entity_type: &str, id: &str) -> anyhow::Result<bool> {
        Ok(self.state.read().await.find(entity_type, id).is_some())
    }

    async fn insert_record(&self, record: &Record) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        if !state.definitions.contains_key(&record.entity_type) {
            bail!("no table for entity type {}", record.entity_type);
        }

        let mut fields = record.fields.clone();
        let name = match record.name() {
            Some(name) => name.to_string(),
            None => format!("{}-{:05}", record.entity_type, state.rows(&record.entity_type).len() + 1),
        };
        if state.faults.inserts.contains(&(record.entity_type.clone(), name.clone())) {
            bail!("simulated insert failure for {}/{}", record.entity_type, name);
        }
        if state.find(&record.entity_type, &name).is_some() {
            bail!("duplicate entry {} for {}", name, record.entity_type);
        }

        fields.set(NAME_FIELD, name.into());
        state.records.entry(record.entity_type.clone()).or_default().push(fields);
        Ok(())
    }

    async fn exec_raw_statement(&self, sql: &str) -> anyhow::Result<()> {
        let mut state = self.state.write().await;
        if let Some(needle) = state.faults.statements.iter().find(|n| sql.contains(n.as_str())) {
            bail!("simulated statement failure on '{needle}'");
        }
        state.sql_journal.push(sql.to_string());
        Ok(())
    }

    async fn table_ddl(&self, table: &str) -> anyhow::Result<String> {
        let state = self.state.read().await;
        state
            .definition_for_table(table)
            .map(render_ddl)
            .ok_or_else(|| anyhow!("table {table} does not exist"))
    }

    async fn table_stats(&self, table: &str) -> anyhow::Result<TableStats> {
        let state = self.state.read().await;
        let definition = state
            .definition_for_table(table)
            .ok_or_else(|| anyhow!("table {table} does not exist"))?;
        if state.faults.stats.contains(&definition.name) {
            bail!("information schema unavailable for {table}");
        }

        let rows = state.rows(&definition.name);
        let bytes = rows
            .iter()
            .map(|row| serde_json::to_vec(row).map(|v| v.len() as u64))
            .sum::<Result<u64, _>>()?;
        Ok(TableStats {
            rows: rows.len() as u64,
            bytes,
        })
    }

    async fn attachments_for(&self, entity_type: &str, id: &str) -> anyhow::Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .attachments
            .iter()
            .filter(|a| a.entity_type == entity_type && a.record == id)
            .map(|a| a.path.clone())
            .collect())
    }
}

#[async_trait]
impl FileStore for MemoryCatalog {
    async fn read_file(&self, path: &str) -> anyhow::Result<Vec<u8>> {
        self.state
            .read()
            .await
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| anyhow!("file {path} not found"))
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> anyhow::Result<()> {
        self.state.write().await.files.insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn file_exists(&self, path: &str) -> anyhow::Result<bool> {
        Ok(self.state.read().await.files.contains_key(path))
    }
}
