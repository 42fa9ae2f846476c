//! Entity dependency analysis
//!
//! An edge A -> B means A has a link field pointing at B, so B's records
//! must exist before A's can be restored.

pub mod graph;
pub mod order;

use crate::adapters::MetadataAdapter;
use crate::model::{FieldDescriptor, SchemaDefinition};
use tracing::{debug, warn};

pub use graph::{explore, graph_data, summarize, DependencyGraph, DependencySummary, Exploration};
pub use order::{kahn_sort, sort, validate, validate_order, OrderIssue, OrderValidation, SortOutcome};

/// Infrastructure types assumed present at every destination. They are
/// never pulled in as data dependencies.
pub const SYSTEM_ENTITY_TYPES: [&str; 29] = [
    "User",
    "Role",
    "Role Profile",
    "User Type",
    "DocType",
    "DocField",
    "DocPerm",
    "File",
    "Communication",
    "Comment",
    "Version",
    "Email Queue",
    "Email Account",
    "Notification Log",
    "Activity Log",
    "Error Log",
    "Scheduled Job Log",
    "Print Format",
    "Custom Field",
    "Property Setter",
    "Workflow",
    "Workflow State",
    "Workflow Action",
    "Assignment Rule",
    "Server Script",
    "Client Script",
    "Module Def",
    "Domain",
    "Domain Settings",
];

pub fn is_system_entity_type(entity_type: &str) -> bool {
    SYSTEM_ENTITY_TYPES.contains(&entity_type)
}

/// Direct link targets of `entity_type`, in field order, without
/// duplicates, self references or system types.
///
/// Metadata failures and unknown types yield an empty list; the caller keeps
/// going with the rest of the graph.
pub async fn direct_dependencies(meta: &dyn MetadataAdapter, entity_type: &str) -> Vec<String> {
    let fields = match meta.get_fields(entity_type).await {
        Ok(Some(fields)) => fields,
        Ok(None) => {
            debug!(entity_type = %entity_type, "Unknown entity type, treating as leaf");
            return Vec::new();
        },
        Err(e) => {
            warn!(entity_type = %entity_type, error = %e, "Metadata lookup failed, treating as leaf");
            return Vec::new();
        },
    };

    link_targets(entity_type, &fields)
}

/// Dependencies declared by a definition alone, with the same filtering as
/// [`direct_dependencies`]. Used when the destination has no metadata for
/// the type yet.
pub fn definition_dependencies(definition: &SchemaDefinition) -> Vec<String> {
    link_targets(&definition.name, &definition.fields)
}

fn link_targets(entity_type: &str, fields: &[FieldDescriptor]) -> Vec<String> {
    let mut deps: Vec<String> = Vec::new();
    for target in fields.iter().filter_map(|f| f.relationship_target()) {
        if target != entity_type
            && !is_system_entity_type(target)
            && !deps.iter().any(|d| d == target)
        {
            deps.push(target.to_string());
        }
    }
    deps
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::adapters::MemoryCatalog;
    use crate::model::{FieldDescriptor, FieldKind, SchemaDefinition};

    /// Sales Invoice -> Customer -> Territory, Sales Invoice -> Item -> Item Group,
    /// plus links to system types and a self link that must be ignored.
    pub async fn sales_catalog() -> MemoryCatalog {
        let catalog = MemoryCatalog::new();
        for def in [
            SchemaDefinition::new("Territory")
                .with_module("Setup")
                .with_field(FieldDescriptor::link("parent_territory", "Territory")),
            SchemaDefinition::new("Item Group").with_module("Stock"),
            SchemaDefinition::new("Customer")
                .with_module("Selling")
                .with_field(FieldDescriptor::new("customer_name", FieldKind::Data))
                .with_field(FieldDescriptor::link("territory", "Territory"))
                .with_field(FieldDescriptor::link("account_manager", "User")),
            SchemaDefinition::new("Item")
                .with_module("Stock")
                .with_field(FieldDescriptor::link("item_group", "Item Group")),
            SchemaDefinition::new("Sales Invoice Item")
                .with_module("Accounts")
                .child_table()
                .with_field(FieldDescriptor::link("item_code", "Item")),
            SchemaDefinition::new("Sales Invoice")
                .with_module("Accounts")
                .with_field(FieldDescriptor::link("customer", "Customer"))
                .with_field(FieldDescriptor::link("amended_from", "Sales Invoice"))
                .with_field(FieldDescriptor::link("owner_role", "Role"))
                .with_field(FieldDescriptor::link("default_item", "Item"))
                .with_field(FieldDescriptor::table("items", "Sales Invoice Item")),
        ] {
            catalog.add_definition(def).await;
        }
        catalog
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_direct_dependencies_filters_self_and_system() {
        let catalog = fixtures::sales_catalog().await;
        assert_eq!(
            direct_dependencies(&catalog, "Sales Invoice").await,
            vec!["Customer".to_string(), "Item".to_string()]
        );
        assert!(direct_dependencies(&catalog, "Territory").await.is_empty());
    }

    #[tokio::test]
    async fn test_metadata_failure_means_no_dependencies() {
        let catalog = fixtures::sales_catalog().await;
        catalog.fail_metadata_for("Customer").await;
        assert!(direct_dependencies(&catalog, "Customer").await.is_empty());
        assert!(direct_dependencies(&catalog, "Ghost").await.is_empty());
    }

    #[test]
    fn test_system_list() {
        assert!(is_system_entity_type("Workflow Action"));
        assert!(!is_system_entity_type("Customer"));
    }
}
