//! Entity catalogue listing

use crate::adapters::MetadataAdapter;
use crate::error::{EngineError, EngineResult};
use crate::model::EntityTypeSummary;
use std::collections::BTreeSet;

/// Non-child entity types, sorted by module then name. With `modules`
/// set only types of those modules are returned.
pub async fn list_entity_types(
    meta: &dyn MetadataAdapter,
    modules: Option<&[String]>,
) -> EngineResult<Vec<EntityTypeSummary>> {
    let mut types: Vec<EntityTypeSummary> = meta
        .list_entity_types()
        .await
        .map_err(|e| EngineError::metadata("*", e))?
        .into_iter()
        .filter(|t| !t.is_child_table)
        .filter(|t| match modules {
            Some(wanted) => t.module.as_ref().is_some_and(|m| wanted.contains(m)),
            None => true,
        })
        .collect();

    types.sort_by(|a, b| a.module.cmp(&b.module).then_with(|| a.name.cmp(&b.name)));
    Ok(types)
}

pub async fn list_modules(meta: &dyn MetadataAdapter) -> EngineResult<Vec<String>> {
    let modules: BTreeSet<String> = list_entity_types(meta, None)
        .await?
        .into_iter()
        .filter_map(|t| t.module)
        .collect();
    Ok(modules.into_iter().collect())
}
