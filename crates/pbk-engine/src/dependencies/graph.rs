//! Transitive dependency exploration

use super::direct_dependencies;
use crate::adapters::MetadataAdapter;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use tracing::debug;

/// Result of walking the dependency graph from a set of seeds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exploration {
    /// Direct dependencies of every expanded type
    pub dependencies: BTreeMap<String, Vec<String>>,
    /// Seeds plus everything reachable within the depth cap
    pub all_types: BTreeSet<String>,
    /// Shallowest depth at which each type was reached; seeds are 0
    pub levels: BTreeMap<String, usize>,
}

/// Breadth-first walk from `seeds`.
///
/// A type found at depth `d` is only expanded when `d < max_depth`, so
/// `max_depth == 0` returns the seeds alone. Each type is expanded at most
/// once.
#[tracing::instrument(skip(meta, seeds), fields(seed_count = seeds.len()))]
pub async fn explore(meta: &dyn MetadataAdapter, seeds: &[String], max_depth: usize) -> Exploration {
    let mut result = Exploration::default();
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(String, usize)> = VecDeque::new();

    for seed in seeds {
        if result.all_types.insert(seed.clone()) {
            result.levels.insert(seed.clone(), 0);
            queue.push_back((seed.clone(), 0));
        }
    }

    while let Some((entity_type, depth)) = queue.pop_front() {
        if depth >= max_depth || visited.contains(&entity_type) {
            continue;
        }
        visited.insert(entity_type.clone());

        let deps = direct_dependencies(meta, &entity_type).await;
        for dep in &deps {
            if result.all_types.insert(dep.clone()) {
                result.levels.insert(dep.clone(), depth + 1);
            }
            if !visited.contains(dep) {
                queue.push_back((dep.clone(), depth + 1));
            }
        }
        result.dependencies.insert(entity_type, deps);
    }

    debug!(
        total = result.all_types.len(),
        expanded = result.dependencies.len(),
        "Dependency exploration finished"
    );
    result
}

/// What a selection would drag in, reported before committing to an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencySummary {
    pub selected: Vec<String>,
    pub selected_count: usize,
    /// For every explored type, its dependencies outside the selection
    pub dependencies_by_type: BTreeMap<String, Vec<String>>,
    /// Every type reachable from the selection but not in it, sorted
    pub new_dependencies: Vec<String>,
    pub new_dependency_count: usize,
    pub total_with_dependencies: usize,
    pub has_dependencies: bool,
}

/// Summarize what exporting `selected` would pull in.
///
/// The report is transitive: `new_dependencies` holds every type reachable
/// within `max_depth`, not only the direct link targets of the selection,
/// so a Sales Invoice selection also reports the Territory its Customer
/// links to.
pub async fn summarize(
    meta: &dyn MetadataAdapter,
    selected: &[String],
    max_depth: usize,
) -> DependencySummary {
    let exploration = explore(meta, selected, max_depth).await;
    let chosen: HashSet<&str> = selected.iter().map(String::as_str).collect();

    let dependencies_by_type: BTreeMap<String, Vec<String>> = exploration
        .dependencies
        .iter()
        .filter_map(|(entity_type, deps)| {
            let outside: Vec<String> =
                deps.iter().filter(|d| !chosen.contains(d.as_str())).cloned().collect();
            (!outside.is_empty()).then(|| (entity_type.clone(), outside))
        })
        .collect();

    let new_dependencies: Vec<String> = exploration
        .all_types
        .iter()
        .filter(|t| !chosen.contains(t.as_str()))
        .cloned()
        .collect();

    DependencySummary {
        selected: selected.to_vec(),
        selected_count: chosen.len(),
        dependencies_by_type,
        new_dependency_count: new_dependencies.len(),
        total_with_dependencies: chosen.len() + new_dependencies.len(),
        has_dependencies: !new_dependencies.is_empty(),
        new_dependencies,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub is_selected: bool,
    pub is_dependency: bool,
    pub level: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub label: String,
}

/// Node and edge lists for a graph view. Rendering is the caller's business.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub selected_count: usize,
    pub dependency_count: usize,
    pub total_count: usize,
}

pub async fn graph_data(
    meta: &dyn MetadataAdapter,
    selected: &[String],
    max_depth: usize,
) -> DependencyGraph {
    let exploration = explore(meta, selected, max_depth).await;
    let chosen: HashSet<&str> = selected.iter().map(String::as_str).collect();

    let mut nodes: Vec<GraphNode> = exploration
        .all_types
        .iter()
        .map(|entity_type| {
            let is_selected = chosen.contains(entity_type.as_str());
            GraphNode {
                id: entity_type.clone(),
                label: entity_type.clone(),
                is_selected,
                is_dependency: !is_selected,
                level: exploration.levels.get(entity_type).copied().unwrap_or(0),
            }
        })
        .collect();
    nodes.sort_by(|a, b| a.level.cmp(&b.level).then_with(|| a.id.cmp(&b.id)));

    let edges = exploration
        .dependencies
        .iter()
        .flat_map(|(from, deps)| {
            deps.iter().map(move |to| GraphEdge {
                from: from.clone(),
                to: to.clone(),
                label: "depends on".to_string(),
            })
        })
        .collect();

    let total_count = exploration.all_types.len();
    DependencyGraph {
        nodes,
        edges,
        selected_count: chosen.len(),
        dependency_count: total_count.saturating_sub(chosen.len()),
        total_count,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::dependencies::fixtures::sales_catalog;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_explore_collects_transitive_closure_with_levels() {
        let catalog = sales_catalog().await;
        let result = explore(&catalog, &names(&["Sales Invoice"]), 10).await;

        assert_eq!(
            result.all_types.iter().cloned().collect::<Vec<_>>(),
            names(&["Customer", "Item", "Item Group", "Sales Invoice", "Territory"])
        );
        assert_eq!(result.levels["Sales Invoice"], 0);
        assert_eq!(result.levels["Customer"], 1);
        assert_eq!(result.levels["Territory"], 2);
        assert_eq!(result.dependencies["Customer"], names(&["Territory"]));
        assert!(result.dependencies["Territory"].is_empty());
    }

    #[tokio::test]
    async fn test_explore_depth_zero_returns_seed_only() {
        let catalog = sales_catalog().await;
        let result = explore(&catalog, &names(&["Sales Invoice"]), 0).await;

        assert_eq!(result.all_types.len(), 1);
        assert!(result.all_types.contains("Sales Invoice"));
        assert!(result.dependencies.is_empty());
    }

    #[tokio::test]
    async fn test_explore_depth_one_lists_but_does_not_expand_neighbours() {
        let catalog = sales_catalog().await;
        let result = explore(&catalog, &names(&["Sales Invoice"]), 1).await;

        assert!(result.all_types.contains("Customer"));
        assert!(!result.all_types.contains("Territory"));
        assert_eq!(result.dependencies.len(), 1);
    }

    #[tokio::test]
    async fn test_explore_survives_metadata_failure() {
        let catalog = sales_catalog().await;
        catalog.fail_metadata_for("Customer").await;
        let result = explore(&catalog, &names(&["Sales Invoice"]), 10).await;

        assert!(result.all_types.contains("Customer"));
        assert!(!result.all_types.contains("Territory"));
        assert!(result.all_types.contains("Item Group"));
    }

    #[tokio::test]
    async fn test_summary_reports_only_unselected() {
        let catalog = sales_catalog().await;
        let summary = summarize(&catalog, &names(&["Sales Invoice", "Customer"]), 10).await;

        assert_eq!(summary.new_dependencies, names(&["Item", "Item Group", "Territory"]));
        assert_eq!(summary.dependencies_by_type["Sales Invoice"], names(&["Item"]));
        assert_eq!(summary.dependencies_by_type["Customer"], names(&["Territory"]));
        assert_eq!(summary.total_with_dependencies, 5);
        assert!(summary.has_dependencies);

        let leaf = summarize(&catalog, &names(&["Territory"]), 10).await;
        assert!(!leaf.has_dependencies);
        assert!(leaf.dependencies_by_type.is_empty());
    }

    #[tokio::test]
    async fn test_summary_follows_links_past_the_selection() {
        let catalog = sales_catalog().await;
        let summary = summarize(&catalog, &names(&["Sales Invoice"]), 10).await;

        for reached in ["Customer", "Territory", "Item", "Item Group"] {
            assert!(summary.new_dependencies.iter().any(|t| t == reached), "missing {reached}");
        }
        assert_eq!(summary.dependencies_by_type["Customer"], names(&["Territory"]));
        assert!(!summary.dependencies_by_type["Sales Invoice"].contains(&"Territory".to_string()));

        let shallow = summarize(&catalog, &names(&["Sales Invoice"]), 1).await;
        assert!(!shallow.new_dependencies.iter().any(|t| t == "Territory"));
    }

    #[tokio::test]
    async fn test_graph_data_counts_and_edges() {
        let catalog = sales_catalog().await;
        let graph = graph_data(&catalog, &names(&["Customer"]), 10).await;

        assert_eq!(graph.selected_count, 1);
        assert_eq!(graph.dependency_count, 1);
        assert_eq!(graph.total_count, 2);
        assert_eq!(graph.nodes[0].id, "Customer");
        assert!(graph.nodes[0].is_selected);
        assert!(graph.nodes[1].is_dependency);
        assert_eq!(
            graph.edges,
            vec![GraphEdge {
                from: "Customer".into(),
                to: "Territory".into(),
                label: "depends on".into()
            }]
        );
    }
}
