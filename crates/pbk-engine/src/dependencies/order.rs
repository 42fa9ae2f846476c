//! Restore ordering: Kahn's algorithm with a cycle fallback, plus an
//! independent order checker

use super::direct_dependencies;
use crate::adapters::MetadataAdapter;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortOutcome {
    /// Every input type exactly once
    pub order: Vec<String>,
    /// Types that could not be placed because of a cycle. They sit at the
    /// end of `order` in input order, and their relative placement is best
    /// effort only.
    pub cyclic: Vec<String>,
}

impl SortOutcome {
    pub fn has_cycle(&self) -> bool {
        !self.cyclic.is_empty()
    }
}

fn dedup(types: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    types.iter().filter(|t| seen.insert(t.as_str())).cloned().collect()
}

/// Order `types` so that each type follows its in-set dependencies.
///
/// Edges leaving the set are ignored. Among types that become ready at the
/// same time, input order wins.
pub fn kahn_sort(types: &[String], deps: &HashMap<String, Vec<String>>) -> SortOutcome {
    let types = dedup(types);
    let members: HashSet<&str> = types.iter().map(String::as_str).collect();

    let mut in_degree: HashMap<&str, usize> = types.iter().map(|t| (t.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for entity_type in &types {
        let Some(targets) = deps.get(entity_type) else { continue };
        let mut counted: HashSet<&str> = HashSet::new();
        for dep in targets {
            let dep = dep.as_str();
            if dep == entity_type.as_str() || !members.contains(dep) || !counted.insert(dep) {
                continue;
            }
            dependents.entry(dep).or_default().push(entity_type.as_str());
            if let Some(degree) = in_degree.get_mut(entity_type.as_str()) {
                *degree += 1;
            }
        }
    }

    let mut queue: VecDeque<&str> = types
        .iter()
        .map(String::as_str)
        .filter(|t| in_degree.get(t).copied() == Some(0))
        .collect();
    let mut order: Vec<String> = Vec::with_capacity(types.len());

    while let Some(current) = queue.pop_front() {
        order.push(current.to_string());
        for dependent in dependents.get(current).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(dependent) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*dependent);
                }
            }
        }
    }

    let placed: HashSet<String> = order.iter().cloned().collect();
    let cyclic: Vec<String> = types.iter().filter(|t| !placed.contains(*t)).cloned().collect();
    order.extend(cyclic.iter().cloned());

    SortOutcome { order, cyclic }
}

async fn dependency_map(meta: &dyn MetadataAdapter, types: &[String]) -> HashMap<String, Vec<String>> {
    let mut deps = HashMap::with_capacity(types.len());
    for entity_type in types {
        if !deps.contains_key(entity_type) {
            deps.insert(entity_type.clone(), direct_dependencies(meta, entity_type).await);
        }
    }
    deps
}

/// Sort using live metadata. A cycle is logged as a warning, never an error.
#[tracing::instrument(skip(meta, types), fields(count = types.len()))]
pub async fn sort(meta: &dyn MetadataAdapter, types: &[String]) -> SortOutcome {
    let deps = dependency_map(meta, types).await;
    let outcome = kahn_sort(types, &deps);
    if outcome.has_cycle() {
        warn!(
            cyclic = %outcome.cyclic.join(", "),
            "Circular dependencies detected, appending in input order"
        );
    }
    outcome
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderIssue {
    pub entity_type: String,
    pub position: usize,
    pub missing_dependency: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderValidation {
    pub is_valid: bool,
    pub issues: Vec<OrderIssue>,
    pub issue_count: usize,
}

/// Report every position whose in-set dependency has not appeared yet.
pub fn validate_order(order: &[String], deps: &HashMap<String, Vec<String>>) -> OrderValidation {
    let members: HashSet<&str> = order.iter().map(String::as_str).collect();
    let mut processed: HashSet<&str> = HashSet::new();
    let mut issues = Vec::new();

    for (position, entity_type) in order.iter().enumerate() {
        for dep in deps.get(entity_type).into_iter().flatten() {
            if dep != entity_type && members.contains(dep.as_str()) && !processed.contains(dep.as_str()) {
                issues.push(OrderIssue {
                    entity_type: entity_type.clone(),
                    position,
                    missing_dependency: dep.clone(),
                    message: format!("{entity_type} depends on {dep} but {dep} comes later or is missing"),
                });
            }
        }
        processed.insert(entity_type.as_str());
    }

    OrderValidation {
        is_valid: issues.is_empty(),
        issue_count: issues.len(),
        issues,
    }
}

pub async fn validate(meta: &dyn MetadataAdapter, order: &[String]) -> OrderValidation {
    let deps = dependency_map(meta, order).await;
    validate_order(order, &deps)
}
