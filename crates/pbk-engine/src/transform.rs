//! Declarative value and table-name rewrites applied while records stream

use crate::error::{EngineError, EngineResult};
use crate::model::{Record, Value};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use tracing::warn;

/// Overwrite `field` on records of `entity_type`.
///
/// An empty `match_value` rewrites every value; otherwise only values whose
/// string form equals it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRule {
    #[serde(alias = "doctype", alias = "entity_type")]
    pub entity_type: String,
    #[serde(alias = "field_name")]
    pub field: String,
    #[serde(default, alias = "old_value", alias = "oldValue")]
    pub match_value: Option<Value>,
    #[serde(alias = "new_value")]
    pub new_value: Value,
}

impl FieldRule {
    fn matches(&self, current: &Value) -> bool {
        match &self.match_value {
            None => true,
            Some(expected) if expected.is_empty() => true,
            Some(expected) => expected.to_string() == current.to_string(),
        }
    }
}

/// Rename a physical table in emitted SQL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRule {
    #[serde(alias = "old_table_name", alias = "oldTableName")]
    pub source_table_name: String,
    #[serde(alias = "new_table_name", alias = "newTableName")]
    pub target_table_name: String,
}

/// Rules supplied once at job start and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformRules {
    #[serde(default)]
    pub field_rules: Vec<FieldRule>,
    #[serde(default)]
    pub table_rules: Vec<TableRule>,
}

impl TransformRules {
    pub fn is_empty(&self) -> bool {
        self.field_rules.is_empty() && self.table_rules.is_empty()
    }

    /// Reject rule shapes that can never apply.
    pub fn validate(&self) -> EngineResult<()> {
        for (idx, rule) in self.field_rules.iter().enumerate() {
            if rule.entity_type.trim().is_empty() || rule.field.trim().is_empty() {
                return Err(EngineError::configuration(format!(
                    "field rule #{} needs both an entity type and a field",
                    idx + 1
                )));
            }
        }
        for (idx, rule) in self.table_rules.iter().enumerate() {
            if rule.source_table_name.trim().is_empty() || rule.target_table_name.trim().is_empty() {
                return Err(EngineError::configuration(format!(
                    "table rule #{} needs both a source and a target table name",
                    idx + 1
                )));
            }
        }
        Ok(())
    }

    pub fn apply_field_rules(&self, record: &mut Record) {
        apply_field_rules(std::slice::from_mut(record), &self.field_rules);
    }

    pub fn apply_table_rule<'a>(&self, table_name: &'a str) -> Cow<'a, str> {
        apply_table_rule(table_name, &self.table_rules)
    }
}

/// Apply every matching field rule to every record, in rule order.
///
/// Returns the number of values rewritten.
pub fn apply_field_rules(records: &mut [Record], rules: &[FieldRule]) -> usize {
    let mut rewritten = 0;
    for record in records.iter_mut() {
        for rule in rules
            .iter()
            .filter(|r| r.entity_type.eq_ignore_ascii_case(&record.entity_type))
        {
            match record.fields.get_ci_mut(&rule.field) {
                Some((_, current)) => {
                    if rule.matches(current) {
                        *current = rule.new_value.clone();
                        rewritten += 1;
                    }
                },
                None => warn!(
                    entity_type = %record.entity_type,
                    field = %rule.field,
                    record = record.name().unwrap_or("<unnamed>"),
                    "Transform rule field not present on record"
                ),
            }
        }
    }
    rewritten
}

/// Exact-match rename of a physical table; unmatched names pass through.
pub fn apply_table_rule<'a>(table_name: &'a str, rules: &[TableRule]) -> Cow<'a, str> {
    rules
        .iter()
        .find(|r| r.source_table_name == table_name)
        .map(|r| Cow::Owned(r.target_table_name.clone()))
        .unwrap_or(Cow::Borrowed(table_name))
}
