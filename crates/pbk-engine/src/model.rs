//! Core domain types: entity schemas, field values and records

use chrono::NaiveDateTime;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Audit fields the destination assigns itself; stripped before insert.
pub const AUDIT_FIELDS: [&str; 4] = ["owner", "modified_by", "creation", "modified"];

/// Identifier field shared by every data row.
pub const NAME_FIELD: &str = "name";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Physical table backing an entity type.
pub fn table_name(entity_type: &str) -> String {
    format!("tab{entity_type}")
}

// ============================================================================
// Schema
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Data,
    Text,
    Int,
    Float,
    Check,
    Date,
    Datetime,
    Json,
    /// Reference to a record of another entity type
    Link,
    DynamicLink,
    /// Rows of an owned child-table type
    Table,
    TableMultiSelect,
    Attach,
    AttachImage,
    #[serde(other)]
    Other,
}

impl FieldKind {
    pub fn is_attachment(self) -> bool {
        matches!(self, FieldKind::Attach | FieldKind::AttachImage)
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, FieldKind::Int | FieldKind::Float | FieldKind::Check)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub kind: FieldKind,
    /// Target entity type for link and table fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            target: None,
        }
    }

    pub fn link(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Link,
            target: Some(target.into()),
        }
    }

    pub fn table(name: impl Into<String>, child_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Table,
            target: Some(child_type.into()),
        }
    }

    /// Entity type this field makes its owner depend on.
    ///
    /// Only plain links count. Child-table rows travel inside their parent
    /// record, so a table field never forces a separate restore step.
    pub fn relationship_target(&self) -> Option<&str> {
        match (self.kind, self.target.as_deref()) {
            (FieldKind::Link, Some(target)) if !target.is_empty() => Some(target),
            _ => None,
        }
    }
}

/// Full schema definition as stored by the metadata service and embedded in
/// archives. Properties the engine does not interpret ride along in
/// `properties` so a restored definition matches its source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default)]
    pub custom: bool,
    #[serde(default)]
    pub is_container: bool,
    #[serde(default)]
    pub is_child_table: bool,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    #[serde(default, flatten)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

impl SchemaDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: None,
            custom: false,
            is_container: false,
            is_child_table: false,
            fields: Vec::new(),
            properties: serde_json::Map::new(),
        }
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    pub fn with_field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    pub fn custom(mut self) -> Self {
        self.custom = true;
        self
    }

    pub fn container(mut self) -> Self {
        self.is_container = true;
        self
    }

    pub fn child_table(mut self) -> Self {
        self.is_child_table = true;
        self
    }

    pub fn table_name(&self) -> String {
        table_name(&self.name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    /// Drop source-side audit properties before the definition is recreated.
    pub fn strip_audit_properties(&mut self) {
        for key in AUDIT_FIELDS {
            self.properties.remove(key);
        }
    }
}

/// Catalogue row describing an entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityTypeSummary {
    pub name: String,
    pub module: Option<String>,
    pub custom: bool,
    pub is_container: bool,
    pub is_child_table: bool,
}

impl From<&SchemaDefinition> for EntityTypeSummary {
    fn from(def: &SchemaDefinition) -> Self {
        Self {
            name: def.name.clone(),
            module: def.module.clone(),
            custom: def.custom,
            is_container: def.is_container,
            is_child_table: def.is_child_table,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableStats {
    pub rows: u64,
    pub bytes: u64,
}

// ============================================================================
// Values
// ============================================================================

/// A single field value.
///
/// The variant drives SQL rendering: numbers and booleans are emitted bare,
/// everything else is quoted and escaped.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Timestamp(NaiveDateTime),
    /// Child rows, JSON fields and anything else structured
    Nested(serde_json::Value),
}

impl Value {
    /// Absent or blank. A rule whose match value is empty matches anything.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Timestamp(ts) => serde_json::Value::String(ts.format(TIMESTAMP_FORMAT).to_string()),
            Value::Nested(v) => v.clone(),
        }
    }
}

/// String form used for rule matching and tabular output.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => f.write_str(if *b { "1" } else { "0" }),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Timestamp(ts) => write!(f, "{}", ts.format(TIMESTAMP_FORMAT)),
            Value::Nested(v) => write!(f, "{v}"),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::Text(s),
            other => Value::Nested(other),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(ts: NaiveDateTime) -> Self {
        Value::Timestamp(ts)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::Text(s) => serializer.serialize_str(s),
            Value::Timestamp(ts) => serializer.collect_str(&ts.format(TIMESTAMP_FORMAT)),
            Value::Nested(v) => v.serialize(serializer),
        }
    }
}

/// Archived timestamps come back as text; the string form is unchanged.
impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

// ============================================================================
// Records
// ============================================================================

/// Field name to value mapping that keeps source field order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldMap(Vec<(String, Value)>);

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Case-insensitive lookup returning the stored field name as well.
    pub fn get_ci_mut(&mut self, name: &str) -> Option<(&str, &mut Value)> {
        self.0
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.0.iter_mut().find(|(k, _)| *k == name) {
            Some((_, slot)) => *slot = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let idx = self.0.iter().position(|(k, _)| k == name)?;
        Some(self.0.remove(idx).1)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, Value)> for FieldMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut map = FieldMap::new();
        for (k, v) in iter {
            map.set(k, v);
        }
        map
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for FieldMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldMapVisitor;

        impl<'de> Visitor<'de> for FieldMapVisitor {
            type Value = FieldMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<FieldMap, A::Error> {
                let mut fields = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((k, v)) = access.next_entry::<String, Value>()? {
                    fields.push((k, v));
                }
                Ok(FieldMap(fields))
            }
        }

        deserializer.deserialize_map(FieldMapVisitor)
    }
}

/// One row of an entity type
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub entity_type: String,
    pub fields: FieldMap,
}

impl Record {
    pub fn new(entity_type: impl Into<String>, fields: FieldMap) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields,
        }
    }

    /// Convenience constructor, mostly for fixtures.
    pub fn from_pairs<K, V, I>(entity_type: impl Into<String>, pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let fields = pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self::new(entity_type, fields)
    }

    pub fn name(&self) -> Option<&str> {
        self.fields.get(NAME_FIELD).and_then(Value::as_str).filter(|s| !s.is_empty())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.fields.set(field, value.into());
    }

    pub fn strip_audit_fields(&mut self) {
        for field in AUDIT_FIELDS {
            self.fields.remove(field);
        }
    }
}
