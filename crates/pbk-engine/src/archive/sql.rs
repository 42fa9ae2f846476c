//! SQL statement archive: rendering, header comments and statement splitting

use super::{engine_version, ArchiveFormat, ExportType, Manifest, ManifestEntry};
use crate::error::{EngineError, EngineResult};
use crate::model::{FieldMap, Value};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::borrow::Cow;
use std::io::BufRead;
use tracing::warn;

const CREATED_BY: &str = "-- Created by:";
const CREATION_DATE: &str = "-- Creation date:";
const ENGINE_VERSION: &str = "-- Engine version:";
const ENTITY: &str = "-- Entity:";
const RECORDS_EXPORTED: &str = "-- Records exported:";

/// Escape backslash, quote and line breaks for a single-quoted literal.
pub fn escape_sql(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

pub fn sql_literal(value: &Value) -> Cow<'static, str> {
    match value {
        Value::Null => Cow::Borrowed("NULL"),
        Value::Bool(true) => Cow::Borrowed("1"),
        Value::Bool(false) => Cow::Borrowed("0"),
        Value::Int(i) => Cow::Owned(i.to_string()),
        Value::Float(x) if x.is_finite() => Cow::Owned(x.to_string()),
        Value::Float(_) => Cow::Borrowed("NULL"),
        other => Cow::Owned(format!("'{}'", escape_sql(&other.to_string()))),
    }
}

pub fn drop_statement(table: &str) -> String {
    format!("DROP TABLE IF EXISTS `{table}`;")
}

/// Point a live `CREATE TABLE` at `target` and terminate it.
pub fn create_statement(ddl: &str, source: &str, target: &str) -> String {
    let ddl = ddl.trim().trim_end_matches(';');
    let ddl = if source == target {
        ddl.to_string()
    } else {
        ddl.replace(&format!("`{source}`"), &format!("`{target}`"))
    };
    format!("{ddl};")
}

/// One multi-row `INSERT`. Columns are the union of the rows' fields in
/// first-seen order; a row lacking a column gets `NULL`.
pub fn insert_statement(table: &str, rows: &[FieldMap]) -> Option<String> {
    if rows.is_empty() {
        return None;
    }

    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        for name in row.names() {
            if !columns.contains(&name) {
                columns.push(name);
            }
        }
    }

    let column_list = columns
        .iter()
        .map(|c| format!("`{c}`"))
        .collect::<Vec<_>>()
        .join(", ");
    let values = rows
        .iter()
        .map(|row| {
            let cells = columns
                .iter()
                .map(|c| row.get(c).map(sql_literal).unwrap_or(Cow::Borrowed("NULL")))
                .collect::<Vec<_>>()
                .join(", ");
            format!("({cells})")
        })
        .collect::<Vec<_>>()
        .join(",\n");

    Some(format!("INSERT INTO `{table}` ({column_list}) VALUES\n{values};"))
}

pub fn file_header(created_by: &str, created_at: DateTime<Utc>) -> String {
    format!(
        "-- Partial backup SQL archive\n{CREATED_BY} {created_by}\n{CREATION_DATE} {}\n{ENGINE_VERSION} {}\n\n",
        created_at.to_rfc3339(),
        engine_version()
    )
}

pub fn entity_open(entity_type: &str) -> String {
    format!("{ENTITY} {entity_type}\n")
}

pub fn entity_close(record_count: u64) -> String {
    format!("{RECORDS_EXPORTED} {record_count}\n\n")
}

/// Incremental statement splitter fed one line at a time.
///
/// Tracks quoting across lines: a `;` or `--` inside a `'...'`, `"..."` or
/// `` `...` `` token is data, and backslash escapes apply inside string
/// literals. Outside quotes, `--` starts a comment that runs to the end of
/// the line, blank lines are dropped and lines are trimmed; lines that
/// continue an open literal are kept verbatim.
#[derive(Debug, Default)]
pub struct StatementSplitter {
    current: String,
    quote: Option<char>,
    escaped: bool,
}

impl StatementSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line, without its terminator. Statements completed by this
    /// line are appended to `out`.
    pub fn push_line(&mut self, line: &str, out: &mut Vec<String>) {
        let line = if self.quote.is_some() {
            line
        } else {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("--") {
                return;
            }
            trimmed
        };
        if !self.current.is_empty() {
            self.current.push('\n');
        }

        let mut start = 0;
        for (idx, c) in line.char_indices() {
            if self.escaped {
                self.escaped = false;
                continue;
            }
            match self.quote {
                Some(q) => {
                    if c == '\\' && q != '`' {
                        self.escaped = true;
                    } else if c == q {
                        self.quote = None;
                    }
                },
                None => match c {
                    '\'' | '"' | '`' => self.quote = Some(c),
                    '-' if line[idx + 1..].starts_with('-') => {
                        self.current.push_str(line[start..idx].trim_end());
                        start = line.len();
                        break;
                    },
                    ';' => {
                        self.current.push_str(&line[start..=idx]);
                        self.complete(out);
                        start = idx + 1;
                    },
                    _ => {},
                },
            }
        }
        self.current.push_str(&line[start..]);
        if self.quote.is_none() && self.current.trim().is_empty() {
            self.current.clear();
        }
    }

    fn complete(&mut self, out: &mut Vec<String>) {
        let statement = std::mem::take(&mut self.current);
        let statement = statement.trim();
        if statement != ";" && !statement.is_empty() {
            out.push(statement.to_string());
        }
    }

    /// Whatever follows the last `;` is not executed.
    pub fn finish(self) {
        if !self.current.trim().is_empty() {
            warn!(
                chars = self.current.len(),
                unterminated_quote = self.quote.is_some(),
                "Trailing SQL without terminating semicolon ignored"
            );
        }
    }
}

/// Split archive text into executable statements.
pub fn split_statements(text: &str) -> Vec<String> {
    let mut splitter = StatementSplitter::new();
    let mut statements = Vec::new();
    for line in text.lines() {
        splitter.push_line(line, &mut statements);
    }
    splitter.finish();
    statements
}

/// Finds the entity type a statement touches via its `` `tab...` `` table.
pub struct TableExtractor {
    pattern: Regex,
}

impl TableExtractor {
    pub fn new() -> EngineResult<Self> {
        let pattern = Regex::new(r"`tab([^`]+)`").map_err(|e| EngineError::archive(e.to_string()))?;
        Ok(Self { pattern })
    }

    pub fn entity_type<'s>(&self, statement: &'s str) -> Option<&'s str> {
        self.pattern
            .captures(statement)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }
}

fn comment_value<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix).map(str::trim)
}

/// Recover a manifest from header comments without executing anything.
/// The text is scanned line by line and never held whole.
pub fn parse_header<R: BufRead>(reader: R) -> EngineResult<Manifest> {
    let mut manifest = Manifest::new(ArchiveFormat::Sql, ExportType::Data, "Unknown");
    manifest.engine_version = "Unknown".to_string();
    manifest.created_at = DateTime::<Utc>::UNIX_EPOCH;
    let mut current: Option<String> = None;

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if !line.starts_with("--") {
            continue;
        }
        if let Some(v) = comment_value(line, CREATED_BY) {
            manifest.created_by = v.to_string();
        } else if let Some(v) = comment_value(line, CREATION_DATE) {
            match DateTime::parse_from_rfc3339(v) {
                Ok(ts) => manifest.created_at = ts.with_timezone(&Utc),
                Err(e) => warn!(value = %v, error = %e, "Unparseable creation date in SQL header"),
            }
        } else if let Some(v) = comment_value(line, ENGINE_VERSION) {
            manifest.engine_version = v.to_string();
        } else if let Some(v) = comment_value(line, ENTITY) {
            current = Some(v.to_string());
        } else if let Some(v) = comment_value(line, RECORDS_EXPORTED) {
            if let Some(entity_type) = current.take() {
                let record_count = v.parse().unwrap_or(0);
                manifest.total_records += record_count;
                manifest.entities.push(ManifestEntry {
                    entity_type,
                    record_count,
                    members: Vec::new(),
                    sha256: None,
                    dependencies: Vec::new(),
                });
            }
        }
    }

    Ok(manifest)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> FieldMap {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_escaping() {
        assert_eq!(escape_sql(r"O'Brien\n"), r"O\'Brien\\n");
        assert_eq!(escape_sql("a\nb\rc"), r"a\nb\rc");
    }

    #[test]
    fn test_literals_by_variant() {
        assert_eq!(sql_literal(&Value::Null), "NULL");
        assert_eq!(sql_literal(&Value::Int(-4)), "-4");
        assert_eq!(sql_literal(&Value::Float(2.5)), "2.5");
        assert_eq!(sql_literal(&Value::Bool(true)), "1");
        assert_eq!(sql_literal(&Value::from("it's")), r"'it\'s'");
        assert_eq!(sql_literal(&Value::Nested(serde_json::json!({"a": 1}))), r#"'{"a":1}'"#);
    }

    #[test]
    fn test_insert_unions_columns_and_fills_null() {
        let rows = vec![
            row(&[("name", "r1".into()), ("qty", Value::Int(1))]),
            row(&[("name", "r2".into()), ("note", "x".into())]),
        ];
        let stmt = insert_statement("tabItem", &rows).unwrap();
        assert_eq!(
            stmt,
            "INSERT INTO `tabItem` (`name`, `qty`, `note`) VALUES\n('r1', 1, NULL),\n('r2', NULL, 'x');"
        );
        assert!(insert_statement("tabItem", &[]).is_none());
    }

    #[test]
    fn test_create_statement_renames_table() {
        let ddl = "CREATE TABLE `tabFoo` (\n  `name` varchar(140)\n)";
        let stmt = create_statement(ddl, "tabFoo", "tabBar");
        assert!(stmt.starts_with("CREATE TABLE `tabBar`"));
        assert!(stmt.ends_with(";"));
        assert!(!stmt.contains("tabFoo"));
    }

    #[test]
    fn test_split_skips_comments_and_joins_lines() {
        let text = "-- Entity: Foo\nDROP TABLE IF EXISTS `tabFoo`;\nCREATE TABLE `tabFoo` (\n  `name` varchar(140)\n);\n\nINSERT INTO `tabFoo` (`name`) VALUES\n('a;b');\n";
        let statements = split_statements(text);
        assert_eq!(statements.len(), 3);
        assert_eq!(statements[1], "CREATE TABLE `tabFoo` (\n`name` varchar(140)\n);");
    }

    #[test]
    fn test_split_keeps_quoted_separators_and_comment_markers() {
        let text = "INSERT INTO `tabNote` (`body`) VALUES ('first;\n-- not a comment\n  indented');\nINSERT INTO `tabNote` (`body`) VALUES ('it\\'s; fine'), (\"a--b\"); -- trailing note\nDROP TABLE IF EXISTS `tab;Odd`;\n";
        let statements = split_statements(text);

        assert_eq!(statements.len(), 3);
        assert_eq!(
            statements[0],
            "INSERT INTO `tabNote` (`body`) VALUES ('first;\n-- not a comment\n  indented');"
        );
        assert_eq!(
            statements[1],
            "INSERT INTO `tabNote` (`body`) VALUES ('it\\'s; fine'), (\"a--b\");"
        );
        assert_eq!(statements[2], "DROP TABLE IF EXISTS `tab;Odd`;");
    }

    #[test]
    fn test_split_handles_several_statements_per_line() {
        let mut splitter = StatementSplitter::new();
        let mut out = Vec::new();
        splitter.push_line("SET a = 1; SET b = 2;", &mut out);
        splitter.push_line("SELECT 'unterminated", &mut out);
        splitter.finish();

        assert_eq!(out, vec!["SET a = 1;".to_string(), "SET b = 2;".to_string()]);
    }

    #[test]
    fn test_table_extractor() {
        let extractor = TableExtractor::new().unwrap();
        assert_eq!(extractor.entity_type("INSERT INTO `tabSales Order` (`name`)"), Some("Sales Order"));
        assert_eq!(extractor.entity_type("SELECT 1"), None);
    }

    #[test]
    fn test_header_round_trip() {
        let created_at = DateTime::parse_from_rfc3339("2025-02-01T10:00:00Z").unwrap().with_timezone(&Utc);
        let text = format!(
            "{}{}DROP TABLE IF EXISTS `tabA`;\n{}{}{}",
            file_header("admin@example.com", created_at),
            entity_open("A"),
            entity_close(3),
            entity_open("B"),
            entity_close(0),
        );
        let manifest = parse_header(text.as_bytes()).unwrap();

        assert_eq!(manifest.created_by, "admin@example.com");
        assert_eq!(manifest.created_at, created_at);
        assert_eq!(manifest.entity_types(), vec!["A".to_string(), "B".to_string()]);
        assert_eq!(manifest.total_records, 3);
        assert!(manifest.engine_version.starts_with("pbk-engine"));
    }
}
