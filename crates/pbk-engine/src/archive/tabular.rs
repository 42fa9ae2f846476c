//! CSV encoding for the tabular archive

use crate::error::EngineResult;
use crate::model::{FieldMap, Value};
use csv::{QuoteStyle, ReaderBuilder, StringRecord, WriterBuilder};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use tracing::debug;

/// CSV encoder for one entity type.
///
/// Records are spooled to an anonymous temp file as `name,value,...` rows
/// while the header grows to the union of every field seen, in first-seen
/// order. [`CsvSection::finish`] writes the header and projects each
/// spooled row onto it; a field a record lacks becomes an empty cell.
pub struct CsvSection {
    entity_type: String,
    header: Vec<String>,
    index: HashMap<String, usize>,
    spool: csv::Writer<File>,
    rows: u64,
}

impl CsvSection {
    pub fn new(entity_type: &str) -> EngineResult<Self> {
        let spool = WriterBuilder::new()
            .flexible(true)
            .has_headers(false)
            .from_writer(tempfile::tempfile()?);
        Ok(Self {
            entity_type: entity_type.to_string(),
            header: Vec::new(),
            index: HashMap::new(),
            spool,
            rows: 0,
        })
    }

    pub fn push(&mut self, fields: &FieldMap) -> EngineResult<()> {
        let mut pairs: Vec<String> = Vec::with_capacity(fields.len() * 2);
        for (name, value) in fields.iter() {
            if !self.index.contains_key(name) {
                self.index.insert(name.to_string(), self.header.len());
                self.header.push(name.to_string());
            }
            pairs.push(name.to_string());
            pairs.push(value.to_string());
        }
        self.spool.write_record(&pairs)?;
        self.rows += 1;
        Ok(())
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Encode the section and hand the CSV bytes to `sink`, at most
    /// `chunk_rows` rows per call. An empty section produces no bytes.
    pub fn finish<F>(self, chunk_rows: usize, mut sink: F) -> EngineResult<u64>
    where
        F: FnMut(&[u8]) -> EngineResult<()>,
    {
        if self.rows == 0 {
            return Ok(0);
        }

        let mut file = self.spool.into_inner().map_err(|e| e.into_error())?;
        file.rewind()?;
        let mut spooled = ReaderBuilder::new()
            .flexible(true)
            .has_headers(false)
            .from_reader(BufReader::new(file));

        let mut out = csv_writer();
        out.write_record(&self.header)?;
        let mut pending = 0;
        for row in spooled.records() {
            let row = row?;
            let mut cells = vec![""; self.header.len()];
            let spooled_cells: Vec<&str> = row.iter().collect();
            for pair in spooled_cells.chunks_exact(2) {
                if let Some(&idx) = self.index.get(pair[0]) {
                    cells[idx] = pair[1];
                }
            }
            out.write_record(&cells)?;

            pending += 1;
            if pending >= chunk_rows.max(1) {
                sink(&drain(out)?)?;
                out = csv_writer();
                pending = 0;
            }
        }
        sink(&drain(out)?)?;

        debug!(entity_type = %self.entity_type, rows = self.rows, columns = self.header.len(), "CSV section encoded");
        Ok(self.rows)
    }
}

fn csv_writer() -> csv::Writer<Vec<u8>> {
    WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .from_writer(Vec::new())
}

fn drain(writer: csv::Writer<Vec<u8>>) -> EngineResult<Vec<u8>> {
    Ok(writer.into_inner().map_err(|e| e.into_error())?)
}

/// Empty cells are absent fields; cells holding a JSON object or array come
/// back as nested values; everything else is text.
fn cell_value(raw: &str) -> Option<Value> {
    if raw.is_empty() {
        return None;
    }
    if raw.starts_with('{') || raw.starts_with('[') {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(raw) {
            return Some(Value::Nested(json));
        }
    }
    Some(Value::Text(raw.to_string()))
}

fn row_fields(header: &[String], row: &StringRecord) -> FieldMap {
    header
        .iter()
        .zip(row.iter())
        .filter_map(|(name, raw)| cell_value(raw).map(|v| (name.clone(), v)))
        .collect()
}

/// Decode CSV rows one at a time, straight off `reader`.
pub fn for_each_row<R, F>(reader: R, mut f: F) -> EngineResult<()>
where
    R: Read,
    F: FnMut(FieldMap) -> EngineResult<()>,
{
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(reader);
    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let mut row = StringRecord::new();
    while reader.read_record(&mut row)? {
        f(row_fields(&header, &row))?;
    }
    Ok(())
}
