//! Streaming archive writer
//!
//! One entity is open at a time. Document rows and SQL statement batches
//! are pushed into the archive as they arrive. Tabular rows are spooled to
//! disk until the entity closes, since the CSV header needs every field the
//! section uses. Attachments are appended after the last entity and the
//! manifest is written by [`ArchiveWriter::finish`].

use super::sql;
use super::tabular::CsvSection;
use super::{
    member_stem, ArchiveFormat, ExportType, FileEntry, Manifest, ManifestEntry, MANIFEST_MEMBER, SCHEMAS_MEMBER,
    SQL_MEMBER,
};
use crate::dependencies::definition_dependencies;
use crate::error::{EngineError, EngineResult};
use crate::model::{table_name, FieldMap, Record, SchemaDefinition};
use crate::transform::{apply_table_rule, TableRule};
use pbk_common::checksum::{sha256_hex, StreamingDigest};
use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Rows per CSV chunk pushed into the zip member
const CSV_CHUNK_ROWS: usize = 1000;

#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub format: ArchiveFormat,
    pub export_type: ExportType,
    /// Bundle attachments under `files/`; forces a zip for SQL
    pub include_files: bool,
    pub created_by: String,
    pub sql_rows_per_statement: usize,
    pub table_rules: Vec<TableRule>,
}

impl WriterOptions {
    pub fn new(format: ArchiveFormat, created_by: impl Into<String>) -> Self {
        Self {
            format,
            export_type: ExportType::Data,
            include_files: false,
            created_by: created_by.into(),
            sql_rows_per_statement: crate::config::DEFAULT_SQL_ROWS_PER_STATEMENT,
            table_rules: Vec::new(),
        }
    }

    pub fn with_files(mut self, include_files: bool) -> Self {
        self.include_files = include_files;
        self
    }

    pub fn with_table_rules(mut self, rules: Vec<TableRule>) -> Self {
        self.table_rules = rules;
        self
    }

    pub fn with_export_type(mut self, export_type: ExportType) -> Self {
        self.export_type = export_type;
        self
    }
}

enum Sink {
    Zip(ZipWriter<BufWriter<File>>),
    Sql(BufWriter<File>),
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Zip(zip) => zip.write(buf),
            Sink::Sql(file) => file.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Zip(zip) => zip.flush(),
            Sink::Sql(file) => file.flush(),
        }
    }
}

enum Section {
    Document { first: bool },
    Tabular(CsvSection),
    Sql { table: String, pending: Vec<FieldMap> },
}

struct OpenEntity {
    entity_type: String,
    dependencies: Vec<String>,
    members: Vec<String>,
    digest: StreamingDigest,
    record_count: u64,
    section: Section,
}

pub struct ArchiveWriter {
    path: PathBuf,
    options: WriterOptions,
    sink: Sink,
    manifest: Manifest,
    open: Option<OpenEntity>,
    files_started: bool,
    bundled: HashSet<String>,
}

fn member_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true)
}

/// Write to the sink, feeding the open entity's digest when there is one.
fn emit(sink: &mut Sink, digest: Option<&mut StreamingDigest>, bytes: &[u8]) -> EngineResult<()> {
    sink.write_all(bytes)?;
    if let Some(digest) = digest {
        digest.update(bytes);
    }
    Ok(())
}

impl ArchiveWriter {
    pub fn create(path: impl AsRef<Path>, options: WriterOptions) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = BufWriter::new(File::create(&path)?);
        let manifest = Manifest::new(options.format, options.export_type, options.created_by.clone());

        let mut sink = if options.format.is_zip(options.include_files) {
            Sink::Zip(ZipWriter::new(file))
        } else {
            Sink::Sql(file)
        };

        if options.format == ArchiveFormat::Sql && options.export_type == ExportType::Data {
            if let Sink::Zip(zip) = &mut sink {
                zip.start_file(SQL_MEMBER, member_options())?;
            }
            let header = sql::file_header(&options.created_by, manifest.created_at);
            emit(&mut sink, None, header.as_bytes())?;
        }

        debug!(path = %path.display(), format = %options.format, "Archive opened");
        Ok(Self {
            path,
            options,
            sink,
            manifest,
            open: None,
            files_started: false,
            bundled: HashSet::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> ArchiveFormat {
        self.options.format
    }

    /// Start an entity section.
    ///
    /// `ddl` is the live `CREATE TABLE` statement and only matters for SQL
    /// archives; when it is missing the section carries rows only.
    pub fn begin_entity(&mut self, definition: &SchemaDefinition, ddl: Option<&str>) -> EngineResult<()> {
        if let Some(open) = &self.open {
            return Err(EngineError::archive(format!(
                "cannot start {} while {} is still open",
                definition.name, open.entity_type
            )));
        }
        if self.files_started {
            return Err(EngineError::archive("entities cannot follow bundled files"));
        }

        let index = self.manifest.entities.len();
        let stem = member_stem(index, &definition.name);
        let mut digest = StreamingDigest::new();

        let (members, section) = match (&mut self.sink, self.options.format) {
            (Sink::Zip(zip), ArchiveFormat::Document) => {
                let member = format!("entities/{stem}.json");
                zip.start_file(member.as_str(), member_options())?;
                let head = format!(
                    "{{\"entityType\":{},\"definition\":{},\"records\":[",
                    serde_json::to_string(&definition.name)?,
                    serde_json::to_string(definition)?
                );
                zip.write_all(head.as_bytes())?;
                digest.update(head.as_bytes());
                (vec![member], Section::Document { first: true })
            },
            (Sink::Zip(zip), ArchiveFormat::Tabular) => {
                let schema_member = format!("schemas/{stem}.json");
                zip.start_file(schema_member.as_str(), member_options())?;
                zip.write_all(&serde_json::to_vec_pretty(definition)?)?;

                let data_member = format!("data/{stem}.csv");
                zip.start_file(data_member.as_str(), member_options())?;
                (
                    vec![schema_member, data_member],
                    Section::Tabular(CsvSection::new(&definition.name)?),
                )
            },
            (sink, _) => {
                let source = table_name(&definition.name);
                let target = apply_table_rule(&source, &self.options.table_rules).into_owned();
                let mut head = sql::entity_open(&definition.name);
                match ddl {
                    Some(ddl) => {
                        head.push_str(&sql::drop_statement(&target));
                        head.push('\n');
                        head.push_str(&sql::create_statement(ddl, &source, &target));
                        head.push('\n');
                    },
                    None => warn!(entity_type = %definition.name, "No table definition available, writing rows only"),
                }
                emit(sink, None, head.as_bytes())?;
                (
                    Vec::new(),
                    Section::Sql {
                        table: target,
                        pending: Vec::new(),
                    },
                )
            },
        };

        self.open = Some(OpenEntity {
            entity_type: definition.name.clone(),
            dependencies: definition_dependencies(definition),
            members,
            digest,
            record_count: 0,
            section,
        });
        Ok(())
    }

    pub fn write_record(&mut self, record: &Record) -> EngineResult<()> {
        let Some(open) = self.open.as_mut() else {
            return Err(EngineError::archive("write_record called with no open entity"));
        };

        match &mut open.section {
            Section::Document { first } => {
                let mut chunk = if *first { Vec::new() } else { vec![b','] };
                serde_json::to_writer(&mut chunk, &record.fields)?;
                *first = false;
                emit(&mut self.sink, Some(&mut open.digest), &chunk)?;
            },
            Section::Tabular(csv) => csv.push(&record.fields)?,
            Section::Sql { table, pending } => {
                pending.push(record.fields.clone());
                if pending.len() >= self.options.sql_rows_per_statement.max(1) {
                    if let Some(stmt) = sql::insert_statement(table, pending) {
                        emit(&mut self.sink, None, format!("{stmt}\n").as_bytes())?;
                    }
                    pending.clear();
                }
            },
        }

        open.record_count += 1;
        Ok(())
    }

    /// Close the open entity and record it in the manifest.
    pub fn end_entity(&mut self) -> EngineResult<u64> {
        let Some(mut open) = self.open.take() else {
            return Err(EngineError::archive("end_entity called with no open entity"));
        };

        match open.section {
            Section::Document { .. } => {
                let tail = format!("],\"recordCount\":{}}}", open.record_count);
                emit(&mut self.sink, Some(&mut open.digest), tail.as_bytes())?;
            },
            Section::Tabular(csv) => {
                let sink = &mut self.sink;
                let digest = &mut open.digest;
                csv.finish(CSV_CHUNK_ROWS, |chunk| emit(sink, Some(&mut *digest), chunk))?;
            },
            Section::Sql { table, pending } => {
                let mut tail = String::new();
                if let Some(stmt) = sql::insert_statement(&table, &pending) {
                    tail.push_str(&stmt);
                    tail.push('\n');
                }
                tail.push_str(&sql::entity_close(open.record_count));
                emit(&mut self.sink, None, tail.as_bytes())?;
            },
        }

        let sha256 = (!open.members.is_empty()).then(|| open.digest.finish_hex());
        debug!(entity_type = %open.entity_type, records = open.record_count, "Entity section written");

        self.manifest.total_records += open.record_count;
        self.manifest.entities.push(ManifestEntry {
            entity_type: open.entity_type,
            record_count: open.record_count,
            members: open.members,
            sha256,
            dependencies: open.dependencies,
        });
        Ok(open.record_count)
    }

    /// Write every definition into `schemas.json`.
    pub fn write_schemas(&mut self, definitions: &[SchemaDefinition]) -> EngineResult<()> {
        let Sink::Zip(zip) = &mut self.sink else {
            return Err(EngineError::archive("schema export needs a zip archive"));
        };
        let bytes = serde_json::to_vec_pretty(definitions)?;
        zip.start_file(SCHEMAS_MEMBER, member_options())?;
        zip.write_all(&bytes)?;

        for definition in definitions {
            self.manifest.entities.push(ManifestEntry {
                entity_type: definition.name.clone(),
                record_count: 0,
                members: vec![SCHEMAS_MEMBER.to_string()],
                sha256: None,
                dependencies: definition_dependencies(definition),
            });
        }
        Ok(())
    }

    /// Bundle one attachment under `files/`.
    ///
    /// Returns `false` when the path was already bundled or cannot be
    /// stored safely.
    pub fn add_file(&mut self, path: &str, content: &[u8]) -> EngineResult<bool> {
        if self.open.is_some() {
            return Err(EngineError::archive("files cannot be added while an entity is open"));
        }
        let Sink::Zip(zip) = &mut self.sink else {
            return Err(EngineError::archive("file bundling needs a zip archive"));
        };

        let relative = path.trim_start_matches('/');
        if relative.is_empty() || relative.split('/').any(|seg| seg == "..") {
            warn!(path = %path, "Refusing to bundle file with unsafe path");
            return Ok(false);
        }
        if !self.bundled.insert(path.to_string()) {
            return Ok(false);
        }

        let member = format!("files/{relative}");
        zip.start_file(member.as_str(), member_options())?;
        zip.write_all(content)?;
        self.files_started = true;

        self.manifest.files.push(FileEntry {
            path: path.to_string(),
            member,
            size: content.len() as u64,
            sha256: sha256_hex(content),
        });
        Ok(true)
    }

    /// Seal the archive and return its manifest.
    pub fn finish(mut self) -> EngineResult<Manifest> {
        if let Some(open) = &self.open {
            return Err(EngineError::archive(format!(
                "archive finished with {} still open",
                open.entity_type
            )));
        }

        match self.sink {
            Sink::Zip(mut zip) => {
                zip.start_file(MANIFEST_MEMBER, member_options())?;
                zip.write_all(&serde_json::to_vec_pretty(&self.manifest)?)?;
                let mut file = zip.finish()?;
                file.flush()?;
            },
            Sink::Sql(ref mut file) => file.flush()?,
        }

        info!(
            path = %self.path.display(),
            format = %self.manifest.format,
            entities = self.manifest.entities.len(),
            records = self.manifest.total_records,
            files = self.manifest.files.len(),
            "Archive written"
        );
        Ok(self.manifest)
    }
}
