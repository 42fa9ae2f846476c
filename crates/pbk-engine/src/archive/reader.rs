//! Archive reader
//!
//! Detects the container from the first bytes: zip archives start with the
//! `PK\x03\x04` local-header magic, anything else is treated as plain SQL
//! text whose manifest is recovered from its header comments.
//!
//! Restore never holds a whole section in memory. [`ArchiveReader::stream_section`]
//! and [`ArchiveReader::stream_statements`] decode on a blocking thread that
//! reopens the archive and feeds a bounded channel, so at most a couple of
//! record batches are in flight at once.

use super::sql::{self, StatementSplitter};
use super::tabular::for_each_row;
use super::{ArchiveFormat, EntitySection, FileEntry, Manifest, ManifestEntry, MANIFEST_MEMBER, SCHEMAS_MEMBER, SQL_MEMBER};
use crate::error::{EngineError, EngineResult};
use crate::model::{FieldMap, SchemaDefinition};
use pbk_common::checksum::{sha256_reader, verify_sha256};
use pbk_common::PbkError;
use serde::de::{self, DeserializeSeed, IgnoredAny, MapAccess, SeqAccess, Visitor};
use serde::Deserializer;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use zip::read::ZipFile;
use zip::result::ZipError;
use zip::ZipArchive;

const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// Decoded batches buffered between the blocking decoder and restore
const STREAM_CAPACITY: usize = 2;

pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Where the archive bytes live, so decoders can reopen it.
#[derive(Clone)]
enum Origin {
    File(PathBuf),
    Memory(Arc<[u8]>),
}

impl Origin {
    fn open(&self) -> EngineResult<Box<dyn ReadSeek>> {
        match self {
            Origin::File(path) => Ok(Box::new(BufReader::new(File::open(path)?))),
            Origin::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
        }
    }
}

pub struct ArchiveReader {
    origin: Origin,
    zip: Option<ZipArchive<Box<dyn ReadSeek>>>,
    manifest: Manifest,
}

/// One step of a decoded entity section. The definition always comes
/// first, followed by zero or more record batches.
#[derive(Debug)]
pub enum SectionEvent {
    Definition(Option<SchemaDefinition>),
    Records(Vec<FieldMap>),
}

/// Items produced by a background decoder.
pub struct ArchiveStream<T> {
    rx: mpsc::Receiver<EngineResult<T>>,
    task: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> ArchiveStream<T> {
    fn spawn<F>(produce: F) -> Self
    where
        F: FnOnce(&mpsc::Sender<EngineResult<T>>) -> EngineResult<()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let task = tokio::task::spawn_blocking(move || {
            if let Err(e) = produce(&tx) {
                // The consumer may already be gone; nothing left to tell.
                let _ = tx.blocking_send(Err(e));
            }
        });
        Self { rx, task: Some(task) }
    }

    /// Next item, or `None` once the decoder is done.
    pub async fn next(&mut self) -> Option<EngineResult<T>> {
        if let Some(item) = self.rx.recv().await {
            return Some(item);
        }
        match self.task.take()?.await {
            Ok(()) => None,
            Err(e) => Some(Err(EngineError::archive(format!("archive decoder stopped: {e}")))),
        }
    }
}

fn send<T>(tx: &mpsc::Sender<EngineResult<T>>, item: T) -> EngineResult<()> {
    tx.blocking_send(Ok(item))
        .map_err(|_| EngineError::archive("archive consumer went away"))
}

impl ArchiveReader {
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        let mut magic = [0u8; 4];
        let is_zip = file.read_exact(&mut magic).is_ok() && &magic == ZIP_MAGIC;
        file.rewind()?;

        debug!(path = %path.display(), is_zip, "Opening archive");
        let origin = Origin::File(path.to_path_buf());
        if is_zip {
            Self::from_zip(origin)
        } else {
            let manifest = sql::parse_header(BufReader::new(file))?;
            Ok(Self {
                origin,
                zip: None,
                manifest,
            })
        }
    }

    pub fn from_bytes(bytes: Vec<u8>) -> EngineResult<Self> {
        let bytes: Arc<[u8]> = Arc::from(bytes);
        if bytes.starts_with(ZIP_MAGIC) {
            Self::from_zip(Origin::Memory(bytes))
        } else {
            let manifest = sql::parse_header(&bytes[..])
                .map_err(|e| EngineError::archive(format!("not a zip and not readable SQL: {e}")))?;
            Ok(Self {
                origin: Origin::Memory(bytes),
                zip: None,
                manifest,
            })
        }
    }

    fn from_zip(origin: Origin) -> EngineResult<Self> {
        let mut zip = ZipArchive::new(origin.open()?)?;
        let manifest: Manifest = serde_json::from_reader(open_member(&mut zip, MANIFEST_MEMBER)?)?;
        Ok(Self {
            origin,
            zip: Some(zip),
            manifest,
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn format(&self) -> ArchiveFormat {
        self.manifest.format
    }

    pub fn is_zip(&self) -> bool {
        self.zip.is_some()
    }

    fn zip_mut(&mut self, member: &str) -> EngineResult<&mut ZipArchive<Box<dyn ReadSeek>>> {
        self.zip
            .as_mut()
            .ok_or_else(|| EngineError::archive(format!("plain SQL archive has no member {member}")))
    }

    fn member_bytes(&mut self, member: &str) -> EngineResult<Vec<u8>> {
        let zip = self.zip_mut(member)?;
        let mut bytes = Vec::new();
        open_member(zip, member)?.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn section_entry(&self, entity_type: &str) -> EngineResult<ManifestEntry> {
        let entry = self
            .manifest
            .entry(entity_type)
            .cloned()
            .ok_or_else(|| EngineError::archive(format!("{entity_type} is not in this archive")))?;
        match self.manifest.format {
            ArchiveFormat::Sql => Err(EngineError::archive("SQL archives have no per-entity sections")),
            _ if entry.members.is_empty() => Err(EngineError::archive(format!(
                "{entity_type} has no archive member; SQL archives are replayed as statements"
            ))),
            _ => Ok(entry),
        }
    }

    /// Schema and every row of one entity type, checksum-verified, in
    /// memory. Restore uses [`ArchiveReader::stream_section`] instead.
    pub fn read_section(&mut self, entity_type: &str) -> EngineResult<EntitySection> {
        let entry = self.section_entry(entity_type)?;
        let format = self.manifest.format;
        let mut section = EntitySection {
            entity_type: entry.entity_type.clone(),
            definition: None,
            records: Vec::new(),
            record_count: 0,
        };

        let zip = self.zip_mut(&entry.entity_type)?;
        decode_section(zip, format, &entry, usize::MAX, |event| {
            match event {
                SectionEvent::Definition(definition) => section.definition = definition,
                SectionEvent::Records(mut batch) => section.records.append(&mut batch),
            }
            Ok(())
        })?;
        section.record_count = section.records.len() as u64;
        Ok(section)
    }

    /// Decode one entity section in the background, `batch_size` records
    /// per [`SectionEvent::Records`]. The member checksum is verified before
    /// the first event.
    pub fn stream_section(&self, entity_type: &str, batch_size: usize) -> EngineResult<ArchiveStream<SectionEvent>> {
        let entry = self.section_entry(entity_type)?;
        let format = self.manifest.format;
        let origin = self.origin.clone();

        Ok(ArchiveStream::spawn(move |tx| {
            let mut zip = ZipArchive::new(origin.open()?)?;
            decode_section(&mut zip, format, &entry, batch_size, |event| send(tx, event))
        }))
    }

    /// SQL statements in file order, from the plain file or the zip's
    /// `backup.sql`, split as they are read.
    pub fn stream_statements(&self) -> EngineResult<ArchiveStream<String>> {
        if self.manifest.format != ArchiveFormat::Sql {
            return Err(EngineError::archive(format!(
                "{} archives have no SQL statements",
                self.manifest.format
            )));
        }
        let origin = self.origin.clone();
        let is_zip = self.is_zip();

        Ok(ArchiveStream::spawn(move |tx| {
            let source = origin.open()?;
            if is_zip {
                let mut zip = ZipArchive::new(source)?;
                let member = open_member(&mut zip, SQL_MEMBER)?;
                split_into(BufReader::new(member), tx)
            } else {
                split_into(BufReader::new(source), tx)
            }
        }))
    }

    pub fn read_schemas(&mut self) -> EngineResult<Vec<SchemaDefinition>> {
        let zip = self.zip_mut(SCHEMAS_MEMBER)?;
        Ok(serde_json::from_reader(BufReader::new(open_member(zip, SCHEMAS_MEMBER)?))?)
    }

    /// Content of a bundled attachment, checksum-verified.
    pub fn read_file_member(&mut self, entry: &FileEntry) -> EngineResult<Vec<u8>> {
        let bytes = self.member_bytes(&entry.member)?;
        verify_sha256(&entry.member, &bytes, &entry.sha256)?;
        Ok(bytes)
    }
}

fn open_member<'a, R: Read + Seek>(zip: &'a mut ZipArchive<R>, member: &str) -> EngineResult<ZipFile<'a, R>> {
    match zip.by_name(member) {
        Ok(file) => Ok(file),
        Err(ZipError::FileNotFound) => Err(EngineError::archive(format!("archive member {member} is missing"))),
        Err(e) => Err(e.into()),
    }
}

/// Hash a member by streaming it, without buffering its content.
fn verify_member<R: Read + Seek>(zip: &mut ZipArchive<R>, member: &str, expected: &str) -> EngineResult<()> {
    let actual = sha256_reader(&mut open_member(zip, member)?)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(PbkError::ChecksumMismatch {
            subject: member.to_string(),
            expected: expected.to_string(),
            actual,
        }
        .into())
    }
}

fn split_into<R: BufRead>(reader: R, tx: &mpsc::Sender<EngineResult<String>>) -> EngineResult<()> {
    let mut splitter = StatementSplitter::new();
    let mut ready = Vec::new();
    for line in reader.lines() {
        splitter.push_line(&line?, &mut ready);
        for statement in ready.drain(..) {
            send(tx, statement)?;
        }
    }
    splitter.finish();
    Ok(())
}

/// Groups decoded records into batches and guarantees the definition is
/// emitted exactly once, ahead of any records.
struct BatchSink<F> {
    emit: F,
    batch: Vec<FieldMap>,
    batch_size: usize,
    definition_sent: bool,
}

impl<F> BatchSink<F>
where
    F: FnMut(SectionEvent) -> EngineResult<()>,
{
    fn new(batch_size: usize, emit: F) -> Self {
        Self {
            emit,
            batch: Vec::new(),
            batch_size: batch_size.max(1),
            definition_sent: false,
        }
    }

    fn definition(&mut self, definition: Option<SchemaDefinition>) -> EngineResult<()> {
        if self.definition_sent {
            return Ok(());
        }
        self.definition_sent = true;
        (self.emit)(SectionEvent::Definition(definition))
    }

    fn push(&mut self, fields: FieldMap) -> EngineResult<()> {
        self.definition(None)?;
        self.batch.push(fields);
        if self.batch.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> EngineResult<()> {
        if self.batch.is_empty() {
            return Ok(());
        }
        (self.emit)(SectionEvent::Records(std::mem::take(&mut self.batch)))
    }

    fn finish(mut self) -> EngineResult<()> {
        self.definition(None)?;
        self.flush()
    }
}

fn decode_section<R, F>(
    zip: &mut ZipArchive<R>,
    format: ArchiveFormat,
    entry: &ManifestEntry,
    batch_size: usize,
    emit: F,
) -> EngineResult<()>
where
    R: Read + Seek,
    F: FnMut(SectionEvent) -> EngineResult<()>,
{
    let Some(data_member) = entry.members.last() else {
        return Err(EngineError::archive(format!("{} has no archive member", entry.entity_type)));
    };
    if let Some(expected) = &entry.sha256 {
        verify_member(zip, data_member, expected)?;
    }

    let mut sink = BatchSink::new(batch_size, emit);
    match format {
        ArchiveFormat::Document => {
            let member = BufReader::new(open_member(zip, data_member)?);
            let mut de = serde_json::Deserializer::from_reader(member);
            DocumentSection { sink: &mut sink }.deserialize(&mut de)?;
            de.end()?;
        },
        ArchiveFormat::Tabular => {
            if let Some(schema_member) = entry.members.first().filter(|m| *m != data_member) {
                let member = BufReader::new(open_member(zip, schema_member)?);
                sink.definition(serde_json::from_reader(member)?)?;
            }
            for_each_row(open_member(zip, data_member)?, |fields| sink.push(fields))?;
        },
        ArchiveFormat::Sql => return Err(EngineError::archive("SQL archives have no per-entity sections")),
    }
    sink.finish()
}

/// Walks `{"entityType", "definition", "records": [...], "recordCount"}`
/// handing each record to the sink as soon as it is parsed.
struct DocumentSection<'a, F> {
    sink: &'a mut BatchSink<F>,
}

impl<'de, F> DeserializeSeed<'de> for DocumentSection<'_, F>
where
    F: FnMut(SectionEvent) -> EngineResult<()>,
{
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de, F> Visitor<'de> for DocumentSection<'_, F>
where
    F: FnMut(SectionEvent) -> EngineResult<()>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an entity section object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<(), A::Error> {
        let sink = self.sink;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "definition" => {
                    let definition: Option<SchemaDefinition> = map.next_value()?;
                    sink.definition(definition).map_err(<A::Error as de::Error>::custom)?;
                },
                "records" => map.next_value_seed(RecordRows { sink: &mut *sink })?,
                _ => {
                    map.next_value::<IgnoredAny>()?;
                },
            }
        }
        Ok(())
    }
}

struct RecordRows<'a, F> {
    sink: &'a mut BatchSink<F>,
}

impl<'de, F> DeserializeSeed<'de> for RecordRows<'_, F>
where
    F: FnMut(SectionEvent) -> EngineResult<()>,
{
    type Value = ();

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<(), D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, F> Visitor<'de> for RecordRows<'_, F>
where
    F: FnMut(SectionEvent) -> EngineResult<()>,
{
    type Value = ();

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a list of records")
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<(), A::Error> {
        while let Some(fields) = seq.next_element::<FieldMap>()? {
            self.sink.push(fields).map_err(<A::Error as de::Error>::custom)?;
        }
        Ok(())
    }
}
