//! Binary codec for entity records and entity archives.
//!
//! # Entity record
//! All integers little-endian:
//! ```text
//! [id: u64][timestamp: i64 ns since epoch][annotation_count: u32]
//! annotation_count x [name_len: u32][name: UTF-8][path_len: u32][path: UTF-8]
//! ```
//! The record never embeds payload bytes. Writing is flush-then-export: every
//! annotation is unloaded to the external store before its path is written.
//!
//! # Archive
//! ```text
//! [magic: "WMDL"][version: 1 byte][count: u64]
//! count x [kind: u8][entity record]
//! [crc32: u32 over everything after the version byte]
//! ```

use std::collections::HashMap;
use std::io::{self, ErrorKind, Read, Write};

use chrono::{DateTime, Utc};
use crc32fast::Hasher;

use crate::annotation::Annotation;
use crate::entity::{Entity, EntityKind};
use crate::error::{WorldModelError, WorldResult};
use crate::id::EntityId;
use crate::storage::ExternalStore;

/// Current archive version.
const ARCHIVE_VERSION: u8 = 1;

/// Magic bytes identifying an entity archive.
pub const ARCHIVE_MAGIC: [u8; 4] = *b"WMDL";

/// Longest annotation name or path accepted on read (64 KiB).
const MAX_STRING_LEN: u32 = 64 * 1024;

/// Writes one entity record, unloading every annotation first.
///
/// # Errors
/// - I/O failure while flushing a payload or writing to `sink`
/// - A timestamp outside the representable nanosecond range
pub fn write_entity(entity: &mut Entity, store: &dyn ExternalStore, sink: &mut impl Write) -> WorldResult<()> {
    let id = entity.id();
    let nanos = entity.timestamp().timestamp_nanos_opt().ok_or_else(|| {
        WorldModelError::corrupted(format!("timestamp of entity {id} does not fit in i64 nanoseconds"))
    })?;
    let count = u32::try_from(entity.annotations().len())
        .map_err(|_| WorldModelError::corrupted(format!("entity {id} has too many annotations")))?;

    let mut buf = Vec::with_capacity(16 + 64 * count as usize);
    buf.extend_from_slice(&id.get().to_le_bytes());
    buf.extend_from_slice(&nanos.to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());

    for (name, annotation) in entity.annotations_mut().iter_mut() {
        annotation.set_parent_entity_id(id);
        let path = annotation.flush_for_export(store)?;
        put_str(&mut buf, name)?;
        put_str(&mut buf, path)?;
    }

    sink.write_all(&buf)?;
    Ok(())
}

/// Reads one entity record into `entity`.
///
/// Annotations are rebuilt in the external state. The entity is only
/// modified once the whole record has been decoded.
///
/// # Errors
/// - [`WorldModelError::CorruptedData`] for truncated or malformed input
/// - [`WorldModelError::Io`] for other read failures
pub fn read_entity_into(source: &mut impl Read, entity: &mut Entity) -> WorldResult<()> {
    let id = EntityId::new(u64::from_le_bytes(read_array(source, "entity id")?));
    let nanos = i64::from_le_bytes(read_array(source, "timestamp")?);
    let timestamp = DateTime::<Utc>::from_timestamp_nanos(nanos);
    let count = u32::from_le_bytes(read_array(source, "annotation count")?);

    let mut annotations = HashMap::with_capacity((count as usize).min(1024));
    for i in 0..count {
        let name = read_str(source, "annotation name")?;
        let path = read_str(source, "annotation path")?;
        if path.is_empty() {
            return Err(WorldModelError::corrupted(format!(
                "annotation {i} ('{name}') of entity {id} has an empty path"
            )));
        }
        let mut annotation = Annotation::external(name.clone(), path);
        annotation.set_parent_entity_id(id);
        if annotations.insert(name.clone(), annotation).is_some() {
            return Err(WorldModelError::corrupted(format!(
                "duplicate annotation '{name}' in entity {id}"
            )));
        }
    }

    entity.restore(id, timestamp, annotations);
    Ok(())
}

/// Reads one entity record as a new entity of the given kind.
pub fn read_entity(source: &mut impl Read, kind: EntityKind) -> WorldResult<Entity> {
    let mut entity = Entity::with_kind(DateTime::<Utc>::from_timestamp_nanos(0), kind);
    read_entity_into(source, &mut entity)?;
    Ok(entity)
}

fn put_str(buf: &mut Vec<u8>, s: &str) -> WorldResult<()> {
    let len = u32::try_from(s.len())
        .ok()
        .filter(|len| *len <= MAX_STRING_LEN)
        .ok_or_else(|| WorldModelError::corrupted(format!("string of {} bytes exceeds limit", s.len())))?;
    buf.extend_from_slice(&len.to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

fn read_array<const N: usize>(source: &mut impl Read, what: &str) -> WorldResult<[u8; N]> {
    let mut bytes = [0u8; N];
    source.read_exact(&mut bytes).map_err(|e| map_read_err(e, what))?;
    Ok(bytes)
}

fn read_str(source: &mut impl Read, what: &str) -> WorldResult<String> {
    let len = u32::from_le_bytes(read_array(source, what)?);
    if len > MAX_STRING_LEN {
        return Err(WorldModelError::corrupted(format!(
            "{what} length {len} exceeds maximum {MAX_STRING_LEN}"
        )));
    }
    let mut bytes = vec![0u8; len as usize];
    source.read_exact(&mut bytes).map_err(|e| map_read_err(e, what))?;
    String::from_utf8(bytes).map_err(|_| WorldModelError::corrupted(format!("{what} is not valid UTF-8")))
}

fn map_read_err(err: io::Error, what: &str) -> WorldModelError {
    if err.kind() == ErrorKind::UnexpectedEof {
        WorldModelError::corrupted(format!("truncated record while reading {what}"))
    } else {
        WorldModelError::Io(err)
    }
}

/// Passes bytes through while feeding them to a CRC32 hasher.
struct Checksummed<T> {
    inner: T,
    hasher: Hasher,
}

impl<T> Checksummed<T> {
    fn new(inner: T) -> Self {
        Self {
            inner,
            hasher: Hasher::new(),
        }
    }

    fn finish(self) -> (T, u32) {
        (self.inner, self.hasher.finalize())
    }
}

impl<W: Write> Write for Checksummed<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<R: Read> Read for Checksummed<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Streams entities into an archive.
///
/// The entry count is fixed up front; [`ArchiveWriter::finish`] fails if a
/// different number of entities was appended.
pub struct ArchiveWriter<W: Write> {
    out: Checksummed<W>,
    expected: u64,
    written: u64,
}

impl<W: Write> ArchiveWriter<W> {
    /// Writes the archive header for `count` entities.
    pub fn new(mut sink: W, count: u64) -> WorldResult<Self> {
        sink.write_all(&ARCHIVE_MAGIC)?;
        sink.write_all(&[ARCHIVE_VERSION])?;
        let mut out = Checksummed::new(sink);
        out.write_all(&count.to_le_bytes())?;
        Ok(Self {
            out,
            expected: count,
            written: 0,
        })
    }

    /// Flushes `entity`'s annotations and appends its record.
    pub fn append(&mut self, entity: &mut Entity, store: &dyn ExternalStore) -> WorldResult<()> {
        if self.written == self.expected {
            return Err(WorldModelError::corrupted(format!(
                "archive declared {} entities, refusing to append more",
                self.expected
            )));
        }
        self.out.write_all(&[entity.kind().tag()])?;
        write_entity(entity, store, &mut self.out)?;
        self.written += 1;
        Ok(())
    }

    /// Writes the trailing checksum and returns the sink.
    pub fn finish(self) -> WorldResult<W> {
        if self.written != self.expected {
            return Err(WorldModelError::corrupted(format!(
                "archive declared {} entities but {} were written",
                self.expected, self.written
            )));
        }
        let (mut sink, crc) = self.out.finish();
        sink.write_all(&crc.to_le_bytes())?;
        sink.flush()?;
        Ok(sink)
    }
}

/// Reads every entity of an archive.
///
/// Keyframes come back without raw observations, all annotations external.
///
/// # Errors
/// [`WorldModelError::CorruptedData`] for a bad header, a truncated body or
/// a checksum mismatch. Nothing is returned unless the whole archive checks
/// out.
pub fn read_archive(source: &mut impl Read) -> WorldResult<Vec<Entity>> {
    let magic: [u8; 4] = read_array(source, "archive magic")?;
    if magic != ARCHIVE_MAGIC {
        return Err(WorldModelError::corrupted(format!(
            "invalid archive magic: expected {ARCHIVE_MAGIC:?}, got {magic:?}"
        )));
    }
    let [version] = read_array::<1>(source, "archive version")?;
    if version != ARCHIVE_VERSION {
        return Err(WorldModelError::corrupted(format!(
            "unsupported archive version: {version} (expected {ARCHIVE_VERSION})"
        )));
    }

    let mut input = Checksummed::new(source);
    let count = u64::from_le_bytes(read_array(&mut input, "archive entity count")?);
    let mut entities = Vec::with_capacity(usize::try_from(count.min(4096)).unwrap_or(0));
    for _ in 0..count {
        let [tag] = read_array::<1>(&mut input, "entity kind")?;
        let kind = EntityKind::from_tag(tag)?;
        entities.push(read_entity(&mut input, kind)?);
    }

    let (source, computed) = input.finish();
    let stored = u32::from_le_bytes(read_array(source, "archive checksum")?);
    if stored != computed {
        return Err(WorldModelError::corrupted(format!(
            "archive CRC mismatch: stored={stored:08x}, computed={computed:08x}"
        )));
    }
    Ok(entities)
}
