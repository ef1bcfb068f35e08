//! Packed store reader and writer
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                 Packed Store File                 │
//! ├──────────────────────────────────────────────────┤
//! │ int32 record count                               │
//! │ record × count  {string name, int64 len, string} │  ← header
//! │ [payload 0]                                      │
//! │ [payload 1]                                      │
//! │ ...                                              │
//! └──────────────────────────────────────────────────┘
//! ```
//!
//! `offset[i] = header_end + sum(length[0..i])`. Offsets are never stored; they
//! are rebuilt from the record list every time it changes.

use crate::error::{Error, Result};
use depot_core_manifest::{codec, file_name_of, ContentRecord};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Byte size of the record count that opens every header
const COUNT_SIZE: u64 = 4;

/// Absolute position of one payload inside the backing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub offset: u64,
    pub length: u64,
}

/// A single file holding a header of content records followed by their payloads
#[derive(Debug, Clone)]
pub struct PackedStore {
    path: PathBuf,
    /// Where the header starts inside `path` (non-zero for nested stores)
    base_offset: u64,
    header_len: u64,
    records: Vec<ContentRecord>,
    offsets: Vec<u64>,
}

impl PackedStore {
    /// Empty store bound to `path`; nothing is read or written
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            base_offset: 0,
            header_len: COUNT_SIZE,
            records: Vec::new(),
            offsets: Vec::new(),
        }
    }

    /// Read the header of the store at `path`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_at(path, 0)
    }

    /// Read a store whose header begins `base_offset` bytes into `path`.
    ///
    /// Used to open a store that is itself a payload of another store.
    pub fn load_at<P: AsRef<Path>>(path: P, base_offset: u64) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::not_found(path));
        }

        let mut file = File::open(path)?;
        let file_len = file.metadata()?.len();
        file.seek(SeekFrom::Start(base_offset))?;
        let mut reader = BufReader::new(file);

        let count = codec::read_count(&mut reader)?;
        let mut records = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            records.push(ContentRecord::read_from(&mut reader)?);
        }

        let mut store = Self {
            path: path.to_path_buf(),
            base_offset,
            header_len: COUNT_SIZE,
            records,
            offsets: Vec::new(),
        };
        store.reindex()?;

        let end = store.base_offset + store.total_len();
        if end > file_len {
            return Err(Error::invalid_format(format!(
                "header describes {} bytes but {} holds {}",
                end,
                path.display(),
                file_len
            )));
        }

        tracing::debug!(
            path = %path.display(),
            offset = base_offset,
            records = store.records.len(),
            "loaded packed store"
        );
        Ok(store)
    }

    /// Rebuild offsets from the record list, rejecting lengths that overflow
    fn reindex(&mut self) -> Result<()> {
        let overflow = || Error::invalid_format("record lengths overflow the store size");

        let mut header_len = COUNT_SIZE;
        for record in &self.records {
            header_len = header_len.checked_add(record.encoded_len()).ok_or_else(overflow)?;
        }
        let mut position = self.base_offset.checked_add(header_len).ok_or_else(overflow)?;
        let mut offsets = Vec::with_capacity(self.records.len());
        for record in &self.records {
            offsets.push(position);
            position = position.checked_add(record.length).ok_or_else(overflow)?;
        }

        self.header_len = header_len;
        self.offsets = offsets;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> &[ContentRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn header_len(&self) -> u64 {
        self.header_len
    }

    /// Header plus every payload
    pub fn total_len(&self) -> u64 {
        self.header_len + self.records.iter().map(|r| r.length).sum::<u64>()
    }

    /// Records paired with their absolute payload offsets
    pub fn entries(&self) -> impl Iterator<Item = (&ContentRecord, u64)> {
        self.records.iter().zip(self.offsets.iter().copied())
    }

    /// Index of `name`: exact record name first, then file-name component
    fn position(&self, name: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.name == name)
            .or_else(|| {
                let wanted = file_name_of(name);
                self.records.iter().position(|r| r.file_name() == wanted)
            })
    }

    /// Look up a record by name or by file name
    pub fn get_file(&self, name: &str) -> Option<&ContentRecord> {
        self.position(name).map(|i| &self.records[i])
    }

    pub fn extent(&self, name: &str) -> Option<Extent> {
        self.position(name).map(|i| Extent {
            offset: self.offsets[i],
            length: self.records[i].length,
        })
    }

    /// True when a record with the same name, length and hash is stored
    pub fn contains(&self, record: &ContentRecord) -> bool {
        self.get_file(&record.name)
            .is_some_and(|stored| stored.matches(record.length, &record.hash))
    }

    /// Reader limited to one payload, positioned at its offset
    pub fn open_payload(&self, name: &str) -> Result<io::Take<File>> {
        let extent = self
            .extent(name)
            .ok_or_else(|| Error::record_not_found(name))?;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(extent.offset))?;
        Ok(file.take(extent.length))
    }

    pub fn read_payload(&self, name: &str) -> Result<Vec<u8>> {
        let mut reader = self.open_payload(name)?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf)?;
        let expected = self.extent(name).map(|e| e.length).unwrap_or(0);
        if buf.len() as u64 != expected {
            return Err(Error::LengthMismatch {
                name: name.to_string(),
                expected,
                found: buf.len() as u64,
            });
        }
        Ok(buf)
    }

    /// Copy one payload out to `dest`, returning the bytes written
    pub fn extract(&self, name: &str, dest: &Path) -> Result<u64> {
        let mut reader = self.open_payload(name)?;
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut writer = BufWriter::new(File::create(dest)?);
        let written = io::copy(&mut reader, &mut writer)?;
        writer.flush()?;
        Ok(written)
    }

    /// Replace the record list and rewrite the store file.
    ///
    /// Each payload is read from `source_dir/<record name>`. The new file is
    /// written beside the old one and renamed over it once complete.
    pub fn save(&mut self, records: Vec<ContentRecord>, source_dir: &Path) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)?;

        let mut staged = NamedTempFile::new_in(&dir)?;
        {
            let mut writer = BufWriter::new(staged.as_file_mut());
            codec::write_count(&mut writer, records.len())?;
            for record in &records {
                record.write_to(&mut writer)?;
            }
            for record in &records {
                let mut source = File::open(source_dir.join(&record.name))?;
                let found = source.metadata()?.len();
                if found != record.length {
                    return Err(Error::LengthMismatch {
                        name: record.name.clone(),
                        expected: record.length,
                        found,
                    });
                }
                io::copy(&mut source, &mut writer)?;
            }
            writer.flush()?;
        }
        staged.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        self.base_offset = 0;
        self.records = records;
        self.reindex()?;

        tracing::info!(
            path = %self.path.display(),
            records = self.records.len(),
            bytes = self.total_len(),
            "wrote packed store"
        );
        Ok(())
    }

    /// Build a new store at `path` from loose files in `source_dir`
    pub fn create<P: Into<PathBuf>>(
        path: P,
        records: Vec<ContentRecord>,
        source_dir: &Path,
    ) -> Result<Self> {
        let mut store = Self::new(path);
        store.save(records, source_dir)?;
        Ok(store)
    }

    /// Fold freshly downloaded loose files into the store.
    ///
    /// Records named in `preserve` are first extracted from the current file to
    /// `source_dir`, since their offsets change once the header is rewritten.
    /// The store is then rebuilt from the preserved records followed by
    /// `new_records`, and every loose file that was folded in is deleted.
    pub fn update(
        &mut self,
        source_dir: &Path,
        new_records: &[ContentRecord],
        preserve: &[String],
    ) -> Result<()> {
        let mut merged = Vec::with_capacity(preserve.len() + new_records.len());

        for name in preserve {
            if new_records.iter().any(|r| r.name == *name) {
                continue;
            }
            let Some(record) = self.get_file(name).cloned() else {
                tracing::warn!(name = %name, "preserved record missing from store");
                continue;
            };
            if merged.iter().any(|r: &ContentRecord| r.name == record.name) {
                continue;
            }
            self.extract(&record.name, &source_dir.join(&record.name))?;
            merged.push(record);
        }
        merged.extend(new_records.iter().cloned());

        self.save(merged, source_dir)?;

        for record in &self.records {
            let loose = source_dir.join(&record.name);
            if let Err(e) = fs::remove_file(&loose) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %loose.display(), error = %e, "failed to remove folded file");
                }
            }
        }
        Ok(())
    }
}
