//! Version manifests: a version number plus an ordered list of content records
//!
//! Wire format:
//!
//! ```text
//! int32  version
//! int32  record count
//! record × count   {string name, int64 length, string hash}
//! ```
//!
//! Record 0 always describes the packed store file itself.

use crate::codec;
use crate::error::{Error, Result};
use crate::record::ContentRecord;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Versioned, ordered list of content records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionManifest {
    /// Monotonic version number
    pub version: i32,

    /// Records, store meta-record first
    pub records: Vec<ContentRecord>,
}

impl VersionManifest {
    pub fn new(version: i32) -> Self {
        Self {
            version,
            records: Vec::new(),
        }
    }

    pub fn with_records(version: i32, records: Vec<ContentRecord>) -> Self {
        Self { version, records }
    }

    pub fn push(&mut self, record: ContentRecord) {
        self.records.push(record);
    }

    /// The packed store meta-record (index 0)
    pub fn store_record(&self) -> Option<&ContentRecord> {
        self.records.first()
    }

    /// Every record after the store meta-record
    pub fn items(&self) -> &[ContentRecord] {
        self.records.get(1..).unwrap_or(&[])
    }

    pub fn get(&self, name: &str) -> Option<&ContentRecord> {
        self.records.iter().find(|r| r.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Sum of every record length except the store meta-record
    pub fn total_item_bytes(&self) -> u64 {
        self.items().iter().map(|r| r.length).sum()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        codec::write_i32(writer, self.version)?;
        codec::write_count(writer, self.records.len())?;
        for record in &self.records {
            record.write_to(writer)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let version = codec::read_i32(reader)?;
        let count = codec::read_count(reader)?;
        let mut records = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            records.push(ContentRecord::read_from(reader)?);
        }
        Ok(Self { version, records })
    }

    /// Load a version manifest file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::not_found(path));
        }
        let mut reader = BufReader::new(File::open(path)?);
        let manifest = Self::read_from(&mut reader)?;
        tracing::debug!(
            path = %path.display(),
            version = manifest.version,
            records = manifest.records.len(),
            "loaded version manifest"
        );
        Ok(manifest)
    }

    /// Write the manifest to `path`, replacing any existing file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Read only the leading version number.
    ///
    /// Returns `None` when the file is missing or too short to hold one.
    pub fn read_version(path: &Path) -> Option<i32> {
        let mut file = File::open(path).ok()?;
        match codec::read_i32(&mut file) {
            Ok(version) => Some(version),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable version file");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::tempdir;

    fn sample() -> VersionManifest {
        VersionManifest::with_records(
            66,
            vec![
                ContentRecord::new("res", 128_976, "765321aa"),
                ContentRecord::new("assets/scenes.pack", 126_793, "75ac4c10"),
                ContentRecord::new("manifest.pack", 2094, "dc79a9c9"),
            ],
        )
    }

    #[test]
    fn test_store_record_and_items() {
        let manifest = sample();
        assert_eq!(manifest.store_record().unwrap().name, "res");
        assert_eq!(manifest.items().len(), 2);
        assert_eq!(manifest.total_item_bytes(), 126_793 + 2094);

        let empty = VersionManifest::new(1);
        assert!(empty.store_record().is_none());
        assert!(empty.items().is_empty());
    }

    #[test]
    fn test_wire_layout_header() {
        let mut buf = Vec::new();
        sample().write_to(&mut buf).unwrap();
        assert_eq!(&buf[..4], &66i32.to_le_bytes());
        assert_eq!(&buf[4..8], &3i32.to_le_bytes());

        let decoded = VersionManifest::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_save_load_and_read_version() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("ver");

        sample().save(&path).unwrap();
        assert_eq!(VersionManifest::read_version(&path), Some(66));

        let loaded = VersionManifest::load(&path).unwrap();
        assert_eq!(loaded.get("manifest.pack").unwrap().length, 2094);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ver");
        assert_eq!(VersionManifest::read_version(&path), None);
        assert!(VersionManifest::load(&path).unwrap_err().is_not_found());
    }

    #[test]
    fn test_truncated_version_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ver");
        std::fs::write(&path, [1u8, 0]).unwrap();
        assert_eq!(VersionManifest::read_version(&path), None);
    }
}
