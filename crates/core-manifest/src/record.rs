//! Content records: name, length and hash of one stored item

use crate::codec;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// One storable item, identified by name and checked by length + hash
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Relative name, e.g. `assets/ui/title.pack`
    pub name: String,

    /// Payload length in bytes
    pub length: u64,

    /// Hex-encoded checksum of the payload
    pub hash: String,
}

impl ContentRecord {
    pub fn new<N: Into<String>, H: Into<String>>(name: N, length: u64, hash: H) -> Self {
        Self {
            name: name.into(),
            length,
            hash: hash.into(),
        }
    }

    /// Same length and same hash (hash compared ASCII case-insensitively)
    pub fn matches(&self, length: u64, hash: &str) -> bool {
        self.length == length && self.hash.eq_ignore_ascii_case(hash)
    }

    /// Same name, length and hash
    pub fn same_content(&self, other: &ContentRecord) -> bool {
        self.name == other.name && self.matches(other.length, &other.hash)
    }

    /// Last path component of the record name
    pub fn file_name(&self) -> &str {
        file_name_of(&self.name)
    }

    /// Serialize as `{string name, int64 length, string hash}`
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let length = i64::try_from(self.length).map_err(|_| {
            Error::invalid_format(format!("length of {} does not fit int64", self.name))
        })?;
        codec::write_string(writer, &self.name)?;
        codec::write_i64(writer, length)?;
        codec::write_string(writer, &self.hash)?;
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let name = codec::read_string(reader)?;
        let length = codec::read_i64(reader)?;
        let length = u64::try_from(length)
            .map_err(|_| Error::invalid_format(format!("negative length for {}", name)))?;
        let hash = codec::read_string(reader)?;
        Ok(Self { name, length, hash })
    }

    /// Bytes this record occupies once encoded
    pub fn encoded_len(&self) -> u64 {
        codec::encoded_string_len(&self.name) + 8 + codec::encoded_string_len(&self.hash)
    }
}

/// Last component of a `/` or `\` separated path
pub fn file_name_of(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_matches_ignores_hash_case() {
        let record = ContentRecord::new("ui.pack", 100, "75ac4c10");
        assert!(record.matches(100, "75AC4C10"));
        assert!(!record.matches(101, "75ac4c10"));
        assert!(!record.matches(100, "00000000"));
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name_of("assets/ui/title.pack"), "title.pack");
        assert_eq!(file_name_of("dir\\nested.pack"), "nested.pack");
        assert_eq!(file_name_of("flat"), "flat");
        assert_eq!(ContentRecord::new("a/b/c", 0, "").file_name(), "c");
    }

    #[test]
    fn test_encoded_len_matches_written_bytes() {
        let record = ContentRecord::new("assets/scenes/level1.pack", 126_793, "dc79a9c9");
        let mut buf = Vec::new();
        record.write_to(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, record.encoded_len());

        let decoded = ContentRecord::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut buf = Vec::new();
        codec::write_string(&mut buf, "bad").unwrap();
        codec::write_i64(&mut buf, -5).unwrap();
        codec::write_string(&mut buf, "00").unwrap();

        let err = ContentRecord::read_from(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { .. }));
    }
}
