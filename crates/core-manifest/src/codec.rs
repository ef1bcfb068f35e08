//! Binary primitives shared by the version manifest and the packed store header
//!
//! All integers are little-endian. Strings carry an unsigned LEB128 byte-length
//! prefix (7 bits per byte, high bit set on every byte but the last) followed by
//! the UTF-8 bytes.

use crate::error::{Error, Result};
use std::io::{Read, Write};

/// Upper bound for a single encoded string, guards allocations on corrupt input
pub const MAX_STRING_LEN: usize = 64 * 1024;

pub fn write_i32<W: Write>(writer: &mut W, value: i32) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn write_i64<W: Write>(writer: &mut W, value: i64) -> Result<()> {
    writer.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub fn read_i64<R: Read>(reader: &mut R) -> Result<i64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

/// Write a count as `int32`, rejecting counts the format cannot carry
pub fn write_count<W: Write>(writer: &mut W, count: usize) -> Result<()> {
    let count = i32::try_from(count)
        .map_err(|_| Error::invalid_format(format!("record count {} exceeds int32", count)))?;
    write_i32(writer, count)
}

/// Read an `int32` count, rejecting negative values
pub fn read_count<R: Read>(reader: &mut R) -> Result<usize> {
    let count = read_i32(reader)?;
    usize::try_from(count)
        .map_err(|_| Error::invalid_format(format!("negative record count {}", count)))
}

pub fn write_string<W: Write>(writer: &mut W, value: &str) -> Result<()> {
    let bytes = value.as_bytes();
    if bytes.len() > MAX_STRING_LEN {
        return Err(Error::invalid_format(format!(
            "string of {} bytes exceeds limit of {}",
            bytes.len(),
            MAX_STRING_LEN
        )));
    }

    let mut len = bytes.len();
    while len >= 0x80 {
        writer.write_all(&[(len as u8) | 0x80])?;
        len >>= 7;
    }
    writer.write_all(&[len as u8])?;
    writer.write_all(bytes)?;
    Ok(())
}

pub fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let mut len = 0usize;
    let mut shift = 0u32;
    loop {
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte)?;
        len |= ((byte[0] & 0x7f) as usize) << shift;
        if byte[0] & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 28 {
            return Err(Error::invalid_format("string length prefix too long"));
        }
    }

    if len > MAX_STRING_LEN {
        return Err(Error::invalid_format(format!(
            "string of {} bytes exceeds limit of {}",
            len, MAX_STRING_LEN
        )));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| Error::invalid_format(format!("string is not UTF-8: {}", e)))
}

/// Number of bytes `write_string` produces for `value`
pub fn encoded_string_len(value: &str) -> u64 {
    let mut len = value.len();
    let mut prefix = 1u64;
    while len >= 0x80 {
        prefix += 1;
        len >>= 7;
    }
    prefix + value.len() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_short_string_has_single_byte_prefix() {
        let mut buf = Vec::new();
        write_string(&mut buf, "res").unwrap();
        assert_eq!(buf, vec![3, b'r', b'e', b's']);
    }

    #[test]
    fn test_long_string_prefix_uses_continuation_bit() {
        let value = "a".repeat(300);
        let mut buf = Vec::new();
        write_string(&mut buf, &value).unwrap();

        // 300 = 0b1_0010_1100 -> 0xAC 0x02
        assert_eq!(&buf[..2], &[0xAC, 0x02]);
        assert_eq!(buf.len() as u64, encoded_string_len(&value));

        let decoded = read_string(&mut Cursor::new(buf)).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_integers_are_little_endian() {
        let mut buf = Vec::new();
        write_i32(&mut buf, 66).unwrap();
        write_i64(&mut buf, 126_793).unwrap();
        assert_eq!(&buf[..4], &[66, 0, 0, 0]);

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_i32(&mut cursor).unwrap(), 66);
        assert_eq!(read_i64(&mut cursor).unwrap(), 126_793);
    }

    #[test]
    fn test_negative_count_rejected() {
        let mut buf = Vec::new();
        write_i32(&mut buf, -1).unwrap();
        let err = read_count(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { .. }));
    }

    #[test]
    fn test_truncated_string_is_io_error() {
        let buf = vec![10, b'a', b'b'];
        let err = read_string(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_oversized_prefix_rejected() {
        let buf = vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        let err = read_string(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, Error::InvalidFormat { .. }));
    }
}
