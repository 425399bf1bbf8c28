//! Class file byte encoding and decoding utilities
//!
//! Class files are big-endian throughout. Strings in the constant pool use the
//! JVM's "modified UTF-8" encoding, handled by [`decode_modified_utf8`] and
//! [`encode_modified_utf8`].

use thiserror::Error;

/// Errors that can occur while decoding class file bytes
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Unexpected end of input
    #[error("Unexpected end of class data at offset {0}")]
    UnexpectedEnd(usize),

    /// Invalid modified UTF-8 sequence
    #[error("Invalid modified UTF-8 at offset {0}")]
    InvalidUtf8(usize),

    /// Unknown constant pool tag
    #[error("Invalid constant pool tag {tag} at offset {offset}")]
    InvalidConstantTag {
        /// Tag byte found
        tag: u8,
        /// Offset of the tag byte
        offset: usize,
    },

    /// Trailing bytes after a structure that must be consumed exactly
    #[error("Trailing bytes after {0}")]
    TrailingBytes(&'static str),

    /// A structure field holds a value outside its legal range
    #[error("Malformed {what}: {detail}")]
    Malformed {
        /// Structure being decoded
        what: &'static str,
        /// What is wrong with it
        detail: String,
    },
}

/// Errors that can occur while encoding class file structures
///
/// Every count and length in a class file has a fixed width; a model that
/// grew past one of them cannot be written out.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// A count or length does not fit its class file field
    #[error("Too many {what}: {count} (max {max})")]
    LimitExceeded {
        /// Counted structure
        what: &'static str,
        /// Actual count
        count: usize,
        /// Largest value the field can hold
        max: usize,
    },
}

/// Check that `count` fits a u16 field no larger than `max`
pub fn checked_u16(what: &'static str, count: usize, max: u16) -> Result<u16, EncodeError> {
    match u16::try_from(count) {
        Ok(value) if value <= max => Ok(value),
        _ => Err(EncodeError::LimitExceeded {
            what,
            count,
            max: max as usize,
        }),
    }
}

/// Check that `count` fits a u32 field
pub fn checked_u32(what: &'static str, count: usize) -> Result<u32, EncodeError> {
    u32::try_from(count).map_err(|_| EncodeError::LimitExceeded {
        what,
        count,
        max: u32::MAX as usize,
    })
}

/// Sequential big-endian reader over a byte slice
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    /// Create a new reader positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Current read position
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of unread bytes
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Whether every byte has been consumed
    pub fn is_at_end(&self) -> bool {
        self.offset == self.data.len()
    }

    /// Read one byte
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .data
            .get(self.offset)
            .ok_or(DecodeError::UnexpectedEnd(self.offset))?;
        self.offset += 1;
        Ok(byte)
    }

    /// Read a big-endian u16
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let bytes = self.read_array::<2>()?;
        Ok(u16::from_be_bytes(bytes))
    }

    /// Read a big-endian u32
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let bytes = self.read_array::<4>()?;
        Ok(u32::from_be_bytes(bytes))
    }

    /// Read a big-endian i32
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        let bytes = self.read_array::<4>()?;
        Ok(i32::from_be_bytes(bytes))
    }

    /// Read a big-endian u64
    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.read_array::<8>()?;
        Ok(u64::from_be_bytes(bytes))
    }

    /// Borrow the next `len` bytes
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(DecodeError::UnexpectedEnd(self.offset))?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    /// Copy the next `len` bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, DecodeError> {
        self.read_slice(len).map(|s| s.to_vec())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let slice = self.read_slice(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }
}

/// Big-endian writer producing class file bytes
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buffer: Vec<u8>,
}

impl ByteWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with preallocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Current write position
    pub fn offset(&self) -> usize {
        self.buffer.len()
    }

    /// Borrow the bytes written so far
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return its bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Emit one byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a big-endian u16
    pub fn emit_u16(&mut self, value: u16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit a big-endian i16
    pub fn emit_i16(&mut self, value: i16) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit a big-endian u32
    pub fn emit_u32(&mut self, value: u32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit a big-endian i32
    pub fn emit_i32(&mut self, value: i32) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit a big-endian u64
    pub fn emit_u64(&mut self, value: u64) {
        self.buffer.extend_from_slice(&value.to_be_bytes());
    }

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Emit a u16 count of `what`, failing if it does not fit
    pub fn emit_count(&mut self, what: &'static str, count: usize) -> Result<(), EncodeError> {
        self.emit_u16(checked_u16(what, count, u16::MAX)?);
        Ok(())
    }

    /// Emit a u16-length-prefixed modified UTF-8 string
    pub fn emit_utf8(&mut self, value: &str) -> Result<(), EncodeError> {
        let encoded = encode_modified_utf8(value);
        self.emit_count("bytes in a Utf8 constant", encoded.len())?;
        self.emit_bytes(&encoded);
        Ok(())
    }

    /// Overwrite a u16 previously written at `offset`
    pub fn patch_u16(&mut self, offset: usize, value: u16) {
        self.buffer[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }

    /// Overwrite an i16 previously written at `offset`
    pub fn patch_i16(&mut self, offset: usize, value: i16) {
        self.buffer[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
    }

    /// Overwrite a u32 previously written at `offset`
    pub fn patch_u32(&mut self, offset: usize, value: u32) {
        self.buffer[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
    }
}

/// Decode a modified UTF-8 byte sequence into a Rust string
///
/// Unpaired surrogates cannot be represented and are reported as errors.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String, DecodeError> {
    // Fast path: plain ASCII without embedded NULs is identical in both encodings
    if bytes.iter().all(|&b| b != 0 && b < 0x80) {
        return String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidUtf8(0));
    }

    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i] as u16;
        if b0 & 0x80 == 0 {
            if b0 == 0 {
                return Err(DecodeError::InvalidUtf8(i));
            }
            units.push(b0);
            i += 1;
        } else if b0 & 0xE0 == 0xC0 {
            let b1 = *bytes.get(i + 1).ok_or(DecodeError::InvalidUtf8(i))? as u16;
            if b1 & 0xC0 != 0x80 {
                return Err(DecodeError::InvalidUtf8(i));
            }
            units.push(((b0 & 0x1F) << 6) | (b1 & 0x3F));
            i += 2;
        } else if b0 & 0xF0 == 0xE0 {
            let b1 = *bytes.get(i + 1).ok_or(DecodeError::InvalidUtf8(i))? as u16;
            let b2 = *bytes.get(i + 2).ok_or(DecodeError::InvalidUtf8(i))? as u16;
            if b1 & 0xC0 != 0x80 || b2 & 0xC0 != 0x80 {
                return Err(DecodeError::InvalidUtf8(i));
            }
            units.push(((b0 & 0x0F) << 12) | ((b1 & 0x3F) << 6) | (b2 & 0x3F));
            i += 3;
        } else {
            return Err(DecodeError::InvalidUtf8(i));
        }
    }

    String::from_utf16(&units).map_err(|_| DecodeError::InvalidUtf8(0))
}

/// Encode a Rust string as modified UTF-8
pub fn encode_modified_utf8(value: &str) -> Vec<u8> {
    if value.bytes().all(|b| b != 0 && b < 0x80) {
        return value.as_bytes().to_vec();
    }

    let mut out = Vec::with_capacity(value.len() + 8);
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push((0xC0 | ((unit >> 6) & 0x1F)) as u8);
                out.push((0x80 | (unit & 0x3F)) as u8);
            }
            _ => {
                out.push((0xE0 | ((unit >> 12) & 0x0F)) as u8);
                out.push((0x80 | ((unit >> 6) & 0x3F)) as u8);
                out.push((0x80 | (unit & 0x3F)) as u8);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_big_endian() {
        let data = [0x00, 0x2A, 0xCA, 0xFE, 0xBA, 0xBE];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.read_u16().unwrap(), 42);
        assert_eq!(reader.read_u32().unwrap(), 0xCAFEBABE);
        assert!(reader.is_at_end());
    }

    #[test]
    fn test_reader_unexpected_end() {
        let mut reader = ByteReader::new(&[0x01]);
        assert_eq!(reader.read_u16(), Err(DecodeError::UnexpectedEnd(0)));
    }

    #[test]
    fn test_writer_patch() {
        let mut writer = ByteWriter::new();
        writer.emit_u16(0);
        writer.emit_u8(7);
        writer.patch_u16(0, 0x1234);
        assert_eq!(writer.buffer(), &[0x12, 0x34, 7]);
    }

    #[test]
    fn test_modified_utf8_nul_and_supplementary() {
        let text = "a\u{0}b\u{1F600}";
        let encoded = encode_modified_utf8(text);
        // NUL is encoded on two bytes, never as a raw zero
        assert!(!encoded.contains(&0));
        // The emoji becomes a surrogate pair of three-byte sequences
        assert_eq!(encoded.len(), 1 + 2 + 1 + 6);
        assert_eq!(decode_modified_utf8(&encoded).unwrap(), text);
    }

    #[test]
    fn test_utf8_length_limit() {
        let mut writer = ByteWriter::new();
        writer.emit_utf8(&"a".repeat(65_535)).unwrap();
        assert_eq!(writer.offset(), 2 + 65_535);

        // NUL takes two bytes in modified UTF-8, so this no longer fits
        let long = format!("{}\u{0}", "a".repeat(65_534));
        let mut writer = ByteWriter::new();
        assert!(matches!(
            writer.emit_utf8(&long),
            Err(EncodeError::LimitExceeded { count: 65_536, .. })
        ));
    }

    #[test]
    fn test_checked_counts() {
        assert_eq!(checked_u16("entries", 65_535, u16::MAX), Ok(65_535));
        assert!(checked_u16("entries", 65_536, u16::MAX).is_err());
        assert!(checked_u16("code bytes", 65_535, 65_534).is_err());
    }

    #[test]
    fn test_modified_utf8_rejects_raw_nul() {
        assert!(decode_modified_utf8(&[b'a', 0, b'b']).is_err());
    }
}
