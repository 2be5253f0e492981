//! Binary record encoder.

use crate::error::{CodecError, CodecResult};
use crate::record::LogRecord;
use crate::value::Value;

/// Magic bytes identifying an encoded record.
pub const RECORD_MAGIC: [u8; 4] = *b"LREC";

/// Current record format version.
pub const RECORD_VERSION: u16 = 1;

/// Value tag bytes used by the binary format.
pub(crate) mod tag {
    pub const NULL: u8 = 0x00;
    pub const FALSE: u8 = 0x01;
    pub const TRUE: u8 = 0x02;
    pub const INTEGER: u8 = 0x03;
    pub const FLOAT: u8 = 0x04;
    pub const TEXT: u8 = 0x05;
    pub const ARRAY: u8 = 0x06;
    pub const MAP: u8 = 0x07;
}

/// Maximum length accepted for a single string or container, applied
/// symmetrically by the decoder. Keeps a corrupted length field from
/// turning into a multi-gigabyte allocation.
pub(crate) const MAX_LENGTH: u32 = 64 * 1024 * 1024;

/// Encode a record to its binary queue representation.
///
/// # Errors
///
/// Returns an error if any string, tag list, array or map exceeds the
/// format's length limits. Encoding failure is local to the record.
pub fn encode(record: &LogRecord) -> CodecResult<Vec<u8>> {
    let mut encoder = RecordEncoder::new();
    encoder.encode_record(record)?;
    Ok(encoder.into_bytes())
}

/// A binary record encoder.
pub struct RecordEncoder {
    buffer: Vec<u8>,
}

impl RecordEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Consume the encoder, returning the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Encode a full record, including the magic/version envelope.
    pub fn encode_record(&mut self, record: &LogRecord) -> CodecResult<()> {
        self.buffer.extend_from_slice(&RECORD_MAGIC);
        self.buffer.extend_from_slice(&RECORD_VERSION.to_be_bytes());

        // Timestamp: seconds since epoch + subsecond nanos.
        self.buffer
            .extend_from_slice(&record.timestamp.timestamp().to_be_bytes());
        self.buffer
            .extend_from_slice(&record.timestamp.timestamp_subsec_nanos().to_be_bytes());

        self.write_str(&record.message)?;

        self.write_len(record.tags.len())?;
        for tag in &record.tags {
            self.write_str(tag)?;
        }

        self.write_len(record.extra.len())?;
        for (key, value) in &record.extra {
            self.write_str(key)?;
            self.write_value(value)?;
        }

        Ok(())
    }

    fn write_value(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => self.buffer.push(tag::NULL),
            Value::Bool(false) => self.buffer.push(tag::FALSE),
            Value::Bool(true) => self.buffer.push(tag::TRUE),
            Value::Integer(n) => {
                self.buffer.push(tag::INTEGER);
                self.buffer.extend_from_slice(&n.to_be_bytes());
            }
            Value::Float(f) => {
                // Bit pattern, not numeric value: NaN payloads survive.
                self.buffer.push(tag::FLOAT);
                self.buffer.extend_from_slice(&f.to_bits().to_be_bytes());
            }
            Value::Text(s) => {
                self.buffer.push(tag::TEXT);
                self.write_str(s)?;
            }
            Value::Array(items) => {
                self.buffer.push(tag::ARRAY);
                self.write_len(items.len())?;
                for item in items {
                    self.write_value(item)?;
                }
            }
            Value::Map(entries) => {
                self.buffer.push(tag::MAP);
                self.write_len(entries.len())?;
                for (key, item) in entries {
                    self.write_str(key)?;
                    self.write_value(item)?;
                }
            }
        }
        Ok(())
    }

    fn write_str(&mut self, s: &str) -> CodecResult<()> {
        self.write_len(s.len())?;
        self.buffer.extend_from_slice(s.as_bytes());
        Ok(())
    }

    fn write_len(&mut self, len: usize) -> CodecResult<()> {
        let len = u32::try_from(len)
            .ok()
            .filter(|&l| l <= MAX_LENGTH)
            .ok_or_else(|| CodecError::encoding_failed(format!("length {len} exceeds limit")))?;
        self.buffer.extend_from_slice(&len.to_be_bytes());
        Ok(())
    }
}

impl Default for RecordEncoder {
    fn default() -> Self {
        Self::new()
    }
}
