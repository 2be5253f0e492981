//! Binary record decoder.

use crate::encode::{tag, MAX_LENGTH, RECORD_MAGIC, RECORD_VERSION};
use crate::error::{CodecError, CodecResult};
use crate::record::LogRecord;
use crate::value::Value;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Decode a record from its binary queue representation.
///
/// # Errors
///
/// Returns an error for a missing magic, an unsupported version,
/// truncated input, invalid UTF-8, an unknown value tag, or trailing
/// bytes. Never panics on malformed input: queue payloads can be
/// arbitrarily corrupted and a decode failure must stay a per-record
/// condition.
pub fn decode(bytes: &[u8]) -> CodecResult<LogRecord> {
    let mut decoder = RecordDecoder::new(bytes);
    let record = decoder.decode_record()?;
    if !decoder.is_empty() {
        return Err(CodecError::TrailingBytes {
            remaining: decoder.remaining(),
        });
    }
    Ok(record)
}

/// A binary record decoder over a byte slice.
pub struct RecordDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> RecordDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Number of unconsumed bytes.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Decode a full record, validating the magic/version envelope.
    pub fn decode_record(&mut self) -> CodecResult<LogRecord> {
        if self.read_bytes(4)? != RECORD_MAGIC {
            return Err(CodecError::InvalidMagic);
        }
        let version = self.read_u16()?;
        if version > RECORD_VERSION {
            return Err(CodecError::UnsupportedVersion { version });
        }

        let seconds = self.read_i64()?;
        let nanos = self.read_u32()?;
        let timestamp = DateTime::<Utc>::from_timestamp(seconds, nanos)
            .ok_or(CodecError::TimestampOutOfRange { seconds, nanos })?;

        let message = self.read_str()?;

        let tag_count = self.read_len()?;
        let mut tags = Vec::with_capacity(tag_count.min(1024));
        for _ in 0..tag_count {
            tags.push(self.read_str()?);
        }

        let extra_count = self.read_len()?;
        let mut extra = BTreeMap::new();
        for _ in 0..extra_count {
            let key = self.read_str()?;
            let value = self.read_value()?;
            extra.insert(key, value);
        }

        Ok(LogRecord {
            timestamp,
            message,
            tags,
            extra,
        })
    }

    fn read_value(&mut self) -> CodecResult<Value> {
        let tag_byte = self.read_byte()?;
        match tag_byte {
            tag::NULL => Ok(Value::Null),
            tag::FALSE => Ok(Value::Bool(false)),
            tag::TRUE => Ok(Value::Bool(true)),
            tag::INTEGER => Ok(Value::Integer(self.read_i64()?)),
            tag::FLOAT => {
                let bits = self.read_u64()?;
                Ok(Value::Float(f64::from_bits(bits)))
            }
            tag::TEXT => Ok(Value::Text(self.read_str()?)),
            tag::ARRAY => {
                let count = self.read_len()?;
                let mut items = Vec::with_capacity(count.min(1024));
                for _ in 0..count {
                    items.push(self.read_value()?);
                }
                Ok(Value::Array(items))
            }
            tag::MAP => {
                let count = self.read_len()?;
                let mut entries = BTreeMap::new();
                for _ in 0..count {
                    let key = self.read_str()?;
                    let value = self.read_value()?;
                    entries.insert(key, value);
                }
                Ok(Value::Map(entries))
            }
            other => Err(CodecError::UnknownTag { tag: other }),
        }
    }

    fn read_str(&mut self) -> CodecResult<String> {
        let len = self.read_len()?;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| CodecError::InvalidUtf8)
    }

    fn read_len(&mut self) -> CodecResult<usize> {
        let len = self.read_u32()?;
        if len > MAX_LENGTH {
            return Err(CodecError::LengthLimit {
                len: u64::from(len),
                limit: u64::from(MAX_LENGTH),
            });
        }
        Ok(len as usize)
    }

    #[inline]
    fn read_byte(&mut self) -> CodecResult<u8> {
        if self.pos >= self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_u16(&mut self) -> CodecResult<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> CodecResult<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> CodecResult<u64> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_i64(&mut self) -> CodecResult<i64> {
        self.read_u64().map(|n| n as i64)
    }
}
