//! # logship codec
//!
//! Log record model and the lossless binary encoding used for durable
//! queue storage.
//!
//! A [`LogRecord`] carries a UTC timestamp, a message, an ordered
//! duplicate-free tag list, and open-ended extra fields ([`Value`]).
//! Records are encoded to a compact tagged binary format before they
//! enter a queue and decoded when a consumer takes them back out; the
//! binary round trip is lossless for every supported value type. The
//! JSON projection ([`LogRecord::to_json`]) exists for output sinks
//! and is not required to be lossless.
//!
//! ## Usage
//!
//! ```
//! use logship_codec::{decode, encode, LogRecord};
//!
//! let mut record = LogRecord::new("hello");
//! record.set_extra("host", "web-1");
//!
//! let bytes = encode(&record).unwrap();
//! let decoded = decode(&bytes).unwrap();
//! assert_eq!(record, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decode;
mod encode;
mod error;
mod record;
mod value;

pub use decode::{decode, RecordDecoder};
pub use encode::{encode, RecordEncoder, RECORD_MAGIC, RECORD_VERSION};
pub use error::{CodecError, CodecResult};
pub use record::{format_with_env, LogRecord};
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn sample_record() -> LogRecord {
        let mut record = LogRecord {
            timestamp: Utc.with_ymd_and_hms(2022, 7, 1, 8, 15, 0).unwrap(),
            message: "GET /health 200".to_string(),
            tags: vec!["nginx".to_string(), "access".to_string()],
            extra: BTreeMap::new(),
        };
        record.set_extra("host", "web-1");
        record.set_extra("status", 200);
        record.set_extra("latency_ms", 3.25);
        record.set_extra(
            "geo",
            Value::Map(BTreeMap::from([
                ("lat".to_string(), Value::Float(52.5)),
                ("lon".to_string(), Value::Float(13.4)),
            ])),
        );
        record
    }

    #[test]
    fn roundtrip_full_record() {
        let record = sample_record();
        let bytes = encode(&record).unwrap();
        assert_eq!(decode(&bytes).unwrap(), record);
    }

    #[test]
    fn roundtrip_empty_message() {
        let record = LogRecord {
            timestamp: Utc.with_ymd_and_hms(2022, 7, 1, 8, 15, 0).unwrap(),
            message: String::new(),
            tags: Vec::new(),
            extra: BTreeMap::new(),
        };
        let bytes = encode(&record).unwrap();
        assert_eq!(decode(&bytes).unwrap(), record);
    }

    #[test]
    fn roundtrip_preserves_subsecond_timestamp() {
        let record = LogRecord {
            timestamp: DateTime::from_timestamp(1_656_662_100, 123_456_789).unwrap(),
            ..LogRecord::default()
        };
        let bytes = encode(&record).unwrap();
        assert_eq!(decode(&bytes).unwrap().timestamp, record.timestamp);
    }

    #[test]
    fn roundtrip_nan_bit_pattern() {
        let mut record = sample_record();
        record.set_extra("bad_ratio", f64::NAN);
        let bytes = encode(&record).unwrap();
        let decoded = decode(&bytes).unwrap();
        let Some(Value::Float(f)) = decoded.extra.get("bad_ratio").cloned() else {
            panic!("expected float");
        };
        assert_eq!(f.to_bits(), f64::NAN.to_bits());
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut bytes = encode(&sample_record()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(CodecError::InvalidMagic)));
    }

    #[test]
    fn decode_rejects_newer_version() {
        let mut bytes = encode(&sample_record()).unwrap();
        bytes[4] = 0xFF;
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let bytes = encode(&sample_record()).unwrap();
        for cut in [0, 3, 6, bytes.len() / 2, bytes.len() - 1] {
            assert!(decode(&bytes[..cut]).is_err(), "cut at {cut} should fail");
        }
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bytes = encode(&sample_record()).unwrap();
        bytes.push(0);
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::TrailingBytes { .. })
        ));
    }

    #[test]
    fn decode_rejects_huge_declared_length() {
        // Envelope + timestamp, then a message length far past the limit.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&RECORD_MAGIC);
        bytes.extend_from_slice(&RECORD_VERSION.to_be_bytes());
        bytes.extend_from_slice(&0i64.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(
            decode(&bytes),
            Err(CodecError::LengthLimit { .. })
        ));
    }

    #[test]
    fn decode_garbage_never_panics() {
        // A handful of adversarial prefixes; none may panic.
        let cases: Vec<Vec<u8>> = vec![
            vec![],
            vec![0x00],
            b"LREC".to_vec(),
            vec![0xFF; 64],
            b"LREC\x00\x01".to_vec(),
        ];
        for bytes in cases {
            let _ = decode(&bytes);
        }
    }

    fn arb_value(depth: u32) -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            any::<f64>()
                .prop_filter("finite floats compare by value", |f| f.is_finite())
                .prop_map(Value::Float),
            ".{0,24}".prop_map(Value::Text),
        ];
        leaf.prop_recursive(depth, 32, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..4).prop_map(Value::Map),
            ]
        })
    }

    proptest! {
        #[test]
        fn roundtrip_arbitrary_records(
            message in ".{0,64}",
            tags in prop::collection::vec("[a-z0-9_]{1,12}", 0..4),
            extra in prop::collection::btree_map("[a-z_]{1,12}", arb_value(2), 0..6),
            secs in 0i64..4_102_444_800,
            nanos in 0u32..1_000_000_000,
        ) {
            let mut unique = tags;
            unique.dedup();
            let record = LogRecord {
                timestamp: DateTime::from_timestamp(secs, nanos).unwrap(),
                message,
                tags: unique,
                extra,
            };
            let bytes = encode(&record).unwrap();
            prop_assert_eq!(decode(&bytes).unwrap(), record);
        }
    }
}
