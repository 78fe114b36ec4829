//! The binary envelope every cached value is stored in.
//!
//! Both tiers hold the same serialized form: a protobuf message carrying the (possibly
//! compressed) payload, the time it was written, the compression that was applied and
//! whether the record is a miss marker. Since the compression travels inside the envelope,
//! records written under one [`Compression`] can be read back by a cache configured with
//! another one.

use std::io;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use prost::Message;
use serde::Deserialize;
use thiserror::Error;

/// Version of the envelope layout, bumped on incompatible changes.
const ENVELOPE_VERSION: u32 = 1;

/// Compression level used for [`Compression::Zstd`].
const ZSTD_LEVEL: i32 = 3;

/// Compression applied to payloads before they are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, prost::Enumeration)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum Compression {
    None = 0,
    Snappy = 1,
    Zstd = 2,
}

/// An error reading or writing an envelope.
///
/// These never reach the caller of the cache, a record that fails to decode is a miss.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed envelope")]
    Decode(#[from] prost::DecodeError),
    #[error("unsupported envelope version {0}")]
    Version(u32),
    #[error("unsupported compression tag {0}")]
    UnsupportedCompression(i32),
    #[error("write timestamp out of range: {0}")]
    Timestamp(i64),
    #[error("failed to transform payload")]
    Compression(#[source] io::Error),
}

/// What a stored record says about its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// The loader was asked and had nothing for this key.
    Miss,
    /// The (uncompressed) value.
    Present(Bytes),
}

/// A record as it is kept in either tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub payload: Payload,
    /// When the record was written, with millisecond precision.
    pub written_at: DateTime<Utc>,
}

impl Record {
    pub fn present(raw: Bytes, written_at: DateTime<Utc>) -> Self {
        Self {
            payload: Payload::Present(raw),
            written_at,
        }
    }

    pub fn miss(written_at: DateTime<Utc>) -> Self {
        Self {
            payload: Payload::Miss,
            written_at,
        }
    }

    pub fn is_miss(&self) -> bool {
        matches!(self.payload, Payload::Miss)
    }

    /// Time elapsed between writing the record and `now`.
    ///
    /// Records from the future (clock skew between writers) have an age of zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.written_at).to_std().unwrap_or_default()
    }
}

#[derive(Clone, PartialEq, Message)]
struct Envelope {
    #[prost(uint32, tag = "1")]
    version: u32,
    #[prost(bytes = "bytes", tag = "2")]
    raw: Bytes,
    /// Milliseconds since the unix epoch.
    #[prost(int64, tag = "3")]
    written_at: i64,
    #[prost(enumeration = "Compression", tag = "4")]
    compression: i32,
    #[prost(bool, tag = "5")]
    miss: bool,
}

/// Serializes `record`, compressing present payloads with `compression`.
pub fn encode(record: &Record, compression: Compression) -> Result<Bytes, CodecError> {
    let written_at = record.written_at.timestamp_millis();
    let envelope = match record.payload {
        Payload::Miss => Envelope {
            version: ENVELOPE_VERSION,
            raw: Bytes::new(),
            written_at,
            compression: Compression::None.into(),
            miss: true,
        },
        Payload::Present(ref raw) => Envelope {
            version: ENVELOPE_VERSION,
            raw: compress(compression, raw)?,
            written_at,
            compression: compression.into(),
            miss: false,
        },
    };
    Ok(envelope.encode_to_vec().into())
}

/// Parses an envelope and reverses the compression recorded in it.
pub fn decode(data: &[u8]) -> Result<Record, CodecError> {
    let envelope = Envelope::decode(data)?;
    if envelope.version != ENVELOPE_VERSION {
        return Err(CodecError::Version(envelope.version));
    }

    let written_at = DateTime::from_timestamp_millis(envelope.written_at)
        .ok_or(CodecError::Timestamp(envelope.written_at))?;
    if envelope.miss {
        return Ok(Record::miss(written_at));
    }

    let compression = Compression::try_from(envelope.compression)
        .map_err(|_| CodecError::UnsupportedCompression(envelope.compression))?;
    let raw = decompress(compression, envelope.raw)?;
    Ok(Record::present(raw, written_at))
}

pub fn compress(compression: Compression, data: &Bytes) -> Result<Bytes, CodecError> {
    let compressed = match compression {
        Compression::None => return Ok(data.clone()),
        Compression::Snappy => snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(io::Error::other),
        Compression::Zstd => zstd::encode_all(&data[..], ZSTD_LEVEL),
    };
    compressed.map(Bytes::from).map_err(CodecError::Compression)
}

pub fn decompress(compression: Compression, data: Bytes) -> Result<Bytes, CodecError> {
    let decompressed = match compression {
        Compression::None => return Ok(data),
        Compression::Snappy => snap::raw::Decoder::new()
            .decompress_vec(&data)
            .map_err(io::Error::other),
        Compression::Zstd => zstd::decode_all(&data[..]),
    };
    decompressed.map(Bytes::from).map_err(CodecError::Compression)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timestamp(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap()
    }

    #[test]
    fn test_roundtrip_all_compressions() {
        let raw = Bytes::from_static(b"bigvalue_xxxxxxxxxxxx_bigvalue");
        let record = Record::present(raw, timestamp(1_700_000_000_123));

        for compression in [Compression::None, Compression::Snappy, Compression::Zstd] {
            let data = encode(&record, compression).unwrap();
            assert_eq!(decode(&data).unwrap(), record, "{compression:?}");
        }
    }

    #[test]
    fn test_compression_is_applied() {
        let raw = Bytes::from(vec![b'x'; 4096]);
        let record = Record::present(raw, timestamp(0));

        let plain = encode(&record, Compression::None).unwrap();
        let snappy = encode(&record, Compression::Snappy).unwrap();
        let zstd = encode(&record, Compression::Zstd).unwrap();
        assert!(snappy.len() < plain.len() / 4);
        assert!(zstd.len() < plain.len() / 4);
    }

    #[test]
    fn test_miss_is_not_an_empty_payload() {
        let miss = Record::miss(timestamp(42));
        let empty = Record::present(Bytes::new(), timestamp(42));

        let decoded_miss = decode(&encode(&miss, Compression::Snappy).unwrap()).unwrap();
        let decoded_empty = decode(&encode(&empty, Compression::Snappy).unwrap()).unwrap();

        assert!(decoded_miss.is_miss());
        assert_eq!(decoded_miss.written_at, timestamp(42));
        assert!(!decoded_empty.is_miss());
        assert_eq!(decoded_empty.payload, Payload::Present(Bytes::new()));
    }

    #[test]
    fn test_unknown_compression_tag() {
        let envelope = Envelope {
            version: ENVELOPE_VERSION,
            raw: Bytes::from_static(b"value"),
            written_at: 0,
            compression: 7,
            miss: false,
        };
        let err = decode(&envelope.encode_to_vec()).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedCompression(7)));
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(
            decode(b"\xff\xff\xff"),
            Err(CodecError::Decode(_))
        ));
        // an empty buffer is a valid protobuf message, but not a valid envelope
        assert!(matches!(decode(b""), Err(CodecError::Version(0))));

        let corrupted = Envelope {
            version: ENVELOPE_VERSION,
            raw: Bytes::from_static(b"not snappy at all"),
            written_at: 0,
            compression: Compression::Snappy.into(),
            miss: false,
        };
        assert!(matches!(
            decode(&corrupted.encode_to_vec()),
            Err(CodecError::Compression(_))
        ));
    }

    #[test]
    fn test_age() {
        let record = Record::miss(timestamp(1_000));
        assert_eq!(record.age(timestamp(1_500)), Duration::from_millis(500));
        assert_eq!(record.age(timestamp(500)), Duration::ZERO);
    }
}
