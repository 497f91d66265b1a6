//! Record codec: gzip compression inside a small self-describing frame.
//!
//! ```text
//! +-------+-------+----------------+-----------+----------------+
//! | magic | flags | captured_at_ms | crc32     | body           |
//! | 4 B   | 1 B   | i64 BE         | u32 BE    | raw or gzip    |
//! +-------+-------+----------------+-----------+----------------+
//! ```
//!
//! The checksum covers the raw (uncompressed) payload, so a decode that
//! succeeds is byte-identical to what was captured.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use telvault_core::{Error, Result};

const MAGIC: &[u8; 4] = b"TVR1";
const FLAG_GZIP: u8 = 0b0000_0001;

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 4 + 1 + 8 + 4;

/// Gzip-compress a byte slice.
pub fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
    encoder.write_all(data).map_err(Error::compression)?;
    encoder.finish().map_err(Error::compression)
}

/// Inverse of [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::with_capacity(data.len() * 2);
    decoder.read_to_end(&mut out).map_err(Error::compression)?;
    Ok(out)
}

/// A payload encoded ahead of time, waiting for its capture timestamp.
///
/// Compression happens outside the sequence lock; only [`PreparedRecord::frame`]
/// runs under it.
#[derive(Debug, Clone)]
pub struct PreparedRecord {
    body: Bytes,
    compressed: bool,
    checksum: u32,
    raw_len: usize,
}

impl PreparedRecord {
    /// Encode a raw payload, optionally compressing it.
    pub fn new(payload: &[u8], compressed: bool) -> Result<Self> {
        let checksum = crc32fast::hash(payload);
        let body = if compressed {
            Bytes::from(compress(payload)?)
        } else {
            Bytes::copy_from_slice(payload)
        };
        Ok(Self {
            body,
            compressed,
            checksum,
            raw_len: payload.len(),
        })
    }

    pub fn compressed(&self) -> bool {
        self.compressed
    }

    pub fn raw_len(&self) -> usize {
        self.raw_len
    }

    /// Stored size once framed.
    pub fn framed_len(&self) -> usize {
        HEADER_LEN + self.body.len()
    }

    /// Produce the stored object for the given capture time.
    pub fn frame(&self, captured_at: DateTime<Utc>) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.framed_len());
        buf.put_slice(MAGIC);
        buf.put_u8(if self.compressed { FLAG_GZIP } else { 0 });
        buf.put_i64(captured_at.timestamp_millis());
        buf.put_u32(self.checksum);
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub captured_at: DateTime<Utc>,
    pub payload: Bytes,
}

/// Decode a stored object back into its raw payload.
pub fn decode(frame: &[u8]) -> Result<Record> {
    if frame.len() < HEADER_LEN || &frame[..4] != MAGIC {
        return Err(Error::compression("not a telvault record frame"));
    }
    let flags = frame[4];
    let millis = i64::from_be_bytes(
        frame[5..13]
            .try_into()
            .map_err(|_| Error::compression("truncated timestamp"))?,
    );
    let checksum = u32::from_be_bytes(
        frame[13..17]
            .try_into()
            .map_err(|_| Error::compression("truncated checksum"))?,
    );
    let body = &frame[HEADER_LEN..];

    let payload = if flags & FLAG_GZIP != 0 {
        Bytes::from(decompress(body)?)
    } else {
        Bytes::copy_from_slice(body)
    };

    if crc32fast::hash(&payload) != checksum {
        return Err(Error::compression("record checksum mismatch"));
    }
    let captured_at = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| Error::compression("capture timestamp out of range"))?;

    Ok(Record {
        captured_at,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn otlp_like_payload() -> Vec<u8> {
        // Repetitive attribute keys, as in real OTLP batches.
        let mut payload = Vec::new();
        for i in 0..200 {
            payload.extend_from_slice(b"service.name=checkout;http.method=GET;span=");
            payload.extend_from_slice(i.to_string().as_bytes());
        }
        payload
    }

    #[test]
    fn test_compressed_frame_round_trip() {
        let payload = otlp_like_payload();
        let prepared = PreparedRecord::new(&payload, true).unwrap();
        assert!(prepared.framed_len() < payload.len());

        let at = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        let record = decode(&prepared.frame(at)).unwrap();
        assert_eq!(record.payload.as_ref(), payload.as_slice());
        assert_eq!(record.captured_at, at);
    }

    #[test]
    fn test_uncompressed_frame_round_trip() {
        let prepared = PreparedRecord::new(b"\x0a\x02hi", false).unwrap();
        assert_eq!(prepared.framed_len(), HEADER_LEN + 4);

        let record = decode(&prepared.frame(Utc::now())).unwrap();
        assert_eq!(record.payload, Bytes::from_static(b"\x0a\x02hi"));
    }

    #[test]
    fn test_empty_payload() {
        let prepared = PreparedRecord::new(b"", true).unwrap();
        let record = decode(&prepared.frame(Utc::now())).unwrap();
        assert!(record.payload.is_empty());
    }

    #[test]
    fn test_corruption_is_detected() {
        let prepared = PreparedRecord::new(b"some telemetry bytes", false).unwrap();
        let mut frame = prepared.frame(Utc::now()).to_vec();
        let last = frame.len() - 1;
        frame[last] ^= 0xff;

        let err = decode(&frame).unwrap_err();
        assert!(matches!(err, Error::Compression { .. }));
    }

    #[test]
    fn test_rejects_foreign_bytes() {
        assert!(decode(b"hello").is_err());
        assert!(decode(b"XXXX0000000000000000").is_err());
    }
}
