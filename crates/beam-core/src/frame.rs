//! Data channel framing
//!
//! A transfer on the wire is one text control frame followed by raw binary
//! data frames:
//!
//! ```text
//! TEXT   {"type":"metadata","name":"report.pdf","size":40960}
//! BINARY [16384 bytes]
//! BINARY [16384 bytes]
//! BINARY [8192 bytes]
//! ```
//!
//! There is no end marker and no sequence number. The receiver knows the
//! transfer is complete when the bytes it has counted reach `size`, which
//! only works because the channel is ordered and reliable.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::MAX_CHUNK_SIZE;

/// Text-encoded control record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Announces the next file on the channel
    Metadata { name: String, size: u64 },
}

impl ControlFrame {
    /// Parse from JSON
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|e| ProtocolError::InvalidControlFrame(e.to_string()))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One message as delivered by the data channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Text message, expected to hold a [`ControlFrame`]
    Text(String),
    /// Raw file bytes
    Binary(Bytes),
}

impl Frame {
    /// Encode a control record as a text frame
    pub fn control(frame: &ControlFrame) -> Result<Self, ProtocolError> {
        Ok(Frame::Text(frame.to_json()?))
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Check a chunk size against the allowed range
pub fn validate_chunk_size(chunk_size: usize) -> Result<(), ProtocolError> {
    if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
        return Err(ProtocolError::InvalidChunkSize {
            size: chunk_size,
            max: MAX_CHUNK_SIZE,
        });
    }
    Ok(())
}

/// Number of data frames needed for `total` bytes
pub fn chunk_count(total: u64, chunk_size: usize) -> u64 {
    total.div_ceil(chunk_size.max(1) as u64)
}

/// Split `data` into chunks of `chunk_size` bytes (the last may be shorter)
///
/// Chunks share the underlying buffer; nothing is copied.
pub fn split_chunks(data: Bytes, chunk_size: usize) -> Chunks {
    Chunks {
        data,
        chunk_size: chunk_size.max(1),
    }
}

/// Iterator returned by [`split_chunks`]
#[derive(Debug, Clone)]
pub struct Chunks {
    data: Bytes,
    chunk_size: usize,
}

impl Iterator for Chunks {
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if self.data.is_empty() {
            return None;
        }
        let n = self.chunk_size.min(self.data.len());
        Some(self.data.split_to(n))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.data.len().div_ceil(self.chunk_size);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Chunks {}

/// Concatenate chunks in the given order
pub fn reassemble<I>(chunks: I) -> Bytes
where
    I: IntoIterator<Item = Bytes>,
{
    let mut buf = BytesMut::new();
    for chunk in chunks {
        buf.extend_from_slice(&chunk);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
    }

    #[test]
    fn test_metadata_wire_format() {
        let frame = ControlFrame::Metadata {
            name: "report.pdf".into(),
            size: 40960,
        };

        let json = frame.to_json().unwrap();
        assert!(json.contains(r#""type":"metadata""#));
        assert!(json.contains(r#""name":"report.pdf""#));
        assert!(json.contains(r#""size":40960"#));

        let parsed = ControlFrame::from_json(r#"{"type":"metadata","name":"a.txt","size":3}"#).unwrap();
        assert_eq!(
            parsed,
            ControlFrame::Metadata {
                name: "a.txt".into(),
                size: 3
            }
        );
    }

    #[test]
    fn test_invalid_control_frames() {
        assert!(ControlFrame::from_json("not json").is_err());
        assert!(ControlFrame::from_json(r#"{"type":"progress","sent":3}"#).is_err());
        assert!(ControlFrame::from_json(r#"{"type":"metadata","name":"a","size":-1}"#).is_err());
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, CHUNK), 0);
        assert_eq!(chunk_count(1, CHUNK), 1);
        assert_eq!(chunk_count(CHUNK as u64, CHUNK), 1);
        assert_eq!(chunk_count(CHUNK as u64 + 1, CHUNK), 2);
        assert_eq!(chunk_count(40 * 1024, CHUNK), 3);
    }

    const CHUNK: usize = crate::CHUNK_SIZE;

    #[test]
    fn test_forty_kib_splits_into_three_chunks() {
        let data = sample(40 * 1024);
        let sizes: Vec<usize> = split_chunks(data, CHUNK).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![16 * 1024, 16 * 1024, 8 * 1024]);
    }

    #[test]
    fn test_exact_multiple_has_full_last_chunk() {
        let data = sample(3 * 100);
        let sizes: Vec<usize> = split_chunks(data, 100).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![100, 100, 100]);
    }

    #[test]
    fn test_chunk_then_reassemble_reproduces_input() {
        for &len in &[0usize, 1, 7, 99, 100, 101, 1000, 4096] {
            for &chunk_size in &[1usize, 3, 100, 4096, 10_000] {
                let data = sample(len);
                let chunks = split_chunks(data.clone(), chunk_size);
                assert_eq!(chunks.len() as u64, chunk_count(len as u64, chunk_size));
                assert_eq!(reassemble(chunks), data, "len={} chunk={}", len, chunk_size);
            }
        }
    }

    #[test]
    fn test_chunk_size_validation() {
        assert!(validate_chunk_size(1).is_ok());
        assert!(validate_chunk_size(crate::CHUNK_SIZE).is_ok());
        assert!(validate_chunk_size(MAX_CHUNK_SIZE).is_ok());
        assert!(validate_chunk_size(0).is_err());
        assert!(validate_chunk_size(MAX_CHUNK_SIZE + 1).is_err());
    }
}
