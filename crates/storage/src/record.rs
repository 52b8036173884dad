//! On-disk record format.
//!
//! Layout: `[crc32 (4B)][timestamp_ns (8B)][key_size (4B)][value_size (4B)][key][value]`.
//! All integers little-endian. The CRC (IEEE) covers every byte after the
//! CRC field itself.

use std::time::{SystemTime, UNIX_EPOCH};

/// Fixed header size: crc(4) + timestamp(8) + key_size(4) + value_size(4).
pub const HEADER_SIZE: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("invalid record data")]
    Invalid,
    #[error("record CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    CrcMismatch { expected: u32, actual: u32 },
}

/// One decoded key/value record. Key and value are owned copies, detached
/// from whatever buffer they were decoded out of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Write time, nanoseconds since epoch.
    pub timestamp_ns: i64,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl Record {
    /// Create a record stamped with the current wall clock.
    pub fn new(key: &[u8], value: &[u8]) -> Self {
        let timestamp_ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64;
        Self::with_timestamp(key, value, timestamp_ns)
    }

    pub fn with_timestamp(key: &[u8], value: &[u8], timestamp_ns: i64) -> Self {
        Self {
            timestamp_ns,
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    /// Total encoded size in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.key.len() + self.value.len()
    }

    /// Encode into a fresh buffer, backfilling the CRC over bytes 4..end.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];

        buf[4..12].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        buf[12..16].copy_from_slice(&(self.key.len() as u32).to_le_bytes());
        buf[16..20].copy_from_slice(&(self.value.len() as u32).to_le_bytes());

        let key_end = HEADER_SIZE + self.key.len();
        buf[HEADER_SIZE..key_end].copy_from_slice(&self.key);
        buf[key_end..].copy_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[4..]);
        buf[0..4].copy_from_slice(&crc.to_le_bytes());

        buf
    }

    /// Decode a record from `data`, which must hold the complete record
    /// starting at index 0. Trailing bytes beyond the record are ignored.
    pub fn decode(data: &[u8]) -> Result<Self, RecordError> {
        let total = encoded_len_from_header(data)?;
        if data.len() < total {
            return Err(RecordError::Invalid);
        }

        let expected = u32::from_le_bytes(data[0..4].try_into().expect("4-byte slice"));
        let actual = crc32fast::hash(&data[4..total]);
        if actual != expected {
            return Err(RecordError::CrcMismatch { expected, actual });
        }

        let timestamp_ns = i64::from_le_bytes(data[4..12].try_into().expect("8-byte slice"));
        let key_size = u32::from_le_bytes(data[12..16].try_into().expect("4-byte slice")) as usize;
        let key_end = HEADER_SIZE + key_size;

        Ok(Self {
            timestamp_ns,
            key: data[HEADER_SIZE..key_end].to_vec(),
            value: data[key_end..total].to_vec(),
        })
    }
}

/// Total record size implied by a header slice, without CRC validation.
/// Used to size the second read when a record is fetched in two steps.
pub fn encoded_len_from_header(header: &[u8]) -> Result<usize, RecordError> {
    if header.len() < HEADER_SIZE {
        return Err(RecordError::Invalid);
    }
    let key_size = u32::from_le_bytes(header[12..16].try_into().expect("4-byte slice")) as usize;
    let value_size = u32::from_le_bytes(header[16..20].try_into().expect("4-byte slice")) as usize;
    Ok(HEADER_SIZE + key_size + value_size)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let record = Record::new(b"answer", b"42");
        let encoded = record.encode();
        assert_eq!(encoded.len(), HEADER_SIZE + 6 + 2);

        let decoded = Record::decode(&encoded).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_empty_key_and_value() {
        let record = Record::new(b"", b"");
        let encoded = record.encode();
        assert_eq!(encoded.len(), HEADER_SIZE);

        let decoded = Record::decode(&encoded).unwrap();
        assert!(decoded.key.is_empty());
        assert!(decoded.value.is_empty());
    }

    #[test]
    fn test_decode_owns_its_bytes() {
        let mut encoded = Record::new(b"k", b"v").encode();
        let decoded = Record::decode(&encoded).unwrap();
        // Scribbling over the source buffer must not affect the record.
        encoded.fill(0xFF);
        assert_eq!(decoded.key, b"k");
        assert_eq!(decoded.value, b"v");
    }

    #[test]
    fn test_decode_short_buffer() {
        let err = Record::decode(&[0u8; HEADER_SIZE - 1]).unwrap_err();
        assert!(matches!(err, RecordError::Invalid));

        // Header claims more payload than the buffer holds.
        let encoded = Record::new(b"key", b"value").encode();
        let err = Record::decode(&encoded[..encoded.len() - 1]).unwrap_err();
        assert!(matches!(err, RecordError::Invalid));
    }

    #[test]
    fn test_crc_detects_any_bit_flip() {
        let encoded = Record::with_timestamp(b"key", b"value", 12345).encode();

        // Flip every bit outside the CRC field, one at a time.
        for byte_idx in 4..encoded.len() {
            for bit in 0..8 {
                let mut corrupted = encoded.clone();
                corrupted[byte_idx] ^= 1 << bit;
                match Record::decode(&corrupted) {
                    Err(RecordError::CrcMismatch { .. }) => {}
                    // Flips in the size fields may instead make the record
                    // claim more bytes than the buffer holds.
                    Err(RecordError::Invalid) if (12..20).contains(&byte_idx) => {}
                    other => panic!(
                        "bit {} of byte {} went undetected: {:?}",
                        bit, byte_idx, other
                    ),
                }
            }
        }
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut encoded = Record::new(b"k", b"v").encode();
        encoded.extend_from_slice(b"garbage after the record");
        let decoded = Record::decode(&encoded).unwrap();
        assert_eq!(decoded.value, b"v");
    }

    #[test]
    fn test_encoded_len_from_header() {
        let record = Record::new(b"abc", b"defgh");
        let encoded = record.encode();
        let total = encoded_len_from_header(&encoded[..HEADER_SIZE]).unwrap();
        assert_eq!(total, encoded.len());

        assert!(matches!(
            encoded_len_from_header(&encoded[..10]),
            Err(RecordError::Invalid)
        ));
    }
}
