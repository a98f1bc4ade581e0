//! Record types and codecs.
//!
//! Records are framed field by field in little-endian order:
//!
//! ```text
//! object:    table_id u32 | object_id u64 | version u64 | len u32 | payload
//! tombstone: table_id u32 | object_id u64 | object_version u64 | segment_id u64
//! ```

use bytes::Bytes;
use ramvault_common::{ObjectId, SegmentId, TableId, Version};
use thiserror::Error;

/// Errors from the log and record codecs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LogError {
    #[error("log is full: needed {needed} bytes, {available} available")]
    Full { needed: usize, available: usize },

    #[error("record truncated")]
    Truncated,

    #[error("pointer does not address a log record: {0:#x}")]
    BadPointer(u64),

    #[error("record type {found} where {expected} was expected")]
    WrongType { expected: u8, found: u8 },

    #[error("checksum mismatch in segment frame at offset {offset}")]
    ChecksumMismatch { offset: usize },
}

/// Type tag of a log record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum LogEntryType {
    Object = 1,
    Tombstone = 2,
}

impl LogEntryType {
    #[must_use]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Object),
            2 => Some(Self::Tombstone),
            _ => None,
        }
    }
}

/// A live object as stored in the log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectRecord {
    pub table_id: TableId,
    pub object_id: ObjectId,
    pub version: Version,
    pub payload: Bytes,
}

impl ObjectRecord {
    const HEADER_LEN: usize = 4 + 8 + 8 + 4;

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.table_id.to_le_bytes());
        buf.extend_from_slice(&self.object_id.to_le_bytes());
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, LogError> {
        if data.len() < Self::HEADER_LEN {
            return Err(LogError::Truncated);
        }
        let table_id = u32::from_le_bytes(data[0..4].try_into().unwrap());
        let object_id = u64::from_le_bytes(data[4..12].try_into().unwrap());
        let version = u64::from_le_bytes(data[12..20].try_into().unwrap());
        let len = u32::from_le_bytes(data[20..24].try_into().unwrap()) as usize;
        if data.len() < Self::HEADER_LEN + len {
            return Err(LogError::Truncated);
        }
        Ok(Self {
            table_id,
            object_id,
            version,
            payload: Bytes::copy_from_slice(&data[Self::HEADER_LEN..Self::HEADER_LEN + len]),
        })
    }

    /// Key fields without decoding the payload.
    pub(crate) fn peek_key(data: &[u8]) -> Result<(TableId, ObjectId), LogError> {
        if data.len() < 12 {
            return Err(LogError::Truncated);
        }
        Ok((
            u32::from_le_bytes(data[0..4].try_into().unwrap()),
            u64::from_le_bytes(data[4..12].try_into().unwrap()),
        ))
    }

    pub(crate) fn peek_version(data: &[u8]) -> Result<Version, LogError> {
        if data.len() < 20 {
            return Err(LogError::Truncated);
        }
        Ok(u64::from_le_bytes(data[12..20].try_into().unwrap()))
    }
}

/// Marks a prior object version as deleted. Records the version it
/// supersedes and the segment that held the object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TombstoneRecord {
    pub table_id: TableId,
    pub object_id: ObjectId,
    pub object_version: Version,
    pub segment_id: SegmentId,
}

impl TombstoneRecord {
    const LEN: usize = 4 + 8 + 8 + 8;

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::LEN);
        buf.extend_from_slice(&self.table_id.to_le_bytes());
        buf.extend_from_slice(&self.object_id.to_le_bytes());
        buf.extend_from_slice(&self.object_version.to_le_bytes());
        buf.extend_from_slice(&self.segment_id.to_le_bytes());
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, LogError> {
        if data.len() < Self::LEN {
            return Err(LogError::Truncated);
        }
        Ok(Self {
            table_id: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            object_id: u64::from_le_bytes(data[4..12].try_into().unwrap()),
            object_version: u64::from_le_bytes(data[12..20].try_into().unwrap()),
            segment_id: u64::from_le_bytes(data[20..28].try_into().unwrap()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_round_trip() {
        let record = ObjectRecord {
            table_id: 3,
            object_id: 0xdead_beef,
            version: 42,
            payload: Bytes::from_static(b"item0"),
        };
        let bytes = record.to_bytes();
        assert_eq!(ObjectRecord::from_bytes(&bytes).unwrap(), record);
        assert_eq!(ObjectRecord::peek_key(&bytes).unwrap(), (3, 0xdead_beef));
        assert_eq!(ObjectRecord::peek_version(&bytes).unwrap(), 42);
    }

    #[test]
    fn object_truncated() {
        let record = ObjectRecord {
            table_id: 0,
            object_id: 1,
            version: 1,
            payload: Bytes::from_static(b"payload"),
        };
        let bytes = record.to_bytes();
        assert_eq!(
            ObjectRecord::from_bytes(&bytes[..bytes.len() - 1]),
            Err(LogError::Truncated)
        );
        assert_eq!(ObjectRecord::from_bytes(&bytes[..10]), Err(LogError::Truncated));
    }

    #[test]
    fn tombstone_round_trip() {
        let tomb = TombstoneRecord {
            table_id: 1,
            object_id: 2003,
            object_version: 10,
            segment_id: 87,
        };
        let bytes = tomb.to_bytes();
        assert_eq!(bytes.len(), 28);
        assert_eq!(TombstoneRecord::from_bytes(&bytes).unwrap(), tomb);
        assert_eq!(
            TombstoneRecord::from_bytes(&bytes[..20]),
            Err(LogError::Truncated)
        );
    }

    #[test]
    fn entry_type_codes() {
        assert_eq!(LogEntryType::from_u8(1), Some(LogEntryType::Object));
        assert_eq!(LogEntryType::from_u8(2), Some(LogEntryType::Tombstone));
        assert_eq!(LogEntryType::from_u8(0), None);
        assert_eq!(LogEntryType::from_u8(7), None);
    }
}
