//! Segment framing.
//!
//! Segments are the durable, fixed-size unit of the log as shipped to
//! backups. Frame layout:
//!
//! ```text
//! +------+--------+--------+---------+
//! | Type | Length | CRC32C | Payload |
//! | 1B   | 4B     | 4B     | var     |
//! +------+--------+--------+---------+
//! ```
//!
//! A zero type byte terminates the segment; the remainder is padding.

use crate::record::{LogEntryType, LogError, ObjectRecord, TombstoneRecord};
use bytes::Bytes;

const FRAME_HEADER: usize = 1 + 4 + 4;

/// Builds a segment buffer record by record.
pub struct SegmentBuilder {
    buf: Vec<u8>,
    capacity: usize,
}

impl SegmentBuilder {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::new(),
            capacity,
        }
    }

    /// Append one framed record. `ty` is the raw type byte so tests can
    /// write record types a replayer does not understand.
    pub fn append(&mut self, ty: u8, payload: &[u8]) -> Result<(), LogError> {
        let needed = FRAME_HEADER + payload.len();
        if self.buf.len() + needed > self.capacity {
            return Err(LogError::Full {
                needed,
                available: self.capacity - self.buf.len(),
            });
        }
        self.buf.push(ty);
        self.buf
            .extend_from_slice(&(payload.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(&crc32c::crc32c(payload).to_le_bytes());
        self.buf.extend_from_slice(payload);
        Ok(())
    }

    pub fn append_object(&mut self, record: &ObjectRecord) -> Result<(), LogError> {
        self.append(LogEntryType::Object as u8, &record.to_bytes())
    }

    pub fn append_tombstone(&mut self, tomb: &TombstoneRecord) -> Result<(), LogError> {
        self.append(LogEntryType::Tombstone as u8, &tomb.to_bytes())
    }

    /// Finish the segment.
    #[must_use]
    pub fn finish(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

/// One frame yielded by [`SegmentReader`].
#[derive(Clone, Copy, Debug)]
pub struct SegmentRecord<'a> {
    /// Raw type byte; replay skips types it does not know.
    pub type_byte: u8,
    pub payload: &'a [u8],
}

/// Walks the frames of a segment buffer in order.
pub struct SegmentReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SegmentReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
}

impl<'a> Iterator for SegmentReader<'a> {
    type Item = Result<SegmentRecord<'a>, LogError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.buf.len() || self.buf[self.pos] == 0 {
            return None;
        }
        if self.pos + FRAME_HEADER > self.buf.len() {
            self.pos = self.buf.len();
            return Some(Err(LogError::Truncated));
        }
        let offset = self.pos;
        let ty = self.buf[offset];
        let len =
            u32::from_le_bytes(self.buf[offset + 1..offset + 5].try_into().unwrap()) as usize;
        let crc = u32::from_le_bytes(self.buf[offset + 5..offset + 9].try_into().unwrap());
        let start = offset + FRAME_HEADER;
        if start + len > self.buf.len() {
            self.pos = self.buf.len();
            return Some(Err(LogError::Truncated));
        }
        let payload = &self.buf[start..start + len];
        self.pos = start + len;
        if crc32c::crc32c(payload) != crc {
            return Some(Err(LogError::ChecksumMismatch { offset }));
        }
        Some(Ok(SegmentRecord {
            type_byte: ty,
            payload,
        }))
    }
}
