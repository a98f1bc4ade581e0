//! The append-only in-memory log.

use crate::record::{LogEntryType, LogError, ObjectRecord, TombstoneRecord};
use ramvault_common::{KeySource, LogPtr, ObjectId, SegmentId, TableId, Version};

/// Bytes reserved at the front of the arena so that no record ever sits at
/// offset zero; a zero offset is the index's empty-entry encoding.
const HEAD_RESERVE: usize = 8;

/// Frame header: record type byte plus little-endian length.
const FRAME_HEADER: usize = 1 + 4;

/// Fixed-capacity append-only record arena.
///
/// Records are logically immutable once appended; an overwritten or
/// removed record simply becomes garbage. Handles ([`LogPtr`]) are byte
/// offsets and stay valid for the life of the log.
pub struct Log {
    buf: Vec<u8>,
    capacity: usize,
    segment_bytes: usize,
}

impl Log {
    #[must_use]
    pub fn new(capacity: usize, segment_bytes: usize) -> Self {
        let mut buf = Vec::with_capacity(capacity.min(64 * 1024));
        buf.resize(HEAD_RESERVE, 0);
        Self {
            buf,
            capacity,
            segment_bytes,
        }
    }

    /// Bytes appended so far, including the reserved head.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.len() == HEAD_RESERVE
    }

    /// Append a record and return its handle.
    pub fn append(&mut self, ty: LogEntryType, record: &[u8]) -> Result<LogPtr, LogError> {
        let needed = FRAME_HEADER + record.len();
        if self.buf.len() + needed > self.capacity {
            return Err(LogError::Full {
                needed,
                available: self.capacity - self.buf.len(),
            });
        }
        let offset = self.buf.len() as u64;
        let ptr = LogPtr::new(offset).ok_or(LogError::BadPointer(offset))?;
        self.buf.push(ty as u8);
        self.buf
            .extend_from_slice(&(record.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(record);
        Ok(ptr)
    }

    pub fn append_object(&mut self, record: &ObjectRecord) -> Result<LogPtr, LogError> {
        self.append(LogEntryType::Object, &record.to_bytes())
    }

    pub fn append_tombstone(&mut self, tomb: &TombstoneRecord) -> Result<LogPtr, LogError> {
        self.append(LogEntryType::Tombstone, &tomb.to_bytes())
    }

    /// Resolve a handle to the record it addresses.
    pub fn entry(&self, ptr: LogPtr) -> Result<LogEntry<'_>, LogError> {
        let offset = ptr.offset() as usize;
        if offset + FRAME_HEADER > self.buf.len() {
            return Err(LogError::BadPointer(ptr.offset()));
        }
        let ty = LogEntryType::from_u8(self.buf[offset])
            .ok_or(LogError::BadPointer(ptr.offset()))?;
        let len =
            u32::from_le_bytes(self.buf[offset + 1..offset + 5].try_into().unwrap()) as usize;
        let start = offset + FRAME_HEADER;
        if start + len > self.buf.len() {
            return Err(LogError::BadPointer(ptr.offset()));
        }
        Ok(LogEntry {
            entry_type: ty,
            payload: &self.buf[start..start + len],
        })
    }

    /// Logical segment the record at `ptr` belongs to.
    #[must_use]
    pub fn segment_of(&self, ptr: LogPtr) -> SegmentId {
        ptr.offset() / self.segment_bytes as u64
    }
}

impl KeySource for Log {
    fn key_at(&self, ptr: LogPtr) -> Option<(TableId, ObjectId)> {
        self.entry(ptr).ok()?.key().ok()
    }
}

/// A resolved log record: its type tag and encoded body.
#[derive(Clone, Copy, Debug)]
pub struct LogEntry<'a> {
    pub entry_type: LogEntryType,
    pub payload: &'a [u8],
}

impl LogEntry<'_> {
    /// Key of the record, for either record type.
    pub fn key(&self) -> Result<(TableId, ObjectId), LogError> {
        // Both codecs lead with table_id u32 | object_id u64.
        ObjectRecord::peek_key(self.payload)
    }

    /// Version the record asserts: an object's own version, or the
    /// version a tombstone supersedes.
    pub fn version(&self) -> Result<Version, LogError> {
        match self.entry_type {
            LogEntryType::Object => ObjectRecord::peek_version(self.payload),
            LogEntryType::Tombstone => {
                Ok(TombstoneRecord::from_bytes(self.payload)?.object_version)
            }
        }
    }

    pub fn object(&self) -> Result<ObjectRecord, LogError> {
        if self.entry_type != LogEntryType::Object {
            return Err(LogError::WrongType {
                expected: LogEntryType::Object as u8,
                found: self.entry_type as u8,
            });
        }
        ObjectRecord::from_bytes(self.payload)
    }

    pub fn tombstone(&self) -> Result<TombstoneRecord, LogError> {
        if self.entry_type != LogEntryType::Tombstone {
            return Err(LogError::WrongType {
                expected: LogEntryType::Tombstone as u8,
                found: self.entry_type as u8,
            });
        }
        TombstoneRecord::from_bytes(self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn object(table_id: TableId, object_id: ObjectId, version: Version) -> ObjectRecord {
        ObjectRecord {
            table_id,
            object_id,
            version,
            payload: Bytes::from(format!("value-{object_id}")),
        }
    }

    #[test]
    fn append_and_resolve() {
        let mut log = Log::new(4096, 64 * 1024);
        let record = object(0, 5, 1);
        let ptr = log.append_object(&record).unwrap();
        assert!(ptr.offset() >= HEAD_RESERVE as u64);

        let entry = log.entry(ptr).unwrap();
        assert_eq!(entry.entry_type, LogEntryType::Object);
        assert_eq!(entry.object().unwrap(), record);
        assert_eq!(entry.key().unwrap(), (0, 5));
        assert_eq!(entry.version().unwrap(), 1);
    }

    #[test]
    fn tombstone_version_is_the_superseded_version() {
        let mut log = Log::new(4096, 64 * 1024);
        let tomb = TombstoneRecord {
            table_id: 0,
            object_id: 9,
            object_version: 7,
            segment_id: 3,
        };
        let ptr = log.append_tombstone(&tomb).unwrap();
        let entry = log.entry(ptr).unwrap();
        assert_eq!(entry.entry_type, LogEntryType::Tombstone);
        assert_eq!(entry.version().unwrap(), 7);
        assert_eq!(entry.tombstone().unwrap(), tomb);
        assert!(entry.object().is_err());
    }

    #[test]
    fn key_source() {
        let mut log = Log::new(4096, 64 * 1024);
        let a = log.append_object(&object(1, 10, 1)).unwrap();
        let b = log.append_object(&object(2, 20, 1)).unwrap();
        assert_eq!(log.key_at(a), Some((1, 10)));
        assert_eq!(log.key_at(b), Some((2, 20)));
        assert_eq!(log.key_at(LogPtr::new(1).unwrap()), None);
    }

    #[test]
    fn full() {
        let mut log = Log::new(64, 64 * 1024);
        let record = object(0, 1, 1);
        log.append_object(&record).unwrap();
        let err = log.append_object(&record).unwrap_err();
        assert!(matches!(err, LogError::Full { .. }));
    }

    #[test]
    fn segment_of_derives_from_offset() {
        let mut log = Log::new(1024 * 1024, 128);
        let mut last = None;
        for i in 0..32 {
            last = Some(log.append_object(&object(0, i, 1)).unwrap());
        }
        let last = last.unwrap();
        assert_eq!(log.segment_of(last), last.offset() / 128);
        assert!(log.segment_of(last) > 0);
    }

    #[test]
    fn bad_pointer() {
        let log = Log::new(4096, 64 * 1024);
        let dangling = LogPtr::new(1000).unwrap();
        assert!(matches!(log.entry(dangling), Err(LogError::BadPointer(_))));
    }
}
