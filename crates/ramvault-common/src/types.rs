//! Core identifier and descriptor types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a table. Tables are created by the coordinator; masters only
/// ever see numeric ids.
pub type TableId = u32;

/// Identifies an object within a table.
pub type ObjectId = u64;

/// Monotonic per-object version number.
pub type Version = u64;

/// Identifies a log segment as stored on backups.
pub type SegmentId = u64;

/// Identifies a server enlisted with the coordinator.
pub type ServerId = u64;

/// Sentinel version returned when an operation did not read or create a
/// live object.
pub const VERSION_NONEXISTENT: Version = 0;

/// Handle to a record in the append-only log.
///
/// Encoded as a byte offset into the log arena. Offsets are at most 47 bits
/// wide so that a `LogPtr` fits into the pointer field of a packed hash
/// index entry, and never zero so that the all-zero entry stays
/// distinguishable as empty (the log reserves its first bytes).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogPtr(u64);

impl LogPtr {
    /// Number of significant bits in a packed pointer.
    pub const WIDTH: u32 = 47;

    /// Largest encodable offset.
    pub const MAX_OFFSET: u64 = (1 << Self::WIDTH) - 1;

    /// Create a pointer from a log offset. Returns `None` for zero or for
    /// offsets that do not fit in 47 bits.
    #[must_use]
    pub fn new(offset: u64) -> Option<Self> {
        if offset == 0 || offset > Self::MAX_OFFSET {
            None
        } else {
            Some(Self(offset))
        }
    }

    /// The byte offset this pointer addresses.
    #[must_use]
    pub const fn offset(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for LogPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogPtr({:#x})", self.0)
    }
}

/// Resolves a log pointer back to the key of the record it addresses.
///
/// The hash index stores only a 16-bit hash fragment per entry; on fragment
/// collisions it must dereference the candidate and compare full keys. The
/// log implements this trait; tests substitute table-driven fakes.
pub trait KeySource {
    /// Key of the record at `ptr`, or `None` if the pointer does not
    /// resolve to a keyed record.
    fn key_at(&self, ptr: LogPtr) -> Option<(TableId, ObjectId)>;
}

/// Conditions under which a client operation should be rejected, evaluated
/// against the live version of the addressed object.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectRules {
    /// Reject if the object exists.
    pub exists: bool,
    /// Reject if the object does not exist.
    pub doesnt_exist: bool,
    /// Reject if the live version is less than or equal to `given_version`.
    pub version_le_given: bool,
    /// Reject if the live version differs from `given_version`.
    pub version_ne_given: bool,
    /// Version the two version predicates compare against.
    pub given_version: Version,
}

/// State of a tablet on this master.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TabletState {
    /// Serving reads and writes.
    #[default]
    Normal,
    /// Data is being replayed from backups; operations must be retried.
    Recovering,
}

/// A contiguous object-id range of one table assigned to one master.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tablet {
    pub table_id: TableId,
    /// First object id of the range.
    pub start_id: ObjectId,
    /// Last object id of the range, inclusive.
    pub end_id: ObjectId,
    pub state: TabletState,
}

impl Tablet {
    #[must_use]
    pub fn new(table_id: TableId, start_id: ObjectId, end_id: ObjectId) -> Self {
        Self {
            table_id,
            start_id,
            end_id,
            state: TabletState::Normal,
        }
    }

    #[must_use]
    pub fn recovering(table_id: TableId, start_id: ObjectId, end_id: ObjectId) -> Self {
        Self {
            table_id,
            start_id,
            end_id,
            state: TabletState::Recovering,
        }
    }

    /// Whether `object_id` falls inside this tablet's range.
    #[must_use]
    pub fn contains(&self, table_id: TableId, object_id: ObjectId) -> bool {
        self.table_id == table_id && self.start_id <= object_id && object_id <= self.end_id
    }
}

/// Fetch state of one replica entry during recovery.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaStatus {
    /// Not yet scheduled.
    #[default]
    Pending,
    /// A fetch against this replica's backup is outstanding.
    InFlight,
    /// The segment was recovered, through this replica or another copy.
    Ok,
    /// The fetch failed or the segment was obtained elsewhere first.
    Failed,
}

/// One stored copy of a segment on a specific backup, as handed to the
/// recovery coordinator. A segment id may appear on several entries, one
/// per replica.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentReplica {
    /// Service locator of the backup holding the copy.
    pub backup_locator: String,
    pub segment_id: SegmentId,
    pub status: ReplicaStatus,
}

impl SegmentReplica {
    #[must_use]
    pub fn new(backup_locator: impl Into<String>, segment_id: SegmentId) -> Self {
        Self {
            backup_locator: backup_locator.into(),
            segment_id,
            status: ReplicaStatus::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_ptr_bounds() {
        assert!(LogPtr::new(0).is_none());
        assert!(LogPtr::new(1).is_some());
        assert!(LogPtr::new(LogPtr::MAX_OFFSET).is_some());
        assert!(LogPtr::new(LogPtr::MAX_OFFSET + 1).is_none());
        assert_eq!(LogPtr::new(0x1234).unwrap().offset(), 0x1234);
    }

    #[test]
    fn tablet_contains() {
        let t = Tablet::new(7, 10, 19);
        assert!(t.contains(7, 10));
        assert!(t.contains(7, 19));
        assert!(!t.contains(7, 9));
        assert!(!t.contains(7, 20));
        assert!(!t.contains(8, 10));
    }

    #[test]
    fn replica_starts_pending() {
        let r = SegmentReplica::new("mock:host=backup1", 87);
        assert_eq!(r.status, ReplicaStatus::Pending);
        assert_eq!(r.segment_id, 87);
    }
}
