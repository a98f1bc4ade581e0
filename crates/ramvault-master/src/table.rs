//! Per-table allocator state.

use ramvault_common::{ObjectId, Version, VERSION_NONEXISTENT};

/// Version and object-id allocation for one table.
///
/// Versions are allocated table-wide but must also strictly dominate the
/// live version of the object being overwritten; both constraints are
/// satisfied by taking the maximum and advancing the counter past it.
#[derive(Clone, Debug)]
pub struct Table {
    next_object_id: ObjectId,
    next_version: Version,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            next_object_id: 0,
            next_version: VERSION_NONEXISTENT + 1,
        }
    }
}

impl Table {
    /// Choose the id for a server-assigned object.
    pub fn take_object_id(&mut self) -> ObjectId {
        let id = self.next_object_id;
        self.next_object_id += 1;
        id
    }

    /// Allocate the version for a write. `live` is the current version of
    /// the object, or [`VERSION_NONEXISTENT`].
    pub fn allocate_version(&mut self, live: Version) -> Version {
        let version = self.next_version.max(live + 1);
        self.next_version = version + 1;
        version
    }

    /// Make sure future server-assigned ids skip past `object_id`.
    pub fn note_object_id(&mut self, object_id: ObjectId) {
        if object_id != ObjectId::MAX {
            self.next_object_id = self.next_object_id.max(object_id + 1);
        }
    }

    /// Make sure future versions strictly dominate a version observed
    /// during recovery.
    pub fn raise_version_floor(&mut self, recovered: Version) {
        if self.next_version <= recovered {
            self.next_version = recovered + 1;
        }
    }
}
