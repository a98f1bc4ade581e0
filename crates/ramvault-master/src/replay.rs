//! Segment replay: applying recovered records under version dominance.

use crate::service::MasterInner;
use crate::{index_err, log_err};
use ramvault_common::{Result, SegmentId, TableId, Version};
use ramvault_log::{LogEntryType, ObjectRecord, SegmentReader, TombstoneRecord};
use tracing::debug;

/// Walk one recovered segment and apply each record to the index and log.
/// Unknown record types are skipped; corrupt frames fail the replay.
pub(crate) fn recover_segment(
    inner: &mut MasterInner,
    segment_id: SegmentId,
    data: &[u8],
) -> Result<()> {
    debug!(segment_id, len = data.len(), "recovering segment");
    for frame in SegmentReader::new(data) {
        let frame = frame.map_err(log_err)?;
        match LogEntryType::from_u8(frame.type_byte) {
            Some(LogEntryType::Object) => {
                let record = ObjectRecord::from_bytes(frame.payload).map_err(log_err)?;
                recover_object(inner, record)?;
            }
            Some(LogEntryType::Tombstone) => {
                let tombstone = TombstoneRecord::from_bytes(frame.payload).map_err(log_err)?;
                recover_tombstone(inner, tombstone)?;
            }
            None => {
                debug!(type_byte = frame.type_byte, "skipping unknown record type");
            }
        }
    }
    debug!(segment_id, "segment replay complete");
    Ok(())
}

/// Type and version of whatever the index currently holds for a key.
fn present_version(
    inner: &MasterInner,
    table_id: TableId,
    object_id: u64,
) -> Result<Option<(LogEntryType, Version)>> {
    let Some(ptr) = inner.object_map.lookup(&inner.log, table_id, object_id) else {
        return Ok(None);
    };
    let entry = inner.log.entry(ptr).map_err(log_err)?;
    let version = entry.version().map_err(log_err)?;
    Ok(Some((entry.entry_type, version)))
}

/// Raise the table's allocator floors past a recovered record, so later
/// writes dominate everything replayed for this key range.
fn note_recovered(inner: &mut MasterInner, table_id: TableId, object_id: u64, version: Version) {
    if let Some(table) = inner.tablets.table_mut(table_id) {
        table.raise_version_floor(version);
        table.note_object_id(object_id);
    }
}

/// A recovered object replaces whatever is present only if its version is
/// strictly newer; against nothing it is always inserted.
fn recover_object(inner: &mut MasterInner, record: ObjectRecord) -> Result<()> {
    note_recovered(inner, record.table_id, record.object_id, record.version);
    match present_version(inner, record.table_id, record.object_id)? {
        Some((_, present)) => {
            if record.version > present {
                let ptr = inner.log.append_object(&record).map_err(log_err)?;
                inner.object_map.replace(&inner.log, ptr).map_err(index_err)?;
            }
        }
        None => {
            let ptr = inner.log.append_object(&record).map_err(log_err)?;
            inner
                .object_map
                .insert(record.table_id, record.object_id, ptr)
                .map_err(index_err)?;
        }
    }
    Ok(())
}

/// A recovered tombstone beats an object of the same version (the delete
/// happened after the write) but loses ties against another tombstone.
fn recover_tombstone(inner: &mut MasterInner, tombstone: TombstoneRecord) -> Result<()> {
    note_recovered(
        inner,
        tombstone.table_id,
        tombstone.object_id,
        tombstone.object_version,
    );
    let apply = match present_version(inner, tombstone.table_id, tombstone.object_id)? {
        Some((LogEntryType::Object, present)) => tombstone.object_version >= present,
        Some((LogEntryType::Tombstone, present)) => tombstone.object_version > present,
        None => {
            let ptr = inner.log.append_tombstone(&tombstone).map_err(log_err)?;
            inner
                .object_map
                .insert(tombstone.table_id, tombstone.object_id, ptr)
                .map_err(index_err)?;
            return Ok(());
        }
    };
    if apply {
        let ptr = inner.log.append_tombstone(&tombstone).map_err(log_err)?;
        inner.object_map.replace(&inner.log, ptr).map_err(index_err)?;
    }
    Ok(())
}

/// Walk the index and drop every tombstone entry. Runs once a full
/// partition has replayed; tombstones have done their job by then.
pub(crate) fn remove_tombstones(inner: &mut MasterInner) {
    let MasterInner {
        object_map, log, ..
    } = inner;
    let mut doomed = Vec::new();
    object_map.for_each(|ptr| {
        if let Ok(entry) = log.entry(ptr) {
            if entry.entry_type == LogEntryType::Tombstone {
                if let Ok(key) = entry.key() {
                    doomed.push(key);
                }
            }
        }
    });
    debug!(count = doomed.len(), "removing tombstones from the index");
    for (table_id, object_id) in doomed {
        object_map.remove(&*log, table_id, object_id);
    }
}
