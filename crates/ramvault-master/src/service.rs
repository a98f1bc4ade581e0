//! The master service: client operations over the index and log.

use crate::backup::{BackupClient, CoordinatorClient, ServerKind};
use crate::tablets::TabletMap;
use crate::wire::{
    get_replica, get_rules, get_tablet, put_reply_head, put_u32, put_u64, Opcode,
};
use crate::{index_err, log_err, recovery, replay};
use bytes::Bytes;
use parking_lot::Mutex;
use ramvault_common::perf::PerfStats;
use ramvault_common::wire::{RequestHeader, WireReader, REQUEST_HEADER_LEN};
use ramvault_common::{
    Error, MasterConfig, ObjectId, RejectRules, Result, SegmentId, SegmentReplica, ServerId,
    Status, TableId, Tablet, TabletState, Version, VERSION_NONEXISTENT,
};
use ramvault_dispatch::{RpcContext, ServerRpc, Service};
use ramvault_index::HashIndex;
use ramvault_log::{Log, LogEntryType, ObjectRecord, TombstoneRecord};
use std::sync::Arc;
use tracing::{info, warn};

/// Service type under which the master registers with the dispatcher.
pub const MASTER_SERVICE: u8 = 0;

/// Storage state of the master. Guarded by one lock: the master service
/// runs single-threaded (`max_threads = 1`), the lock makes that safe
/// against misconfiguration rather than relying on it.
pub(crate) struct MasterInner {
    pub config: MasterConfig,
    pub log: Log,
    pub object_map: HashIndex,
    pub tablets: TabletMap,
}

/// The master node service.
pub struct MasterService {
    inner: Mutex<MasterInner>,
    coordinator: Arc<dyn CoordinatorClient>,
    backups: Arc<dyn BackupClient>,
    server_id: ServerId,
}

/// Evaluate reject rules against the live version of an object
/// ([`VERSION_NONEXISTENT`] when there is none).
pub fn reject_operation(rules: &RejectRules, version: Version) -> Result<()> {
    if version == VERSION_NONEXISTENT {
        if rules.doesnt_exist {
            return Err(Error::ObjectDoesntExist);
        }
        return Ok(());
    }
    if rules.exists {
        return Err(Error::ObjectExists);
    }
    if rules.version_le_given && version <= rules.given_version {
        return Err(Error::WrongVersion { live: version });
    }
    if rules.version_ne_given && version != rules.given_version {
        return Err(Error::WrongVersion { live: version });
    }
    Ok(())
}

impl MasterService {
    /// Construct a master and enlist it with the coordinator.
    pub fn new(
        config: MasterConfig,
        locator: &str,
        coordinator: Arc<dyn CoordinatorClient>,
        backups: Arc<dyn BackupClient>,
    ) -> Self {
        let server_id = coordinator.enlist_server(ServerKind::Master, locator);
        info!(server_id, locator, "master enlisted");
        let inner = MasterInner {
            log: Log::new(config.log_bytes, config.segment_bytes),
            object_map: HashIndex::new(config.hash_capacity),
            tablets: TabletMap::default(),
            config,
        };
        Self {
            inner: Mutex::new(inner),
            coordinator,
            backups,
            server_id,
        }
    }

    #[must_use]
    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// Create an object with a server-assigned id.
    pub fn create(&self, table_id: TableId, payload: Bytes) -> Result<(ObjectId, Version)> {
        let mut inner = self.inner.lock();
        let object_id = inner
            .tablets
            .table_mut(table_id)
            .ok_or(Error::TableDoesntExist(table_id))?
            .take_object_id();
        inner.tablets.locate(table_id, object_id)?;
        let version = inner.write_object(table_id, object_id, payload, VERSION_NONEXISTENT, false)?;
        PerfStats::thread().add_write();
        Ok((object_id, version))
    }

    /// Read an object.
    pub fn read(
        &self,
        table_id: TableId,
        object_id: ObjectId,
        rules: &RejectRules,
    ) -> Result<(Bytes, Version)> {
        let inner = self.inner.lock();
        inner.tablets.locate(table_id, object_id)?;
        match inner.lookup_object(table_id, object_id)? {
            None => Err(Error::ObjectDoesntExist),
            Some((_, record)) => {
                reject_operation(rules, record.version)?;
                PerfStats::thread().add_read();
                Ok((record.payload, record.version))
            }
        }
    }

    /// Write an object, creating it if absent.
    pub fn write(
        &self,
        table_id: TableId,
        object_id: ObjectId,
        payload: Bytes,
        rules: &RejectRules,
    ) -> Result<Version> {
        let mut inner = self.inner.lock();
        inner.tablets.locate(table_id, object_id)?;
        let live = inner.lookup_object(table_id, object_id)?;
        let (live_version, existed) = match &live {
            Some((_, record)) => (record.version, true),
            None => (VERSION_NONEXISTENT, false),
        };
        reject_operation(rules, live_version)?;
        let version = inner.write_object(table_id, object_id, payload, live_version, existed)?;
        PerfStats::thread().add_write();
        Ok(version)
    }

    /// Remove an object. Removing an absent object succeeds (unless the
    /// rules say otherwise) and reports [`VERSION_NONEXISTENT`].
    pub fn remove(
        &self,
        table_id: TableId,
        object_id: ObjectId,
        rules: &RejectRules,
    ) -> Result<Version> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.tablets.locate(table_id, object_id)?;
        let Some((ptr, record)) = inner.lookup_object(table_id, object_id)? else {
            reject_operation(rules, VERSION_NONEXISTENT)?;
            return Ok(VERSION_NONEXISTENT);
        };
        reject_operation(rules, record.version)?;

        let tombstone = TombstoneRecord {
            table_id,
            object_id,
            object_version: record.version,
            segment_id: inner.log.segment_of(ptr),
        };
        inner.log.append_tombstone(&tombstone).map_err(log_err)?;
        inner.object_map.remove(&inner.log, table_id, object_id);
        PerfStats::thread().add_remove();
        Ok(record.version)
    }

    /// Read several objects; each request carries its own outcome.
    pub fn multi_read(
        &self,
        requests: &[(TableId, ObjectId)],
    ) -> Vec<Result<(Bytes, Version)>> {
        let inner = self.inner.lock();
        requests
            .iter()
            .map(|&(table_id, object_id)| {
                inner.tablets.locate(table_id, object_id)?;
                match inner.lookup_object(table_id, object_id)? {
                    None => Err(Error::ObjectDoesntExist),
                    Some((_, record)) => {
                        PerfStats::thread().add_read();
                        Ok((record.payload, record.version))
                    }
                }
            })
            .collect()
    }

    /// Install a new tablet list.
    pub fn set_tablets(&self, tablets: Vec<Tablet>) {
        self.inner.lock().tablets.set_tablets(tablets);
    }

    /// Tablets this master currently holds.
    #[must_use]
    pub fn tablets(&self) -> Vec<Tablet> {
        self.inner.lock().tablets.tablets().to_vec()
    }

    /// Recover one partition of a crashed master from backup replicas.
    ///
    /// `replicas` is mutated in place: each entry ends `Ok` or `Failed`.
    /// On success every tablet of the partition is serving normally and
    /// the coordinator has been notified.
    pub fn recover(
        &self,
        crashed_master: ServerId,
        partition_id: u64,
        tablets: &[Tablet],
        replicas: &mut [SegmentReplica],
    ) -> Result<()> {
        info!(
            crashed_master,
            partition_id,
            tablets = tablets.len(),
            hosts = replicas.len(),
            "starting recovery"
        );
        let mut inner = self.inner.lock();
        for tablet in tablets {
            let mut tablet = tablet.clone();
            tablet.state = TabletState::Recovering;
            inner.tablets.add_tablet(tablet);
        }

        recovery::recover_partition(
            &mut inner,
            self.backups.as_ref(),
            crashed_master,
            partition_id,
            replicas,
        )
        .inspect_err(|err| warn!(%err, partition_id, "recovery failed"))?;

        replay::remove_tombstones(&mut inner);
        inner.tablets.mark_recovered(tablets);
        drop(inner);

        let now_serving: Vec<Tablet> = tablets
            .iter()
            .map(|t| Tablet::new(t.table_id, t.start_id, t.end_id))
            .collect();
        info!(partition_id, "recovery complete, notifying coordinator");
        self.coordinator
            .tablets_recovered(self.server_id, &now_serving);
        Ok(())
    }

    /// Replay one recovered segment into the index and log.
    pub fn recover_segment(&self, segment_id: SegmentId, data: &[u8]) -> Result<()> {
        replay::recover_segment(&mut self.inner.lock(), segment_id, data)
    }

    /// Drop every tombstone entry from the index. Runs after a full
    /// partition has replayed.
    pub fn remove_tombstones(&self) {
        replay::remove_tombstones(&mut self.inner.lock());
    }

    /// Type and version of the record currently indexed for a key, if
    /// any. Observability hook for tests and debugging.
    #[must_use]
    pub fn lookup_record(&self, table_id: TableId, object_id: ObjectId) -> Option<(LogEntryType, Version)> {
        let inner = self.inner.lock();
        let ptr = inner.object_map.lookup(&inner.log, table_id, object_id)?;
        let entry = inner.log.entry(ptr).ok()?;
        let version = entry.version().ok()?;
        Some((entry.entry_type, version))
    }

    /// Decode and execute one request, writing the reply.
    pub fn dispatch(&self, request: &[u8], reply: &mut Vec<u8>) {
        let Some(header) = RequestHeader::parse(request) else {
            put_reply_head(reply, Status::MessageTooShort, VERSION_NONEXISTENT);
            return;
        };
        let body = &request[REQUEST_HEADER_LEN..];
        match Opcode::from_u8(header.opcode) {
            Some(Opcode::Ping) => put_reply_head(reply, Status::Ok, VERSION_NONEXISTENT),
            Some(Opcode::Create) => self.op_create(body, reply),
            Some(Opcode::Read) => self.op_read(body, reply),
            Some(Opcode::Write) => self.op_write(body, reply),
            Some(Opcode::Remove) => self.op_remove(body, reply),
            Some(Opcode::MultiRead) => self.op_multi_read(body, reply),
            Some(Opcode::SetTablets) => self.op_set_tablets(body, reply),
            Some(Opcode::Recover) => self.op_recover(body, reply),
            None => {
                warn!(opcode = header.opcode, "unknown master opcode");
                put_reply_head(reply, Status::ServiceNotAvailable, VERSION_NONEXISTENT);
            }
        }
    }

    fn op_create(&self, body: &[u8], reply: &mut Vec<u8>) {
        let mut r = WireReader::new(body);
        let parsed = (|| {
            let table_id = r.u32()?;
            let len = r.u32()? as usize;
            let payload = r.bytes(len)?;
            Some((table_id, Bytes::copy_from_slice(payload)))
        })();
        let Some((table_id, payload)) = parsed else {
            put_reply_head(reply, Status::MessageTooShort, VERSION_NONEXISTENT);
            return;
        };
        match self.create(table_id, payload) {
            Ok((object_id, version)) => {
                put_reply_head(reply, Status::Ok, version);
                put_u64(reply, object_id);
            }
            Err(err) => error_reply(reply, &err),
        }
    }

    fn op_read(&self, body: &[u8], reply: &mut Vec<u8>) {
        let mut r = WireReader::new(body);
        let parsed = (|| Some((r.u32()?, r.u64()?, get_rules(&mut r)?)))();
        let Some((table_id, object_id, rules)) = parsed else {
            put_reply_head(reply, Status::MessageTooShort, VERSION_NONEXISTENT);
            return;
        };
        match self.read(table_id, object_id, &rules) {
            Ok((payload, version)) => {
                put_reply_head(reply, Status::Ok, version);
                put_u32(reply, payload.len() as u32);
                reply.extend_from_slice(&payload);
            }
            Err(err) => error_reply(reply, &err),
        }
    }

    fn op_write(&self, body: &[u8], reply: &mut Vec<u8>) {
        let mut r = WireReader::new(body);
        let parsed = (|| {
            let table_id = r.u32()?;
            let object_id = r.u64()?;
            let rules = get_rules(&mut r)?;
            let len = r.u32()? as usize;
            let payload = r.bytes(len)?;
            Some((table_id, object_id, rules, Bytes::copy_from_slice(payload)))
        })();
        let Some((table_id, object_id, rules, payload)) = parsed else {
            put_reply_head(reply, Status::MessageTooShort, VERSION_NONEXISTENT);
            return;
        };
        match self.write(table_id, object_id, payload, &rules) {
            Ok(version) => put_reply_head(reply, Status::Ok, version),
            Err(err) => error_reply(reply, &err),
        }
    }

    fn op_remove(&self, body: &[u8], reply: &mut Vec<u8>) {
        let mut r = WireReader::new(body);
        let parsed = (|| Some((r.u32()?, r.u64()?, get_rules(&mut r)?)))();
        let Some((table_id, object_id, rules)) = parsed else {
            put_reply_head(reply, Status::MessageTooShort, VERSION_NONEXISTENT);
            return;
        };
        match self.remove(table_id, object_id, &rules) {
            Ok(version) => put_reply_head(reply, Status::Ok, version),
            Err(err) => error_reply(reply, &err),
        }
    }

    fn op_multi_read(&self, body: &[u8], reply: &mut Vec<u8>) {
        let mut r = WireReader::new(body);
        let parsed = (|| {
            let count = r.u32()? as usize;
            let mut requests = Vec::with_capacity(count);
            for _ in 0..count {
                requests.push((r.u32()?, r.u64()?));
            }
            Some(requests)
        })();
        let Some(requests) = parsed else {
            put_reply_head(reply, Status::MessageTooShort, VERSION_NONEXISTENT);
            return;
        };
        let results = self.multi_read(&requests);
        put_reply_head(reply, Status::Ok, VERSION_NONEXISTENT);
        put_u32(reply, results.len() as u32);
        for result in results {
            match result {
                Ok((payload, version)) => {
                    reply.push(Status::Ok.as_u8());
                    put_u64(reply, version);
                    put_u32(reply, payload.len() as u32);
                    reply.extend_from_slice(&payload);
                }
                Err(err) => {
                    reply.push(err.status().as_u8());
                    put_u64(reply, VERSION_NONEXISTENT);
                }
            }
        }
    }

    fn op_set_tablets(&self, body: &[u8], reply: &mut Vec<u8>) {
        let mut r = WireReader::new(body);
        let parsed = (|| {
            let count = r.u32()? as usize;
            let mut tablets = Vec::with_capacity(count);
            for _ in 0..count {
                tablets.push(get_tablet(&mut r)?);
            }
            Some(tablets)
        })();
        let Some(tablets) = parsed else {
            put_reply_head(reply, Status::MessageTooShort, VERSION_NONEXISTENT);
            return;
        };
        self.set_tablets(tablets);
        put_reply_head(reply, Status::Ok, VERSION_NONEXISTENT);
    }

    fn op_recover(&self, body: &[u8], reply: &mut Vec<u8>) {
        let mut r = WireReader::new(body);
        let parsed = (|| {
            let crashed_master = r.u64()?;
            let partition_id = r.u64()?;
            let tablet_count = r.u32()? as usize;
            let mut tablets = Vec::with_capacity(tablet_count);
            for _ in 0..tablet_count {
                tablets.push(get_tablet(&mut r)?);
            }
            let replica_count = r.u32()? as usize;
            let mut replicas = Vec::with_capacity(replica_count);
            for _ in 0..replica_count {
                replicas.push(get_replica(&mut r)?);
            }
            Some((crashed_master, partition_id, tablets, replicas))
        })();
        let Some((crashed_master, partition_id, tablets, mut replicas)) = parsed else {
            put_reply_head(reply, Status::MessageTooShort, VERSION_NONEXISTENT);
            return;
        };
        match self.recover(crashed_master, partition_id, &tablets, &mut replicas) {
            Ok(()) => put_reply_head(reply, Status::Ok, VERSION_NONEXISTENT),
            Err(err) => error_reply(reply, &err),
        }
    }
}

impl Service for MasterService {
    fn handle_rpc(&self, rpc: &ServerRpc, _ctx: &mut RpcContext<'_>) {
        let mut reply = rpc.reply_buf();
        self.dispatch(rpc.request(), &mut reply);
    }
}

fn error_reply(reply: &mut Vec<u8>, err: &Error) {
    let version = match err {
        Error::WrongVersion { live } => *live,
        _ => VERSION_NONEXISTENT,
    };
    put_reply_head(reply, err.status(), version);
}

impl MasterInner {
    /// The live object indexed for a key, if any. A tombstone entry (only
    /// possible mid-recovery, while the tablet rejects client traffic)
    /// counts as absent.
    fn lookup_object(
        &self,
        table_id: TableId,
        object_id: ObjectId,
    ) -> Result<Option<(ramvault_common::LogPtr, ObjectRecord)>> {
        let Some(ptr) = self.object_map.lookup(&self.log, table_id, object_id) else {
            return Ok(None);
        };
        let entry = self.log.entry(ptr).map_err(log_err)?;
        match entry.entry_type {
            LogEntryType::Object => Ok(Some((ptr, entry.object().map_err(log_err)?))),
            LogEntryType::Tombstone => Ok(None),
        }
    }

    /// Append a new object version and point the index at it.
    fn write_object(
        &mut self,
        table_id: TableId,
        object_id: ObjectId,
        payload: Bytes,
        live_version: Version,
        existed: bool,
    ) -> Result<Version> {
        let table = self
            .tablets
            .table_mut(table_id)
            .ok_or(Error::TableDoesntExist(table_id))?;
        table.note_object_id(object_id);
        let version = table.allocate_version(live_version);
        let record = ObjectRecord {
            table_id,
            object_id,
            version,
            payload,
        };
        let ptr = self.log.append_object(&record).map_err(log_err)?;
        if existed {
            self.object_map.replace(&self.log, ptr).map_err(index_err)?;
        } else {
            self.object_map
                .insert(table_id, object_id, ptr)
                .map_err(index_err)?;
        }
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_operation_rules() {
        let empty = RejectRules::default();
        assert!(reject_operation(&empty, VERSION_NONEXISTENT).is_ok());
        assert!(reject_operation(&empty, 5).is_ok());

        // Fail: object doesn't exist.
        let rules = RejectRules {
            doesnt_exist: true,
            ..RejectRules::default()
        };
        assert!(matches!(
            reject_operation(&rules, VERSION_NONEXISTENT),
            Err(Error::ObjectDoesntExist)
        ));

        // Succeed: object doesn't exist, version predicates don't apply.
        let rules = RejectRules {
            exists: true,
            version_le_given: true,
            version_ne_given: true,
            ..RejectRules::default()
        };
        assert!(reject_operation(&rules, VERSION_NONEXISTENT).is_ok());

        // Fail: object exists.
        let rules = RejectRules {
            exists: true,
            ..RejectRules::default()
        };
        assert!(matches!(
            reject_operation(&rules, 2),
            Err(Error::ObjectExists)
        ));

        // versionLeGiven.
        let rules = RejectRules {
            version_le_given: true,
            given_version: 0x4_0000_0001,
            ..RejectRules::default()
        };
        assert!(matches!(
            reject_operation(&rules, 0x4_0000_0000),
            Err(Error::WrongVersion { live: 0x4_0000_0000 })
        ));
        assert!(matches!(
            reject_operation(&rules, 0x4_0000_0001),
            Err(Error::WrongVersion { .. })
        ));
        assert!(reject_operation(&rules, 0x4_0000_0002).is_ok());

        // versionNeGiven.
        let rules = RejectRules {
            version_ne_given: true,
            given_version: 0x4_0000_0001,
            ..RejectRules::default()
        };
        assert!(matches!(
            reject_operation(&rules, 0x4_0000_0000),
            Err(Error::WrongVersion { .. })
        ));
        assert!(reject_operation(&rules, 0x4_0000_0001).is_ok());
        assert!(matches!(
            reject_operation(&rules, 0x4_0000_0002),
            Err(Error::WrongVersion { .. })
        ));
    }
}
