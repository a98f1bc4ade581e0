//! Client-side request builders and reply parsers.

use crate::service::{MasterService, MASTER_SERVICE};
use crate::wire::{put_replica, put_rules, put_tablet, put_u32, put_u64, Opcode};
use bytes::Bytes;
use ramvault_common::wire::{RequestHeader, WireReader};
use ramvault_common::{
    ObjectId, RejectRules, SegmentReplica, Status, TableId, Tablet, Version, VERSION_NONEXISTENT,
};
use ramvault_dispatch::{RpcContext, ServerRpc, Service};
use std::sync::Arc;
use thiserror::Error;

/// A failed RPC: the wire status plus the version the master reported.
/// A version returned alongside an error is authoritative for that key.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("rpc failed with status {status:?}, version {version}")]
pub struct RpcFailure {
    pub status: Status,
    pub version: Version,
}

pub type ClientResult<T> = std::result::Result<T, RpcFailure>;

fn malformed() -> RpcFailure {
    RpcFailure {
        status: Status::InternalError,
        version: VERSION_NONEXISTENT,
    }
}

/// A way to exchange one request for one reply with a master.
pub trait Session {
    fn send(&self, request: Bytes) -> Bytes;
}

/// Calls the service inline, bypassing the dispatch loop. The workhorse
/// session for tests.
pub struct DirectSession {
    service: Arc<MasterService>,
}

impl DirectSession {
    #[must_use]
    pub fn new(service: Arc<MasterService>) -> Self {
        Self { service }
    }
}

impl Session for DirectSession {
    fn send(&self, request: Bytes) -> Bytes {
        let (rpc, handle) = ServerRpc::new(request);
        let mut ctx = RpcContext::direct();
        self.service.handle_rpc(&rpc, &mut ctx);
        rpc.send_reply();
        handle.response().unwrap_or_default()
    }
}

/// One entry of a multi-read reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultiReadResult {
    pub status: Status,
    pub version: Version,
    pub payload: Option<Bytes>,
}

/// Typed client for the master's operations.
pub struct MasterClient<S: Session> {
    session: S,
}

impl<S: Session> MasterClient<S> {
    #[must_use]
    pub fn new(session: S) -> Self {
        Self { session }
    }

    fn call(&self, opcode: Opcode, body: impl FnOnce(&mut Vec<u8>)) -> Bytes {
        let mut buf = Vec::new();
        RequestHeader::new(MASTER_SERVICE, opcode as u8).encode(&mut buf);
        body(&mut buf);
        self.session.send(Bytes::from(buf))
    }

    /// Parse the leading `status | version` pair; errors become
    /// [`RpcFailure`] carrying the reported version.
    fn head<'a>(reply: &'a [u8]) -> ClientResult<(WireReader<'a>, Version)> {
        let mut r = WireReader::new(reply);
        let status = r.u8().and_then(Status::from_u8).ok_or_else(malformed)?;
        let version = r.u64().unwrap_or(VERSION_NONEXISTENT);
        if status != Status::Ok {
            return Err(RpcFailure { status, version });
        }
        Ok((r, version))
    }

    pub fn ping(&self) -> ClientResult<()> {
        let reply = self.call(Opcode::Ping, |_| {});
        Self::head(&reply)?;
        Ok(())
    }

    /// Create an object with a server-assigned id.
    pub fn create(&self, table_id: TableId, payload: &[u8]) -> ClientResult<(ObjectId, Version)> {
        let reply = self.call(Opcode::Create, |buf| {
            put_u32(buf, table_id);
            put_u32(buf, payload.len() as u32);
            buf.extend_from_slice(payload);
        });
        let (mut r, version) = Self::head(&reply)?;
        let object_id = r.u64().ok_or_else(malformed)?;
        Ok((object_id, version))
    }

    pub fn read(&self, table_id: TableId, object_id: ObjectId) -> ClientResult<(Bytes, Version)> {
        self.read_with_rules(table_id, object_id, &RejectRules::default())
    }

    pub fn read_with_rules(
        &self,
        table_id: TableId,
        object_id: ObjectId,
        rules: &RejectRules,
    ) -> ClientResult<(Bytes, Version)> {
        let reply = self.call(Opcode::Read, |buf| {
            put_u32(buf, table_id);
            put_u64(buf, object_id);
            put_rules(buf, rules);
        });
        let (mut r, version) = Self::head(&reply)?;
        let len = r.u32().ok_or_else(malformed)? as usize;
        let payload = r.bytes(len).ok_or_else(malformed)?;
        Ok((Bytes::copy_from_slice(payload), version))
    }

    pub fn write(
        &self,
        table_id: TableId,
        object_id: ObjectId,
        payload: &[u8],
    ) -> ClientResult<Version> {
        self.write_with_rules(table_id, object_id, payload, &RejectRules::default())
    }

    pub fn write_with_rules(
        &self,
        table_id: TableId,
        object_id: ObjectId,
        payload: &[u8],
        rules: &RejectRules,
    ) -> ClientResult<Version> {
        let reply = self.call(Opcode::Write, |buf| {
            put_u32(buf, table_id);
            put_u64(buf, object_id);
            put_rules(buf, rules);
            put_u32(buf, payload.len() as u32);
            buf.extend_from_slice(payload);
        });
        let (_, version) = Self::head(&reply)?;
        Ok(version)
    }

    pub fn remove(&self, table_id: TableId, object_id: ObjectId) -> ClientResult<Version> {
        self.remove_with_rules(table_id, object_id, &RejectRules::default())
    }

    pub fn remove_with_rules(
        &self,
        table_id: TableId,
        object_id: ObjectId,
        rules: &RejectRules,
    ) -> ClientResult<Version> {
        let reply = self.call(Opcode::Remove, |buf| {
            put_u32(buf, table_id);
            put_u64(buf, object_id);
            put_rules(buf, rules);
        });
        let (_, version) = Self::head(&reply)?;
        Ok(version)
    }

    /// Read several objects in one request. Each entry carries its own
    /// status and version.
    pub fn multi_read(
        &self,
        requests: &[(TableId, ObjectId)],
    ) -> ClientResult<Vec<MultiReadResult>> {
        let reply = self.call(Opcode::MultiRead, |buf| {
            put_u32(buf, requests.len() as u32);
            for &(table_id, object_id) in requests {
                put_u32(buf, table_id);
                put_u64(buf, object_id);
            }
        });
        let (mut r, _) = Self::head(&reply)?;
        let count = r.u32().ok_or_else(malformed)? as usize;
        let mut results = Vec::with_capacity(count);
        for _ in 0..count {
            let status = r.u8().and_then(Status::from_u8).ok_or_else(malformed)?;
            let version = r.u64().ok_or_else(malformed)?;
            let payload = if status == Status::Ok {
                let len = r.u32().ok_or_else(malformed)? as usize;
                Some(Bytes::copy_from_slice(r.bytes(len).ok_or_else(malformed)?))
            } else {
                None
            };
            results.push(MultiReadResult {
                status,
                version,
                payload,
            });
        }
        Ok(results)
    }

    pub fn set_tablets(&self, tablets: &[Tablet]) -> ClientResult<()> {
        let reply = self.call(Opcode::SetTablets, |buf| {
            put_u32(buf, tablets.len() as u32);
            for tablet in tablets {
                put_tablet(buf, tablet);
            }
        });
        Self::head(&reply)?;
        Ok(())
    }

    /// Ask the master to recover one partition of a crashed master.
    pub fn recover(
        &self,
        crashed_master: u64,
        partition_id: u64,
        tablets: &[Tablet],
        replicas: &[SegmentReplica],
    ) -> ClientResult<()> {
        let reply = self.call(Opcode::Recover, |buf| {
            put_u64(buf, crashed_master);
            put_u64(buf, partition_id);
            put_u32(buf, tablets.len() as u32);
            for tablet in tablets {
                put_tablet(buf, tablet);
            }
            put_u32(buf, replicas.len() as u32);
            for replica in replicas {
                put_replica(buf, replica);
            }
        });
        Self::head(&reply)?;
        Ok(())
    }
}
