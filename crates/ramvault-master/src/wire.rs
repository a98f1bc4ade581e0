//! Request and reply codecs for the master's operations.
//!
//! Fields are framed little-endian, field by field. Every reply leads
//! with a status byte followed by a version word, so a version returned
//! alongside an error is authoritative for that key; success replies
//! append per-operation fields after it.

use ramvault_common::wire::WireReader;
use ramvault_common::{
    ObjectId, RejectRules, SegmentId, SegmentReplica, Status, TableId, Tablet, TabletState,
    Version,
};

/// Operations of the master service.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Ping = 0,
    Create = 1,
    Read = 2,
    Write = 3,
    Remove = 4,
    MultiRead = 5,
    SetTablets = 6,
    Recover = 7,
}

impl Opcode {
    #[must_use]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Ping),
            1 => Some(Self::Create),
            2 => Some(Self::Read),
            3 => Some(Self::Write),
            4 => Some(Self::Remove),
            5 => Some(Self::MultiRead),
            6 => Some(Self::SetTablets),
            7 => Some(Self::Recover),
            _ => None,
        }
    }
}

pub(crate) fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

pub(crate) fn put_rules(buf: &mut Vec<u8>, rules: &RejectRules) {
    buf.push(u8::from(rules.exists));
    buf.push(u8::from(rules.doesnt_exist));
    buf.push(u8::from(rules.version_le_given));
    buf.push(u8::from(rules.version_ne_given));
    put_u64(buf, rules.given_version);
}

pub(crate) fn get_rules(r: &mut WireReader<'_>) -> Option<RejectRules> {
    Some(RejectRules {
        exists: r.u8()? != 0,
        doesnt_exist: r.u8()? != 0,
        version_le_given: r.u8()? != 0,
        version_ne_given: r.u8()? != 0,
        given_version: r.u64()?,
    })
}

pub(crate) fn put_tablet(buf: &mut Vec<u8>, tablet: &Tablet) {
    put_u32(buf, tablet.table_id);
    put_u64(buf, tablet.start_id);
    put_u64(buf, tablet.end_id);
    buf.push(match tablet.state {
        TabletState::Normal => 0,
        TabletState::Recovering => 1,
    });
}

pub(crate) fn get_tablet(r: &mut WireReader<'_>) -> Option<Tablet> {
    let table_id: TableId = r.u32()?;
    let start_id: ObjectId = r.u64()?;
    let end_id: ObjectId = r.u64()?;
    let state = match r.u8()? {
        0 => TabletState::Normal,
        1 => TabletState::Recovering,
        _ => return None,
    };
    Some(Tablet {
        table_id,
        start_id,
        end_id,
        state,
    })
}

pub(crate) fn put_replica(buf: &mut Vec<u8>, replica: &SegmentReplica) {
    put_u32(buf, replica.backup_locator.len() as u32);
    buf.extend_from_slice(replica.backup_locator.as_bytes());
    put_u64(buf, replica.segment_id);
}

pub(crate) fn get_replica(r: &mut WireReader<'_>) -> Option<SegmentReplica> {
    let len = r.u32()? as usize;
    let locator = std::str::from_utf8(r.bytes(len)?).ok()?;
    let segment_id: SegmentId = r.u64()?;
    Some(SegmentReplica::new(locator, segment_id))
}

/// Write the leading `status | version` pair of a reply.
pub(crate) fn put_reply_head(buf: &mut Vec<u8>, status: Status, version: Version) {
    buf.clear();
    buf.push(status.as_u8());
    put_u64(buf, version);
}
