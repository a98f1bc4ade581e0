//! Common RPC framing helpers.
//!
//! Every request starts with a two-byte header naming the target service
//! and the operation; every reply starts with a status byte. Payloads are
//! framed field by field in little-endian order by the individual
//! services.

use crate::error::Status;

/// Length of the common request header.
pub const REQUEST_HEADER_LEN: usize = 2;

/// The header present at the start of every RPC request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestHeader {
    /// Which registered service handles this request.
    pub service: u8,
    /// Service-specific operation code.
    pub opcode: u8,
}

impl RequestHeader {
    #[must_use]
    pub fn new(service: u8, opcode: u8) -> Self {
        Self { service, opcode }
    }

    /// Parse the header from the front of a request. Returns `None` if the
    /// message is too short to contain one.
    #[must_use]
    pub fn parse(request: &[u8]) -> Option<Self> {
        if request.len() < REQUEST_HEADER_LEN {
            return None;
        }
        Some(Self {
            service: request[0],
            opcode: request[1],
        })
    }

    pub fn encode(self, buf: &mut Vec<u8>) {
        buf.push(self.service);
        buf.push(self.opcode);
    }
}

/// Write a status-only reply.
pub fn write_status(reply: &mut Vec<u8>, status: Status) {
    reply.clear();
    reply.push(status.as_u8());
}

/// Read the status byte of a reply.
#[must_use]
pub fn read_status(reply: &[u8]) -> Option<Status> {
    reply.first().and_then(|&b| Status::from_u8(b))
}

/// Sequential little-endian field reader over a request or reply payload.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn u8(&mut self) -> Option<u8> {
        let b = *self.buf.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    pub fn u32(&mut self) -> Option<u32> {
        let bytes = self.buf.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn u64(&mut self) -> Option<u64> {
        let bytes = self.buf.get(self.pos..self.pos + 8)?;
        self.pos += 8;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    }

    pub fn bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        let bytes = self.buf.get(self.pos..self.pos + len)?;
        self.pos += len;
        Some(bytes)
    }
}
