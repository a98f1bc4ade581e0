//! Error and status types shared across the master node.

use crate::types::{TableId, Version};
use thiserror::Error;

/// Common result type for ramvault operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Wire-visible status codes. Every RPC reply starts with one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0,
    /// Transient condition; the client should retry with backoff.
    Retry = 1,
    TableDoesntExist = 2,
    ObjectDoesntExist = 3,
    ObjectExists = 4,
    WrongVersion = 5,
    MessageTooShort = 6,
    ServiceNotAvailable = 7,
    SegmentRecoveryFailed = 8,
    InternalError = 9,
}

impl Status {
    /// Decode a status byte from the wire.
    #[must_use]
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Ok),
            1 => Some(Self::Retry),
            2 => Some(Self::TableDoesntExist),
            3 => Some(Self::ObjectDoesntExist),
            4 => Some(Self::ObjectExists),
            5 => Some(Self::WrongVersion),
            6 => Some(Self::MessageTooShort),
            7 => Some(Self::ServiceNotAvailable),
            8 => Some(Self::SegmentRecoveryFailed),
            9 => Some(Self::InternalError),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Common error type for ramvault.
#[derive(Debug, Error)]
pub enum Error {
    // Routing errors
    #[error("table does not exist: {0}")]
    TableDoesntExist(TableId),

    #[error("tablet for table {0} is recovering")]
    TabletNotReady(TableId),

    // Predicate errors
    #[error("object does not exist")]
    ObjectDoesntExist,

    #[error("object already exists")]
    ObjectExists,

    #[error("wrong version: live version is {live}")]
    WrongVersion { live: Version },

    // Dispatch errors
    #[error("request is too short to contain an RPC header")]
    MessageTooShort,

    #[error("no service registered for service type {0}")]
    ServiceNotAvailable(u8),

    // Recovery errors
    #[error("segment recovery failed: {missing} segment(s) unrecovered")]
    SegmentRecoveryFailed { missing: usize },

    // Fatal invariant violations
    #[error("pointer does not fit in 47 bits: {0:#x}")]
    PointerTooWide(u64),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wire status for this error.
    ///
    /// A recovering tablet maps to `Retry`: the taxonomy carries no
    /// dedicated code and clients are expected to back off and retry.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::TableDoesntExist(_) => Status::TableDoesntExist,
            Self::TabletNotReady(_) => Status::Retry,
            Self::ObjectDoesntExist => Status::ObjectDoesntExist,
            Self::ObjectExists => Status::ObjectExists,
            Self::WrongVersion { .. } => Status::WrongVersion,
            Self::MessageTooShort => Status::MessageTooShort,
            Self::ServiceNotAvailable(_) => Status::ServiceNotAvailable,
            Self::SegmentRecoveryFailed { .. } => Status::SegmentRecoveryFailed,
            Self::PointerTooWide(_) | Self::Internal(_) => Status::InternalError,
        }
    }

    /// Whether a client observing this error should retry the operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TabletNotReady(_))
    }
}
