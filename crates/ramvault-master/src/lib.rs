//! The master node of the key-value store.
//!
//! Ties the hash index and the log together behind the client operations,
//! and rebuilds a crashed master's partition by streaming segments back
//! from backup replicas.

mod backup;
mod client;
mod recovery;
mod replay;
mod service;
mod table;
mod tablets;
pub mod testing;
mod wire;

pub use backup::{
    BackupClient, CoordinatorClient, FetchState, SegmentFetch, ServerKind, StartReadingDataResult,
};
pub use client::{ClientResult, DirectSession, MasterClient, MultiReadResult, RpcFailure, Session};
pub use recovery::detect_segment_recovery_failure;
pub use service::{reject_operation, MasterService, MASTER_SERVICE};
pub use wire::Opcode;

use ramvault_common::Error;
use ramvault_index::IndexError;
use ramvault_log::LogError;

/// Index failures surface as fatal invariant violations.
fn index_err(err: IndexError) -> Error {
    match err {
        IndexError::PointerTooWide(ptr) => Error::PointerTooWide(ptr),
        IndexError::NotPresent => Error::internal("index replace on an absent key"),
    }
}

/// Log failures are internal to the master.
fn log_err(err: LogError) -> Error {
    Error::internal(err.to_string())
}
