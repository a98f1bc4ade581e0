//! Shared types for the ramvault master node.
//!
//! Everything that more than one crate needs to agree on lives here:
//! identifier types, the log-pointer/key seam between the hash index and
//! the log, the wire status taxonomy, configuration, and the process-wide
//! performance counters.

pub mod config;
pub mod error;
pub mod perf;
pub mod telemetry;
pub mod types;
pub mod wire;

pub use config::{Config, DispatchConfig, MasterConfig};
pub use error::{Error, Result, Status};
pub use types::{
    KeySource, LogPtr, ObjectId, RejectRules, ReplicaStatus, SegmentId, SegmentReplica, ServerId,
    TableId, Tablet, TabletState, Version, VERSION_NONEXISTENT,
};
