//! Seams to the backup storage layer and the coordinator.
//!
//! The master never talks wire protocols directly; it drives these
//! capabilities. Production wires them to real transports, tests bind the
//! in-memory implementations from [`crate::testing`].

use bytes::Bytes;
use ramvault_common::{Result, SegmentId, ServerId, Tablet};

/// What kind of server is enlisting with the coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServerKind {
    Master,
    Backup,
}

/// Cluster-membership operations the master needs from the coordinator.
pub trait CoordinatorClient: Send + Sync {
    /// Register a server and obtain its cluster-wide id.
    fn enlist_server(&self, kind: ServerKind, locator: &str) -> ServerId;

    /// Report that this master now serves the given tablets after a
    /// completed recovery.
    fn tablets_recovered(&self, server_id: ServerId, tablets: &[Tablet]);
}

/// Progress of one outstanding segment fetch.
#[derive(Clone, Debug)]
pub enum FetchState {
    /// Still outstanding; poll again later.
    InFlight,
    /// The replica's segment data arrived.
    Done(Bytes),
    /// The fetch failed after it was started.
    Failed(String),
}

/// A non-blocking handle to one `get_recovery_data` call. Completion is
/// observed by polling from the recovery loop; there is no mid-fetch
/// cancel.
pub trait SegmentFetch: Send {
    fn poll(&mut self) -> FetchState;
}

/// What a backup reports after loading a crashed master's replicas.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StartReadingDataResult {
    /// Ids of the segment replicas this backup holds, primaries first.
    pub segment_ids: Vec<SegmentId>,
    /// How many leading entries of `segment_ids` are primary replicas.
    /// Whoever builds a recovery's replica list puts primaries ahead of
    /// secondaries, so the left-to-right fan-out reaches them first.
    pub primary_count: usize,
}

impl StartReadingDataResult {
    /// Whether the replica of `segment_id` on this backup is a primary.
    #[must_use]
    pub fn is_primary(&self, segment_id: SegmentId) -> bool {
        self.segment_ids[..self.primary_count].contains(&segment_id)
    }
}

/// Backup-side operations consumed by recovery.
pub trait BackupClient: Send + Sync {
    /// Ask a backup to load the replicas it stores for a crashed master
    /// and report their segment ids, primaries first.
    fn start_reading_data(
        &self,
        locator: &str,
        crashed_master: ServerId,
        tablets: &[Tablet],
    ) -> Result<StartReadingDataResult>;

    /// Start fetching the recovery data of one segment, filtered to one
    /// partition. An unreachable locator fails synchronously; failures
    /// after a successful start surface through the returned handle.
    fn get_recovery_data(
        &self,
        locator: &str,
        crashed_master: ServerId,
        segment_id: SegmentId,
        partition_id: u64,
    ) -> Result<Box<dyn SegmentFetch>>;
}
