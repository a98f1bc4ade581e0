//! In-memory backends for tests.
//!
//! Stands in for the real transport, backup storage and coordinator: a
//! segment store keyed by service locator, a coordinator that records
//! what it is told, and sessions that route client requests either
//! straight into the service or through a dispatch loop.

use crate::backup::{
    BackupClient, CoordinatorClient, FetchState, SegmentFetch, ServerKind, StartReadingDataResult,
};
use crate::client::{DirectSession, MasterClient, Session};
use crate::service::{MasterService, MASTER_SERVICE};
use bytes::Bytes;
use parking_lot::Mutex;
use ramvault_common::{
    Error, MasterConfig, Result, SegmentId, SegmentReplica, ServerId, Tablet,
};
use ramvault_dispatch::{ServerRpc, ServiceManager};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Default)]
struct BackupState {
    segments: HashMap<(ServerId, SegmentId), Bytes>,
    /// Segments this backup holds as the primary replica.
    primary_segments: HashSet<SegmentId>,
    /// Fetches that start successfully and then fail.
    failing_segments: HashSet<SegmentId>,
}

#[derive(Default)]
struct ClusterState {
    backups: HashMap<String, BackupState>,
    fetch_delay_polls: u32,
}

/// A set of in-memory backups addressed by service locator. Locators that
/// were never added behave as unreachable: fetches against them fail to
/// start.
#[derive(Default)]
pub struct InMemoryBackupCluster {
    state: Mutex<ClusterState>,
}

impl InMemoryBackupCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_backup(&self, locator: impl Into<String>) {
        self.state
            .lock()
            .backups
            .entry(locator.into())
            .or_default();
    }

    /// Store one segment replica on a backup.
    pub fn store_segment(
        &self,
        locator: &str,
        crashed_master: ServerId,
        segment_id: SegmentId,
        data: Bytes,
    ) {
        self.state
            .lock()
            .backups
            .entry(locator.to_string())
            .or_default()
            .segments
            .insert((crashed_master, segment_id), data);
    }

    /// Flag one stored replica as this backup's primary copy.
    pub fn mark_primary(&self, locator: &str, segment_id: SegmentId) {
        self.state
            .lock()
            .backups
            .entry(locator.to_string())
            .or_default()
            .primary_segments
            .insert(segment_id);
    }

    /// Make fetches of one segment from one backup start and then fail.
    pub fn fail_fetches(&self, locator: &str, segment_id: SegmentId) {
        self.state
            .lock()
            .backups
            .entry(locator.to_string())
            .or_default()
            .failing_segments
            .insert(segment_id);
    }

    /// Delay every fetch by a number of polls before it completes.
    pub fn set_fetch_delay(&self, polls: u32) {
        self.state.lock().fetch_delay_polls = polls;
    }
}

struct InMemoryFetch {
    remaining_polls: u32,
    outcome: Option<std::result::Result<Bytes, String>>,
}

impl SegmentFetch for InMemoryFetch {
    fn poll(&mut self) -> FetchState {
        if self.remaining_polls > 0 {
            self.remaining_polls -= 1;
            return FetchState::InFlight;
        }
        match self.outcome.take() {
            Some(Ok(data)) => FetchState::Done(data),
            Some(Err(err)) => FetchState::Failed(err),
            None => FetchState::Failed("fetch polled after completion".into()),
        }
    }
}

impl BackupClient for InMemoryBackupCluster {
    fn start_reading_data(
        &self,
        locator: &str,
        crashed_master: ServerId,
        _tablets: &[Tablet],
    ) -> Result<StartReadingDataResult> {
        let state = self.state.lock();
        let backup = state.backups.get(locator).ok_or_else(|| {
            Error::internal(format!("no transport found for service locator {locator}"))
        })?;
        let mut segment_ids = Vec::new();
        let mut secondaries = Vec::new();
        for &(master, segment_id) in backup.segments.keys() {
            if master != crashed_master {
                continue;
            }
            if backup.primary_segments.contains(&segment_id) {
                segment_ids.push(segment_id);
            } else {
                secondaries.push(segment_id);
            }
        }
        segment_ids.sort_unstable();
        secondaries.sort_unstable();
        let primary_count = segment_ids.len();
        segment_ids.extend(secondaries);
        Ok(StartReadingDataResult {
            segment_ids,
            primary_count,
        })
    }

    fn get_recovery_data(
        &self,
        locator: &str,
        crashed_master: ServerId,
        segment_id: SegmentId,
        _partition_id: u64,
    ) -> Result<Box<dyn SegmentFetch>> {
        let state = self.state.lock();
        let backup = state.backups.get(locator).ok_or_else(|| {
            Error::internal(format!("no transport found for service locator {locator}"))
        })?;
        let outcome = if backup.failing_segments.contains(&segment_id) {
            Err("injected backup failure".to_string())
        } else {
            match backup.segments.get(&(crashed_master, segment_id)) {
                Some(data) => Ok(data.clone()),
                None => Err("bad segment id".to_string()),
            }
        };
        Ok(Box::new(InMemoryFetch {
            remaining_polls: state.fetch_delay_polls,
            outcome: Some(outcome),
        }))
    }
}

#[derive(Default)]
struct CoordinatorState {
    next_server_id: ServerId,
    enlisted: Vec<(ServerKind, String, ServerId)>,
    recovered: Vec<(ServerId, Vec<Tablet>)>,
}

/// Coordinator stub that hands out server ids and records notifications.
#[derive(Default)]
pub struct RecordingCoordinator {
    state: Mutex<CoordinatorState>,
}

impl RecordingCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `tablets_recovered` call seen so far.
    #[must_use]
    pub fn recovered(&self) -> Vec<(ServerId, Vec<Tablet>)> {
        self.state.lock().recovered.clone()
    }

    #[must_use]
    pub fn enlisted(&self) -> Vec<(ServerKind, String, ServerId)> {
        self.state.lock().enlisted.clone()
    }
}

impl CoordinatorClient for RecordingCoordinator {
    fn enlist_server(&self, kind: ServerKind, locator: &str) -> ServerId {
        let mut state = self.state.lock();
        state.next_server_id += 1;
        let server_id = state.next_server_id;
        state.enlisted.push((kind, locator.to_string(), server_id));
        server_id
    }

    fn tablets_recovered(&self, server_id: ServerId, tablets: &[Tablet]) {
        self.state
            .lock()
            .recovered
            .push((server_id, tablets.to_vec()));
    }
}

/// Routes requests through a real dispatch loop and worker pool. The
/// caller's thread plays the dispatch thread.
pub struct ManagerSession {
    manager: RefCell<ServiceManager>,
}

impl ManagerSession {
    #[must_use]
    pub fn new(manager: ServiceManager) -> Self {
        Self {
            manager: RefCell::new(manager),
        }
    }
}

impl Session for ManagerSession {
    fn send(&self, request: Bytes) -> Bytes {
        let mut manager = self.manager.borrow_mut();
        let (rpc, handle) = ServerRpc::new(request);
        manager.handle_rpc(rpc);
        while !handle.is_done() {
            manager.poll();
            std::thread::yield_now();
        }
        handle.response().unwrap_or_default()
    }
}

/// A master wired to in-memory backends, with one tablet covering all of
/// table 0 so tests can write immediately.
pub struct TestCluster {
    pub coordinator: Arc<RecordingCoordinator>,
    pub backups: Arc<InMemoryBackupCluster>,
    pub master: Arc<MasterService>,
}

impl TestCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MasterConfig::test_scale())
    }

    #[must_use]
    pub fn with_config(config: MasterConfig) -> Self {
        let coordinator = Arc::new(RecordingCoordinator::new());
        let backups = Arc::new(InMemoryBackupCluster::new());
        let master = Arc::new(MasterService::new(
            config,
            "mock:host=master",
            Arc::clone(&coordinator) as Arc<dyn CoordinatorClient>,
            Arc::clone(&backups) as Arc<dyn BackupClient>,
        ));
        master.set_tablets(vec![Tablet::new(0, 0, u64::MAX)]);
        Self {
            coordinator,
            backups,
            master,
        }
    }

    /// A client calling the service directly.
    #[must_use]
    pub fn client(&self) -> MasterClient<DirectSession> {
        MasterClient::new(DirectSession::new(Arc::clone(&self.master)))
    }

    /// A client going through a dispatch loop with the master registered
    /// as a single-threaded service.
    #[must_use]
    pub fn dispatched_client(
        &self,
        config: ramvault_common::DispatchConfig,
    ) -> MasterClient<ManagerSession> {
        let mut manager = ServiceManager::new(config);
        let service: Arc<dyn ramvault_dispatch::Service> = self.master.clone();
        manager.add_service(MASTER_SERVICE, service, 1);
        MasterClient::new(ManagerSession::new(manager))
    }
}

impl Default for TestCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience for building replica lists in tests.
#[must_use]
pub fn replica_list(entries: &[(&str, SegmentId)]) -> Vec<SegmentReplica> {
    entries
        .iter()
        .map(|&(locator, segment_id)| SegmentReplica::new(locator, segment_id))
        .collect()
}
