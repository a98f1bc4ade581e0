//! The recovery coordinator: fetch scheduling across backup replicas.
//!
//! A fixed number of fetch channels fan out over the replica list. Each
//! distinct segment is fetched at most once at a time; when a fetch
//! fails, the next replica of that segment becomes eligible again. A
//! successful fetch is replayed immediately (replays are serialized in
//! completion order; the version-dominance rules make the outcome
//! order-independent) and every other pending copy of that segment is
//! checked off without fetching.

use crate::backup::{BackupClient, FetchState, SegmentFetch};
use crate::replay;
use crate::service::MasterInner;
use ramvault_common::{Error, ReplicaStatus, Result, SegmentReplica, ServerId};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// One in-flight fetch.
struct Channel {
    replica_idx: usize,
    fetch: Box<dyn SegmentFetch>,
}

/// Whether a fetch for this segment is already outstanding or done.
fn segment_busy(replicas: &[SegmentReplica], segment_id: u64) -> bool {
    replicas.iter().any(|r| {
        r.segment_id == segment_id
            && matches!(r.status, ReplicaStatus::InFlight | ReplicaStatus::Ok)
    })
}

/// Start a fetch for the first eligible replica entry, walking the list
/// left to right. An entry is eligible while it is still `Pending` and no
/// other copy of its segment is in flight or recovered. A backup that
/// cannot be contacted fails the entry synchronously and the scan moves
/// on within the same call.
fn start_next(
    backups: &dyn BackupClient,
    crashed_master: ServerId,
    partition_id: u64,
    replicas: &mut [SegmentReplica],
    channel: usize,
    round: &str,
) -> Option<Channel> {
    loop {
        let idx = (0..replicas.len()).find(|&i| {
            replicas[i].status == ReplicaStatus::Pending
                && !segment_busy(replicas, replicas[i].segment_id)
        })?;
        let segment_id = replicas[idx].segment_id;
        let locator = replicas[idx].backup_locator.clone();
        match backups.get_recovery_data(&locator, crashed_master, segment_id, partition_id) {
            Ok(fetch) => {
                info!(
                    %locator,
                    segment_id, channel, round, "starting getRecoveryData"
                );
                replicas[idx].status = ReplicaStatus::InFlight;
                return Some(Channel {
                    replica_idx: idx,
                    fetch,
                });
            }
            Err(err) => {
                warn!(%locator, segment_id, %err, "couldn't contact backup, trying next replica");
                replicas[idx].status = ReplicaStatus::Failed;
            }
        }
    }
}

/// Run the fetch/replay loop until no channel is busy and no candidate
/// remains, then check that every distinct segment was recovered.
pub(crate) fn recover_partition(
    inner: &mut MasterInner,
    backups: &dyn BackupClient,
    crashed_master: ServerId,
    partition_id: u64,
    replicas: &mut [SegmentReplica],
) -> Result<()> {
    let parallelism = inner.config.recovery_channels.max(1);
    let mut channels: Vec<Option<Channel>> = Vec::with_capacity(parallelism);

    // Initial fan-out.
    for channel in 0..parallelism {
        let started = start_next(
            backups,
            crashed_master,
            partition_id,
            replicas,
            channel,
            "initial round of RPCs",
        );
        channels.push(started);
    }

    // Completion loop.
    while channels.iter().any(Option::is_some) {
        let mut progressed = false;
        for channel_idx in 0..parallelism {
            let Some(channel) = channels[channel_idx].as_mut() else {
                continue;
            };
            let replica_idx = channel.replica_idx;
            match channel.fetch.poll() {
                FetchState::InFlight => {}
                FetchState::Done(data) => {
                    let segment_id = replicas[replica_idx].segment_id;
                    debug!(
                        segment_id,
                        len = data.len(),
                        locator = %replicas[replica_idx].backup_locator,
                        "recovery data arrived"
                    );
                    replay::recover_segment(inner, segment_id, &data)?;
                    replicas[replica_idx].status = ReplicaStatus::Ok;
                    // Transitive success: no other copy of this segment
                    // needs fetching.
                    for other in replicas.iter_mut() {
                        if other.segment_id == segment_id
                            && other.status == ReplicaStatus::Pending
                        {
                            debug!(
                                locator = %other.backup_locator,
                                segment_id, "checking replica off the list"
                            );
                            other.status = ReplicaStatus::Ok;
                        }
                    }
                    channels[channel_idx] = start_next(
                        backups,
                        crashed_master,
                        partition_id,
                        replicas,
                        channel_idx,
                        "after RPC completion",
                    );
                    progressed = true;
                }
                FetchState::Failed(err) => {
                    warn!(
                        locator = %replicas[replica_idx].backup_locator,
                        segment_id = replicas[replica_idx].segment_id,
                        error = %err,
                        "getRecoveryData failed, trying next backup"
                    );
                    replicas[replica_idx].status = ReplicaStatus::Failed;
                    channels[channel_idx] = start_next(
                        backups,
                        crashed_master,
                        partition_id,
                        replicas,
                        channel_idx,
                        "after RPC completion",
                    );
                    progressed = true;
                }
            }
        }
        if !progressed {
            std::thread::yield_now();
        }
    }

    detect_segment_recovery_failure(replicas)
}

/// Verify that every distinct segment id in the replica list was
/// recovered through at least one copy.
pub fn detect_segment_recovery_failure(replicas: &[SegmentReplica]) -> Result<()> {
    let distinct: HashSet<u64> = replicas.iter().map(|r| r.segment_id).collect();
    let recovered: HashSet<u64> = replicas
        .iter()
        .filter(|r| r.status == ReplicaStatus::Ok)
        .map(|r| r.segment_id)
        .collect();
    let missing = distinct.difference(&recovered).count();
    if missing > 0 {
        return Err(Error::SegmentRecoveryFailed { missing });
    }
    Ok(())
}
