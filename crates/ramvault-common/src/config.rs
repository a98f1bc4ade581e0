//! Configuration types for the master node.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage-side configuration (log, index, recovery).
    pub master: MasterConfig,
    /// Service dispatch configuration.
    pub dispatch: DispatchConfig,
}

/// Configuration of the master's storage and recovery machinery.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Capacity of the in-memory log in bytes.
    pub log_bytes: usize,
    /// Hash index capacity in entries; rounded to a power-of-two bucket
    /// count at construction.
    pub hash_capacity: usize,
    /// Size of one log segment as stored on backups.
    pub segment_bytes: usize,
    /// Number of concurrent segment fetches during recovery.
    pub recovery_channels: usize,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            log_bytes: 64 * 1024 * 1024,
            hash_capacity: 1024 * 1024,
            segment_bytes: 64 * 1024,
            recovery_channels: 4,
        }
    }
}

impl MasterConfig {
    /// Small sizing used by tests, mirroring production defaults at a
    /// fraction of the memory.
    #[must_use]
    pub fn test_scale() -> Self {
        Self {
            log_bytes: 1024 * 1024,
            hash_capacity: 1024,
            segment_bytes: 64 * 1024,
            recovery_channels: 4,
        }
    }
}

/// Configuration of the dispatch loop and worker pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// How long a worker actively polls for new work before it puts itself
    /// to sleep. Should be much longer than a typical RPC round trip so a
    /// worker does not sleep mid-conversation with a single client.
    pub poll_micros: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { poll_micros: 100 }
    }
}
