//! Process-wide performance counters.
//!
//! Each thread owns a `PerfStats` block and increments it without
//! synchronization beyond the relaxed atomics themselves; only
//! registration of a new block takes the process-wide lock. `collect`
//! sums every registered block into a snapshot.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

static REGISTRY: Mutex<Vec<Arc<PerfStats>>> = Mutex::new(Vec::new());

thread_local! {
    static THREAD_STATS: Arc<PerfStats> = PerfStats::register();
}

/// Per-thread operation counters.
#[derive(Debug, Default)]
pub struct PerfStats {
    /// Objects read by client operations.
    pub read_count: AtomicU64,
    /// Objects written (create and write paths).
    pub write_count: AtomicU64,
    /// Objects removed.
    pub remove_count: AtomicU64,
    /// Nanoseconds worker threads spent executing service handlers.
    pub worker_active_ns: AtomicU64,
}

impl PerfStats {
    fn register() -> Arc<Self> {
        let stats = Arc::new(Self::default());
        REGISTRY.lock().push(Arc::clone(&stats));
        stats
    }

    /// The calling thread's counter block.
    #[must_use]
    pub fn thread() -> Arc<Self> {
        THREAD_STATS.with(Arc::clone)
    }

    #[inline]
    pub fn add_read(&self) {
        self.read_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_write(&self) {
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_remove(&self) {
        self.remove_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_worker_active(&self, ns: u64) {
        self.worker_active_ns.fetch_add(ns, Ordering::Relaxed);
    }

    /// Aggregate every registered block.
    #[must_use]
    pub fn collect() -> PerfSnapshot {
        let registry = REGISTRY.lock();
        let mut total = PerfSnapshot {
            read_count: 0,
            write_count: 0,
            remove_count: 0,
            worker_active_ns: 0,
            collected_at: Instant::now(),
        };
        for stats in registry.iter() {
            total.read_count += stats.read_count.load(Ordering::Relaxed);
            total.write_count += stats.write_count.load(Ordering::Relaxed);
            total.remove_count += stats.remove_count.load(Ordering::Relaxed);
            total.worker_active_ns += stats.worker_active_ns.load(Ordering::Relaxed);
        }
        total
    }
}

/// Sum of all registered counter blocks at one point in time.
#[derive(Clone, Copy, Debug)]
pub struct PerfSnapshot {
    pub read_count: u64,
    pub write_count: u64,
    pub remove_count: u64,
    pub worker_active_ns: u64,
    pub collected_at: Instant,
}
