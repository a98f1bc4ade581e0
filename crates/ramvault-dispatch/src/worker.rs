//! Worker threads and the handoff/wake protocol.

use crate::rpc::{RpcContext, ServerRpc};
use crate::service::Service;
use parking_lot::{Condvar, Mutex};
use ramvault_common::perf::PerfStats;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Worker states. The state word is read by one thread and written by
/// two: the dispatch thread moves a worker into `WORKING`, the worker
/// itself moves out of it.
pub(crate) mod state {
    /// Spinning, waiting for a handoff.
    pub const POLLING: u32 = 0;
    /// Executing a service handler.
    pub const WORKING: u32 = 1;
    /// Reply is complete but the handler is still running.
    pub const POSTPROCESSING: u32 = 2;
    /// Parked after exhausting the poll budget.
    pub const SLEEPING: u32 = 3;
}

/// What the dispatcher hands to a worker.
pub(crate) enum WorkerInput {
    Rpc(ServerRpc, Arc<dyn Service>),
    /// Sentinel telling the worker thread to exit cleanly.
    Exit,
}

/// State shared between a worker thread and the dispatch thread.
pub(crate) struct WorkerCore {
    pub state: AtomicU32,
    pub slot: Mutex<Option<WorkerInput>>,
    sleep_lock: Mutex<()>,
    wakeup: Condvar,
    /// Wakes issued against workers that had gone to sleep.
    pub sleep_wakes: AtomicU64,
}

impl WorkerCore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU32::new(state::POLLING),
            slot: Mutex::new(None),
            sleep_lock: Mutex::new(()),
            wakeup: Condvar::new(),
            sleep_wakes: AtomicU64::new(0),
        })
    }

    /// Hand work to this worker. Only the dispatch thread calls this, and
    /// only while the worker is idle (its slot is empty).
    pub fn handoff(&self, input: WorkerInput) {
        {
            let mut slot = self.slot.lock();
            debug_assert!(slot.is_none(), "handoff to a worker with occupied slot");
            *slot = Some(input);
        }
        let prev = self.state.swap(state::WORKING, Ordering::AcqRel);
        if prev == state::SLEEPING {
            // The worker got tired of polling and parked itself; wake it.
            // Taking the sleep lock orders this wake after the worker's
            // own state re-check, so the wake cannot be lost.
            let _guard = self.sleep_lock.lock();
            self.wakeup.notify_one();
            self.sleep_wakes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Park until the state word leaves `SLEEPING`.
    ///
    /// The transition into `SLEEPING` races with a concurrent handoff, so
    /// it uses a compare-exchange from `POLLING`; losing the race means
    /// work already arrived. A wake that finds the state already changed
    /// is benign: the wait loop re-checks before blocking.
    fn sleep(&self) {
        if self
            .state
            .compare_exchange(
                state::POLLING,
                state::SLEEPING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            let mut guard = self.sleep_lock.lock();
            while self.state.load(Ordering::Acquire) == state::SLEEPING {
                self.wakeup.wait(&mut guard);
            }
        }
    }
}

/// Top-level worker thread loop: wait for a handoff, execute it, report
/// completion by returning to `POLLING`.
pub(crate) fn worker_main(core: Arc<WorkerCore>, poll_budget: Duration) {
    loop {
        let stop_polling = Instant::now() + poll_budget;
        while core.state.load(Ordering::Acquire) != state::WORKING {
            if Instant::now() >= stop_polling {
                core.sleep();
            } else {
                std::hint::spin_loop();
            }
        }

        let input = core.slot.lock().take();
        match input {
            Some(WorkerInput::Rpc(rpc, service)) => {
                let started = Instant::now();
                let mut ctx = RpcContext::for_worker(&core.state);
                service.handle_rpc(&rpc, &mut ctx);
                PerfStats::thread().add_worker_active(started.elapsed().as_nanos() as u64);
            }
            Some(WorkerInput::Exit) | None => {
                debug!("worker exiting");
                break;
            }
        }

        // Pass the RPC back to the dispatcher for completion.
        core.state.store(state::POLLING, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    struct Echo;

    impl Service for Echo {
        fn handle_rpc(&self, rpc: &ServerRpc, _ctx: &mut RpcContext<'_>) {
            let request = rpc.request().to_vec();
            rpc.reply_buf().extend_from_slice(&request);
        }
    }

    #[test]
    fn handoff_wakes_a_sleeping_worker() {
        let core = WorkerCore::new();
        let thread_core = Arc::clone(&core);
        let handle =
            std::thread::spawn(move || worker_main(thread_core, Duration::from_micros(100)));

        // Let the worker exhaust its poll budget and park.
        while core.state.load(Ordering::Acquire) != state::SLEEPING {
            std::thread::yield_now();
        }

        let (rpc, reply) = ServerRpc::new(Bytes::from_static(b"hi"));
        core.handoff(WorkerInput::Rpc(rpc.clone(), Arc::new(Echo)));

        while core.state.load(Ordering::Acquire) != state::POLLING {
            std::thread::yield_now();
        }
        assert_eq!(core.sleep_wakes.load(Ordering::Relaxed), 1);
        rpc.send_reply();
        assert_eq!(reply.response().unwrap(), Bytes::from_static(b"hi"));

        core.handoff(WorkerInput::Exit);
        handle.join().unwrap();
    }

    #[test]
    fn handoff_during_poll_needs_no_wake() {
        let core = WorkerCore::new();
        let thread_core = Arc::clone(&core);
        let handle =
            std::thread::spawn(move || worker_main(thread_core, Duration::from_secs(5)));

        let (rpc, _reply) = ServerRpc::new(Bytes::from_static(b"fast"));
        core.handoff(WorkerInput::Rpc(rpc, Arc::new(Echo)));

        while core.state.load(Ordering::Acquire) != state::POLLING {
            std::thread::yield_now();
        }
        assert_eq!(core.sleep_wakes.load(Ordering::Relaxed), 0);

        core.handoff(WorkerInput::Exit);
        handle.join().unwrap();
    }
}
