//! The service manager: arrival and completion paths.

use crate::rpc::ServerRpc;
use crate::service::{Service, ServiceInfo, MAX_SERVICE};
use crate::worker::{state, worker_main, WorkerCore, WorkerInput};
use ramvault_common::wire::{self, RequestHeader};
use ramvault_common::{DispatchConfig, Status};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::warn;

/// Dispatch-thread-side view of one worker.
struct Worker {
    core: Arc<WorkerCore>,
    thread: Option<JoinHandle<()>>,
    /// The RPC whose reply has not been sent yet, if any.
    rpc: Option<ServerRpc>,
    /// Service the worker is currently bound to.
    service_type: u8,
}

/// Routes incoming RPCs to services and manages the worker pool.
///
/// Every method must be called from the same thread (the dispatch
/// thread); all routing state is owned by it. Worker threads communicate
/// back only through their per-worker state words.
pub struct ServiceManager {
    services: Vec<Option<ServiceInfo>>,
    busy_threads: Vec<Worker>,
    idle_threads: Vec<Worker>,
    service_count: usize,
    /// RPCs that arrived while no services were registered; consumed by
    /// [`ServiceManager::wait_for_rpc`]. Testing path.
    extra_rpcs: VecDeque<ServerRpc>,
    config: DispatchConfig,
}

/// Point-in-time counters about the worker pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub busy_workers: usize,
    pub idle_workers: usize,
    /// Workers currently parked after exhausting their poll budget.
    pub sleeping_workers: usize,
    /// Total wakes issued against sleeping workers.
    pub worker_wakes: u64,
}

impl ServiceManager {
    #[must_use]
    pub fn new(config: DispatchConfig) -> Self {
        let mut services = Vec::with_capacity(usize::from(MAX_SERVICE) + 1);
        services.resize_with(usize::from(MAX_SERVICE) + 1, || None);
        Self {
            services,
            busy_threads: Vec::new(),
            idle_threads: Vec::new(),
            service_count: 0,
            extra_rpcs: VecDeque::new(),
            config,
        }
    }

    /// Register a service. Incoming RPCs whose header names `service_type`
    /// are dispatched to it, at most `max_threads` concurrently.
    pub fn add_service(&mut self, service_type: u8, service: Arc<dyn Service>, max_threads: usize) {
        let slot = &mut self.services[usize::from(service_type)];
        assert!(
            slot.is_none(),
            "service type {service_type} registered twice"
        );
        *slot = Some(ServiceInfo::new(service, max_threads.max(1)));
        self.service_count += 1;
    }

    /// True when no RPC is executing or awaiting completion. When this
    /// returns true, all memory written by worker threads is visible to
    /// the caller.
    #[must_use]
    pub fn idle(&self) -> bool {
        self.busy_threads.is_empty()
    }

    /// Counters for introspection and tests.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        let mut stats = DispatchStats {
            busy_workers: self.busy_threads.len(),
            idle_workers: self.idle_threads.len(),
            ..DispatchStats::default()
        };
        for worker in self.busy_threads.iter().chain(&self.idle_threads) {
            if worker.core.state.load(Ordering::Acquire) == state::SLEEPING {
                stats.sleeping_workers += 1;
            }
            stats.worker_wakes += worker.core.sleep_wakes.load(Ordering::Relaxed);
        }
        stats
    }

    /// Arrival path: route a fully-formed request.
    pub fn handle_rpc(&mut self, rpc: ServerRpc) {
        let header = RequestHeader::parse(rpc.request());
        let service_slot = header.and_then(|h| {
            self.services
                .get(usize::from(h.service))
                .and_then(Option::as_ref)
                .map(|_| h.service)
        });

        let service_type = match service_slot {
            Some(ty) => ty,
            None => {
                if self.service_count == 0 {
                    // Special case for testing: park the RPC for
                    // wait_for_rpc.
                    self.extra_rpcs.push_back(rpc);
                    return;
                }
                let status = match header {
                    None => {
                        warn!(
                            length = rpc.request().len(),
                            "incoming RPC contains no header"
                        );
                        Status::MessageTooShort
                    }
                    Some(h) => {
                        warn!(service = h.service, "incoming RPC requested unavailable service");
                        Status::ServiceNotAvailable
                    }
                };
                wire::write_status(&mut rpc.reply_buf(), status);
                rpc.send_reply();
                return;
            }
        };

        let info = self.services[usize::from(service_type)]
            .as_mut()
            .unwrap_or_else(|| unreachable!("service slot checked above"));

        // Concurrency limit reached: queue for later.
        if info.requests_running >= info.max_threads {
            info.waiting.push_back(rpc);
            return;
        }
        info.requests_running += 1;
        let service = Arc::clone(&info.service);

        let mut worker = match self.idle_threads.pop() {
            Some(worker) => worker,
            None => self.spawn_worker(),
        };
        worker.service_type = service_type;
        worker.rpc = Some(rpc.clone());
        worker.core.handoff(WorkerInput::Rpc(rpc, service));
        self.busy_threads.push(worker);
    }

    /// Completion path: check every busy worker, send finished replies,
    /// hand out queued work and recycle idle workers. Runs on the
    /// dispatch thread's polling loop.
    pub fn poll(&mut self) {
        // Tail-to-head so a worker can be unlinked mid-loop without
        // disturbing the remaining iterations.
        for i in (0..self.busy_threads.len()).rev() {
            let worker_state = self.busy_threads[i].core.state.load(Ordering::Acquire);
            if worker_state == state::WORKING {
                continue;
            }

            // Post-processing or idle: either way, send any reply we have
            // not yet responded to.
            if let Some(rpc) = self.busy_threads[i].rpc.take() {
                rpc.send_reply();
            }

            if worker_state == state::POSTPROCESSING {
                // Handler still running after its reply; leave the worker
                // on the busy list.
                continue;
            }

            let service_type = usize::from(self.busy_threads[i].service_type);
            let next = self.services[service_type]
                .as_mut()
                .and_then(|info| info.waiting.pop_front());
            match next {
                Some(rpc) => {
                    let service = self.services[service_type]
                        .as_ref()
                        .map(|info| Arc::clone(&info.service))
                        .unwrap_or_else(|| unreachable!("worker bound to removed service"));
                    let worker = &mut self.busy_threads[i];
                    worker.rpc = Some(rpc.clone());
                    worker.core.handoff(WorkerInput::Rpc(rpc, service));
                }
                None => {
                    let worker = self.busy_threads.swap_remove(i);
                    if let Some(info) = self.services[service_type].as_mut() {
                        info.requests_running -= 1;
                    }
                    self.idle_threads.push(worker);
                }
            }
        }
    }

    /// Wait for an RPC to arrive while no services are registered. Test
    /// harness only.
    pub fn wait_for_rpc(&mut self, timeout: Duration) -> Option<ServerRpc> {
        let start = Instant::now();
        loop {
            if let Some(rpc) = self.extra_rpcs.pop_front() {
                return Some(rpc);
            }
            if start.elapsed() > timeout {
                return None;
            }
            self.poll();
            std::thread::yield_now();
        }
    }

    /// Poll until every outstanding RPC has completed.
    pub fn drain(&mut self) {
        while !self.idle() {
            self.poll();
            std::thread::yield_now();
        }
    }

    fn spawn_worker(&self) -> Worker {
        let core = WorkerCore::new();
        let thread_core = Arc::clone(&core);
        let poll_budget = Duration::from_micros(self.config.poll_micros);
        let thread = std::thread::Builder::new()
            .name("ramvault-worker".into())
            .spawn(move || worker_main(thread_core, poll_budget))
            .expect("failed to spawn worker thread");
        Worker {
            core,
            thread: Some(thread),
            rpc: None,
            service_type: 0,
        }
    }
}

impl Drop for ServiceManager {
    fn drop(&mut self) {
        self.drain();
        for mut worker in self.idle_threads.drain(..) {
            worker.core.handoff(WorkerInput::Exit);
            if let Some(thread) = worker.thread.take() {
                let _ = thread.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::RpcContext;
    use bytes::Bytes;
    use ramvault_common::wire::read_status;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    const ECHO_SERVICE: u8 = 0;

    struct EchoService;

    impl Service for EchoService {
        fn handle_rpc(&self, rpc: &ServerRpc, _ctx: &mut RpcContext<'_>) {
            let body = rpc.request()[wire::REQUEST_HEADER_LEN..].to_vec();
            let mut reply = rpc.reply_buf();
            reply.push(Status::Ok.as_u8());
            reply.extend_from_slice(&body);
        }
    }

    /// Blocks inside the handler until released, counting invocations.
    struct GateService {
        gate: Arc<std::sync::atomic::AtomicBool>,
        entered: Arc<AtomicUsize>,
    }

    impl Service for GateService {
        fn handle_rpc(&self, rpc: &ServerRpc, _ctx: &mut RpcContext<'_>) {
            self.entered.fetch_add(1, AtomicOrdering::SeqCst);
            while !self.gate.load(AtomicOrdering::SeqCst) {
                std::thread::yield_now();
            }
            wire::write_status(&mut rpc.reply_buf(), Status::Ok);
        }
    }

    fn request(service: u8, body: &[u8]) -> Bytes {
        let mut buf = Vec::new();
        RequestHeader::new(service, 0).encode(&mut buf);
        buf.extend_from_slice(body);
        Bytes::from(buf)
    }

    fn issue(manager: &mut ServiceManager, req: Bytes) -> crate::rpc::RpcHandle {
        let (rpc, handle) = ServerRpc::new(req);
        manager.handle_rpc(rpc);
        handle
    }

    fn complete(manager: &mut ServiceManager, handle: &crate::rpc::RpcHandle) -> Bytes {
        while !handle.is_done() {
            manager.poll();
            std::thread::yield_now();
        }
        handle.response().unwrap()
    }

    #[test]
    fn echo_round_trip() {
        let mut manager = ServiceManager::new(DispatchConfig::default());
        manager.add_service(ECHO_SERVICE, Arc::new(EchoService), 1);

        let handle = issue(&mut manager, request(ECHO_SERVICE, b"hello"));
        let reply = complete(&mut manager, &handle);
        assert_eq!(read_status(&reply), Some(Status::Ok));
        assert_eq!(&reply[1..], b"hello");
        manager.drain();
        assert!(manager.idle());
    }

    #[test]
    fn missing_header() {
        let mut manager = ServiceManager::new(DispatchConfig::default());
        manager.add_service(ECHO_SERVICE, Arc::new(EchoService), 1);

        let handle = issue(&mut manager, Bytes::from_static(b"\x00"));
        assert!(handle.is_done());
        assert_eq!(
            read_status(&handle.response().unwrap()),
            Some(Status::MessageTooShort)
        );
    }

    #[test]
    fn unknown_service() {
        let mut manager = ServiceManager::new(DispatchConfig::default());
        manager.add_service(ECHO_SERVICE, Arc::new(EchoService), 1);

        let handle = issue(&mut manager, request(5, b""));
        assert!(handle.is_done());
        assert_eq!(
            read_status(&handle.response().unwrap()),
            Some(Status::ServiceNotAvailable)
        );
    }

    #[test]
    fn concurrency_is_bounded_and_fifo() {
        let mut manager = ServiceManager::new(DispatchConfig::default());
        let gate = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let entered = Arc::new(AtomicUsize::new(0));
        manager.add_service(
            ECHO_SERVICE,
            Arc::new(GateService {
                gate: Arc::clone(&gate),
                entered: Arc::clone(&entered),
            }),
            1,
        );

        let first = issue(&mut manager, request(ECHO_SERVICE, b"1"));
        let second = issue(&mut manager, request(ECHO_SERVICE, b"2"));

        // Only one handler may enter a max_threads=1 service.
        while entered.load(AtomicOrdering::SeqCst) == 0 {
            std::thread::yield_now();
        }
        manager.poll();
        assert_eq!(entered.load(AtomicOrdering::SeqCst), 1);
        assert!(!first.is_done());
        assert!(!second.is_done());

        gate.store(true, AtomicOrdering::SeqCst);
        let _ = complete(&mut manager, &first);
        let _ = complete(&mut manager, &second);
        assert_eq!(entered.load(AtomicOrdering::SeqCst), 2);
        manager.drain();
    }

    #[test]
    fn worker_sleeps_then_wakes_for_next_rpc() {
        let mut manager = ServiceManager::new(DispatchConfig { poll_micros: 5_000 });
        manager.add_service(ECHO_SERVICE, Arc::new(EchoService), 1);

        let first = issue(&mut manager, request(ECHO_SERVICE, b"a"));
        let _ = complete(&mut manager, &first);
        manager.drain();
        assert_eq!(manager.stats().worker_wakes, 0);

        // Quiesce for much longer than the poll budget; the worker parks.
        while manager.stats().sleeping_workers == 0 {
            std::thread::sleep(Duration::from_millis(1));
        }

        let second = issue(&mut manager, request(ECHO_SERVICE, b"b"));
        let reply = complete(&mut manager, &second);
        assert_eq!(read_status(&reply), Some(Status::Ok));
        assert_eq!(manager.stats().worker_wakes, 1);
        manager.drain();
    }

    #[test]
    fn workers_are_recycled() {
        let mut manager = ServiceManager::new(DispatchConfig::default());
        manager.add_service(ECHO_SERVICE, Arc::new(EchoService), 1);

        for i in 0..4u8 {
            let handle = issue(&mut manager, request(ECHO_SERVICE, &[i]));
            let _ = complete(&mut manager, &handle);
            manager.drain();
        }
        let stats = manager.stats();
        assert_eq!(stats.busy_workers, 0);
        assert_eq!(stats.idle_workers, 1);
    }

    #[test]
    fn wait_for_rpc_parks_unroutable_rpcs() {
        let mut manager = ServiceManager::new(DispatchConfig::default());

        assert!(manager.wait_for_rpc(Duration::from_millis(10)).is_none());

        let (rpc, _handle) = ServerRpc::new(request(3, b"later"));
        manager.handle_rpc(rpc);
        let parked = manager.wait_for_rpc(Duration::from_millis(100)).unwrap();
        assert_eq!(&parked.request()[2..], b"later");
    }
}
