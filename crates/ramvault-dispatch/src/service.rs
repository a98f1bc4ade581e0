//! The service capability and registration table entry.

use crate::rpc::{RpcContext, ServerRpc};
use std::collections::VecDeque;
use std::sync::Arc;

/// Highest valid service type. The service table has `MAX_SERVICE + 1`
/// slots.
pub const MAX_SERVICE: u8 = 7;

/// A registered RPC service.
///
/// Handlers run on worker threads (or inline, for direct sessions) and
/// must write their complete reply into the RPC's reply buffer before
/// returning or before calling [`RpcContext::send_reply`].
pub trait Service: Send + Sync + 'static {
    fn handle_rpc(&self, rpc: &ServerRpc, ctx: &mut RpcContext<'_>);
}

/// Per-service dispatch bookkeeping, owned by the dispatch thread.
pub(crate) struct ServiceInfo {
    pub service: Arc<dyn Service>,
    /// Concurrency bound for this service. Defaults to 1: a
    /// single-threaded service whose handlers never race each other.
    pub max_threads: usize,
    /// RPCs currently executing or awaiting completion on a worker.
    pub requests_running: usize,
    /// Arrivals beyond the concurrency bound, served FIFO.
    pub waiting: VecDeque<ServerRpc>,
}

impl ServiceInfo {
    pub fn new(service: Arc<dyn Service>, max_threads: usize) -> Self {
        Self {
            service,
            max_threads,
            requests_running: 0,
            waiting: VecDeque::new(),
        }
    }
}
