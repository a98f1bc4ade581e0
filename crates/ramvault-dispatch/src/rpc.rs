//! Server-side RPC objects.

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::worker::state;

struct RpcInner {
    request: Bytes,
    reply: Mutex<Vec<u8>>,
    sent: AtomicBool,
    response: Mutex<Option<Bytes>>,
}

/// An incoming RPC as seen by the dispatcher and the service handler.
///
/// Cheaply cloneable; the dispatcher keeps one clone per outstanding RPC
/// so it can send the reply from the dispatch thread once the worker is
/// done with the request.
#[derive(Clone)]
pub struct ServerRpc {
    inner: Arc<RpcInner>,
}

impl ServerRpc {
    /// Create an RPC from a fully-formed request. The returned handle is
    /// what the issuer polls for the reply.
    #[must_use]
    pub fn new(request: Bytes) -> (Self, RpcHandle) {
        let inner = Arc::new(RpcInner {
            request,
            reply: Mutex::new(Vec::new()),
            sent: AtomicBool::new(false),
            response: Mutex::new(None),
        });
        (
            Self {
                inner: Arc::clone(&inner),
            },
            RpcHandle { inner },
        )
    }

    /// The request payload, including the common header.
    #[must_use]
    pub fn request(&self) -> &[u8] {
        &self.inner.request
    }

    /// The reply buffer. Handlers must fully populate the reply before
    /// returning (or before signalling an early reply).
    #[must_use]
    pub fn reply_buf(&self) -> MutexGuard<'_, Vec<u8>> {
        self.inner.reply.lock()
    }

    /// Publish the reply to the issuer. Idempotent; only the first call
    /// sends. Invoked from the dispatch thread.
    pub fn send_reply(&self) {
        if self.inner.sent.swap(true, Ordering::AcqRel) {
            return;
        }
        let reply = std::mem::take(&mut *self.inner.reply.lock());
        *self.inner.response.lock() = Some(Bytes::from(reply));
    }

    /// Whether the reply has been sent.
    #[must_use]
    pub fn replied(&self) -> bool {
        self.inner.sent.load(Ordering::Acquire)
    }
}

/// Issuer-side handle to an in-flight RPC.
pub struct RpcHandle {
    inner: Arc<RpcInner>,
}

impl RpcHandle {
    /// Whether the reply has arrived.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.inner.sent.load(Ordering::Acquire) && self.inner.response.lock().is_some()
    }

    /// Take the reply, if it has arrived.
    #[must_use]
    pub fn response(&self) -> Option<Bytes> {
        self.inner.response.lock().clone()
    }
}

/// Execution context handed to a service handler.
///
/// On a worker thread it carries the worker's state word so the handler
/// can signal that its reply is complete while it keeps running
/// (post-processing). Outside the worker pool (tests, direct sessions)
/// the signal is a no-op.
pub struct RpcContext<'a> {
    worker_state: Option<&'a AtomicU32>,
}

impl<'a> RpcContext<'a> {
    /// Context for a handler invoked outside the worker pool.
    #[must_use]
    pub fn direct() -> RpcContext<'static> {
        RpcContext { worker_state: None }
    }

    pub(crate) fn for_worker(worker_state: &'a AtomicU32) -> Self {
        Self {
            worker_state: Some(worker_state),
        }
    }

    /// Signal that the reply is fully written and may be sent while the
    /// handler continues running.
    pub fn send_reply(&mut self) {
        if let Some(word) = self.worker_state {
            word.store(state::POSTPROCESSING, Ordering::Release);
        }
    }
}
