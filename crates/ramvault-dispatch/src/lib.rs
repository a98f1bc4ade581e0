//! Service dispatch core.
//!
//! A single dispatch thread owns all routing state: the service table,
//! the busy and idle worker collections, and the per-service waiting
//! queues. Worker threads execute one RPC at a time and communicate with
//! the dispatcher through a per-worker state word and handoff slot; a
//! worker that stays idle past its poll budget parks itself and is woken
//! on the next handoff.

mod manager;
mod rpc;
mod service;
mod worker;

pub use manager::{DispatchStats, ServiceManager};
pub use rpc::{RpcContext, RpcHandle, ServerRpc};
pub use service::{Service, MAX_SERVICE};
