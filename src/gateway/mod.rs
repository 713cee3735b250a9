//! Limiter gateway — the sole owner of the kernel classifier handle.
//!
//! Public contract: `load`, `attach`, `limit`, `unlimit`, `close`, matching
//! `spec.md` §4.1. All mutation is serialized through `service::run`'s
//! single task; this module is just the handle callers hold and the
//! request/reply plumbing into that task.
//!
//! The service task does not drain in-flight requests on close (`spec.md`
//! §9 Open Question 2): both the service loop and every `submit` also race
//! a `watch` "closed" signal, so a submit that's waiting for a reply when
//! `close()` runs returns `GatewayError::Closed` immediately instead of
//! hanging forever.

mod classifier;
mod service;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::binding::CgroupId;
use crate::cache::TrafficLimitInfo;
use service::{Op, Request};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GatewayError {
    #[error("classifier already loaded")]
    AlreadyLoaded,
    #[error("kernel denied request: errno {0}")]
    KernelDenied(i32),
    #[error("cgroup-id map is full")]
    MapFull,
    #[error("invalid cgroup id")]
    InvalidCgroup,
    #[error("gateway closed")]
    Closed,
}

/// Handle to the running gateway. Cheap to clone; every clone shares the
/// same single-writer service task.
#[derive(Clone)]
pub struct Gateway {
    tx: mpsc::Sender<Request>,
    closed: watch::Receiver<bool>,
}

pub struct GatewayHandle {
    pub gateway: Gateway,
    closed_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Gateway {
    /// One-shot load of the classifier program and start of the
    /// serialization task. `max_tasks` should already be the inflated hint
    /// from `DaemonConfig::max_tasks_hint`.
    pub fn load(max_tasks: u32) -> Result<GatewayHandle, GatewayError> {
        service::load(max_tasks)?;

        let (tx, rx) = mpsc::channel(32);
        let (closed_tx, closed_rx) = watch::channel(false);
        let task = tokio::spawn(service::run(rx, closed_rx.clone()));

        Ok(GatewayHandle {
            gateway: Gateway { tx, closed: closed_rx },
            closed_tx,
            task,
        })
    }

    /// Attach the loaded program to every named interface. All-or-nothing:
    /// the caller should treat any `Err` here as fatal and exit, since
    /// partial attachment leaves kernel state undefined.
    pub fn attach(&self, interfaces: &[String]) -> Result<(), GatewayError> {
        for name in interfaces {
            service::attach_one(name)?;
        }
        Ok(())
    }

    async fn submit(&self, op: Op) -> Result<(), GatewayError> {
        if *self.closed.borrow() {
            return Err(GatewayError::Closed);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let mut closed = self.closed.clone();
        tokio::select! {
            sent = self.tx.send(Request { op, reply: reply_tx }) => {
                sent.map_err(|_| GatewayError::Closed)?;
            }
            _ = closed.changed() => return Err(GatewayError::Closed),
        }

        let mut closed = self.closed.clone();
        tokio::select! {
            result = reply_rx => result.map_err(|_| GatewayError::Closed)?,
            _ = closed.changed() => Err(GatewayError::Closed),
        }
    }

    /// Install/replace a rate limit for `cgroup_id`. A no-op success if
    /// both fields of `info` are zero.
    pub async fn limit(&self, cgroup_id: CgroupId, info: TrafficLimitInfo) -> Result<(), GatewayError> {
        self.submit(Op::Limit(cgroup_id, info)).await
    }

    /// Remove a rate limit for `cgroup_id`. Succeeds even if none existed.
    pub async fn unlimit(&self, cgroup_id: CgroupId) -> Result<(), GatewayError> {
        self.submit(Op::Unlimit(cgroup_id)).await
    }
}

impl GatewayHandle {
    /// Stop accepting new requests and release kernel resources. Any
    /// `submit` racing this observes `GatewayError::Closed` rather than
    /// hanging.
    pub async fn close(self) {
        let _ = self.closed_tx.send(true);
        let _ = self.task.await;
        service::close();
    }
}
