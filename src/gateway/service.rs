//! Single-writer serialization task owning the kernel classifier handle.
//!
//! Ports the `limiter.doService()` goroutine from
//! `pkg/bpftrafficlimiter/trafficlimiter.go`: one task drains a request
//! channel strictly serially and replies over a one-shot channel per
//! request, because the native library's cgroup-id map is not safe for
//! concurrent mutation.

use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot, watch};

use super::classifier::{
    cgroup_rate_limit_set, cgroup_rate_limit_unset, close_bpf_obj, open_and_load_bpf_obj,
    tc_attach_interface, RateLimit, RATE_UNLIMITED,
};
use super::GatewayError;
use crate::binding::CgroupId;
use crate::cache::TrafficLimitInfo;

pub(super) enum Op {
    Limit(CgroupId, TrafficLimitInfo),
    Unlimit(CgroupId),
}

pub(super) struct Request {
    pub op: Op,
    pub reply: oneshot::Sender<Result<(), GatewayError>>,
}

fn map_errno(errno: i32) -> GatewayError {
    match errno {
        libc::ENOSPC | libc::E2BIG => GatewayError::MapFull,
        libc::ENOENT | libc::EINVAL => GatewayError::InvalidCgroup,
        other => GatewayError::KernelDenied(other),
    }
}

fn check(rc: i32) -> Result<(), GatewayError> {
    if rc < 0 {
        Err(map_errno(-rc))
    } else {
        Ok(())
    }
}

fn do_limit(cgroup_id: CgroupId, info: TrafficLimitInfo) -> Result<(), GatewayError> {
    if info.bytes_per_second == 0 && info.packets_per_second == 0 {
        return Ok(());
    }
    let limit = RateLimit {
        byte_rate: if info.bytes_per_second != 0 {
            info.bytes_per_second as u64
        } else {
            RATE_UNLIMITED
        },
        packet_rate: if info.packets_per_second != 0 {
            info.packets_per_second as u64
        } else {
            RATE_UNLIMITED
        },
    };
    // SAFETY: `limit` outlives the call; `cgroup_id` is a plain integer.
    let rc = unsafe { cgroup_rate_limit_set(cgroup_id, &limit as *const RateLimit) };
    check(rc)
}

fn do_unlimit(cgroup_id: CgroupId) -> Result<(), GatewayError> {
    // SAFETY: no pointers involved.
    let rc = unsafe { cgroup_rate_limit_unset(cgroup_id) };
    check(rc)
}

/// Drains `reqs` strictly serially until either the channel is closed or
/// `closed` is signalled.
pub(super) async fn run(mut reqs: mpsc::Receiver<Request>, mut closed: watch::Receiver<bool>) {
    loop {
        let req = tokio::select! {
            req = reqs.recv() => match req {
                Some(req) => req,
                None => break,
            },
            _ = closed.changed() => break,
        };

        let result = match req.op {
            Op::Limit(cgroup_id, info) => do_limit(cgroup_id, info),
            Op::Unlimit(cgroup_id) => do_unlimit(cgroup_id),
        };
        // The caller may have given up waiting; that's fine, drop the
        // reply.
        let _ = req.reply.send(result);
    }
}

static LOADED: AtomicBool = AtomicBool::new(false);

/// One-shot load of the classifier program. Not part of the per-request
/// service loop since it happens once at startup before the loop exists.
/// A process only ever holds one classifier handle, so a second call
/// fails with `AlreadyLoaded` rather than loading a second copy.
pub(super) fn load(max_tasks: u32) -> Result<(), GatewayError> {
    if LOADED.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
        return Err(GatewayError::AlreadyLoaded);
    }
    // SAFETY: no pointers involved; `max_tasks` is a plain integer.
    let rc = unsafe { open_and_load_bpf_obj(max_tasks) };
    if rc < 0 {
        LOADED.store(false, Ordering::SeqCst);
    }
    check(rc)
}

pub(super) fn attach_one(if_name: &str) -> Result<(), GatewayError> {
    let c_name = CString::new(if_name).map_err(|_| GatewayError::InvalidCgroup)?;
    // SAFETY: `c_name` outlives the call.
    let rc = unsafe { tc_attach_interface(c_name.as_ptr()) };
    check(rc)
}

pub(super) fn close() {
    // SAFETY: releases resources acquired by `load`/`attach_one`; the
    // service task has already stopped issuing requests by the time
    // `Gateway::close` calls this (see gateway/mod.rs).
    let _ = unsafe { close_bpf_obj() };
    LOADED.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_errno_classifies_map_full() {
        assert_eq!(map_errno(libc::ENOSPC), GatewayError::MapFull);
    }

    #[test]
    fn map_errno_classifies_invalid_cgroup() {
        assert_eq!(map_errno(libc::ENOENT), GatewayError::InvalidCgroup);
    }

    #[test]
    fn map_errno_falls_back_to_kernel_denied() {
        assert_eq!(map_errno(libc::EPERM), GatewayError::KernelDenied(libc::EPERM));
    }

    #[test]
    fn check_maps_negative_rc_to_errno() {
        assert_eq!(check(-libc::ENOSPC), Err(GatewayError::MapFull));
        assert_eq!(check(0), Ok(()));
    }

    #[test]
    fn load_guard_rejects_second_call_until_closed() {
        assert!(LOADED.compare_exchange(false, false, Ordering::SeqCst, Ordering::SeqCst).is_ok());
        assert!(LOADED.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok());
        assert!(LOADED.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err());
        LOADED.store(false, Ordering::SeqCst);
    }
}
