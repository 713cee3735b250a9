//! `createContainer`/`poststop` state machine.
//!
//! Ports `ClientHandler.Handle` from `pkg/clienthandler/clienthandler.go`.
//! The original uses `goto FAIL`/`FAIL_RELEASE` labels to unwind a
//! reservation on any later failure; this translates to a drop-guard that
//! releases the binding unless explicitly disarmed on the success path,
//! per the design notes' instruction to replace goto-based cleanup with
//! RAII.

use std::sync::Arc;

use tracing::{info, warn};

use crate::annotations::{
    resolve, APP_CONTAINER_TYPE_VALUE, CONTAINER_NAME_KEYS, CONTAINER_TYPE_KEYS, POD_NAME_KEYS,
    POD_NAMESPACE_KEYS, POD_UID_KEYS,
};
use crate::binding::BindingTable;
use crate::cache::{ContainerHandle, PodCache};
use crate::cgroup::cgroup_id_for_pid;
use crate::gateway::Gateway;
use crate::orchestrator::TrafficLimitFetcher;

use super::protocol::{self, ContainerState};

/// Releases a just-reserved binding on drop unless `disarm` was called.
/// The RAII analogue of the original's `FAIL_RELEASE:` label.
struct ReservationGuard<'a> {
    bindings: &'a BindingTable,
    container_id: &'a str,
    armed: bool,
}

impl<'a> ReservationGuard<'a> {
    fn new(bindings: &'a BindingTable, container_id: &'a str) -> Self {
        Self { bindings, container_id, armed: true }
    }

    /// Call on the success path: the binding should persist until
    /// `poststop`, so don't release it on drop.
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.bindings.release(self.container_id);
        }
    }
}

pub struct HookHandler<F: TrafficLimitFetcher> {
    bindings: BindingTable,
    cache: Arc<PodCache<F>>,
    gateway: Gateway,
}

impl<F: TrafficLimitFetcher> HookHandler<F> {
    pub fn new(cache: Arc<PodCache<F>>, gateway: Gateway) -> Self {
        Self { bindings: BindingTable::new(), cache, gateway }
    }

    /// Dispatch one parsed request. Returns `None` for "fail": the caller
    /// closes the connection without a reply. Returns `Some(reply)`
    /// otherwise.
    pub async fn handle(&self, peer_pid: i32, datagram: &[u8]) -> Option<Vec<u8>> {
        let req = match protocol::parse(datagram) {
            Ok(req) => req,
            Err(e) => {
                warn!(peer_pid, error = %e, "malformed hook request");
                return None;
            }
        };

        if !protocol::is_known_hook(&req.hook_name) {
            info!(peer_pid, hook = %req.hook_name, "unknown hook, replying success with no side effect");
            return Some(protocol::SUCCESS_REPLY.to_vec());
        }

        match req.hook_name.as_str() {
            protocol::HOOK_CREATE_CONTAINER => self.handle_create_container(peer_pid, &req.state).await,
            protocol::HOOK_POSTSTOP => {
                self.handle_poststop(peer_pid, &req.state).await;
                Some(protocol::SUCCESS_REPLY.to_vec())
            }
            _ => unreachable!("is_known_hook guards this"),
        }
    }

    async fn handle_create_container(&self, peer_pid: i32, state: &ContainerState) -> Option<Vec<u8>> {
        let cgroup_id = match cgroup_id_for_pid(peer_pid) {
            Ok(id) => id,
            Err(e) => {
                warn!(peer_pid, container_id = %state.id, error = %e, "cgroup resolution failed");
                return None;
            }
        };

        if !self.bindings.reserve(&state.id, cgroup_id) {
            warn!(peer_pid, container_id = %state.id, "duplicate container id, rejecting");
            return None;
        }
        let mut guard = ReservationGuard::new(&self.bindings, &state.id);

        let Some(container_type) = resolve(&state.annotations, CONTAINER_TYPE_KEYS) else {
            warn!(peer_pid, container_id = %state.id, "container type annotation missing");
            return None;
        };
        if container_type != APP_CONTAINER_TYPE_VALUE {
            info!(peer_pid, container_id = %state.id, "pod-sandbox container, no limit to apply");
            return Some(protocol::SUCCESS_REPLY.to_vec());
        }

        let (Some(pod_namespace), Some(pod_name), Some(pod_uid), Some(container_name)) = (
            resolve(&state.annotations, POD_NAMESPACE_KEYS),
            resolve(&state.annotations, POD_NAME_KEYS),
            resolve(&state.annotations, POD_UID_KEYS),
            resolve(&state.annotations, CONTAINER_NAME_KEYS),
        ) else {
            warn!(peer_pid, container_id = %state.id, "pod identity annotations incomplete");
            return None;
        };

        let handle = ContainerHandle {
            pod_uid: pod_uid.to_string(),
            pod_namespace: pod_namespace.to_string(),
            pod_name: pod_name.to_string(),
            container_name: container_name.to_string(),
        };

        let info = match self.cache.get(&handle).await {
            Ok(info) => info,
            Err(e) => {
                warn!(peer_pid, container_id = %state.id, error = %e, "traffic limit lookup failed");
                return None;
            }
        };

        if let Err(e) = self.gateway.limit(cgroup_id, info).await {
            warn!(peer_pid, container_id = %state.id, error = %e, "gateway rejected limit");
            return None;
        }

        guard.disarm();
        info!(peer_pid, container_id = %state.id, cgroup_id, "limit applied");
        Some(protocol::SUCCESS_REPLY.to_vec())
    }

    async fn handle_poststop(&self, peer_pid: i32, state: &ContainerState) {
        match self.bindings.take(&state.id) {
            Some(cgroup_id) => {
                let _ = self.gateway.unlimit(cgroup_id).await;
                info!(peer_pid, container_id = %state.id, cgroup_id, "limit removed");
            }
            None => {
                warn!(peer_pid, container_id = %state.id, "poststop of unknown container id");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn annotations(container_type: &str) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("io.kubernetes.cri.container-type".to_string(), container_type.to_string());
        m.insert("io.kubernetes.cri.sandbox-namespace".to_string(), "default".to_string());
        m.insert("io.kubernetes.cri.sandbox-name".to_string(), "p".to_string());
        m.insert("io.kubernetes.cri.sandbox-uid".to_string(), "u-1".to_string());
        m.insert("io.kubernetes.cri.container-name".to_string(), "app".to_string());
        m
    }

    #[test]
    fn sandbox_container_type_is_not_app_container() {
        let a = annotations("sandbox");
        assert_ne!(
            resolve(&a, CONTAINER_TYPE_KEYS).unwrap(),
            APP_CONTAINER_TYPE_VALUE
        );
    }

    #[test]
    fn reservation_guard_releases_on_drop_unless_disarmed() {
        let bindings = BindingTable::new();
        assert!(bindings.reserve("abc", 1));
        {
            let _guard = ReservationGuard::new(&bindings, "abc");
        }
        assert!(bindings.reserve("abc", 2));
    }

    #[test]
    fn reservation_guard_leaves_binding_when_disarmed() {
        let bindings = BindingTable::new();
        assert!(bindings.reserve("abc", 1));
        {
            let mut guard = ReservationGuard::new(&bindings, "abc");
            guard.disarm();
        }
        assert!(!bindings.reserve("abc", 2));
    }
}
