//! Pod-info cache — resolves a `ContainerHandle` to its `TrafficLimitInfo`
//! against the orchestrator API, deduplicating inflight lookups per pod.
//!
//! Ports `K8sTrafficLimitInfoFetcher` from
//! `pkg/k8sclient/k8sclient.go`: a `sync.Map` of `podCacheItem` keyed by
//! pod uid, first-touch load-or-insert, a `cacheLockChan` one-shot that
//! losers of the race await. `dashmap::Entry` takes the place of
//! `LoadOrStore`; `tokio::sync::Notify` takes the place of the closed
//! channel (closing a channel and notifying all waiters are the same
//! operation here, since no payload needs to cross it — waiters re-read
//! the entry's state after waking).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::orchestrator::TrafficLimitFetcher;

/// Default TTL for a successfully resolved cache entry.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

/// `(pod-uuid, pod-namespace, pod-name, container-name)` — uniquely
/// identifies a container instance. `pod_uid` is the cache key; the rest
/// is carried for identity verification against what the API returns.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerHandle {
    pub pod_uid: String,
    pub pod_namespace: String,
    pub pod_name: String,
    pub container_name: String,
}

/// A resolved rate limit. Both fields are `>= 0`; `0` on a field means "no
/// limit on that dimension", `(0, 0)` means "no limit set at all" (the
/// gateway is not invoked).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrafficLimitInfo {
    pub bytes_per_second: i64,
    pub packets_per_second: i64,
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("pod {0} not found")]
    PodNotFound(String),
    #[error("lookup failed: {0}")]
    LookupFailed(String),
}

#[derive(Debug)]
enum EntryState {
    Pending,
    Valid {
        pod_namespace: String,
        pod_name: String,
        per_container_limits: HashMap<String, TrafficLimitInfo>,
    },
    Invalid,
}

struct CacheEntry {
    state: EntryState,
    expires_at: Instant,
    ready: Arc<Notify>,
}

/// Deduplicating, TTL-evicted cache of pod traffic limits.
pub struct PodCache<F> {
    entries: DashMap<String, CacheEntry>,
    fetcher: F,
    ttl: Duration,
}

impl<F: TrafficLimitFetcher> PodCache<F> {
    pub fn new(fetcher: F) -> Self {
        Self::with_ttl(fetcher, DEFAULT_TTL)
    }

    pub fn with_ttl(fetcher: F, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            fetcher,
            ttl,
        }
    }

    /// Periodically sweeps expired entries at `2 * ttl`, matching
    /// `startCleanTimer`'s ticker period in the original fetcher. Runs
    /// until the returned future is dropped (the caller owns its
    /// lifetime via the task handle, same as the teacher's background
    /// sync task).
    pub async fn run_sweeper(self: Arc<Self>) {
        let mut interval = time::interval(self.ttl * 2);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let now = Instant::now();
            let before = self.entries.len();
            self.entries.retain(|_, entry| entry.expires_at >= now);
            let removed = before - self.entries.len();
            if removed > 0 {
                debug!(removed, remaining = self.entries.len(), "swept expired cache entries");
            }
        }
    }

    /// Resolve `handle` to its `TrafficLimitInfo`, deduplicating concurrent
    /// lookups for the same `pod_uid`.
    pub async fn get(&self, handle: &ContainerHandle) -> Result<TrafficLimitInfo, CacheError> {
        loop {
            let (is_owner, ready) = match self.entries.entry(handle.pod_uid.clone()) {
                Entry::Occupied(slot) => (false, slot.get().ready.clone()),
                Entry::Vacant(slot) => {
                    let ready = Arc::new(Notify::new());
                    slot.insert(CacheEntry {
                        state: EntryState::Pending,
                        expires_at: Instant::now() + self.ttl,
                        ready: ready.clone(),
                    });
                    (true, ready)
                }
            };

            if is_owner {
                return self.resolve(handle, ready).await;
            }

            // Register interest before inspecting the entry: `notify_waiters`
            // stores no permit, so a notification racing with this check would
            // otherwise be lost and the await below would hang forever.
            let notified = ready.notified();
            match self.entries.get(&handle.pod_uid).map(|e| snapshot(&e)) {
                Some(EntrySnapshot::Valid { pod_namespace, pod_name, per_container_limits }) => {
                    return read_result(handle, &pod_namespace, &pod_name, &per_container_limits);
                }
                Some(EntrySnapshot::Invalid) | None => continue,
                Some(EntrySnapshot::Pending) => {}
            }

            notified.await;
            match self.entries.get(&handle.pod_uid).map(|e| snapshot(&e)) {
                Some(EntrySnapshot::Valid { pod_namespace, pod_name, per_container_limits }) => {
                    return read_result(handle, &pod_namespace, &pod_name, &per_container_limits);
                }
                Some(EntrySnapshot::Pending) | None => continue,
                Some(EntrySnapshot::Invalid) => continue,
            }
        }
    }

    /// Owner-side of the first-touch race: issue the API call, fill the
    /// entry, and wake every waiter regardless of outcome.
    async fn resolve(&self, handle: &ContainerHandle, ready: Arc<Notify>) -> Result<TrafficLimitInfo, CacheError> {
        let result = self.fetcher.get_pod(&handle.pod_namespace, &handle.pod_name).await;

        let outcome = match result {
            Err(cause) => {
                self.entries.remove(&handle.pod_uid);
                Err(CacheError::LookupFailed(cause.to_string()))
            }
            Ok(pod) if pod.namespace != handle.pod_namespace || pod.name != handle.pod_name || pod.uid != handle.pod_uid => {
                warn!(
                    pod_uid = %handle.pod_uid,
                    returned_uid = %pod.uid,
                    "pod identity mismatch on cache lookup"
                );
                self.entries.remove(&handle.pod_uid);
                Err(CacheError::PodNotFound(handle.pod_uid.clone()))
            }
            Ok(pod) => {
                info!(pod_uid = %pod.uid, namespace = %pod.namespace, name = %pod.name, "resolved pod traffic limits");
                if let Some(mut entry) = self.entries.get_mut(&handle.pod_uid) {
                    entry.state = EntryState::Valid {
                        pod_namespace: pod.namespace.clone(),
                        pod_name: pod.name.clone(),
                        per_container_limits: pod.per_container_limits.clone(),
                    };
                }
                read_result(handle, &pod.namespace, &pod.name, &pod.per_container_limits)
            }
        };

        if outcome.is_err() {
            if let Some(mut entry) = self.entries.get_mut(&handle.pod_uid) {
                entry.state = EntryState::Invalid;
            }
        }
        ready.notify_waiters();
        outcome
    }
}

enum EntrySnapshot {
    Pending,
    Valid {
        pod_namespace: String,
        pod_name: String,
        per_container_limits: HashMap<String, TrafficLimitInfo>,
    },
    Invalid,
}

fn snapshot(entry: &CacheEntry) -> EntrySnapshot {
    match &entry.state {
        EntryState::Pending => EntrySnapshot::Pending,
        EntryState::Invalid => EntrySnapshot::Invalid,
        EntryState::Valid { pod_namespace, pod_name, per_container_limits } => EntrySnapshot::Valid {
            pod_namespace: pod_namespace.clone(),
            pod_name: pod_name.clone(),
            per_container_limits: per_container_limits.clone(),
        },
    }
}

/// Reads a container's limit out of an already-resolved pod entry, after
/// re-checking identity (namespace/name — `pod_uid` is the map key so it's
/// already implied). A container name the pod spec never declared
/// resolves to `(0, 0)`, not an error.
fn read_result(
    handle: &ContainerHandle,
    pod_namespace: &str,
    pod_name: &str,
    per_container_limits: &HashMap<String, TrafficLimitInfo>,
) -> Result<TrafficLimitInfo, CacheError> {
    if pod_namespace != handle.pod_namespace || pod_name != handle.pod_name {
        return Err(CacheError::PodNotFound(handle.pod_uid.clone()));
    }
    Ok(per_container_limits
        .get(&handle.container_name)
        .copied()
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{FetchError, PodInfo};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingFetcher {
        calls: AtomicU32,
        response: Result<PodInfo, String>,
    }

    impl TrafficLimitFetcher for CountingFetcher {
        async fn get_pod(&self, _namespace: &str, _name: &str) -> Result<PodInfo, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone().map_err(FetchError::Api)
        }
    }

    fn handle() -> ContainerHandle {
        ContainerHandle {
            pod_uid: "u-1".into(),
            pod_namespace: "default".into(),
            pod_name: "p".into(),
            container_name: "app".into(),
        }
    }

    fn valid_pod() -> PodInfo {
        let mut limits = HashMap::new();
        limits.insert(
            "app".to_string(),
            TrafficLimitInfo { bytes_per_second: 1_000_000, packets_per_second: 2_000 },
        );
        PodInfo {
            uid: "u-1".into(),
            namespace: "default".into(),
            name: "p".into(),
            per_container_limits: limits,
        }
    }

    #[tokio::test]
    async fn happy_path_returns_declared_limit() {
        let fetcher = CountingFetcher { calls: AtomicU32::new(0), response: Ok(valid_pod()) };
        let cache = PodCache::new(fetcher);
        let info = cache.get(&handle()).await.unwrap();
        assert_eq!(info, TrafficLimitInfo { bytes_per_second: 1_000_000, packets_per_second: 2_000 });
    }

    #[tokio::test]
    async fn repeated_lookup_does_not_refetch() {
        let fetcher = CountingFetcher { calls: AtomicU32::new(0), response: Ok(valid_pod()) };
        let cache = PodCache::new(fetcher);
        cache.get(&handle()).await.unwrap();
        cache.get(&handle()).await.unwrap();
        assert_eq!(cache.fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn undeclared_container_resolves_to_unlimited() {
        let fetcher = CountingFetcher { calls: AtomicU32::new(0), response: Ok(valid_pod()) };
        let cache = PodCache::new(fetcher);
        let mut h = handle();
        h.container_name = "sidecar".into();
        let info = cache.get(&h).await.unwrap();
        assert_eq!(info, TrafficLimitInfo::default());
    }

    #[tokio::test]
    async fn identity_mismatch_yields_pod_not_found_and_no_residual_entry() {
        let mut mismatched = valid_pod();
        mismatched.uid = "u-2".into();
        let fetcher = CountingFetcher { calls: AtomicU32::new(0), response: Ok(mismatched) };
        let cache = PodCache::new(fetcher);
        let err = cache.get(&handle()).await.unwrap_err();
        assert!(matches!(err, CacheError::PodNotFound(_)));
        assert!(!cache.entries.contains_key("u-1"));
    }

    #[tokio::test]
    async fn api_error_yields_lookup_failed_and_no_residual_entry() {
        let fetcher = CountingFetcher { calls: AtomicU32::new(0), response: Err("boom".into()) };
        let cache = PodCache::new(fetcher);
        let err = cache.get(&handle()).await.unwrap_err();
        assert!(matches!(err, CacheError::LookupFailed(_)));
        assert!(!cache.entries.contains_key("u-1"));
    }

    #[tokio::test]
    async fn ttl_sweep_removes_expired_entries() {
        let fetcher = CountingFetcher { calls: AtomicU32::new(0), response: Ok(valid_pod()) };
        let cache = Arc::new(PodCache::with_ttl(fetcher, Duration::from_millis(1)));
        cache.get(&handle()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let now = Instant::now();
        cache.entries.retain(|_, entry| entry.expires_at >= now);
        assert!(cache.entries.is_empty());
    }
}
