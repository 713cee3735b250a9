//! Pod lookup against the orchestrator API.
//!
//! Rust analogue of `K8sTrafficLimitInfoFetcher.GetTrafficLimitInfo`'s
//! `clientset.CoreV1().Pods(ns).Get(...)` call in
//! `pkg/k8sclient/k8sclient.go`, minus the caching (the cache lives in
//! `crate::cache::PodCache` and calls through this trait on a cache miss).

use std::collections::HashMap;

use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use thiserror::Error;

use crate::cache::TrafficLimitInfo;

/// Well-known extended-resource names carrying declared per-container
/// limits, carried over verbatim from `pkg/types/types.go`.
pub const BYTES_PER_SECOND_RESOURCE: &str = "trafficlimitd.innull.com/bytes-per-second";
pub const PACKETS_PER_SECOND_RESOURCE: &str = "trafficlimitd.innull.com/packets-per-second";

#[derive(Debug, Clone)]
pub struct PodInfo {
    pub uid: String,
    pub namespace: String,
    pub name: String,
    pub per_container_limits: HashMap<String, TrafficLimitInfo>,
}

#[derive(Debug, Error, Clone)]
pub enum FetchError {
    #[error("orchestrator API error: {0}")]
    Api(String),
    #[error("pod {namespace}/{name} has no uid")]
    MissingUid { namespace: String, name: String },
}

/// Async counterpart of the original's `TrafficLimitInfoFetcher`
/// interface. Implemented generically so `PodCache<F>` can be tested
/// against a fake without a live API server.
pub trait TrafficLimitFetcher: Send + Sync + 'static {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodInfo, FetchError>;
}

/// Live implementation backed by `kube::Client`.
pub struct KubeFetcher {
    client: kube::Client,
}

impl KubeFetcher {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

impl TrafficLimitFetcher for KubeFetcher {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<PodInfo, FetchError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pod = api
            .get(name)
            .await
            .map_err(|e| FetchError::Api(e.to_string()))?;

        let meta = &pod.metadata;
        let uid = meta.uid.clone().ok_or_else(|| FetchError::MissingUid {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;
        let pod_namespace = meta.namespace.clone().unwrap_or_else(|| namespace.to_string());
        let pod_name = meta.name.clone().unwrap_or_else(|| name.to_string());

        let per_container_limits = pod
            .spec
            .as_ref()
            .map(|spec| {
                spec.containers
                    .iter()
                    .map(|container| {
                        let info = container
                            .resources
                            .as_ref()
                            .and_then(|r| r.limits.as_ref())
                            .map(|limits| TrafficLimitInfo {
                                bytes_per_second: extract_quantity(limits, BYTES_PER_SECOND_RESOURCE),
                                packets_per_second: extract_quantity(limits, PACKETS_PER_SECOND_RESOURCE),
                            })
                            .unwrap_or_default();
                        (container.name.clone(), info)
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(PodInfo {
            uid,
            namespace: pod_namespace,
            name: pod_name,
            per_container_limits,
        })
    }
}

fn extract_quantity(
    limits: &std::collections::BTreeMap<String, k8s_openapi::apimachinery::pkg::api::resource::Quantity>,
    resource_name: &str,
) -> i64 {
    limits
        .get(resource_name)
        .and_then(|q| q.0.parse::<i64>().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_quantity_parses_integer_value() {
        let mut limits = std::collections::BTreeMap::new();
        limits.insert(
            BYTES_PER_SECOND_RESOURCE.to_string(),
            k8s_openapi::apimachinery::pkg::api::resource::Quantity("1000000".to_string()),
        );
        assert_eq!(extract_quantity(&limits, BYTES_PER_SECOND_RESOURCE), 1_000_000);
    }

    #[test]
    fn extract_quantity_absent_resource_is_zero() {
        let limits = std::collections::BTreeMap::new();
        assert_eq!(extract_quantity(&limits, BYTES_PER_SECOND_RESOURCE), 0);
    }
}
