//! Dual-convention OCI annotation keys.
//!
//! Two container-runtime conventions (containerd/CRI and cri-o) spell the
//! same semantic fields with different annotation keys. Each field is
//! modeled as an ordered list of candidate keys, probed first-match-wins.
//! Centralized here per the design notes so the hook handler never hardcodes
//! a key string directly.

use std::collections::HashMap;

/// containerd/CRI convention, tried before the cri-o/pod-convention fallback.
pub const CONTAINER_TYPE_KEYS: &[&str] = &[
    "io.kubernetes.cri.container-type",
    "io.kubernetes.cri-o.ContainerType",
];

/// Value of `CONTAINER_TYPE_KEYS` that marks an application container
/// (as opposed to the pod-sandbox container, which is never rate-limited).
pub const APP_CONTAINER_TYPE_VALUE: &str = "container";

pub const POD_NAMESPACE_KEYS: &[&str] = &[
    "io.kubernetes.cri.sandbox-namespace",
    "io.kubernetes.pod.namespace",
];

pub const POD_NAME_KEYS: &[&str] = &["io.kubernetes.cri.sandbox-name", "io.kubernetes.pod.name"];

pub const POD_UID_KEYS: &[&str] = &["io.kubernetes.cri.sandbox-uid", "io.kubernetes.pod.uid"];

pub const CONTAINER_NAME_KEYS: &[&str] = &[
    "io.kubernetes.cri.container-name",
    "io.kubernetes.container.name",
];

/// Look up the first present key from `candidates` in `annotations`.
pub fn resolve<'a>(annotations: &'a HashMap<String, String>, candidates: &[&str]) -> Option<&'a str> {
    candidates
        .iter()
        .find_map(|key| annotations.get(*key).map(String::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn resolves_first_matching_key() {
        let a = annotations(&[("io.kubernetes.pod.namespace", "default")]);
        assert_eq!(resolve(&a, POD_NAMESPACE_KEYS), Some("default"));
    }

    #[test]
    fn prefers_cri_convention_over_pod_convention() {
        let a = annotations(&[
            ("io.kubernetes.cri.sandbox-namespace", "cri-ns"),
            ("io.kubernetes.pod.namespace", "pod-ns"),
        ]);
        assert_eq!(resolve(&a, POD_NAMESPACE_KEYS), Some("cri-ns"));
    }

    #[test]
    fn missing_key_resolves_to_none() {
        let a = annotations(&[]);
        assert_eq!(resolve(&a, CONTAINER_TYPE_KEYS), None);
    }
}
