//! Node self-detection and capacity declaration.
//!
//! Supplements `spec.md` §6's "discovered via a self-subject-review API
//! across three API versions" and "startup patches node status with two
//! custom resources" — both out of the core's hard scope (§1) but part of
//! the bootstrap this daemon needs to run standalone. Grounded on
//! `examples/original_source/cmd/main.go`'s `run()`, which resolves the
//! node name and declares capacity before starting the hook server.

use k8s_openapi::api::authentication::v1 as auth_v1;
use k8s_openapi::api::authentication::v1alpha1 as auth_v1alpha1;
use k8s_openapi::api::authentication::v1beta1 as auth_v1beta1;
use kube::api::{Api, Patch, PatchParams, PostParams};
use thiserror::Error;
use tracing::{info, warn};

use crate::orchestrator::client::{BYTES_PER_SECOND_RESOURCE, PACKETS_PER_SECOND_RESOURCE};

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("self-subject-review did not return a node username (tried v1, v1beta1, v1alpha1)")]
    NoNodeIdentity,
    #[error("self-subject-review API call failed: {0}")]
    Api(String),
    #[error("node status patch failed: {0}")]
    PatchFailed(String),
}

const NODE_USERNAME_PREFIX: &str = "system:node:";

fn strip_node_prefix(username: &str) -> Option<&str> {
    username.strip_prefix(NODE_USERNAME_PREFIX)
}

/// Discover this process's node name via `SelfSubjectReview`, trying
/// `v1`, then `v1beta1`, then `v1alpha1` — the "three API versions"
/// `spec.md` §6 names, since cluster API server versions vary in which
/// one is enabled.
pub async fn detect_node_name(client: &kube::Client) -> Result<String, NodeError> {
    if let Some(name) = try_v1(client).await? {
        return Ok(name);
    }
    if let Some(name) = try_v1beta1(client).await? {
        return Ok(name);
    }
    if let Some(name) = try_v1alpha1(client).await? {
        return Ok(name);
    }
    Err(NodeError::NoNodeIdentity)
}

async fn try_v1(client: &kube::Client) -> Result<Option<String>, NodeError> {
    let api: Api<auth_v1::SelfSubjectReview> = Api::all(client.clone());
    match api
        .create(&PostParams::default(), &auth_v1::SelfSubjectReview::default())
        .await
    {
        Ok(review) => Ok(review
            .status
            .and_then(|s| s.user_info)
            .and_then(|u| u.username)
            .and_then(|u| strip_node_prefix(&u).map(str::to_string))),
        Err(e) => {
            warn!(error = %e, "self-subject-review v1 unavailable, falling back");
            Ok(None)
        }
    }
}

async fn try_v1beta1(client: &kube::Client) -> Result<Option<String>, NodeError> {
    let api: Api<auth_v1beta1::SelfSubjectReview> = Api::all(client.clone());
    match api
        .create(&PostParams::default(), &auth_v1beta1::SelfSubjectReview::default())
        .await
    {
        Ok(review) => Ok(review
            .status
            .and_then(|s| s.user_info)
            .and_then(|u| u.username)
            .and_then(|u| strip_node_prefix(&u).map(str::to_string))),
        Err(e) => {
            warn!(error = %e, "self-subject-review v1beta1 unavailable, falling back");
            Ok(None)
        }
    }
}

async fn try_v1alpha1(client: &kube::Client) -> Result<Option<String>, NodeError> {
    let api: Api<auth_v1alpha1::SelfSubjectReview> = Api::all(client.clone());
    match api
        .create(&PostParams::default(), &auth_v1alpha1::SelfSubjectReview::default())
        .await
    {
        Ok(review) => Ok(review
            .status
            .and_then(|s| s.user_info)
            .and_then(|u| u.username)
            .and_then(|u| strip_node_prefix(&u).map(str::to_string))),
        Err(e) => Err(NodeError::Api(e.to_string())),
    }
}

/// JSON-Pointer-escape a resource name for use as a patch path segment
/// (`~` -> `~0`, `/` -> `~1`, per RFC 6901, as `spec.md` §6 specifies).
fn escape_json_pointer(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

/// Declare the node's available bandwidth by adding two custom capacity
/// resources via a JSON-Patch against `nodes/{name}/status`. No-op unless
/// both `bps` and `pps` are non-zero, matching `spec.md` §6's
/// "if both provided and non-zero".
pub async fn declare_node_capacity(
    client: &kube::Client,
    node_name: &str,
    bps: i64,
    pps: i64,
) -> Result<(), NodeError> {
    if bps == 0 || pps == 0 {
        info!("no node-wide capacity declared (bps/pps not both set)");
        return Ok(());
    }

    let api: Api<k8s_openapi::api::core::v1::Node> = Api::all(client.clone());
    let patch = serde_json::json!([
        {
            "op": "add",
            "path": format!("/status/capacity/{}", escape_json_pointer(BYTES_PER_SECOND_RESOURCE)),
            "value": bps.to_string(),
        },
        {
            "op": "add",
            "path": format!("/status/capacity/{}", escape_json_pointer(PACKETS_PER_SECOND_RESOURCE)),
            "value": pps.to_string(),
        },
    ]);

    api.patch_status(node_name, &PatchParams::default(), &Patch::Json(patch))
        .await
        .map_err(|e| NodeError::PatchFailed(e.to_string()))?;

    info!(node = %node_name, bps, pps, "declared node capacity");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_system_node_prefix() {
        assert_eq!(strip_node_prefix("system:node:worker-1"), Some("worker-1"));
    }

    #[test]
    fn rejects_non_node_username() {
        assert_eq!(strip_node_prefix("system:serviceaccount:default:x"), None);
    }

    #[test]
    fn escapes_tilde_and_slash() {
        assert_eq!(
            escape_json_pointer("trafficlimitd.innull.com/bytes-per-second"),
            "trafficlimitd.innull.com~1bytes-per-second"
        );
    }
}
