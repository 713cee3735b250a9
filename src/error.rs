//! Crate-wide error taxonomy.
//!
//! Mirrors the kinds enumerated in the design doc's error-handling section:
//! `ClientProtocol`, `EnvironmentFatal`, `LookupFailed`, `GatewayError`,
//! `BindingConflict`, `Transient`. Domain modules define their own error
//! types and convert into `DaemonError` at the boundary where they cross
//! into the hook handler.

use thiserror::Error;

use crate::cache::CacheError;
use crate::cgroup::CgroupError;
use crate::gateway::GatewayError;

/// Top-level error taxonomy for a single hook request.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("malformed request: {0}")]
    ClientProtocol(String),

    #[error("cgroup resolution failed: {0}")]
    Cgroup(#[from] CgroupError),

    #[error("pod lookup failed: {0}")]
    Lookup(#[from] CacheError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("duplicate container id {0}")]
    BindingConflict(String),
}

/// Startup-time failures that should abort the process.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("no cgroup-v2 mountpoint found")]
    NoCgroupV2,

    #[error("failed to load kernel classifier: {0}")]
    ClassifierLoad(#[source] GatewayError),

    #[error("failed to attach classifier to interfaces: {0}")]
    InterfaceAttach(#[source] GatewayError),

    #[error("failed to bind hook socket at {path}: {source}")]
    SocketBind {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("orchestrator client setup failed: {0}")]
    Orchestrator(String),
}
