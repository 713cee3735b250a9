//! Orchestrator API collaborator.
//!
//! `spec.md` §1 treats the orchestrator API client as an external
//! collaborator ("a generated REST client providing Pod lookup and
//! node-status patch"); this module supplies the Rust-native analogue of
//! `pkg/k8sclient`'s `kubernetes.Clientset` usage so the daemon can run
//! standalone.

mod client;
mod node;

pub use client::{FetchError, KubeFetcher, PodInfo, TrafficLimitFetcher};
pub use node::{declare_node_capacity, detect_node_name, NodeError};
