//! Configuration — command-line surface and derived constants.

use clap::Parser;

const DEFAULT_LISTEN: &str = "/var/run/traffic-limitd.sock";
const DEFAULT_MAX_TASKS: u32 = 110;

/// Daemon for limiting per-container egress/ingress traffic.
///
/// Meant to run alongside a container runtime, invoked as an OCI hook on
/// `createContainer`/`poststop`.
#[derive(Debug, Clone, Parser)]
#[command(name = "traffic-limitd", about = "Per-container traffic rate limiter")]
pub struct DaemonConfig {
    /// Network interface to attach the classifier to. May be repeated.
    #[arg(short = 'i', long = "interface", required = true)]
    pub interfaces: Vec<String>,

    /// Path to the orchestrator kubeconfig. Startup polls this path every
    /// second until it exists.
    #[arg(long = "kubeconfig")]
    pub kubeconfig: String,

    /// Hook-protocol socket path.
    #[arg(short = 'l', long = "listen", default_value = DEFAULT_LISTEN)]
    pub listen: String,

    /// Classifier capacity hint (inflated by ~20% + 5 before use).
    #[arg(short = 'm', long = "max-tasks", default_value_t = DEFAULT_MAX_TASKS)]
    pub max_tasks: u32,

    /// Self node name. If empty, discovered via self-subject-review.
    #[arg(long = "node-name", default_value = "")]
    pub node_name: String,

    /// Declared node-wide egress capacity in bytes/second.
    #[arg(long = "bps", default_value_t = 0)]
    pub bps: i64,

    /// Declared node-wide packet-rate capacity in packets/second.
    #[arg(long = "pps", default_value_t = 0)]
    pub pps: i64,
}

impl DaemonConfig {
    /// Inflate the user-provided `max_tasks` hint for kernel map headroom.
    /// Design constant from `spec.md` §4.1, not user-tunable.
    pub fn max_tasks_hint(&self) -> u32 {
        self.max_tasks + self.max_tasks / 5 + 5
    }

    /// Whether both node-wide capacity values were declared and are
    /// non-zero — the condition under which startup patches node status.
    pub fn declares_node_capacity(&self) -> bool {
        self.bps != 0 && self.pps != 0
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.interfaces.is_empty() {
            return Err("at least one --interface is required".to_string());
        }
        if self.max_tasks == 0 {
            return Err("--max-tasks must be > 0".to_string());
        }
        if self.kubeconfig.is_empty() {
            return Err("--kubeconfig is required".to_string());
        }
        if self.listen.is_empty() {
            return Err("--listen must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> DaemonConfig {
        DaemonConfig {
            interfaces: vec!["eth0".to_string()],
            kubeconfig: "/etc/kubernetes/kubelet.conf".to_string(),
            listen: DEFAULT_LISTEN.to_string(),
            max_tasks: DEFAULT_MAX_TASKS,
            node_name: String::new(),
            bps: 0,
            pps: 0,
        }
    }

    #[test]
    fn max_tasks_hint_applies_design_constant() {
        let cfg = base();
        assert_eq!(cfg.max_tasks_hint(), 110 + 110 / 5 + 5);
    }

    #[test]
    fn validate_rejects_empty_interfaces() {
        let mut cfg = base();
        cfg.interfaces.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_max_tasks() {
        let mut cfg = base();
        cfg.max_tasks = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn declares_node_capacity_requires_both_nonzero() {
        let mut cfg = base();
        assert!(!cfg.declares_node_capacity());
        cfg.bps = 1000;
        assert!(!cfg.declares_node_capacity());
        cfg.pps = 10;
        assert!(cfg.declares_node_capacity());
    }
}
