//! cgroup-v2 mountpoint detection.
//!
//! Line-for-line port of `GetCgroupV2MountPoint` in the original source
//! (`pkg/cgrouputils/cgroup.go`): probe `/sys/fs/cgroup` first (unified
//! hierarchy), then `/sys/fs/cgroup/unified` (hybrid hierarchy), then
//! `/sys/fs/cgroup/systemd` (systemd v232's corner case). Cached
//! process-wide after the first successful probe.

use std::path::Path;
use std::sync::OnceLock;

use nix::sys::statfs::{statfs, CGROUP2_SUPER_MAGIC, TMPFS_MAGIC};
use tracing::info;

const UNIFIED_MOUNTPOINT: &str = "/sys/fs/cgroup";

static MOUNTPOINT: OnceLock<Option<String>> = OnceLock::new();

fn is_cgroup_v2(path: &str) -> bool {
    statfs(Path::new(path))
        .map(|st| st.filesystem_type() == CGROUP2_SUPER_MAGIC)
        .unwrap_or(false)
}

fn detect() -> Option<String> {
    let st = statfs(Path::new(UNIFIED_MOUNTPOINT)).ok()?;
    if st.filesystem_type() == CGROUP2_SUPER_MAGIC {
        return Some(UNIFIED_MOUNTPOINT.to_string());
    }
    if st.filesystem_type() != TMPFS_MAGIC {
        return None;
    }

    let unified = format!("{UNIFIED_MOUNTPOINT}/unified");
    if is_cgroup_v2(&unified) {
        return Some(unified);
    }

    let systemd = format!("{UNIFIED_MOUNTPOINT}/systemd");
    if is_cgroup_v2(&systemd) {
        return Some(systemd);
    }

    None
}

/// Return the cached cgroup-v2 mountpoint, detecting it on first call.
pub fn cgroup_v2_mountpoint() -> Option<&'static str> {
    MOUNTPOINT
        .get_or_init(|| {
            let found = detect();
            if let Some(ref path) = found {
                info!(mountpoint = %path, "detected cgroup v2 mountpoint");
            }
            found
        })
        .as_deref()
}
