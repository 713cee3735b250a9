//! Cgroup resolver — pid -> cgroup-v2 id.

mod mountpoint;
mod resolver;

pub use mountpoint::cgroup_v2_mountpoint;
pub use resolver::{cgroup_id_for_pid, CgroupError};
