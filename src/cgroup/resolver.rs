//! pid -> `CgroupId` resolution via `name_to_handle_at`.
//!
//! Ports `GetCgroupID` from `pkg/cgrouputils/cgroup.go`: open the mountpoint
//! as an `O_PATH` directory handle (cached for the process lifetime), read
//! the pid's cgroup path out of procfs, and resolve it through
//! `name_to_handle_at`. The first 8 bytes of the returned handle,
//! interpreted as a host-endian u64, are the cgroup id.

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd};
use std::sync::OnceLock;

use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use thiserror::Error;

use crate::binding::CgroupId;
use crate::cgroup::mountpoint::cgroup_v2_mountpoint;

#[derive(Debug, Error)]
pub enum CgroupError {
    #[error("cgroup v2 mountpoint not found")]
    NoCgroupV2,
    #[error("pid {0} not found or has no cgroup entry")]
    PidNotFound(i32),
    #[error("name_to_handle_at failed: {0}")]
    HandleLookupFailed(#[source] std::io::Error),
}

static MOUNTPOINT_FD: OnceLock<Option<OwnedFd>> = OnceLock::new();

fn mountpoint_fd() -> Result<&'static OwnedFd, CgroupError> {
    let slot = MOUNTPOINT_FD.get_or_init(|| {
        let path = cgroup_v2_mountpoint()?;
        open(path, OFlag::O_PATH | OFlag::O_DIRECTORY, Mode::empty()).ok()
    });
    slot.as_ref().ok_or(CgroupError::NoCgroupV2)
}

fn cgroup_relative_path(pid: i32) -> Result<String, CgroupError> {
    let contents = std::fs::read_to_string(format!("/proc/{pid}/cgroup"))
        .map_err(|_| CgroupError::PidNotFound(pid))?;
    contents
        .lines()
        .find_map(|line| line.strip_prefix("0::"))
        .map(|rest| rest.trim_start_matches('/').to_string())
        .ok_or(CgroupError::PidNotFound(pid))
}

/// Maximum handle bytes we're willing to accept from the kernel. cgroup-v2
/// file handles are small (typically 8 bytes); this leaves generous
/// headroom without risking an unbounded stack allocation.
const MAX_HANDLE_BYTES: usize = 128;

#[repr(C)]
struct RawFileHandle {
    handle_bytes: libc::c_uint,
    handle_type: libc::c_int,
    f_handle: [u8; MAX_HANDLE_BYTES],
}

/// Safe-ish wrapper around the `name_to_handle_at(2)` syscall, which `nix`
/// does not expose a safe binding for.
fn name_to_handle_at(dirfd: &OwnedFd, relative_path: &str) -> std::io::Result<[u8; 8]> {
    let path = CString::new(relative_path)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let mut handle = RawFileHandle {
        handle_bytes: MAX_HANDLE_BYTES as libc::c_uint,
        handle_type: 0,
        f_handle: [0u8; MAX_HANDLE_BYTES],
    };
    let mut mount_id: libc::c_int = 0;

    // SAFETY: `handle` is large enough for any handle the kernel reports
    // (`handle_bytes` is set to its true capacity going in); all pointers
    // are valid for the duration of the call.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_name_to_handle_at,
            dirfd.as_raw_fd(),
            path.as_ptr(),
            &mut handle as *mut RawFileHandle as *mut libc::c_void,
            &mut mount_id as *mut libc::c_int,
            0 as libc::c_int,
        )
    };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let mut id_bytes = [0u8; 8];
    id_bytes.copy_from_slice(&handle.f_handle[..8]);
    Ok(id_bytes)
}

/// Resolve the `CgroupId` of the cgroup-v2 directory the given pid belongs
/// to.
pub fn cgroup_id_for_pid(pid: i32) -> Result<CgroupId, CgroupError> {
    let dirfd = mountpoint_fd()?;
    let relative = cgroup_relative_path(pid)?;
    let bytes = name_to_handle_at(dirfd, &relative).map_err(CgroupError::HandleLookupFailed)?;
    Ok(u64::from_ne_bytes(bytes))
}
