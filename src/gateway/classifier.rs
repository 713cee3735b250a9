//! FFI surface for the in-kernel packet classifier.
//!
//! The classifier itself is out of scope (an external native library
//! loaded at startup); this module only declares the four operations
//! `spec.md` §4.1/§1 names. Rust analogue of the original's cgo import of
//! `libebpf-traffic-limiter`: a plain `extern "C"` block linked via
//! `#[link(...)]` instead of a `#cgo LDFLAGS` directive.

use std::os::raw::{c_char, c_int, c_uint};

/// Sentinel meaning "no limit on this dimension" at the FFI boundary.
/// The original's `RATE_UNLIMITED` comes from a vendored C header not
/// present in the retrieved source; `u64::MAX` is the conventional
/// "unlimited" value for an unsigned rate field. See DESIGN.md.
pub const RATE_UNLIMITED: u64 = u64::MAX;

#[repr(C)]
pub struct RateLimit {
    pub byte_rate: u64,
    pub packet_rate: u64,
}

#[link(name = "ebpf-traffic-limiter")]
extern "C" {
    /// Load and verify the eBPF program, sizing its cgroup-id map for
    /// `max_tasks` entries. Returns 0 on success, negative errno on
    /// failure.
    pub fn open_and_load_bpf_obj(max_tasks: c_uint) -> c_int;

    /// Attach the loaded program to one network interface.
    pub fn tc_attach_interface(if_name: *const c_char) -> c_int;

    /// Install or replace the rate-limit entry for `cgroup_id`.
    pub fn cgroup_rate_limit_set(cgroup_id: u64, limit: *const RateLimit) -> c_int;

    /// Remove the rate-limit entry for `cgroup_id`, if any.
    pub fn cgroup_rate_limit_unset(cgroup_id: u64) -> c_int;

    /// Detach programs and release kernel resources.
    pub fn close_bpf_obj() -> c_int;
}
