//! Container-id -> cgroup-id binding table.
//!
//! Short-lived (container lifetime), never iterated: load-or-insert on
//! `createContainer`, delete on `poststop`. Backed by `DashMap` for the
//! same reason the teacher keys its shared inventory off one (see
//! `state.rs` in the teacher repo) — concurrent handler tasks touch
//! disjoint keys far more often than they collide.

use dashmap::DashMap;

/// Opaque 64-bit cgroup-v2 identifier.
pub type CgroupId = u64;

#[derive(Default)]
pub struct BindingTable {
    inner: DashMap<String, CgroupId>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `container_id -> cgroup_id`. Returns `false` if a binding
    /// for this id already exists (the reservation is rejected, the
    /// existing binding is left untouched).
    pub fn reserve(&self, container_id: &str, cgroup_id: CgroupId) -> bool {
        match self.inner.entry(container_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(cgroup_id);
                true
            }
        }
    }

    /// Release a reservation (used on any failure path after `reserve`).
    pub fn release(&self, container_id: &str) {
        self.inner.remove(container_id);
    }

    /// Look up and remove a binding (poststop). Returns `None` if the
    /// container id is unknown — idempotent teardown, not an error.
    pub fn take(&self, container_id: &str) -> Option<CgroupId> {
        self.inner.remove(container_id).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_then_duplicate_fails() {
        let table = BindingTable::new();
        assert!(table.reserve("abc", 1));
        assert!(!table.reserve("abc", 2));
    }

    #[test]
    fn release_allows_re_reservation() {
        let table = BindingTable::new();
        assert!(table.reserve("abc", 1));
        table.release("abc");
        assert!(table.reserve("abc", 2));
    }

    #[test]
    fn take_unknown_id_returns_none() {
        let table = BindingTable::new();
        assert_eq!(table.take("nope"), None);
    }

    #[test]
    fn take_removes_binding() {
        let table = BindingTable::new();
        table.reserve("abc", 42);
        assert_eq!(table.take("abc"), Some(42));
        assert_eq!(table.take("abc"), None);
    }
}
