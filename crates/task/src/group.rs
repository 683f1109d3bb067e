//! TEAM_458: Reference-counted supplementary group sets.
//!
//! A forked child shares its parent's set instead of copying it; the set is
//! freed when the last process referencing it leaves. Sets are immutable
//! once built, so replacing a process's groups always allocates a new one.
//!
//! The store caps how many sets may be alive at once. That cap is the only
//! source of exhaustion besides the heap.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ProcError;
use crate::process::Process;

pub type Gid = u32;

/// TEAM_458: An immutable list of group ids.
#[derive(Debug)]
pub struct GroupSet {
    gids: Box<[Gid]>,
    live: Arc<AtomicUsize>,
}

impl GroupSet {
    pub fn gids(&self) -> &[Gid] {
        &self.gids
    }

    pub fn contains(&self, gid: Gid) -> bool {
        self.gids.contains(&gid)
    }

    pub fn len(&self) -> usize {
        self.gids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gids.is_empty()
    }
}

impl Drop for GroupSet {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// TEAM_458: Allocator and bookkeeping for group sets.
pub struct GroupStore {
    live: Arc<AtomicUsize>,
    max_sets: usize,
    max_groups: usize,
}

impl GroupStore {
    pub fn new(max_sets: usize, max_groups: usize) -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            max_sets,
            max_groups,
        }
    }

    fn allocate(&self, gids: &[Gid]) -> Result<Arc<GroupSet>, ProcError> {
        self.live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max_sets).then_some(n + 1)
            })
            .map_err(|_| ProcError::NoMemory)?;

        let mut copy = Vec::new();
        if copy.try_reserve_exact(gids.len()).is_err() {
            self.live.fetch_sub(1, Ordering::AcqRel);
            return Err(ProcError::NoMemory);
        }
        copy.extend_from_slice(gids);
        Ok(Arc::new(GroupSet {
            gids: copy.into_boxed_slice(),
            live: self.live.clone(),
        }))
    }

    /// Give `proc` a fresh set holding `gids`.
    ///
    /// The old set is released before the new one is allocated. If that
    /// allocation fails the process is left without groups.
    pub fn set(&self, proc: &Process, gids: &[Gid]) -> Result<(), ProcError> {
        if gids.len() > self.max_groups {
            return Err(ProcError::InvalidArgument);
        }
        let mut slot = proc.groups.lock();
        drop(slot.take());
        match self.allocate(gids) {
            Ok(set) => {
                *slot = Some(set);
                Ok(())
            }
            Err(err) => {
                log::warn!("[GROUPS] process {} left without groups: {}", proc.pid(), err);
                Err(err)
            }
        }
    }

    /// Make `dst` share `src`'s set. `dst` must not hold a set yet.
    pub fn join(&self, dst: &Process, src: &Process) {
        let set = src.groups.lock().clone();
        *dst.groups.lock() = set;
    }

    /// Drop `proc`'s reference; the set is freed with its last reference.
    pub fn leave(&self, proc: &Process) {
        let old = proc.groups.lock().take();
        drop(old);
    }

    pub fn contains(&self, proc: &Process, gid: Gid) -> bool {
        proc.groups
            .lock()
            .as_ref()
            .is_some_and(|set| set.contains(gid))
    }

    /// Copy of `proc`'s group ids (empty without a set).
    pub fn get(&self, proc: &Process) -> Vec<Gid> {
        proc.groups
            .lock()
            .as_ref()
            .map_or_else(Vec::new, |set| set.gids().to_vec())
    }

    /// Processes sharing `proc`'s set, 0 without a set.
    pub fn ref_count(&self, proc: &Process) -> usize {
        proc.groups.lock().as_ref().map_or(0, Arc::strong_count)
    }

    /// Sets currently alive.
    pub fn live_sets(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn max_groups(&self) -> usize {
        self.max_groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fd_table::FdTable;
    use crate::process::{AddressSpaceId, Credentials, ProgState, BOOT_PID};
    use alloc::string::String;

    fn proc(pid: usize) -> Process {
        Process::new(
            pid,
            BOOT_PID,
            AddressSpaceId(pid),
            ProgState::new(Credentials::ROOT, String::new()),
            FdTable::new(1),
        )
    }

    #[test]
    fn test_set_then_join_shares() {
        let store = GroupStore::new(8, 4);
        let a = proc(5);
        let b = proc(6);
        store.set(&a, &[10, 20]).unwrap();
        store.join(&b, &a);

        assert_eq!(store.ref_count(&a), 2);
        assert!(store.contains(&b, 20));
        assert!(!store.contains(&b, 30));
        assert_eq!(store.live_sets(), 1);
    }

    #[test]
    fn test_set_replaces_only_own_set() {
        let store = GroupStore::new(8, 4);
        let a = proc(5);
        let b = proc(6);
        store.set(&a, &[10, 20]).unwrap();
        store.join(&b, &a);

        store.set(&a, &[30]).unwrap();
        assert_eq!(store.get(&a), [30]);
        assert_eq!(store.get(&b), [10, 20]);
        assert_eq!(store.ref_count(&a), 1);
        assert_eq!(store.ref_count(&b), 1);
        assert_eq!(store.live_sets(), 2);
    }

    #[test]
    fn test_last_leave_frees_set() {
        let store = GroupStore::new(8, 4);
        let a = proc(1);
        let b = proc(2);
        store.set(&a, &[1]).unwrap();
        store.join(&b, &a);
        store.leave(&a);
        assert_eq!(store.live_sets(), 1);
        store.leave(&b);
        assert_eq!(store.live_sets(), 0);
        // Leaving without a set is a no-op
        store.leave(&b);
        assert_eq!(store.ref_count(&b), 0);
    }

    #[test]
    fn test_exhausted_store_leaves_process_without_groups() {
        let store = GroupStore::new(1, 4);
        let a = proc(1);
        let b = proc(2);
        store.set(&a, &[1]).unwrap();
        store.set(&b, &[2]).unwrap_err();
        assert!(store.get(&b).is_empty());

        // The old set is released first, so replacing is always possible
        store.set(&a, &[3]).unwrap();
        assert_eq!(store.get(&a), [3]);
    }

    #[test]
    fn test_too_many_groups() {
        let store = GroupStore::new(4, 2);
        let a = proc(1);
        store.set(&a, &[1]).unwrap();
        assert_eq!(store.set(&a, &[1, 2, 3]), Err(ProcError::InvalidArgument));
        // Rejected before the old set is touched
        assert_eq!(store.get(&a), [1]);
    }
}
