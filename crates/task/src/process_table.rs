//! TEAM_188: Process table for parent-child tracking and waitpid.
//! TEAM_459: Pid-indexed slots with reservation, reparenting and reaping.
//!
//! Pids are allocated from a rotating cursor so a freed pid is not handed
//! out again right away. Allocation reserves the slot; the record is
//! published with [`ProcessTable::add`] once it is fully built, so lookups
//! never see a half-constructed process.
//!
//! Behaviors:
//! - [T1] pid 0 is never handed out by allocation
//! - [T2] a reserved pid is invisible to lookup
//! - [T3] retiring a process reparents its children in the same critical section

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::ProcError;
use crate::process::{Pid, Process, BOOT_PID};
use crate::sync::SpinLock;

enum Slot {
    Free,
    Reserved,
    Live(Arc<Process>),
}

struct TableInner {
    slots: Vec<Slot>,
    /// Live pids in insertion order
    order: Vec<Pid>,
    next_pid: Pid,
}

impl TableInner {
    fn live(&self, pid: Pid) -> Option<&Arc<Process>> {
        match self.slots.get(pid) {
            Some(Slot::Live(p)) => Some(p),
            _ => None,
        }
    }

    /// Take `pid` out of the table and hand its children to `heir`.
    fn retire(&mut self, pid: Pid, heir: Pid) -> Option<Retired> {
        let slot = self.slots.get_mut(pid)?;
        if !matches!(slot, Slot::Live(_)) {
            return None;
        }
        let Slot::Live(process) = core::mem::replace(slot, Slot::Free) else {
            return None;
        };
        self.order.retain(|&p| p != pid);

        let mut zombie_orphans = Vec::new();
        for &child_pid in &self.order {
            if let Some(Slot::Live(child)) = self.slots.get(child_pid)
                && child.parent() == pid
            {
                child.set_parent(heir);
                if child.is_zombie() {
                    zombie_orphans.push(child_pid);
                }
            }
        }
        Some(Retired {
            process,
            zombie_orphans,
        })
    }
}

/// TEAM_459: A process taken out of the table.
pub struct Retired {
    pub process: Arc<Process>,
    /// Children that were already zombies when they were reparented
    pub zombie_orphans: Vec<Pid>,
}

/// TEAM_188: Global process table.
pub struct ProcessTable {
    inner: SpinLock<TableInner>,
}

impl ProcessTable {
    /// Table with `max_procs` slots.
    pub fn new(max_procs: usize) -> Self {
        let mut slots = Vec::with_capacity(max_procs);
        slots.resize_with(max_procs, || Slot::Free);
        Self {
            inner: SpinLock::new(TableInner {
                slots,
                order: Vec::with_capacity(max_procs),
                next_pid: 1,
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// [T1] Reserve the next free pid after the cursor, wrapping to 1.
    pub fn allocate_free_pid(&self) -> Result<Pid, ProcError> {
        let mut inner = self.inner.lock();
        let len = inner.slots.len();
        for _ in 0..len {
            if inner.next_pid >= len {
                inner.next_pid = 1;
            }
            let pid = inner.next_pid;
            inner.next_pid += 1;
            if pid != BOOT_PID && matches!(inner.slots[pid], Slot::Free) {
                inner.slots[pid] = Slot::Reserved;
                return Ok(pid);
            }
        }
        log::warn!("[PROC] process table full ({} slots)", len);
        Err(ProcError::NoPids)
    }

    /// Give back a pid reserved by [`allocate_free_pid`](Self::allocate_free_pid)
    /// that was never published.
    pub fn release_pid(&self, pid: Pid) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.slots.get_mut(pid)
            && matches!(slot, Slot::Reserved)
        {
            *slot = Slot::Free;
        }
    }

    /// TEAM_188: Publish `process` under its pid.
    pub fn add(&self, process: Arc<Process>) -> Result<(), ProcError> {
        let pid = process.pid();
        let mut inner = self.inner.lock();
        match inner.slots.get(pid) {
            None => return Err(ProcError::InvalidArgument),
            Some(Slot::Live(_)) => return Err(ProcError::InvalidState),
            Some(_) => {}
        }
        inner
            .order
            .try_reserve(1)
            .map_err(|_| ProcError::NoMemory)?;
        inner.slots[pid] = Slot::Live(process);
        inner.order.push(pid);
        Ok(())
    }

    /// [T2] Live process with this pid.
    pub fn lookup(&self, pid: Pid) -> Option<Arc<Process>> {
        self.inner.lock().live(pid).cloned()
    }

    /// [T3] Remove `pid`, reparenting its children to `heir`.
    pub fn retire(&self, pid: Pid, heir: Pid) -> Option<Retired> {
        self.inner.lock().retire(pid, heir)
    }

    /// [T3] Remove the first process (in table order) matching `pred`.
    pub fn retire_first(
        &self,
        heir: Pid,
        mut pred: impl FnMut(&Process) -> bool,
    ) -> Option<Retired> {
        let mut inner = self.inner.lock();
        let pid = inner
            .order
            .iter()
            .copied()
            .find(|&pid| inner.live(pid).is_some_and(|p| pred(&**p)))?;
        inner.retire(pid, heir)
    }

    pub fn any(&self, mut pred: impl FnMut(&Process) -> bool) -> bool {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .any(|&pid| inner.live(pid).is_some_and(|p| pred(&**p)))
    }

    pub fn children_of(&self, parent: Pid) -> Vec<Pid> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .copied()
            .filter(|&pid| {
                pid != parent && inner.live(pid).is_some_and(|p| p.parent() == parent)
            })
            .collect()
    }

    /// Live processes in table order.
    pub fn snapshot(&self) -> Vec<Arc<Process>> {
        let inner = self.inner.lock();
        inner
            .order
            .iter()
            .filter_map(|&pid| inner.live(pid).cloned())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fd_table::FdTable;
    use crate::process::{AddressSpaceId, Credentials, LifecycleState, ProgState};
    use alloc::string::String;

    fn proc(pid: Pid, parent: Pid) -> Arc<Process> {
        Arc::new(Process::new(
            pid,
            parent,
            AddressSpaceId(pid),
            ProgState::new(Credentials::ROOT, String::from("p")),
            FdTable::new(1),
        ))
    }

    fn zombie(p: &Process) {
        let _prog = p.lock_prog();
        p.set_state(LifecycleState::Zombie);
    }

    /// Tests: [T1] allocation skips pid 0 and wraps
    #[test]
    fn test_allocation_rotates_and_wraps() {
        let table = ProcessTable::new(4);
        table.add(proc(0, 0)).unwrap();
        assert_eq!(table.allocate_free_pid(), Ok(1));
        assert_eq!(table.allocate_free_pid(), Ok(2));
        assert_eq!(table.allocate_free_pid(), Ok(3));
        assert_eq!(table.allocate_free_pid(), Err(ProcError::NoPids));

        table.release_pid(2);
        assert_eq!(table.allocate_free_pid(), Ok(2));
    }

    #[test]
    fn test_freed_pid_not_reused_immediately() {
        let table = ProcessTable::new(8);
        let pid = table.allocate_free_pid().unwrap();
        table.add(proc(pid, 0)).unwrap();
        table.retire(pid, 0).unwrap();
        assert_ne!(table.allocate_free_pid(), Ok(pid));
    }

    /// Tests: [T2] reserved slots stay invisible
    #[test]
    fn test_reserved_pid_not_visible() {
        let table = ProcessTable::new(4);
        let pid = table.allocate_free_pid().unwrap();
        assert!(table.lookup(pid).is_none());
        table.add(proc(pid, 0)).unwrap();
        assert_eq!(table.lookup(pid).map(|p| p.pid()), Some(pid));
        assert_eq!(table.add(proc(pid, 0)), Err(ProcError::InvalidState));
        assert_eq!(table.add(proc(9, 0)), Err(ProcError::InvalidArgument));
    }

    /// Tests: [T3] children move to the heir, zombies are reported
    #[test]
    fn test_retire_reparents_children() {
        let table = ProcessTable::new(8);
        for p in [proc(1, 0), proc(2, 1), proc(3, 1)] {
            table.add(p).unwrap();
        }
        zombie(&table.lookup(3).unwrap());

        let retired = table.retire(1, 0).unwrap();
        assert_eq!(retired.process.pid(), 1);
        assert_eq!(retired.zombie_orphans, [3]);
        assert_eq!(table.lookup(2).unwrap().parent(), 0);
        assert_eq!(table.children_of(0), [2, 3]);
        assert!(table.retire(1, 0).is_none());
    }

    #[test]
    fn test_retire_first_matches_in_order() {
        let table = ProcessTable::new(8);
        for p in [proc(4, 1), proc(2, 1), proc(5, 1)] {
            table.add(p).unwrap();
        }
        zombie(&table.lookup(2).unwrap());
        zombie(&table.lookup(5).unwrap());

        let first = table
            .retire_first(0, |p| p.parent() == 1 && p.is_zombie())
            .unwrap();
        assert_eq!(first.process.pid(), 2);
        assert_eq!(table.count(), 2);
        assert!(table.any(|p| p.pid() == 5));
        let pids: Vec<_> = table.snapshot().iter().map(|p| p.pid()).collect();
        assert_eq!(pids, [4, 5]);
    }
}
