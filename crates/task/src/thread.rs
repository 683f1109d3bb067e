//! TEAM_455: Thread records and the global thread registry.
//!
//! The task core only tracks what lifecycle decisions need: which process a
//! thread belongs to, whether it is about to die, and the statistics folded
//! into a process's exit state. Register state and stacks belong to the
//! scheduler, reached through [`Scheduler`](crate::services::Scheduler).

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};

use bitflags::bitflags;
use hashbrown::HashMap;

use crate::error::ProcError;
use crate::process::Pid;
use crate::sync::SpinLock;

/// Thread identifier, unique system-wide.
pub type Tid = usize;

bitflags! {
    /// TEAM_455: Thread flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ThreadFlags: u8 {
        /// Created blocked; never scheduled until explicitly woken.
        const IDLE = 1 << 0;
        /// Marked for death; the thread exits at its next kernel boundary.
        const WILL_DIE = 1 << 1;
    }
}

/// TEAM_455: A thread as seen by the lifecycle controller.
#[derive(Debug)]
pub struct Thread {
    tid: Tid,
    pid: Pid,
    flags: AtomicU8,
    runtime: AtomicU64,
    sched_count: AtomicU64,
    syscalls: AtomicU64,
}

impl Thread {
    pub fn new(tid: Tid, pid: Pid, flags: ThreadFlags) -> Self {
        Self {
            tid,
            pid,
            flags: AtomicU8::new(flags.bits()),
            runtime: AtomicU64::new(0),
            sched_count: AtomicU64::new(0),
            syscalls: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn tid(&self) -> Tid {
        self.tid
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn flags(&self) -> ThreadFlags {
        ThreadFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn is_idle(&self) -> bool {
        self.flags().contains(ThreadFlags::IDLE)
    }

    pub fn will_die(&self) -> bool {
        self.flags().contains(ThreadFlags::WILL_DIE)
    }

    pub(crate) fn mark_will_die(&self) {
        self.flags
            .fetch_or(ThreadFlags::WILL_DIE.bits(), Ordering::AcqRel);
    }

    // Accounting, fed by the scheduler and syscall entry.

    pub fn add_runtime(&self, ticks: u64) {
        self.runtime.fetch_add(ticks, Ordering::Relaxed);
    }

    pub fn count_schedule(&self) {
        self.sched_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_syscall(&self) {
        self.syscalls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn runtime(&self) -> u64 {
        self.runtime.load(Ordering::Relaxed)
    }

    pub fn sched_count(&self) -> u64 {
        self.sched_count.load(Ordering::Relaxed)
    }

    pub fn syscalls(&self) -> u64 {
        self.syscalls.load(Ordering::Relaxed)
    }
}

/// TEAM_455: All live threads, keyed by tid.
pub struct ThreadRegistry {
    threads: SpinLock<HashMap<Tid, Arc<Thread>>>,
    next_tid: AtomicUsize,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self {
            threads: SpinLock::new(HashMap::new()),
            next_tid: AtomicUsize::new(0),
        }
    }

    /// Create and register a thread of `pid` with a fresh tid.
    pub fn create(&self, pid: Pid, flags: ThreadFlags) -> Result<Arc<Thread>, ProcError> {
        let mut threads = self.threads.lock();
        threads.try_reserve(1).map_err(|_| ProcError::NoMemory)?;
        let tid = self.next_tid.fetch_add(1, Ordering::Relaxed);
        let thread = Arc::new(Thread::new(tid, pid, flags));
        threads.insert(tid, thread.clone());
        log::trace!("[PROC] thread {} created for process {}", tid, pid);
        Ok(thread)
    }

    pub fn get(&self, tid: Tid) -> Option<Arc<Thread>> {
        self.threads.lock().get(&tid).cloned()
    }

    pub fn remove(&self, tid: Tid) -> Option<Arc<Thread>> {
        self.threads.lock().remove(&tid)
    }

    pub fn count(&self) -> usize {
        self.threads.lock().len()
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}
