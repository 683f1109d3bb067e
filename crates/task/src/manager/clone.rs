//! TEAM_462: Fork and thread creation.
//!
//! Fork builds the child step by step and arms a [`Rollback`] after each
//! step. Guards run in reverse order of creation when an error returns
//! early, so a failure at any point leaves the system exactly as it was.
//! Once the child is published every guard is disarmed.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::TaskManager;
use crate::error::ProcError;
use crate::fd_table::FdTable;
use crate::process::{LifecycleState, Pid, ProgState, Process, Region, RegionKind};
use crate::thread::{Thread, ThreadFlags, Tid};

/// Undo action that runs on drop unless disarmed.
struct Rollback<F: FnOnce()> {
    undo: Option<F>,
}

impl<F: FnOnce()> Rollback<F> {
    fn new(undo: F) -> Self {
        Self { undo: Some(undo) }
    }

    fn disarm(mut self) {
        self.undo = None;
    }
}

impl<F: FnOnce()> Drop for Rollback<F> {
    fn drop(&mut self) {
        if let Some(undo) = self.undo.take() {
            undo();
        }
    }
}

/// How a new thread's context is set up.
#[derive(Clone, Copy)]
enum ThreadStart {
    /// Copy of the creating thread
    Fork,
    Entry { entry: usize, arg: usize },
}

impl TaskManager {
    /// TEAM_462: Duplicate the process of `cur`. Returns the child's pid.
    ///
    /// The child gets a copy of the address space, regions and shared
    /// memory, the parent's credentials, command and fds, a share of its
    /// group set, and one thread cloned from `cur`. The child thread is made
    /// runnable only after the child is visible in the table.
    pub fn fork(&self, cur: &Thread) -> Result<Pid, ProcError> {
        let parent = self.request(cur.pid())?;
        let mm = self.services.memory.as_ref();
        let vfs = self.services.vfs.as_ref();
        let parent_prog = parent.lock_prog();

        let space = mm.clone_address_space(parent.pid())?;
        let space_guard = Rollback::new(|| mm.destroy_address_space(space));

        let mut command = String::new();
        command
            .try_reserve_exact(parent_prog.command.len())
            .map_err(|_| ProcError::NoMemory)?;
        command.push_str(&parent_prog.command);

        let pid = self.table.allocate_free_pid()?;
        let pid_guard = Rollback::new(|| self.table.release_pid(pid));

        let mut prog = ProgState::new(parent_prog.creds, command);
        prog.entry_point = parent_prog.entry_point;
        let child = Arc::new(Process::new(
            pid,
            parent.pid(),
            space,
            prog,
            FdTable::new(self.config.max_fds),
        ));

        vfs.create_process_node(pid)?;
        let vfs_guard = Rollback::new(|| vfs.remove_process_node(pid));

        self.groups.join(&child, &parent);
        let groups_guard = Rollback::new(|| self.groups.leave(&child));

        self.clone_regions(&parent, &child)?;
        let regions_guard = Rollback::new(|| self.remove_regions(&child, false));

        mm.clone_shared(parent.pid(), pid)?;
        let shared_guard = Rollback::new(|| mm.remove_shared(pid));

        let thread = self.create_thread(&child, cur, ThreadFlags::empty(), ThreadStart::Fork)?;
        let thread_guard = Rollback::new(|| self.discard_thread(&child, &thread));
        {
            let mut child_prog = child.lock_prog();
            child_prog
                .threads
                .try_reserve(1)
                .map_err(|_| ProcError::NoMemory)?;
            child_prog.threads.push(thread.clone());
        }

        *child.lock_fds() = parent.lock_fds().inherit(vfs);
        let fds_guard = Rollback::new(|| child.lock_fds().release_all(pid, vfs));

        self.table.add(child.clone())?;

        fds_guard.disarm();
        thread_guard.disarm();
        shared_guard.disarm();
        regions_guard.disarm();
        groups_guard.disarm();
        vfs_guard.disarm();
        pid_guard.disarm();
        space_guard.disarm();

        self.events.unblock(thread.tid());
        drop(parent_prog);
        mm.discard_frames(cur.tid());

        log::debug!(
            "[PROC] fork: {} -> {} (thread {})",
            parent.pid(),
            pid,
            thread.tid()
        );
        Ok(pid)
    }

    /// Copy every region of `parent` into `child`. On failure the regions
    /// copied so far are removed again.
    fn clone_regions(&self, parent: &Process, child: &Process) -> Result<(), ProcError> {
        let mm = self.services.memory.as_ref();
        let src = parent.lock_regions();
        let mut copies: Vec<Region> = Vec::new();
        if copies.try_reserve_exact(src.len()).is_err() {
            return Err(ProcError::NoMemory);
        }
        for region in src.iter() {
            match mm.clone_region(parent.pid(), child.pid(), region) {
                Ok(copy) => copies.push(copy),
                Err(err) => {
                    for copy in &copies {
                        mm.remove_region(child.pid(), copy);
                    }
                    return Err(err);
                }
            }
        }
        *child.lock_regions() = copies;
        Ok(())
    }

    /// Remove `proc`'s regions, optionally sparing stacks.
    pub(super) fn remove_regions(&self, proc: &Process, keep_stack: bool) {
        let mm = self.services.memory.as_ref();
        let mut regions = proc.lock_regions();
        regions.retain(|region| {
            if keep_stack && region.kind == RegionKind::Stack {
                return true;
            }
            mm.remove_region(proc.pid(), region);
            false
        });
    }

    /// Create a thread of `proc` and set up its context. The thread is not
    /// added to the process's thread list.
    fn create_thread(
        &self,
        proc: &Process,
        cur: &Thread,
        flags: ThreadFlags,
        start: ThreadStart,
    ) -> Result<Arc<Thread>, ProcError> {
        let thread = self.threads.create(proc.pid(), flags)?;
        let sched = self.services.scheduler.as_ref();
        let ctx = match start {
            ThreadStart::Fork => sched.clone_context(cur.tid(), thread.tid()),
            ThreadStart::Entry { entry, arg } => {
                sched.init_context(cur.tid(), thread.tid(), entry, arg)
            }
        };
        if let Err(err) = ctx {
            self.threads.remove(thread.tid());
            return Err(err);
        }
        Ok(thread)
    }

    /// Undo [`create_thread`](Self::create_thread) and drop the thread from
    /// `proc`'s list if it got there.
    fn discard_thread(&self, proc: &Process, thread: &Arc<Thread>) {
        proc.lock_prog()
            .threads
            .retain(|t| !Arc::ptr_eq(t, thread));
        self.events.remove_thread(thread.tid());
        self.threads.remove(thread.tid());
        self.services.scheduler.destroy_thread(thread.tid());
    }

    /// TEAM_462: Start a new thread in `cur`'s process at `entry` with `arg`.
    ///
    /// An [`ThreadFlags::IDLE`] thread starts blocked; any other is runnable
    /// right away. Frames for the new thread are reserved up front and the
    /// unused rest handed back afterwards, success or not.
    pub fn start_thread(
        &self,
        cur: &Thread,
        entry: usize,
        flags: ThreadFlags,
        arg: usize,
    ) -> Result<Tid, ProcError> {
        let mm = self.services.memory.as_ref();
        mm.reserve_frames(cur.tid());
        let result = self.spawn_thread(cur, entry, flags, arg);
        mm.discard_frames(cur.tid());
        result
    }

    fn spawn_thread(
        &self,
        cur: &Thread,
        entry: usize,
        flags: ThreadFlags,
        arg: usize,
    ) -> Result<Tid, ProcError> {
        let proc = self.request(cur.pid())?;
        let mut prog = proc.lock_prog();
        if proc.state() != LifecycleState::Active {
            return Err(ProcError::InvalidState);
        }
        let thread = self.create_thread(&proc, cur, flags, ThreadStart::Entry { entry, arg })?;
        if prog.threads.try_reserve(1).is_err() {
            drop(prog);
            self.discard_thread(&proc, &thread);
            return Err(ProcError::NoMemory);
        }
        prog.threads.push(thread.clone());

        if flags.contains(ThreadFlags::IDLE) {
            self.events.block(thread.tid());
        } else {
            self.events.unblock(thread.tid());
        }
        log::debug!(
            "[PROC] process {} started thread {} at {:#x}",
            proc.pid(),
            thread.tid(),
            entry
        );
        Ok(thread.tid())
    }
}
