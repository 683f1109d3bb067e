//! TEAM_464: Termination, teardown and reaping.
//!
//! A process dies in three steps:
//! 1. [`terminate`](TaskManager::terminate) records the exit state and marks
//!    every thread to die (Active to Terminating)
//! 2. when the last thread is killed, the process releases its resources and
//!    becomes a zombie; the parent is signalled and woken. A process whose
//!    last thread dies without a prior terminate is marked Terminating
//!    just before teardown
//! 3. the parent reaps it with [`wait_child`](TaskManager::wait_child),
//!    which removes it from the table and hands its children to pid 0
//!
//! Parent notification always happens after the dying process's program
//! lock is released.

use alloc::string::String;
use core::mem;

use super::TaskManager;
use crate::error::ProcError;
use crate::event::{EventKind, EventObject};
use crate::process::{ExitState, LifecycleState, Pid, Process, ProgState, Signal, BOOT_PID};
use crate::process_table::Retired;
use crate::thread::{Thread, Tid};

/// TEAM_464: A reaped child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reaped {
    pub pid: Pid,
    /// `None` only if the child died without ever recording one
    pub state: Option<ExitState>,
}

/// TEAM_464: Result of waiting for a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Reaped(Reaped),
    /// The caller is registered for `ChildDied` and blocked; retry when woken
    Blocked,
}

/// TEAM_464: Result of joining threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStatus {
    Done,
    /// The caller is registered for `ThreadDied` and blocked; retry when woken
    Blocked,
}

/// Whether `p` is a child of `parent`, and the one asked for if any. The
/// boot process is its own parent but not its own child.
fn is_child_of(p: &Process, parent: Pid, child: Option<Pid>) -> bool {
    p.pid() != parent && p.parent() == parent && child.is_none_or(|c| c == p.pid())
}

impl TaskManager {
    /// Record the exit state unless one is already set. Thread statistics are
    /// summed over the threads still in the list.
    fn capture_exit_state(
        proc: &Process,
        prog: &mut ProgState,
        exit_code: i32,
        signal: Option<Signal>,
    ) {
        if prog.exit_state.is_some() {
            return;
        }
        let mut state = ExitState {
            pid: proc.pid(),
            exit_code,
            signal,
            runtime: 0,
            sched_count: 0,
            syscalls: 0,
            frames: proc.frames(),
        };
        for t in &prog.threads {
            state.runtime += t.runtime();
            state.sched_count += t.sched_count();
            state.syscalls += t.syscalls();
        }
        prog.exit_state = Some(state);
    }

    /// TEAM_464: Terminate `pid` with `exit_code`, or because of `signal`.
    ///
    /// Does nothing if the process is already dying. Pid 0 cannot be
    /// terminated.
    pub fn terminate(
        &self,
        pid: Pid,
        exit_code: i32,
        signal: Option<Signal>,
    ) -> Result<(), ProcError> {
        if pid == BOOT_PID {
            log::error!("[PROC] refusing to terminate the boot process");
            return Err(ProcError::InvalidArgument);
        }
        let proc = self.request(pid)?;
        let mut prog = proc.lock_prog();
        if proc.state() != LifecycleState::Active {
            return Ok(());
        }
        if signal.is_some() || exit_code != 0 {
            log::info!(
                "[PROC] process {}:{} terminated by signal {:?}, exit code {}",
                pid,
                prog.command,
                signal.map(|s| s.0),
                exit_code
            );
        }
        Self::capture_exit_state(&proc, &mut prog, exit_code, signal);
        for t in &prog.threads {
            t.mark_will_die();
            self.events.unblock(t.tid());
        }
        proc.set_state(LifecycleState::Terminating);
        Ok(())
    }

    /// Process exit from `cur`: terminate its process with `exit_code`.
    pub fn exit(&self, cur: &Thread, exit_code: i32) -> Result<(), ProcError> {
        self.terminate(cur.pid(), exit_code, None)
    }

    /// Thread exit: `cur` dies at its next kernel boundary, where the
    /// scheduler calls [`kill_thread`](Self::kill_thread).
    pub fn exit_thread(&self, cur: &Thread) {
        cur.mark_will_die();
    }

    /// TEAM_464: Deliver `sig` to the first thread of `pid` that takes it.
    ///
    /// If none does and the signal is fatal, the process is terminated with
    /// exit code 1. Dying processes are skipped.
    pub fn add_signal_for(&self, pid: Pid, sig: Signal) -> Result<(), ProcError> {
        let proc = self.request(pid)?;
        let signals = self.services.signals.as_ref();
        let delivered = {
            let prog = proc.lock_prog();
            if proc.state() != LifecycleState::Active {
                return Ok(());
            }
            prog.threads.iter().any(|t| signals.add_signal_for(t.tid(), sig))
        };
        if !delivered && signals.is_fatal(sig) {
            log::debug!("[PROC] unhandled signal {} kills process {}", sig, pid);
            self.terminate(pid, 1, Some(sig))?;
        }
        Ok(())
    }

    /// TEAM_464: `cur` faulted. A second fault must not re-enter the handler,
    /// so the handler is removed after the signal is queued.
    pub fn segfault(&self, cur: &Thread) -> Result<(), ProcError> {
        let result = self.add_signal_for(cur.pid(), Signal::SEGFAULT);
        self.services
            .signals
            .unset_handler(cur.tid(), Signal::SEGFAULT);
        result
    }

    /// TEAM_464: Remove a dead thread. Killing the last thread of a process
    /// tears the process down.
    pub fn kill_thread(&self, tid: Tid) -> Result<(), ProcError> {
        let thread = self.threads.get(tid).ok_or(ProcError::NoSuchThread)?;
        let proc = self.request(thread.pid())?;

        let parent = {
            let mut prog = proc.lock_prog();
            let last = prog.threads.len() == 1 && prog.threads.first().is_some_and(|t| t.tid() == tid);
            if last {
                // Count the last thread in before it goes away
                Self::capture_exit_state(&proc, &mut prog, 0, None);
            }
            prog.threads.retain(|t| t.tid() != tid);
            self.release_thread(tid);

            if prog.threads.is_empty() && proc.pid() != BOOT_PID {
                Some(self.do_destroy(&proc, &mut prog))
            } else {
                None
            }
        };

        self.events
            .wakeup(EventKind::ThreadDied, EventObject::process(proc.pid()));
        if let Some(parent) = parent {
            self.notify_proc_died(parent, proc.pid());
        }
        Ok(())
    }

    fn release_thread(&self, tid: Tid) {
        self.events.remove_thread(tid);
        self.threads.remove(tid);
        self.services.scheduler.destroy_thread(tid);
    }

    /// TEAM_464: Kill every thread of `pid` and tear it down at once.
    pub fn destroy(&self, pid: Pid) -> Result<(), ProcError> {
        if pid == BOOT_PID {
            return Err(ProcError::InvalidArgument);
        }
        let proc = self.request(pid)?;
        let parent = {
            let mut prog = proc.lock_prog();
            if proc.is_zombie() {
                return Ok(());
            }
            Self::capture_exit_state(&proc, &mut prog, 0, None);
            for t in mem::take(&mut prog.threads) {
                self.release_thread(t.tid());
            }
            self.do_destroy(&proc, &mut prog)
        };
        self.events
            .wakeup(EventKind::ThreadDied, EventObject::process(pid));
        self.notify_proc_died(parent, pid);
        Ok(())
    }

    /// Release everything `proc` owns and make it a zombie. Returns the pid
    /// to notify.
    ///
    /// A process that was never terminated passes through Terminating first.
    fn do_destroy(&self, proc: &Process, prog: &mut ProgState) -> Pid {
        let pid = proc.pid();
        if proc.state() == LifecycleState::Active {
            proc.set_state(LifecycleState::Terminating);
        }
        proc.lock_fds()
            .release_all(pid, self.services.vfs.as_ref());
        self.groups.leave(proc);
        self.services.resources.remove_env(pid);
        self.services.memory.remove_shared(pid);
        self.remove_regions(proc, false);
        self.services
            .memory
            .destroy_address_space(proc.address_space());
        self.services.resources.release_locks(pid);
        prog.threads.clear();
        proc.set_state(LifecycleState::Zombie);
        log::debug!("[PROC] process {} is a zombie", pid);
        proc.parent()
    }

    /// Tell `parent` that `child` died.
    fn notify_proc_died(&self, parent: Pid, child: Pid) {
        if let Err(err) = self.add_signal_for(parent, Signal::CHILD_TERM) {
            log::trace!("[PROC] parent {} of {} not signalled: {}", parent, child, err);
        }
        self.events
            .wakeup(EventKind::ChildDied, EventObject::children(parent));
        self.events
            .wakeup(EventKind::ChildDied, EventObject::process(child));
    }

    /// TEAM_464: Remove the zombie `pid` from the table for good.
    pub fn kill(&self, pid: Pid) -> Result<(), ProcError> {
        if pid == BOOT_PID {
            return Err(ProcError::InvalidArgument);
        }
        if !self.request(pid)?.is_zombie() {
            return Err(ProcError::InvalidState);
        }
        let retired = self
            .table
            .retire(pid, BOOT_PID)
            .ok_or(ProcError::NoSuchProcess)?;
        self.dispose(retired);
        Ok(())
    }

    /// Free what is left of a retired zombie.
    fn dispose(&self, retired: Retired) {
        let Retired {
            process,
            zombie_orphans,
        } = retired;
        {
            let mut prog = process.lock_prog();
            prog.exit_state = None;
            prog.command = String::new();
        }
        self.services.vfs.remove_process_node(process.pid());
        for orphan in zombie_orphans {
            self.notify_proc_died(BOOT_PID, orphan);
        }
        log::trace!("[PROC] process {} released", process.pid());
    }

    /// TEAM_464: Reap a zombie child of `parent`; any child if `child` is `None`.
    pub fn wait_child(&self, parent: Pid, child: Option<Pid>) -> Result<Reaped, ProcError> {
        let retired = self
            .table
            .retire_first(BOOT_PID, |p| {
                is_child_of(p, parent, child) && p.is_zombie()
            })
            .ok_or(ProcError::NoChild)?;
        let reaped = Reaped {
            pid: retired.process.pid(),
            state: retired.process.lock_prog().exit_state,
        };
        self.dispose(retired);
        log::debug!("[PROC] process {} reaped {}", parent, reaped.pid);
        Ok(reaped)
    }

    /// TEAM_464: Reap a zombie child of `cur`'s process, or block until one
    /// dies.
    ///
    /// Fails with [`ProcError::NoChild`] if there is no matching child at all.
    /// The zombie check is repeated after registering, so a child dying in
    /// between is never missed.
    pub fn wait_child_or_block(
        &self,
        cur: &Thread,
        child: Option<Pid>,
    ) -> Result<WaitStatus, ProcError> {
        let parent = cur.pid();
        match self.wait_child(parent, child) {
            Ok(reaped) => return Ok(WaitStatus::Reaped(reaped)),
            Err(ProcError::NoChild) => {}
            Err(err) => return Err(err),
        }
        if !self.table.any(|p| is_child_of(p, parent, child)) {
            return Err(ProcError::NoChild);
        }

        let object = child.map_or(EventObject::children(parent), EventObject::process);
        self.events
            .wait(cur.tid(), EventKind::ChildDied, object)?;

        match self.wait_child(parent, child) {
            Ok(reaped) => {
                self.events.unblock(cur.tid());
                Ok(WaitStatus::Reaped(reaped))
            }
            Err(ProcError::NoChild) => Ok(WaitStatus::Blocked),
            Err(err) => {
                self.events.unblock(cur.tid());
                Err(err)
            }
        }
    }

    /// TEAM_464: Wait until thread `tid` of `cur`'s process is gone, or all
    /// other threads if `tid` is `None`.
    pub fn join(&self, cur: &Thread, tid: Option<Tid>) -> Result<JoinStatus, ProcError> {
        let proc = self.request(cur.pid())?;
        let prog = proc.lock_prog();
        let done = match tid {
            None => prog.threads.len() <= 1,
            Some(t) if t == cur.tid() => return Err(ProcError::InvalidArgument),
            Some(t) => match self.threads.get(t) {
                None => true,
                Some(other) if other.pid() != proc.pid() => {
                    return Err(ProcError::InvalidArgument);
                }
                Some(_) => false,
            },
        };
        if done {
            return Ok(JoinStatus::Done);
        }
        self.events.wait(
            cur.tid(),
            EventKind::ThreadDied,
            EventObject::process(proc.pid()),
        )?;
        Ok(JoinStatus::Blocked)
    }

    /// Exit state of `pid` if it has one.
    pub fn exit_state_of(&self, pid: Pid) -> Option<ExitState> {
        let proc = self.table.lookup(pid)?;
        let prog = proc.lock_prog();
        prog.exit_state
    }
}
