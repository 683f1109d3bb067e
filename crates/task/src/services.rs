//! Collaborator interfaces for the task core.
//!
//! TEAM_460: Decouples process lifecycle from the scheduler, memory manager,
//! VFS, program loader and signal subsystem. The kernel implements these on
//! its subsystems; tests implement them on a recording mock.
//!
//! Calls into a collaborator may happen with a [`BlockingLock`] held, but
//! never with a [`SpinLock`] held, except for [`Scheduler::block`] and the
//! unblock calls made by the event queue.
//!
//! [`BlockingLock`]: crate::sync::BlockingLock
//! [`SpinLock`]: crate::sync::SpinLock

use alloc::sync::Arc;

use crate::error::ProcError;
use crate::fd_table::FileId;
use crate::group::Gid;
use crate::manager::{ArgBuffer, ExecImage, StartupInfo};
use crate::process::{AddressSpaceId, Pid, Region, Signal, Uid};
use crate::thread::Tid;

/// Run-state transitions and thread contexts.
pub trait Scheduler: Send + Sync {
    /// Take the thread off the run queue.
    fn block(&self, tid: Tid);

    /// Make the thread runnable.
    fn unblock(&self, tid: Tid);

    /// Make the thread runnable and prefer it at the next decision.
    fn unblock_quick(&self, tid: Tid) {
        self.unblock(tid);
    }

    fn suspend(&self, tid: Tid);

    fn unsuspend(&self, tid: Tid);

    /// Give `dst` a copy of `src`'s register state (fork).
    fn clone_context(&self, src: Tid, dst: Tid) -> Result<(), ProcError>;

    /// Give `dst` a fresh context that starts at `entry` with `arg`.
    fn init_context(&self, src: Tid, dst: Tid, entry: usize, arg: usize) -> Result<(), ProcError>;

    /// Free the thread's stacks and context. The thread never runs again.
    fn destroy_thread(&self, tid: Tid);
}

/// Address spaces, regions, shared memory and frame reservations.
pub trait MemoryManager: Send + Sync {
    fn clone_address_space(&self, parent: Pid) -> Result<AddressSpaceId, ProcError>;

    fn destroy_address_space(&self, space: AddressSpaceId);

    /// Map `region` of `src` into `dst`, copy-on-write where applicable.
    fn clone_region(&self, src: Pid, dst: Pid, region: &Region) -> Result<Region, ProcError>;

    fn remove_region(&self, pid: Pid, region: &Region);

    /// Join `dst` to every shared-memory segment `src` is attached to.
    fn clone_shared(&self, src: Pid, dst: Pid) -> Result<(), ProcError>;

    fn remove_shared(&self, pid: Pid);

    /// Set aside the frames creating a thread may need, charged to `tid`.
    fn reserve_frames(&self, tid: Tid);

    /// Return whatever is left of `tid`'s reservation.
    fn discard_frames(&self, tid: Tid);
}

/// File and `/proc`-style bookkeeping.
pub trait Vfs: Send + Sync {
    /// Create the per-process node.
    fn create_process_node(&self, pid: Pid) -> Result<(), ProcError>;

    fn remove_process_node(&self, pid: Pid);

    fn inc_refs(&self, file: FileId);

    fn inc_usages(&self, file: FileId);

    fn dec_usages(&self, file: FileId);

    /// Drop one reference held by `pid`. Returns `false` if the file could
    /// not be closed because it is still in use.
    fn close_file(&self, pid: Pid, file: FileId) -> bool;

    /// Open `path` for reading on behalf of `pid`.
    fn open_path(&self, pid: Pid, path: &str) -> Result<FileId, ProcError>;

    /// Check that `path` names an executable on a real filesystem.
    fn resolve_program(&self, path: &str) -> Result<(), ProcError>;

    /// Update ownership of the per-process node.
    fn chown_process(&self, pid: Pid, uid: Uid, gid: Gid);
}

/// Program image loading.
pub trait ProgramLoader: Send + Sync {
    /// Map the image into `pid`'s address space.
    fn load(&self, pid: Pid, image: &ExecImage<'_>) -> Result<StartupInfo, ProcError>;

    /// Lay out the user stack and point `tid` at `entry`.
    fn setup_entry(
        &self,
        tid: Tid,
        args: &ArgBuffer,
        info: &StartupInfo,
        entry: usize,
        linker_fd: Option<usize>,
    ) -> Result<(), ProcError>;
}

/// Signal delivery.
pub trait SignalDelivery: Send + Sync {
    /// Queue `sig` for `tid`. Returns `false` if the thread does not take it.
    fn add_signal_for(&self, tid: Tid, sig: Signal) -> bool;

    /// Whether an unhandled `sig` kills the process.
    fn is_fatal(&self, sig: Signal) -> bool;

    fn unset_handler(&self, tid: Tid, sig: Signal);
}

/// Per-process resources owned elsewhere.
pub trait ProcessResources: Send + Sync {
    fn remove_env(&self, pid: Pid);

    /// Release every user-level lock `pid` holds.
    fn release_locks(&self, pid: Pid);
}

/// TEAM_460: A type implementing every collaborator.
pub trait Platform:
    Scheduler + MemoryManager + Vfs + ProgramLoader + SignalDelivery + ProcessResources
{
}

impl<T> Platform for T where
    T: Scheduler + MemoryManager + Vfs + ProgramLoader + SignalDelivery + ProcessResources
{
}

/// TEAM_460: Collaborators handed to the [`TaskManager`](crate::TaskManager).
#[derive(Clone)]
pub struct Services {
    pub scheduler: Arc<dyn Scheduler>,
    pub memory: Arc<dyn MemoryManager>,
    pub vfs: Arc<dyn Vfs>,
    pub loader: Arc<dyn ProgramLoader>,
    pub signals: Arc<dyn SignalDelivery>,
    pub resources: Arc<dyn ProcessResources>,
}

impl Services {
    /// Use one object for every collaborator.
    pub fn from_platform<P: Platform + 'static>(platform: Arc<P>) -> Self {
        Self {
            scheduler: platform.clone(),
            memory: platform.clone(),
            vfs: platform.clone(),
            loader: platform.clone(),
            signals: platform.clone(),
            resources: platform,
        }
    }
}
