//! TEAM_457: The process record.
//!
//! A process is a container of threads sharing an address space, a file
//! table, credentials and a group set. Its mutable state is split across
//! three [`BlockingLock`]s so region or fd work never contends with program
//! state:
//!
//! - `lock_prog()`: credentials, command, entry point, thread list, exit state
//! - `lock_regions()`: mapped regions
//! - `lock_fds()`: file descriptor table
//!
//! The group set sits behind a [`SpinLock`] and is managed by
//! [`GroupStore`](crate::group::GroupStore).

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use crate::fd_table::FdTable;
use crate::group::{Gid, GroupSet};
use crate::sync::{BlockingGuard, BlockingLock, SpinLock};
use crate::thread::Thread;

/// Process identifier; doubles as the process table index.
pub type Pid = usize;
pub type Uid = u32;

/// The boot process. Never terminated or reaped; adopts orphans.
pub const BOOT_PID: Pid = 0;
pub const ROOT_UID: Uid = 0;
pub const ROOT_GID: Gid = 0;

/// TEAM_457: Signal number as understood by the signal collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signal(pub u8);

impl Signal {
    pub const KILL: Self = Self(9);
    pub const SEGFAULT: Self = Self(11);
    pub const CHILD_TERM: Self = Self(17);
}

impl core::fmt::Display for Signal {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// TEAM_457: Where a process is in its life.
///
/// Moves only forward: Active, Terminating, Zombie. Reaping removes the
/// record from the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Active = 0,
    /// Terminated; threads are marked to die but not all gone yet
    Terminating = 1,
    /// Torn down; only the exit state remains for the parent
    Zombie = 2,
}

impl LifecycleState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Active,
            1 => Self::Terminating,
            _ => Self::Zombie,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Credentials {
    pub ruid: Uid,
    pub euid: Uid,
    pub suid: Uid,
    pub rgid: Gid,
    pub egid: Gid,
    pub sgid: Gid,
}

impl Credentials {
    pub const ROOT: Self = Self {
        ruid: ROOT_UID,
        euid: ROOT_UID,
        suid: ROOT_UID,
        rgid: ROOT_GID,
        egid: ROOT_GID,
        sgid: ROOT_GID,
    };

    pub fn is_root(&self) -> bool {
        self.euid == ROOT_UID
    }
}

/// Physical frames charged to a process, maintained by the memory manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameUsage {
    pub own: usize,
    pub shared: usize,
    pub swapped: usize,
}

/// TEAM_457: What a parent learns when it reaps a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitState {
    pub pid: Pid,
    pub exit_code: i32,
    /// Signal that killed the process, if any
    pub signal: Option<Signal>,
    pub runtime: u64,
    pub sched_count: u64,
    pub syscalls: u64,
    pub frames: FrameUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressSpaceId(pub usize);

impl AddressSpaceId {
    /// Address space the boot process starts in.
    pub const BOOT: Self = Self(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Text,
    Data,
    Heap,
    Stack,
    Tls,
    Shared,
}

/// A mapped region. The mapping itself is owned by the memory manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub id: usize,
    pub kind: RegionKind,
}

/// TEAM_457: State guarded by the program lock.
#[derive(Debug)]
pub struct ProgState {
    pub creds: Credentials,
    /// Program name shown by process listings
    pub command: String,
    pub entry_point: usize,
    pub threads: Vec<Arc<Thread>>,
    /// Set at most once, when the process starts dying
    pub exit_state: Option<ExitState>,
}

impl ProgState {
    pub fn new(creds: Credentials, command: String) -> Self {
        Self {
            creds,
            command,
            entry_point: 0,
            threads: Vec::new(),
            exit_state: None,
        }
    }
}

/// TEAM_457: A process record.
pub struct Process {
    pid: Pid,
    parent: AtomicUsize,
    /// Written only with the program lock held
    state: AtomicU8,
    address_space: AddressSpaceId,
    prog: BlockingLock<ProgState>,
    regions: BlockingLock<Vec<Region>>,
    fds: BlockingLock<FdTable>,
    pub(crate) groups: SpinLock<Option<Arc<GroupSet>>>,
    own_frames: AtomicUsize,
    shared_frames: AtomicUsize,
    swapped_frames: AtomicUsize,
}

impl Process {
    pub(crate) fn new(
        pid: Pid,
        parent: Pid,
        address_space: AddressSpaceId,
        prog: ProgState,
        fds: FdTable,
    ) -> Self {
        Self {
            pid,
            parent: AtomicUsize::new(parent),
            state: AtomicU8::new(LifecycleState::Active as u8),
            address_space,
            prog: BlockingLock::new(prog),
            regions: BlockingLock::new(Vec::new()),
            fds: BlockingLock::new(fds),
            groups: SpinLock::new(None),
            own_frames: AtomicUsize::new(0),
            shared_frames: AtomicUsize::new(0),
            swapped_frames: AtomicUsize::new(0),
        }
    }

    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn parent(&self) -> Pid {
        self.parent.load(Ordering::Acquire)
    }

    pub(crate) fn set_parent(&self, parent: Pid) {
        self.parent.store(parent, Ordering::Release);
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Caller holds the program lock.
    pub(crate) fn set_state(&self, state: LifecycleState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_zombie(&self) -> bool {
        self.state() == LifecycleState::Zombie
    }

    pub fn address_space(&self) -> AddressSpaceId {
        self.address_space
    }

    pub fn lock_prog(&self) -> BlockingGuard<'_, ProgState> {
        self.prog.lock()
    }

    pub fn lock_regions(&self) -> BlockingGuard<'_, Vec<Region>> {
        self.regions.lock()
    }

    pub fn lock_fds(&self) -> BlockingGuard<'_, FdTable> {
        self.fds.lock()
    }

    /// Current group set, if any. Holding the returned `Arc` keeps the set alive.
    pub fn groups(&self) -> Option<Arc<GroupSet>> {
        self.groups.lock().clone()
    }

    pub fn frames(&self) -> FrameUsage {
        FrameUsage {
            own: self.own_frames.load(Ordering::Relaxed),
            shared: self.shared_frames.load(Ordering::Relaxed),
            swapped: self.swapped_frames.load(Ordering::Relaxed),
        }
    }

    /// Memory manager hook: publish the frames charged to this process.
    pub fn set_frames(&self, usage: FrameUsage) {
        self.own_frames.store(usage.own, Ordering::Relaxed);
        self.shared_frames.store(usage.shared, Ordering::Relaxed);
        self.swapped_frames.store(usage.swapped, Ordering::Relaxed);
    }
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("parent", &self.parent())
            .field("state", &self.state())
            .field("address_space", &self.address_space)
            .finish_non_exhaustive()
    }
}
