//! Recording mock of every collaborator, with injectable failures.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use los_task::fd_table::FileId;
use los_task::group::Gid;
use los_task::process::{AddressSpaceId, Region, RegionKind, Uid};
use los_task::services::{
    MemoryManager, ProcessResources, ProgramLoader, Scheduler, SignalDelivery, Vfs,
};
use los_task::{
    ArgBuffer, ExecImage, Pid, ProcError, Services, Signal, StartupInfo, TaskConfig, TaskManager,
    Thread, Tid,
};

/// Operations the mock can be told to fail.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailPoints {
    pub address_space: bool,
    pub vfs_node: bool,
    /// Fail cloning the n-th region (0-based)
    pub region: Option<usize>,
    pub shared: bool,
    pub thread_context: bool,
    pub resolve: bool,
    pub load: bool,
    pub open: bool,
    pub setup: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setup {
    pub tid: Tid,
    pub args: Vec<String>,
    pub entry: usize,
    pub linker_fd: Option<usize>,
}

#[derive(Default)]
pub struct MockPlatform {
    pub fail: Mutex<FailPoints>,

    pub blocked: Mutex<HashSet<Tid>>,
    pub unblocks: Mutex<HashMap<Tid, usize>>,
    pub contexts: Mutex<HashSet<Tid>>,
    pub destroyed_threads: Mutex<Vec<Tid>>,

    pub spaces: Mutex<HashSet<AddressSpaceId>>,
    next_space: Mutex<usize>,
    pub regions: Mutex<HashSet<(Pid, usize)>>,
    next_region: Mutex<usize>,
    pub shared: Mutex<HashSet<Pid>>,
    pub reserved: Mutex<HashSet<Tid>>,
    pub discards: Mutex<Vec<Tid>>,

    pub nodes: Mutex<HashSet<Pid>>,
    pub refs: Mutex<HashMap<FileId, isize>>,
    pub usages: Mutex<HashMap<FileId, isize>>,
    pub closed: Mutex<Vec<(Pid, FileId)>>,
    next_file: Mutex<usize>,
    pub chowns: Mutex<Vec<(Pid, Uid, Gid)>>,

    pub startup: Mutex<StartupInfo>,
    pub loads: Mutex<Vec<(Pid, String)>>,
    pub setups: Mutex<Vec<Setup>>,

    /// Threads with a handler installed; they accept every signal
    pub handlers: Mutex<HashSet<Tid>>,
    pub signals: Mutex<Vec<(Tid, Signal)>>,
    pub unset: Mutex<Vec<(Tid, Signal)>>,

    pub env_removed: Mutex<Vec<Pid>>,
    pub locks_released: Mutex<Vec<Pid>>,
    /// Teardown-relevant calls in order
    pub trace: Mutex<Vec<String>>,
    /// Runs inside `remove_env`, in the middle of a process teardown
    pub on_teardown: Mutex<Option<Box<dyn Fn(Pid) + Send>>>,
}

impl MockPlatform {
    pub fn new() -> Arc<Self> {
        let mock = Self::default();
        *mock.next_space.lock().unwrap() = 1;
        *mock.next_region.lock().unwrap() = 1;
        *mock.next_file.lock().unwrap() = 1;
        *mock.startup.lock().unwrap() = StartupInfo {
            prog_entry: 0x40_0000,
            linker_entry: 0x40_0000,
            stack_begin: 0x7fff_0000,
        };
        Arc::new(mock)
    }

    pub fn set_fail(&self, f: impl FnOnce(&mut FailPoints)) {
        f(&mut self.fail.lock().unwrap());
    }

    fn failing(&self) -> FailPoints {
        *self.fail.lock().unwrap()
    }

    fn record(&self, what: impl Into<String>) {
        self.trace.lock().unwrap().push(what.into());
    }

    pub fn take_trace(&self) -> Vec<String> {
        std::mem::take(&mut *self.trace.lock().unwrap())
    }

    pub fn unblocks(&self, tid: Tid) -> usize {
        self.unblocks.lock().unwrap().get(&tid).copied().unwrap_or(0)
    }

    pub fn is_blocked(&self, tid: Tid) -> bool {
        self.blocked.lock().unwrap().contains(&tid)
    }

    pub fn live_spaces(&self) -> usize {
        self.spaces.lock().unwrap().len()
    }

    pub fn regions_of(&self, pid: Pid) -> usize {
        self.regions
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == pid)
            .count()
    }

    pub fn has_node(&self, pid: Pid) -> bool {
        self.nodes.lock().unwrap().contains(&pid)
    }

    pub fn refs(&self, file: FileId) -> isize {
        self.refs.lock().unwrap().get(&file).copied().unwrap_or(0)
    }

    pub fn usages(&self, file: FileId) -> isize {
        self.usages.lock().unwrap().get(&file).copied().unwrap_or(0)
    }

    /// A freshly opened file holding one reference.
    pub fn open_file(&self) -> FileId {
        let mut next = self.next_file.lock().unwrap();
        let file = FileId(*next);
        *next += 1;
        self.refs.lock().unwrap().insert(file, 1);
        file
    }

    /// Map a region into `pid` as the memory manager would.
    pub fn map_region(&self, proc: &los_task::Process, kind: RegionKind) -> Region {
        let mut next = self.next_region.lock().unwrap();
        let region = Region { id: *next, kind };
        *next += 1;
        self.regions.lock().unwrap().insert((proc.pid(), region.id));
        proc.lock_regions().push(region);
        region
    }

    pub fn signals_for(&self, tid: Tid) -> Vec<Signal> {
        self.signals
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| *t == tid)
            .map(|(_, s)| *s)
            .collect()
    }
}

impl Scheduler for MockPlatform {
    fn block(&self, tid: Tid) {
        self.blocked.lock().unwrap().insert(tid);
    }

    fn unblock(&self, tid: Tid) {
        self.blocked.lock().unwrap().remove(&tid);
        *self.unblocks.lock().unwrap().entry(tid).or_default() += 1;
    }

    fn suspend(&self, _tid: Tid) {}

    fn unsuspend(&self, _tid: Tid) {}

    fn clone_context(&self, _src: Tid, dst: Tid) -> Result<(), ProcError> {
        if self.failing().thread_context {
            return Err(ProcError::NoMemory);
        }
        self.contexts.lock().unwrap().insert(dst);
        Ok(())
    }

    fn init_context(&self, _src: Tid, dst: Tid, _entry: usize, _arg: usize) -> Result<(), ProcError> {
        if self.failing().thread_context {
            return Err(ProcError::NoMemory);
        }
        self.contexts.lock().unwrap().insert(dst);
        Ok(())
    }

    fn destroy_thread(&self, tid: Tid) {
        self.contexts.lock().unwrap().remove(&tid);
        self.destroyed_threads.lock().unwrap().push(tid);
    }
}

impl MemoryManager for MockPlatform {
    fn clone_address_space(&self, _parent: Pid) -> Result<AddressSpaceId, ProcError> {
        if self.failing().address_space {
            return Err(ProcError::NoMemory);
        }
        let mut next = self.next_space.lock().unwrap();
        let space = AddressSpaceId(*next);
        *next += 1;
        self.spaces.lock().unwrap().insert(space);
        Ok(space)
    }

    fn destroy_address_space(&self, space: AddressSpaceId) {
        self.record("destroy_space");
        self.spaces.lock().unwrap().remove(&space);
    }

    fn clone_region(&self, _src: Pid, dst: Pid, region: &Region) -> Result<Region, ProcError> {
        if let Some(n) = self.failing().region
            && self.regions_of(dst) == n
        {
            return Err(ProcError::NoMemory);
        }
        let mut next = self.next_region.lock().unwrap();
        let copy = Region {
            id: *next,
            kind: region.kind,
        };
        *next += 1;
        self.regions.lock().unwrap().insert((dst, copy.id));
        Ok(copy)
    }

    fn remove_region(&self, pid: Pid, region: &Region) {
        self.record("remove_region");
        self.regions.lock().unwrap().remove(&(pid, region.id));
    }

    fn clone_shared(&self, _src: Pid, dst: Pid) -> Result<(), ProcError> {
        if self.failing().shared {
            return Err(ProcError::NoMemory);
        }
        self.shared.lock().unwrap().insert(dst);
        Ok(())
    }

    fn remove_shared(&self, pid: Pid) {
        self.record("remove_shared");
        self.shared.lock().unwrap().remove(&pid);
    }

    fn reserve_frames(&self, tid: Tid) {
        self.reserved.lock().unwrap().insert(tid);
    }

    fn discard_frames(&self, tid: Tid) {
        self.reserved.lock().unwrap().remove(&tid);
        self.discards.lock().unwrap().push(tid);
    }
}

impl Vfs for MockPlatform {
    fn create_process_node(&self, pid: Pid) -> Result<(), ProcError> {
        if self.failing().vfs_node {
            return Err(ProcError::NoMemory);
        }
        self.nodes.lock().unwrap().insert(pid);
        Ok(())
    }

    fn remove_process_node(&self, pid: Pid) {
        self.nodes.lock().unwrap().remove(&pid);
    }

    fn inc_refs(&self, file: FileId) {
        *self.refs.lock().unwrap().entry(file).or_default() += 1;
    }

    fn inc_usages(&self, file: FileId) {
        *self.usages.lock().unwrap().entry(file).or_default() += 1;
    }

    fn dec_usages(&self, file: FileId) {
        *self.usages.lock().unwrap().entry(file).or_default() -= 1;
    }

    fn close_file(&self, pid: Pid, file: FileId) -> bool {
        self.record("close_file");
        self.closed.lock().unwrap().push((pid, file));
        *self.refs.lock().unwrap().entry(file).or_default() -= 1;
        true
    }

    fn open_path(&self, _pid: Pid, _path: &str) -> Result<FileId, ProcError> {
        if self.failing().open {
            return Err(ProcError::InvalidArgument);
        }
        Ok(self.open_file())
    }

    fn resolve_program(&self, _path: &str) -> Result<(), ProcError> {
        if self.failing().resolve {
            return Err(ProcError::Io(los_task::Errno(2)));
        }
        Ok(())
    }

    fn chown_process(&self, pid: Pid, uid: Uid, gid: Gid) {
        self.chowns.lock().unwrap().push((pid, uid, gid));
    }
}

impl ProgramLoader for MockPlatform {
    fn load(&self, pid: Pid, image: &ExecImage<'_>) -> Result<StartupInfo, ProcError> {
        if self.failing().load {
            return Err(ProcError::NoMemory);
        }
        self.loads
            .lock()
            .unwrap()
            .push((pid, image.name().to_string()));
        Ok(*self.startup.lock().unwrap())
    }

    fn setup_entry(
        &self,
        tid: Tid,
        args: &ArgBuffer,
        _info: &StartupInfo,
        entry: usize,
        linker_fd: Option<usize>,
    ) -> Result<(), ProcError> {
        if self.failing().setup {
            return Err(ProcError::Fault);
        }
        self.setups.lock().unwrap().push(Setup {
            tid,
            args: args
                .iter()
                .map(|a| String::from_utf8_lossy(a).into_owned())
                .collect(),
            entry,
            linker_fd,
        });
        Ok(())
    }
}

impl SignalDelivery for MockPlatform {
    fn add_signal_for(&self, tid: Tid, sig: Signal) -> bool {
        if !self.handlers.lock().unwrap().contains(&tid) {
            return false;
        }
        self.signals.lock().unwrap().push((tid, sig));
        true
    }

    fn is_fatal(&self, sig: Signal) -> bool {
        sig == Signal::KILL || sig == Signal::SEGFAULT
    }

    fn unset_handler(&self, tid: Tid, sig: Signal) {
        self.unset.lock().unwrap().push((tid, sig));
    }
}

impl ProcessResources for MockPlatform {
    fn remove_env(&self, pid: Pid) {
        self.record("remove_env");
        self.env_removed.lock().unwrap().push(pid);
        if let Some(hook) = self.on_teardown.lock().unwrap().as_ref() {
            hook(pid);
        }
    }

    fn release_locks(&self, pid: Pid) {
        self.record("release_locks");
        self.locks_released.lock().unwrap().push(pid);
    }
}

// ----------------------------------------------------------------------------

pub fn small_config() -> TaskConfig {
    TaskConfig {
        max_procs: 16,
        max_fds: 8,
        wait_pool_size: 64,
        max_group_sets: 8,
        max_groups: 8,
        exec_max_argsize: 64,
    }
}

pub fn setup() -> (Arc<MockPlatform>, TaskManager) {
    setup_with(small_config())
}

pub fn setup_with(config: TaskConfig) -> (Arc<MockPlatform>, TaskManager) {
    let mock = MockPlatform::new();
    let manager = TaskManager::new(config, Services::from_platform(mock.clone()))
        .expect("task manager");
    (mock, manager)
}

pub fn boot(m: &TaskManager) -> Arc<Thread> {
    m.boot_thread().expect("boot thread")
}

/// First thread of `pid`.
pub fn main_thread(m: &TaskManager, pid: Pid) -> Arc<Thread> {
    let tids = m.threads_of(pid).expect("process");
    m.thread(tids[0]).expect("thread")
}

/// Fork from `parent` and return the child with its thread.
pub fn fork(m: &TaskManager, parent: &Thread) -> (Pid, Arc<Thread>) {
    let pid = m.fork(parent).expect("fork");
    (pid, main_thread(m, pid))
}

/// Exit `pid` with `code` and kill all of its threads.
pub fn exit_process(m: &TaskManager, pid: Pid, code: i32) {
    let tids = m.threads_of(pid).expect("process");
    m.terminate(pid, code, None).expect("terminate");
    for tid in tids {
        m.kill_thread(tid).expect("kill thread");
    }
}
