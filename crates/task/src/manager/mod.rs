//! TEAM_461: Process lifecycle controller.
//!
//! [`TaskManager`] ties the process table, thread registry, event queue and
//! group store together and implements fork, exec, termination, teardown and
//! reaping on top of them. The kernel builds exactly one at boot with
//! [`init`]; tests build as many private instances as they like.
//!
//! Lock order, outermost first:
//! 1. a process's program lock (parent before child during fork)
//! 2. that process's region or fd lock
//! 3. any spin lock (process table, group slot, event queue)
//!
//! No operation holds two program locks except fork, and fork only ever
//! locks a child that is not yet published.

mod clone;
mod exec;
mod exit;
mod files;
mod identity;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Once;

use crate::config::TaskConfig;
use crate::error::ProcError;
use crate::event::EventQueue;
use crate::fd_table::FdTable;
use crate::group::GroupStore;
use crate::process::{
    AddressSpaceId, Credentials, FrameUsage, Pid, Process, ProgState, BOOT_PID,
};
use crate::process_table::ProcessTable;
use crate::services::Services;
use crate::thread::{Thread, ThreadFlags, ThreadRegistry, Tid};

pub use exec::{ArgBuffer, ExecImage, StartupInfo};
pub use exit::{JoinStatus, Reaped, WaitStatus};

/// Command of the boot process.
pub const BOOT_COMMAND: &str = "initloader";

/// TEAM_461: Owner of all process and thread state.
pub struct TaskManager {
    config: TaskConfig,
    table: ProcessTable,
    threads: ThreadRegistry,
    events: EventQueue,
    groups: GroupStore,
    services: Services,
}

static TASK_MANAGER: Once<TaskManager> = Once::new();

/// TEAM_461: Build the global task manager. Later calls return the first one.
pub fn init(config: TaskConfig, services: Services) -> Result<&'static TaskManager, ProcError> {
    TASK_MANAGER.try_call_once(|| TaskManager::new(config, services))
}

/// The global task manager, once [`init`] has run.
pub fn get() -> Option<&'static TaskManager> {
    TASK_MANAGER.get()
}

impl TaskManager {
    /// Allocate every table and create the boot process (pid 0) with one thread.
    pub fn new(config: TaskConfig, services: Services) -> Result<Self, ProcError> {
        config.validate()?;
        let manager = Self {
            table: ProcessTable::new(config.max_procs),
            threads: ThreadRegistry::new(),
            events: EventQueue::new(config.wait_pool_size, services.scheduler.clone()),
            groups: GroupStore::new(config.max_group_sets, config.max_groups),
            services,
            config,
        };
        manager.create_boot_process()?;
        Ok(manager)
    }

    fn create_boot_process(&self) -> Result<(), ProcError> {
        let mut command = String::new();
        command
            .try_reserve_exact(BOOT_COMMAND.len())
            .map_err(|_| ProcError::NoMemory)?;
        command.push_str(BOOT_COMMAND);

        let boot = Arc::new(Process::new(
            BOOT_PID,
            BOOT_PID,
            AddressSpaceId::BOOT,
            ProgState::new(Credentials::ROOT, command),
            FdTable::new(self.config.max_fds),
        ));
        self.services.vfs.create_process_node(BOOT_PID)?;
        let thread = self.threads.create(BOOT_PID, ThreadFlags::empty())?;
        {
            let mut prog = boot.lock_prog();
            prog.threads
                .try_reserve(1)
                .map_err(|_| ProcError::NoMemory)?;
            prog.threads.push(thread);
        }
        self.table.add(boot)?;
        log::info!("[PROC] boot process {} ({}) created", BOOT_PID, BOOT_COMMAND);
        Ok(())
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    pub fn group_store(&self) -> &GroupStore {
        &self.groups
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Live process with this pid.
    pub fn lookup(&self, pid: Pid) -> Option<Arc<Process>> {
        self.table.lookup(pid)
    }

    /// Live process with this pid, or [`ProcError::NoSuchProcess`].
    pub fn request(&self, pid: Pid) -> Result<Arc<Process>, ProcError> {
        self.table.lookup(pid).ok_or(ProcError::NoSuchProcess)
    }

    pub fn thread(&self, tid: Tid) -> Option<Arc<Thread>> {
        self.threads.get(tid)
    }

    /// First thread of the boot process.
    pub fn boot_thread(&self) -> Option<Arc<Thread>> {
        let boot = self.table.lookup(BOOT_PID)?;
        let prog = boot.lock_prog();
        prog.threads.first().cloned()
    }

    pub fn process_count(&self) -> usize {
        self.table.count()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.count()
    }

    pub fn threads_of(&self, pid: Pid) -> Result<Vec<Tid>, ProcError> {
        let p = self.request(pid)?;
        let prog = p.lock_prog();
        Ok(prog.threads.iter().map(|t| t.tid()).collect())
    }

    pub fn command_of(&self, pid: Pid) -> Result<String, ProcError> {
        let p = self.request(pid)?;
        let prog = p.lock_prog();
        Ok(prog.command.clone())
    }

    /// Frames charged to `pid`.
    pub fn mem_usage(&self, pid: Pid) -> Result<FrameUsage, ProcError> {
        Ok(self.request(pid)?.frames())
    }

    /// Frames charged to every process in the table, zombies included.
    pub fn total_mem_usage(&self) -> FrameUsage {
        self.table
            .snapshot()
            .iter()
            .map(|p| p.frames())
            .fold(FrameUsage::default(), |sum, f| FrameUsage {
                own: sum.own + f.own,
                shared: sum.shared + f.shared,
                swapped: sum.swapped + f.swapped,
            })
    }

    /// Log every process and the event queue.
    pub fn dump(&self) {
        log::info!("[PROC] {} processes, {} threads", self.process_count(), self.thread_count());
        for p in self.table.snapshot() {
            let prog = p.lock_prog();
            let tids: Vec<Tid> = prog.threads.iter().map(|t| t.tid()).collect();
            log::info!(
                "[PROC]   pid {} ({}) parent {} state {:?} uid {} threads {:?} fds {}",
                p.pid(),
                prog.command,
                p.parent(),
                p.state(),
                prog.creds.euid,
                tids,
                p.lock_fds().open_count()
            );
        }
        self.events.dump();
    }
}
