//! TEAM_450: Boot-time sizing of the task core.
//!
//! All tables are allocated once from these numbers when the
//! [`TaskManager`](crate::TaskManager) is constructed and never grow afterwards.

use crate::error::ProcError;

/// TEAM_450: Threads collected per wakeup pass before they are flushed.
pub const MAX_WAKEUPS: usize = 8;

/// TEAM_168: Default number of fd slots per process.
pub const MAX_FDS: usize = 64;

/// TEAM_450: Sizing knobs for the process table, wait pool and group store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskConfig {
    /// Size of the pid space; pid 0 is the boot process.
    pub max_procs: usize,
    /// File descriptor slots per process.
    pub max_fds: usize,
    /// Wait records shared by every thread in the system.
    pub wait_pool_size: usize,
    /// Group sets that may be alive at once.
    pub max_group_sets: usize,
    /// Group ids per set.
    pub max_groups: usize,
    /// Kernel buffer for exec arguments, in bytes.
    pub exec_max_argsize: usize,
}

impl TaskConfig {
    pub const DEFAULT: Self = Self {
        max_procs: 1024,
        max_fds: MAX_FDS,
        wait_pool_size: 2048,
        max_group_sets: 1024,
        max_groups: 32,
        exec_max_argsize: 2048,
    };

    /// Reject sizes the core cannot run with.
    pub fn validate(&self) -> Result<(), ProcError> {
        // pid 0 plus at least one allocatable pid
        if self.max_procs < 2 {
            return Err(ProcError::InvalidArgument);
        }
        if self.max_fds == 0 || self.exec_max_argsize == 0 {
            return Err(ProcError::InvalidArgument);
        }
        if self.wait_pool_size == 0 || self.wait_pool_size > u32::MAX as usize {
            return Err(ProcError::InvalidArgument);
        }
        Ok(())
    }
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}
