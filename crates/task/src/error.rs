//! TEAM_450: Error types for the task core.
//!
//! Syscall-facing callers turn any of these into a negative errno with
//! `errno()`; collaborator failures travel through [`ProcError::Io`] unchanged.

use linux_raw_sys::errno::{
    EAGAIN, EBADF, ECHILD, EFAULT, EINVAL, EMFILE, ENOMEM, EPERM, ESRCH,
};
use los_error::define_kernel_error;

pub use los_error::Errno;

define_kernel_error! {
    /// TEAM_450: Event-wait registration errors.
    ///
    /// Always recoverable: the caller retries once records are freed.
    pub enum WaitError(0x21) {
        /// Every wait record is in use
        PoolExhausted = 0x01 [EAGAIN] => "Wait pool exhausted",
    }
}

define_kernel_error! {
    /// TEAM_450: Process lifecycle errors.
    pub enum ProcError(0x20) {
        /// Kernel heap or a fixed budget ran out
        NoMemory = 0x01 [ENOMEM] => "Out of memory",
        /// Every pid slot is occupied
        NoPids = 0x02 [EAGAIN] => "No free process ids",
        NoSuchProcess = 0x03 [ESRCH] => "No such process",
        NoSuchThread = 0x04 [ESRCH] => "No such thread",
        /// Nothing to reap
        NoChild = 0x05 [ECHILD] => "No such child",
        InvalidArgument = 0x06 [EINVAL] => "Invalid argument",
        /// Operation not allowed in the process's lifecycle state
        InvalidState = 0x07 [EINVAL] => "Invalid process state",
        PermissionDenied = 0x08 [EPERM] => "Permission denied",
        BadFd = 0x09 [EBADF] => "Bad file descriptor",
        TooManyFiles = 0x0A [EMFILE] => "Too many open files",
        Fault = 0x0B [EFAULT] => "Bad address",
        /// The process was terminated while servicing the request (exec)
        Terminated = 0x0C [ESRCH] => "Process terminated",
        Wait(WaitError) = 0x0D => "Wait registration failed",
        /// Error reported by an external collaborator
        Io(Errno) = 0x0E => "Collaborator error",
    }
}

impl From<WaitError> for ProcError {
    fn from(err: WaitError) -> Self {
        ProcError::Wait(err)
    }
}

impl From<Errno> for ProcError {
    fn from(err: Errno) -> Self {
        ProcError::Io(err)
    }
}
