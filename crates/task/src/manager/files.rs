//! TEAM_466: File descriptor operations on behalf of a process.
//!
//! Each operation takes the target's fd lock for its whole duration.
//! Reference counting is the VFS's business; see [`FdTable`](crate::fd_table::FdTable).

use super::TaskManager;
use crate::error::ProcError;
use crate::fd_table::FileId;
use crate::process::Pid;
use crate::thread::Thread;

impl TaskManager {
    /// Install `file` in the lowest free slot of `pid`. The reference moves
    /// into the table.
    pub fn assoc_fd(&self, pid: Pid, file: FileId) -> Result<usize, ProcError> {
        let proc = self.request(pid)?;
        let fd = proc.lock_fds().assoc(file)?;
        log::trace!("[PROC] process {}: fd {} -> {:?}", pid, fd, file);
        Ok(fd)
    }

    pub fn dup_fd(&self, pid: Pid, fd: usize) -> Result<usize, ProcError> {
        let proc = self.request(pid)?;
        let mut fds = proc.lock_fds();
        fds.dup(fd, self.services.vfs.as_ref())
    }

    /// Make `src` refer to what `dst` refers to.
    pub fn redirect_fd(&self, pid: Pid, src: usize, dst: usize) -> Result<(), ProcError> {
        let proc = self.request(pid)?;
        let mut fds = proc.lock_fds();
        fds.redirect(src, dst, pid, self.services.vfs.as_ref())
    }

    /// Clear `fd` and hand its reference to the caller.
    pub fn unassoc_fd(&self, pid: Pid, fd: usize) -> Result<FileId, ProcError> {
        let proc = self.request(pid)?;
        let file = proc.lock_fds().unassoc(fd)?;
        Ok(file)
    }

    /// TEAM_466: Look up `fd` for a syscall in `cur` and mark the file in use.
    /// Pair with [`release_file`](Self::release_file).
    pub fn request_file(&self, cur: &Thread, fd: usize) -> Result<FileId, ProcError> {
        let proc = self.request(cur.pid())?;
        let fds = proc.lock_fds();
        let file = fds.request(fd)?;
        self.services.vfs.inc_usages(file);
        Ok(file)
    }

    pub fn release_file(&self, _cur: &Thread, file: FileId) {
        self.services.vfs.dec_usages(file);
    }

    pub fn open_fds(&self, pid: Pid) -> Result<usize, ProcError> {
        Ok(self.request(pid)?.lock_fds().open_count())
    }
}
