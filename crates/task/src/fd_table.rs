//! TEAM_168: Per-process file descriptor table.
//! TEAM_456: Entries are VFS file handles; reference counts live in the VFS.
//!
//! The table only maps descriptor numbers to open files. Every time an entry
//! is copied (dup, fork) the VFS reference count goes up; closing an entry
//! goes through [`Vfs::close_file`]. Descriptor allocation always picks the
//! lowest free slot.

use alloc::boxed::Box;
use alloc::vec;

use crate::error::ProcError;
use crate::process::Pid;
use crate::services::Vfs;

/// TEAM_456: Handle of an open file owned by the VFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(pub usize);

/// TEAM_168: Fixed-size descriptor table.
#[derive(Debug, Clone)]
pub struct FdTable {
    /// `None` = unused slot
    entries: Box<[Option<FileId>]>,
}

impl FdTable {
    /// TEAM_168: Empty table with `max_fds` slots.
    pub fn new(max_fds: usize) -> Self {
        Self {
            entries: vec![None; max_fds].into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// TEAM_168: File behind `fd`, if open.
    pub fn get(&self, fd: usize) -> Option<FileId> {
        self.entries.get(fd).copied().flatten()
    }

    /// File behind `fd`, or [`ProcError::BadFd`].
    pub fn request(&self, fd: usize) -> Result<FileId, ProcError> {
        self.get(fd).ok_or(ProcError::BadFd)
    }

    fn lowest_free(&self) -> Result<usize, ProcError> {
        self.entries
            .iter()
            .position(Option::is_none)
            .ok_or(ProcError::TooManyFiles)
    }

    /// TEAM_168: Store `file` in the lowest free slot. The caller hands over
    /// its reference.
    pub fn assoc(&mut self, file: FileId) -> Result<usize, ProcError> {
        let fd = self.lowest_free()?;
        self.entries[fd] = Some(file);
        Ok(fd)
    }

    /// TEAM_233: Duplicate `fd` into the lowest free slot.
    pub fn dup(&mut self, fd: usize, vfs: &dyn Vfs) -> Result<usize, ProcError> {
        let file = self.request(fd)?;
        let new_fd = self.lowest_free()?;
        vfs.inc_refs(file);
        self.entries[new_fd] = Some(file);
        Ok(new_fd)
    }

    /// TEAM_456: Make `src` refer to the file behind `dst`, closing what `src`
    /// referred to before.
    pub fn redirect(
        &mut self,
        src: usize,
        dst: usize,
        pid: Pid,
        vfs: &dyn Vfs,
    ) -> Result<(), ProcError> {
        let old = self.request(src)?;
        let target = self.request(dst)?;
        vfs.inc_refs(target);
        vfs.close_file(pid, old);
        self.entries[src] = Some(target);
        Ok(())
    }

    /// TEAM_168: Clear `fd` and return what it referred to. The reference
    /// moves to the caller.
    pub fn unassoc(&mut self, fd: usize) -> Result<FileId, ProcError> {
        self.entries
            .get_mut(fd)
            .and_then(Option::take)
            .ok_or(ProcError::BadFd)
    }

    /// TEAM_456: Copy for a forked child; every inherited entry gains a
    /// reference.
    pub fn inherit(&self, vfs: &dyn Vfs) -> Self {
        for file in self.entries.iter().flatten() {
            vfs.inc_refs(*file);
        }
        self.clone()
    }

    /// TEAM_333: Close every descriptor (process teardown).
    ///
    /// A file another thread is still using cannot be closed yet: usage is
    /// raised first, and only released again if the close did not happen.
    pub fn release_all(&mut self, pid: Pid, vfs: &dyn Vfs) {
        for slot in self.entries.iter_mut() {
            if let Some(file) = slot.take() {
                vfs.inc_usages(file);
                if !vfs.close_file(pid, file) {
                    vfs.dec_usages(file);
                }
            }
        }
    }

    /// Open descriptors, lowest first.
    pub fn iter(&self) -> impl Iterator<Item = (usize, FileId)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(fd, f)| f.map(|f| (fd, f)))
    }

    pub fn open_count(&self) -> usize {
        self.entries.iter().flatten().count()
    }
}
