//! Process identity: credentials and supplementary groups.
//!
//! TEAM_350: User/group identity.
//! TEAM_465: Backed by per-process credentials and shared group sets.

use alloc::vec::Vec;

use super::TaskManager;
use crate::error::ProcError;
use crate::group::Gid;
use crate::process::{Credentials, Pid, Uid};
use crate::thread::Thread;

// ============================================================================
// TEAM_465: Credentials
// ============================================================================

impl TaskManager {
    pub fn credentials(&self, pid: Pid) -> Result<Credentials, ProcError> {
        let proc = self.request(pid)?;
        let prog = proc.lock_prog();
        Ok(prog.creds)
    }

    /// TEAM_465: Set every user id of `cur`'s process. Root only.
    pub fn set_uid(&self, cur: &Thread, uid: Uid) -> Result<(), ProcError> {
        let proc = self.request(cur.pid())?;
        let mut prog = proc.lock_prog();
        if !prog.creds.is_root() {
            return Err(ProcError::PermissionDenied);
        }
        prog.creds.ruid = uid;
        prog.creds.euid = uid;
        prog.creds.suid = uid;
        self.services
            .vfs
            .chown_process(proc.pid(), uid, prog.creds.egid);
        log::trace!("[PROC] setuid({}) in process {}", uid, proc.pid());
        Ok(())
    }

    /// TEAM_465: Set every group id of `cur`'s process. Root only.
    pub fn set_gid(&self, cur: &Thread, gid: Gid) -> Result<(), ProcError> {
        let proc = self.request(cur.pid())?;
        let mut prog = proc.lock_prog();
        if !prog.creds.is_root() {
            return Err(ProcError::PermissionDenied);
        }
        prog.creds.rgid = gid;
        prog.creds.egid = gid;
        prog.creds.sgid = gid;
        self.services
            .vfs
            .chown_process(proc.pid(), prog.creds.euid, gid);
        log::trace!("[PROC] setgid({}) in process {}", gid, proc.pid());
        Ok(())
    }

    // ========================================================================
    // TEAM_465: Supplementary groups
    // ========================================================================

    /// Replace `pid`'s group set. See [`GroupStore::set`](crate::group::GroupStore::set).
    pub fn groups_set(&self, pid: Pid, gids: &[Gid]) -> Result<(), ProcError> {
        let proc = self.request(pid)?;
        self.groups.set(&proc, gids)
    }

    /// Make `dst` share `src`'s group set.
    pub fn groups_join(&self, dst: Pid, src: Pid) -> Result<(), ProcError> {
        let dst = self.request(dst)?;
        let src = self.request(src)?;
        self.groups.join(&dst, &src);
        Ok(())
    }

    pub fn groups_leave(&self, pid: Pid) -> Result<(), ProcError> {
        let proc = self.request(pid)?;
        self.groups.leave(&proc);
        Ok(())
    }

    /// Whether `pid` is in group `gid`. Unknown processes are in no group.
    pub fn groups_contains(&self, pid: Pid, gid: Gid) -> bool {
        self.lookup(pid)
            .is_some_and(|proc| self.groups.contains(&proc, gid))
    }

    pub fn groups_get(&self, pid: Pid) -> Result<Vec<Gid>, ProcError> {
        let proc = self.request(pid)?;
        Ok(self.groups.get(&proc))
    }

    /// Number of processes sharing `pid`'s group set.
    pub fn groups_ref_count(&self, pid: Pid) -> Result<usize, ProcError> {
        let proc = self.request(pid)?;
        Ok(self.groups.ref_count(&proc))
    }

    /// TEAM_465: setgroups from `cur`. Without root, the new list may only
    /// drop groups, never add one.
    pub fn set_groups(&self, cur: &Thread, gids: &[Gid]) -> Result<(), ProcError> {
        let proc = self.request(cur.pid())?;
        let is_root = proc.lock_prog().creds.is_root();
        if !is_root && !gids.iter().all(|&g| self.groups.contains(&proc, g)) {
            return Err(ProcError::PermissionDenied);
        }
        self.groups.set(&proc, gids)
    }
}
