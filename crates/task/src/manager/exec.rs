//! TEAM_463: Program replacement (exec).
//!
//! Exec validates everything it can before touching the caller's regions.
//! Once the old image is gone there is nothing to return to, so any later
//! failure terminates the process instead of returning an error to it.

use alloc::string::String;
use alloc::vec::Vec;

use super::TaskManager;
use crate::error::ProcError;
use crate::fd_table::FileId;
use crate::process::{Pid, Process, BOOT_PID};
use crate::thread::Thread;

/// TEAM_463: The program to run.
#[derive(Debug, Clone, Copy)]
pub enum ExecImage<'a> {
    /// Executable on a filesystem
    File(&'a str),
    /// Image already in memory; `name` becomes the command
    Memory { name: &'a str, code: &'a [u8] },
}

impl ExecImage<'_> {
    /// Path or name the process will be known by.
    pub fn name(&self) -> &str {
        match self {
            Self::File(path) => path,
            Self::Memory { name, .. } => name,
        }
    }
}

/// TEAM_463: Entry points reported by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StartupInfo {
    pub prog_entry: usize,
    /// Same as `prog_entry` unless a dynamic linker runs first
    pub linker_entry: usize,
    pub stack_begin: usize,
}

impl StartupInfo {
    pub fn needs_linker(&self) -> bool {
        self.linker_entry != self.prog_entry
    }
}

/// TEAM_463: Arguments copied into kernel memory, NUL-terminated back to back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgBuffer {
    data: Vec<u8>,
    argc: usize,
}

impl ArgBuffer {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Copy `args` into a buffer of at most `max` bytes.
    ///
    /// Returns [`ProcError::Fault`] if the arguments (with their terminators)
    /// do not fit or an argument contains a NUL byte.
    pub fn build(args: &[&str], max: usize) -> Result<Self, ProcError> {
        let total = args
            .iter()
            .try_fold(0usize, |acc, a| acc.checked_add(a.len() + 1))
            .ok_or(ProcError::Fault)?;
        if total > max {
            return Err(ProcError::Fault);
        }
        let mut data = Vec::new();
        data.try_reserve_exact(total)
            .map_err(|_| ProcError::NoMemory)?;
        for arg in args {
            if arg.as_bytes().contains(&0) {
                return Err(ProcError::Fault);
            }
            data.extend_from_slice(arg.as_bytes());
            data.push(0);
        }
        Ok(Self {
            data,
            argc: args.len(),
        })
    }

    pub fn argc(&self) -> usize {
        self.argc
    }

    /// Raw buffer, including terminators.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Arguments without their terminators.
    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.data
            .split(|&b| b == 0)
            .take(self.argc)
    }
}

impl TaskManager {
    /// TEAM_463: Replace the program of `cur`'s process.
    ///
    /// Fails without side effects if the process has more than one thread
    /// (except the boot process), the program does not resolve, or the
    /// arguments do not fit. After that the old regions are removed (the
    /// stack is kept) and any failure terminates the process with exit code
    /// 1 and yields [`ProcError::Terminated`].
    pub fn exec(
        &self,
        cur: &Thread,
        image: ExecImage<'_>,
        args: Option<&[&str]>,
    ) -> Result<(), ProcError> {
        let pid = cur.pid();
        let proc = self.request(pid)?;

        {
            let prog = proc.lock_prog();
            if pid != BOOT_PID && prog.threads.len() > 1 {
                return Err(ProcError::InvalidArgument);
            }
        }
        if let ExecImage::File(path) = image {
            self.services
                .vfs
                .resolve_program(path)
                .map_err(|_| ProcError::InvalidArgument)?;
        }
        let args = match args {
            Some(args) => ArgBuffer::build(args, self.config.exec_max_argsize)?,
            None => ArgBuffer::empty(),
        };

        // Point of no return
        self.services.memory.remove_shared(pid);
        self.remove_regions(&proc, true);

        self.load_image(cur, &proc, image, &args)
            .or_else(|err| self.fail_exec(pid, err))
    }

    fn load_image(
        &self,
        cur: &Thread,
        proc: &Process,
        image: ExecImage<'_>,
        args: &ArgBuffer,
    ) -> Result<(), ProcError> {
        let pid = proc.pid();
        let vfs = self.services.vfs.as_ref();
        let info = self.services.loader.load(pid, &image)?;

        // The dynamic linker gets the program as an open file
        let linker_fd = if info.needs_linker() {
            let file = vfs.open_path(pid, image.name())?;
            Some(self.assoc_or_close(proc, file)?)
        } else {
            None
        };

        {
            let mut prog = proc.lock_prog();
            let mut command = String::new();
            command
                .try_reserve_exact(image.name().len())
                .map_err(|_| ProcError::NoMemory)?;
            command.push_str(image.name());
            prog.command = command;
            prog.entry_point = info.prog_entry;
        }

        self.services
            .loader
            .setup_entry(cur.tid(), args, &info, info.linker_entry, linker_fd)?;
        log::debug!(
            "[PROC] process {} exec {} (entry {:#x})",
            pid,
            image.name(),
            info.prog_entry
        );
        Ok(())
    }

    fn assoc_or_close(&self, proc: &Process, file: FileId) -> Result<usize, ProcError> {
        proc.lock_fds().assoc(file).inspect_err(|_| {
            self.services.vfs.close_file(proc.pid(), file);
        })
    }

    fn fail_exec(&self, pid: Pid, err: ProcError) -> Result<(), ProcError> {
        log::warn!("[PROC] exec in process {} failed after teardown: {}", pid, err);
        if let Err(e) = self.terminate(pid, 1, None) {
            log::error!("[PROC] cannot terminate process {}: {}", pid, e);
        }
        Err(ProcError::Terminated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arg_buffer_layout() {
        let buf = ArgBuffer::build(&["ls", "-l"], 64).unwrap();
        assert_eq!(buf.argc(), 2);
        assert_eq!(buf.as_bytes(), b"ls\0-l\0");
        let args: Vec<&[u8]> = buf.iter().collect();
        assert_eq!(args, [b"ls".as_slice(), b"-l".as_slice()]);
    }

    #[test]
    fn test_arg_buffer_limit_counts_terminators() {
        // 3 + 3 bytes with terminators
        assert!(ArgBuffer::build(&["ab", "cd"], 6).is_ok());
        assert_eq!(ArgBuffer::build(&["ab", "cd"], 5), Err(ProcError::Fault));
    }

    #[test]
    fn test_arg_buffer_rejects_nul() {
        assert_eq!(ArgBuffer::build(&["a\0b"], 64), Err(ProcError::Fault));
    }

    #[test]
    fn test_empty_args() {
        let buf = ArgBuffer::build(&[], 8).unwrap();
        assert_eq!(buf.argc(), 0);
        assert!(buf.is_empty());
        assert_eq!(buf.iter().count(), 0);
    }

    #[test]
    fn test_startup_info_linker() {
        let info = StartupInfo {
            prog_entry: 0x1000,
            linker_entry: 0x1000,
            stack_begin: 0,
        };
        assert!(!info.needs_linker());
        let info = StartupInfo {
            linker_entry: 0x8000,
            ..info
        };
        assert!(info.needs_linker());
    }
}
