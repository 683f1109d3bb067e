//! TEAM_450: Process/thread lifecycle core and event-wait substrate.
//!
//! This crate owns the kernel's process table, the fork/exec/exit/reap
//! lifecycle, reference-counted group sets and the event-wait queue every
//! blocking kernel operation is built on.
//!
//! Everything outside that core (VFS, paging, the scheduler's context switch,
//! ELF loading, signal delivery) is reached through the collaborator traits in
//! [`services`]. The kernel wires one implementation in at boot via
//! [`manager::init`]; host tests build private [`TaskManager`] instances
//! against a recording mock.
//!
//! Lock classes:
//! - [`sync::SpinLock`] for the process table, group-set slots and the whole
//!   event subsystem (short, never suspends)
//! - [`sync::BlockingLock`] for per-process program, region and fd state

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

pub mod config;
pub mod error;
pub mod event;
pub mod fd_table;
pub mod group;
pub mod manager;
pub mod process;
pub mod process_table;
pub mod services;
pub mod sync;
pub mod thread;
pub mod wait_pool;

pub use config::TaskConfig;
pub use error::{Errno, ProcError, WaitError};
pub use event::{EventKind, EventMask, EventObject, EventQueue, WaitObject};
pub use manager::{ArgBuffer, ExecImage, JoinStatus, Reaped, StartupInfo, TaskManager, WaitStatus};
pub use process::{Credentials, ExitState, LifecycleState, Pid, Process, Signal, BOOT_PID};
pub use services::{Platform, Services};
pub use thread::{Thread, ThreadFlags, Tid};
