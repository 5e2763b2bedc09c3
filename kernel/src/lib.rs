//! Corral Kernel Library
//!
//! A teaching kernel's process core with lightweight containers: groups of
//! processes that share a process quota, a private pid namespace and a
//! private filesystem root, multiplexed onto the CPUs by a two-level
//! scheduler. Processes can be checkpointed to a file and restored from it.
//!
//! # Layout
//!
//! - [`process`]: process table and lifecycle (`fork`, `exit`, `wait`, `kill`)
//! - [`container`]: container registry and management
//! - [`scheduler`]: per-CPU container-then-process scheduler
//! - [`sync`], [`cpu`]: spin locks, sleep/wakeup, interrupt nesting
//! - [`checkpoint`]: suspend to and resume from a file
//! - [`introspect`]: `psinfo`, `cinfo`, process dump
//! - [`syscall`]: the handle user programs make system calls through
//! - [`memory`], [`vfs`]: address spaces and the in-memory filesystem

#![no_std]

extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod boot;
pub mod checkpoint;
pub mod config;
pub mod container;
pub mod cpu;
pub mod error;
pub mod introspect;
pub mod memory;
pub mod process;
pub mod scheduler;
pub mod sync;
pub mod syscall;
pub mod vfs;

#[cfg(test)]
mod tests;

pub use boot::Kernel;
pub use config::KernelConfig;
pub use container::{ContainerId, ContainerState, Quota};
pub use error::{KResult, KernelError};
pub use process::{Pid, ProcState, Vpid};
pub use scheduler::Scheduler;
pub use syscall::UserProc;
