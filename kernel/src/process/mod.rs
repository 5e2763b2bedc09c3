//! Process Management
//!
//! The process table, the execution context of each slot, and the lifecycle
//! operations (`fork`, `exit`, `wait`, `kill`) that move slots between
//! states.

pub mod context;
mod lifecycle;
pub mod table;

pub use context::{program, Continuation, EntryPoint, Program, SwitchContext, TrapFrame};
pub use lifecycle::INITCODE;
pub use table::{Link, Pid, Proc, ProcData, ProcInner, ProcState, ProcTable, SlotId, Vpid};
