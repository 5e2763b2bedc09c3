//! Process execution context.
//!
//! The user-visible register file ([`TrapFrame`]) and the saved kernel
//! continuation a CPU resumes when it dispatches the process
//! ([`SwitchContext`]).

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::future::Future;
use futures_util::future::{BoxFuture, FutureExt};

use crate::config::{kstack, KSTACK_PAGES, PGSIZE};
use crate::syscall::UserProc;

macro_rules! trap_frame {
    ($($(#[$doc:meta])* $field:ident),* $(,)?) => {
        /// Saved user registers, in the order the trampoline stores them.
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        #[repr(C)]
        pub struct TrapFrame {
            $($(#[$doc])* pub $field: u64,)*
        }

        impl TrapFrame {
            /// Serialized size: one little-endian u64 per register.
            pub const LEN: usize = [$(stringify!($field)),*].len() * 8;

            pub fn to_bytes(&self) -> Vec<u8> {
                let mut out = Vec::with_capacity(Self::LEN);
                $(out.extend_from_slice(&self.$field.to_le_bytes());)*
                out
            }

            /// Decode a frame written by [`TrapFrame::to_bytes`].
            pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
                if bytes.len() != Self::LEN {
                    return None;
                }
                let mut words = bytes
                    .chunks_exact(8)
                    .map(|c| u64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]));
                Some(Self { $($field: words.next()?,)* })
            }
        }
    };
}

trap_frame! {
    /// Kernel page table.
    kernel_satp,
    /// Top of the process's kernel stack.
    kernel_sp,
    /// Address of the user trap handler.
    kernel_trap,
    /// Saved user program counter.
    epc,
    /// Saved kernel thread pointer.
    kernel_hartid,
    ra, sp, gp, tp, t0, t1, t2, s0, s1,
    a0, a1, a2, a3, a4, a5, a6, a7,
    s2, s3, s4, s5, s6, s7, s8, s9, s10, s11,
    t3, t4, t5, t6,
}

/// Body of a process in user mode, started on first dispatch with a handle
/// for making system calls.
pub type Program = Box<dyn FnOnce(UserProc) -> BoxFuture<'static, ()> + Send>;

/// Box an async closure as a [`Program`].
pub fn program<F, Fut>(f: F) -> Program
where
    F: FnOnce(UserProc) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Box::new(move |user| f(user).boxed())
}

/// Where a process starts when first dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPoint {
    /// Slot not set up to run.
    None,
    /// Return from fork into the user program.
    ForkRet,
}

/// Saved kernel state of a process that is not running.
pub enum Continuation {
    Empty,
    /// Never dispatched; holds the user program.
    Fresh(Program),
    /// Switched out at a suspend point.
    Suspended(BoxFuture<'static, ()>),
}

/// Kernel switch context of one process slot.
pub struct SwitchContext {
    pub ra: EntryPoint,
    /// Top of the kernel stack.
    pub sp: usize,
    pub continuation: Continuation,
}

impl SwitchContext {
    pub const fn zero() -> Self {
        Self {
            ra: EntryPoint::None,
            sp: 0,
            continuation: Continuation::Empty,
        }
    }

    /// Context whose first resumption enters the fork-return path on the
    /// kernel stack of slot `index`.
    pub fn fork_ret(index: usize) -> Self {
        Self {
            ra: EntryPoint::ForkRet,
            sp: kstack(index) + KSTACK_PAGES * PGSIZE,
            continuation: Continuation::Empty,
        }
    }

    /// Whether a continuation is installed.
    pub fn is_ready(&self) -> bool {
        !matches!(self.continuation, Continuation::Empty)
    }
}

impl core::fmt::Debug for SwitchContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let cont = match self.continuation {
            Continuation::Empty => "empty",
            Continuation::Fresh(_) => "fresh",
            Continuation::Suspended(_) => "suspended",
        };
        f.debug_struct("SwitchContext")
            .field("ra", &self.ra)
            .field("sp", &format_args!("{:#x}", self.sp))
            .field("continuation", &cont)
            .finish()
    }
}
