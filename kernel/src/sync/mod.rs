//! Synchronization core.
//!
//! Named spin locks, sleep channels, and the single-shot suspend point every
//! blocking kernel operation ends in.

mod sleep;
mod spinlock;

pub use sleep::Sleep;
pub use spinlock::{SpinLock, SpinLockGuard};

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

/// What a sleeping process is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// A process slot; `wait` sleeps on the caller's own slot.
    Proc(usize),
    /// Caller-chosen rendezvous value.
    Custom(u64),
}

/// The point where a process gives up its CPU.
///
/// Returns `Pending` on the first poll, handing control back to the
/// scheduler, and `Ready` when the scheduler dispatches the process again.
#[derive(Debug, Default)]
pub struct Switch {
    switched: bool,
}

impl Switch {
    pub const fn new() -> Self {
        Self { switched: false }
    }
}

impl Future for Switch {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.switched {
            Poll::Ready(())
        } else {
            self.switched = true;
            Poll::Pending
        }
    }
}
