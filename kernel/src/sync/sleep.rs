//! Sleep and wakeup.

use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};

use super::{Channel, SpinLock, SpinLockGuard, Switch};
use crate::boot::Kernel;
use crate::process::{Proc, ProcState, SlotId};

/// A process asleep on a channel.
///
/// Completes once the process has been woken and dispatched again, handing
/// back the re-acquired condition lock.
#[must_use = "a sleeping process must await its wakeup"]
pub struct Sleep<'a, T: ?Sized> {
    proc: &'a Proc,
    lock: &'a SpinLock<T>,
    switch: Switch,
}

impl<'a, T: ?Sized> Future for Sleep<'a, T> {
    type Output = SpinLockGuard<'a, T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        futures_util::ready!(Pin::new(&mut self.switch).poll(cx));
        self.proc.inner.lock().chan = None;
        Poll::Ready(self.lock.lock())
    }
}

impl Kernel {
    /// Put process `me` to sleep on `chan`, releasing `guard`.
    ///
    /// The process state lock is taken before the condition lock is
    /// released, so a `wakeup` issued under the condition lock cannot be
    /// missed. The process is off the run queue once this returns; awaiting
    /// the result switches out and later yields the re-acquired guard.
    pub fn sleep<'a, T: ?Sized>(
        &'a self,
        me: SlotId,
        chan: Channel,
        guard: SpinLockGuard<'a, T>,
    ) -> Sleep<'a, T> {
        let p = self.procs.get(me.index);
        let cpu = self.running_cpu(p);
        let lock = {
            let _intr = self.cpus.push_off(cpu);
            let mut inner = p.inner.lock();
            let lock = SpinLock::unlock(guard);
            inner.chan = Some(chan);
            inner.state = ProcState::Sleeping;
            self.sched(cpu, &inner);
            lock
        };
        Sleep {
            proc: p,
            lock,
            switch: Switch::new(),
        }
    }

    /// Make every process sleeping on `chan` runnable. Returns how many
    /// were woken. Must be called without any process state lock held.
    pub fn wakeup(&self, chan: Channel) -> usize {
        let mut woken = 0;
        for p in self.procs.iter() {
            let mut inner = p.inner.lock();
            if inner.state == ProcState::Sleeping && inner.chan == Some(chan) {
                inner.state = ProcState::Runnable;
                woken += 1;
            }
        }
        woken
    }
}
