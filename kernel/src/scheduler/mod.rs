//! Kernel scheduler module.
//!
//! Every CPU runs its own [`Scheduler`]. A scheduler keeps a cursor on one
//! container and scans the process table in slot order, dispatching Runnable
//! processes of that container only. After each dispatch, and again after
//! each full pass, the cursor moves to the next Running container, so
//! containers take turns regardless of how many processes they hold.
//!
//! Dispatching a process polls its kernel continuation once. Control comes
//! back when the process reaches a suspend point: `yield_cpu`, `sleep` or
//! `exit`.

use alloc::sync::Arc;
use core::mem;
use core::sync::atomic::Ordering;
use core::task::{Context, Poll};
use futures_util::task::noop_waker_ref;

use crate::boot::Kernel;
use crate::container::ContainerState;
use crate::cpu;
use crate::process::{Continuation, Proc, ProcInner, ProcState, SlotId};
use crate::sync::Switch;

/// Scheduler of one CPU.
pub struct Scheduler {
    kernel: Arc<Kernel>,
    cpu: usize,
    cursor: usize,
}

impl Scheduler {
    pub fn new(kernel: Arc<Kernel>, cpu: usize) -> Self {
        assert!(cpu < kernel.cpus.len(), "scheduler: no cpu {}", cpu);
        let cursor = kernel.containers.next_active(0);
        Self { kernel, cpu, cursor }
    }

    pub fn cpu(&self) -> usize {
        self.cpu
    }

    /// Index of the container currently being served.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Schedule forever.
    pub fn run(&mut self) -> ! {
        log::info!("[CORRAL sched] cpu {} starting", self.cpu);
        loop {
            self.run_pass();
        }
    }

    /// One scan over the process table. Returns the number of dispatches.
    pub fn run_pass(&mut self) -> usize {
        // Avoid deadlock by letting devices interrupt between dispatches.
        self.kernel.cpus.lock(self.cpu).intr_on();

        let mut dispatched = 0;
        for index in 0..self.kernel.procs.len() {
            if self.dispatch(index) {
                dispatched += 1;
                self.cursor = self.kernel.containers.next_active(self.cursor);
            }
        }
        self.cursor = self.kernel.containers.next_active(self.cursor);
        dispatched
    }

    /// Run passes until no process in any Running container is runnable, or
    /// `max_passes` have run. Returns the number of dispatches.
    pub fn run_until_idle(&mut self, max_passes: usize) -> usize {
        let mut total = 0;
        for _ in 0..max_passes {
            let n = self.run_pass();
            total += n;
            if n == 0 && !self.kernel.has_runnable() {
                break;
            }
        }
        total
    }

    fn dispatch(&self, index: usize) -> bool {
        let kernel = &self.kernel;
        let p = kernel.procs.get(index);
        let (slot, mut ctx) = {
            let _intr = kernel.cpus.push_off(self.cpu);
            let mut inner = p.inner.lock();
            if inner.state != ProcState::Runnable
                || inner.container.map(|c| c.index()) != Some(self.cursor)
            {
                return false;
            }
            // Still being switched out on another CPU.
            let Some(ctx) = p.context.try_lock() else {
                return false;
            };
            inner.state = ProcState::Running;
            p.set_cpu(Some(self.cpu));
            kernel.cpus.lock(self.cpu).current = Some(index);
            let slot = SlotId {
                index,
                generation: inner.generation,
            };
            (slot, ctx)
        };

        let mut task = match mem::replace(&mut ctx.continuation, Continuation::Empty) {
            Continuation::Fresh(program) => kernel.fork_ret(slot, program),
            Continuation::Suspended(task) => task,
            Continuation::Empty => panic!("scheduler: slot {} has no context", index),
        };
        kernel.context_switches.fetch_add(1, Ordering::Relaxed);
        let mut cx = Context::from_waker(noop_waker_ref());
        {
            let _scope = cpu::enter_dispatch();
            if let Poll::Ready(()) = task.as_mut().poll(&mut cx) {
                panic!("scheduler: slot {} returned from its continuation", index);
            }
        }
        ctx.continuation = Continuation::Suspended(task);
        {
            let inner = p.inner.lock();
            assert!(
                inner.state != ProcState::Running,
                "scheduler: pid {} switched out while running",
                inner.pid
            );
        }
        drop(ctx);

        let mut cpu = kernel.cpus.lock(self.cpu);
        assert_eq!(cpu.noff(), 0, "scheduler: process returned holding locks");
        cpu.current = None;
        true
    }
}

impl Kernel {
    /// CPU a running process was dispatched on.
    pub(crate) fn running_cpu(&self, p: &Proc) -> usize {
        p.cpu()
            .unwrap_or_else(|| panic!("sched: slot {} is not on a cpu", p.index()))
    }

    /// Checks made before a process gives up its CPU. The caller holds the
    /// process state lock and exactly one interrupt-off level, nothing else.
    pub(crate) fn sched(&self, cpu: usize, inner: &ProcInner) {
        let held = crate::cpu::locks_held();
        let c = self.cpus.lock(cpu);
        if c.noff() != 1 || held != 1 {
            panic!("sched locks");
        }
        if inner.state == ProcState::Running {
            panic!("sched running");
        }
        if c.intr_get() {
            panic!("sched interruptible");
        }
    }

    fn yield_prepare(&self, me: SlotId) {
        let p = self.procs.get(me.index);
        let cpu = self.running_cpu(p);
        let _intr = self.cpus.push_off(cpu);
        let mut inner = p.inner.lock();
        inner.state = ProcState::Runnable;
        self.sched(cpu, &inner);
    }

    /// Give up the CPU for one scheduling round.
    pub async fn yield_cpu(&self, me: SlotId) {
        self.yield_prepare(me);
        Switch::new().await;
    }

    /// Whether some process in a Running container is waiting for a CPU.
    pub fn has_runnable(&self) -> bool {
        self.procs.iter().any(|p| {
            let container = {
                let inner = p.inner.lock();
                if inner.state != ProcState::Runnable {
                    return false;
                }
                inner.container
            };
            container.is_some_and(|c| self.containers.state(c) == ContainerState::Running)
        })
    }
}
