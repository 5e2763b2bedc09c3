//! Per-CPU state.
//!
//! Each CPU records the process slot it is running and the nesting depth of
//! interrupt-disable requests. Interrupts themselves are modelled as a flag:
//! `push_off` clears it and remembers the old value at the outermost level,
//! `pop_off` restores it when the outermost level is released.
//!
//! Every held [`SpinLock`] is also counted against the hart it was taken on,
//! so `sched` can tell whether a process is switching out with locks other
//! than its own state lock still held. The hart register is a thread-local
//! on hosted builds (`std`) and a single global otherwise.

use crate::sync::{SpinLock, SpinLockGuard};

/// State of one CPU.
#[derive(Debug, Default)]
pub struct Cpu {
    /// Process slot currently dispatched on this CPU.
    pub current: Option<usize>,
    noff: usize,
    intena: bool,
    interrupts: bool,
}

impl Cpu {
    pub const fn new() -> Self {
        Self {
            current: None,
            noff: 0,
            intena: false,
            interrupts: false,
        }
    }

    /// Depth of `push_off` nesting.
    pub fn noff(&self) -> usize {
        self.noff
    }

    /// Whether interrupts are currently enabled.
    pub fn intr_get(&self) -> bool {
        self.interrupts
    }

    pub fn intr_on(&mut self) {
        self.interrupts = true;
    }

    /// Disable interrupts, counting nesting.
    pub fn push_off(&mut self) {
        let old = self.interrupts;
        self.interrupts = false;
        if self.noff == 0 {
            self.intena = old;
        }
        self.noff += 1;
    }

    /// Undo one `push_off`; re-enables interrupts at the outermost level if
    /// they were on before.
    pub fn pop_off(&mut self) {
        assert!(!self.interrupts, "pop_off - interruptible");
        assert!(self.noff >= 1, "pop_off");
        self.noff -= 1;
        if self.noff == 0 && self.intena {
            self.interrupts = true;
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Hart {
    /// Spin locks currently held.
    depth: usize,
    /// Depth when the running dispatch started.
    base: usize,
}

impl Hart {
    const IDLE: Hart = Hart { depth: 0, base: 0 };
}

#[cfg(any(test, feature = "std"))]
mod hart {
    use core::cell::Cell;

    use super::Hart;

    std::thread_local! {
        static HART: Cell<Hart> = const { Cell::new(Hart::IDLE) };
    }

    pub(super) fn with<R>(f: impl FnOnce(&mut Hart) -> R) -> R {
        HART.with(|cell| {
            let mut hart = cell.get();
            let out = f(&mut hart);
            cell.set(hart);
            out
        })
    }
}

#[cfg(not(any(test, feature = "std")))]
mod hart {
    use super::Hart;

    static HART: spin::Mutex<Hart> = spin::Mutex::new(Hart::IDLE);

    pub(super) fn with<R>(f: impl FnOnce(&mut Hart) -> R) -> R {
        f(&mut HART.lock())
    }
}

pub(crate) fn lock_acquired() {
    hart::with(|h| h.depth += 1);
}

pub(crate) fn lock_released() {
    hart::with(|h| h.depth = h.depth.saturating_sub(1));
}

/// Spin locks held on this hart since the running dispatch started.
pub fn locks_held() -> usize {
    hart::with(|h| h.depth.saturating_sub(h.base))
}

/// Start counting locks from the current depth until the scope is dropped.
pub(crate) fn enter_dispatch() -> DispatchScope {
    DispatchScope {
        outer: hart::with(|h| core::mem::replace(&mut h.base, h.depth)),
    }
}

/// Lock-counting scope of one dispatch on this hart.
#[must_use]
pub(crate) struct DispatchScope {
    outer: usize,
}

impl Drop for DispatchScope {
    fn drop(&mut self) {
        let outer = self.outer;
        hart::with(|h| h.base = outer);
    }
}

/// All CPUs of a kernel instance.
pub struct Cpus {
    cpus: alloc::boxed::Box<[SpinLock<Cpu>]>,
}

impl Cpus {
    pub fn new(ncpu: usize) -> Self {
        Self {
            cpus: (0..ncpu).map(|_| SpinLock::new(Cpu::new(), "cpu")).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    /// Lock the state of `id`.
    pub fn lock(&self, id: usize) -> SpinLockGuard<'_, Cpu> {
        self.cpus[id].lock()
    }

    /// Disable interrupts on `id` until the returned guard is dropped.
    pub fn push_off(&self, id: usize) -> InterruptLock<'_> {
        self.cpus[id].lock().push_off();
        InterruptLock { cpu: &self.cpus[id] }
    }
}

/// Holds one level of interrupt-disable nesting on a CPU.
#[must_use]
pub struct InterruptLock<'a> {
    cpu: &'a SpinLock<Cpu>,
}

impl Drop for InterruptLock<'_> {
    fn drop(&mut self) {
        self.cpu.lock().pop_off();
    }
}
