//! Process Table
//!
//! A fixed arena of process slots. Each slot splits its state across three
//! locks, always taken in this order:
//!
//! 1. `context`: the saved kernel continuation, held by a CPU while it runs
//!    the process;
//! 2. `inner`: scheduling state and identity;
//! 3. `data`: memory, files and name.
//!
//! Parent links live apart from the slots in `family`, which is taken before
//! any slot lock.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use serde::{Deserialize, Serialize};

use super::context::{SwitchContext, TrapFrame};
use crate::container::ContainerId;
use crate::error::KResult;
use crate::memory::{AddressSpace, Frame, FramePool};
use crate::sync::{Channel, SpinLock, SpinLockGuard};
use crate::vfs::{FdTable, InodeRef};

/// Global process ID. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pid(pub u64);

impl Pid {
    /// Pid of the first process.
    pub const INIT: Pid = Pid(1);
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process ID inside its container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Vpid(pub u64);

/// Reference to a process slot that detects reuse of the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    pub index: usize,
    pub generation: u32,
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcState {
    Unused,
    /// Allocated, not yet committed by fork.
    Used,
    Runnable,
    Running,
    Sleeping,
    Zombie,
    Suspended,
}

impl ProcState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcState::Unused => "unused",
            ProcState::Used => "used",
            ProcState::Runnable => "runble",
            ProcState::Running => "run",
            ProcState::Sleeping => "sleep",
            ProcState::Zombie => "zombie",
            ProcState::Suspended => "suspended",
        }
    }
}

impl fmt::Display for ProcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling state and identity of a slot.
#[derive(Debug)]
pub struct ProcInner {
    pub state: ProcState,
    /// Bumped every time the slot is freed.
    pub generation: u32,
    pub pid: Pid,
    pub vpid: Vpid,
    pub container: Option<ContainerId>,
    /// Valid only while Sleeping.
    pub chan: Option<Channel>,
    pub killed: bool,
    pub xstate: i32,
}

impl ProcInner {
    const fn new() -> Self {
        Self {
            state: ProcState::Unused,
            generation: 0,
            pid: Pid(0),
            vpid: Vpid(0),
            container: None,
            chan: None,
            killed: false,
            xstate: 0,
        }
    }
}

/// Trap-frame page of a process.
pub struct TrapFramePage {
    pub regs: TrapFrame,
    _frame: Frame,
}

impl TrapFramePage {
    pub fn new(frame: Frame) -> Self {
        Self {
            regs: TrapFrame::default(),
            _frame: frame,
        }
    }
}

/// Resources owned by a slot.
pub struct ProcData {
    /// Size of user memory in bytes.
    pub sz: usize,
    pub pagetable: Option<AddressSpace>,
    pub trapframe: Option<TrapFramePage>,
    pub ofile: FdTable,
    pub cwd: Option<InodeRef>,
    pub name: String,
    /// Log every system call this process makes.
    pub trace: bool,
}

impl ProcData {
    fn new() -> Self {
        Self {
            sz: 0,
            pagetable: None,
            trapframe: None,
            ofile: FdTable::new(),
            cwd: None,
            name: String::new(),
            trace: false,
        }
    }

    /// Trap frame of a live process.
    pub fn tf(&self) -> &TrapFrame {
        match &self.trapframe {
            Some(page) => &page.regs,
            None => panic!("process has no trap frame"),
        }
    }

    pub fn tf_mut(&mut self) -> &mut TrapFrame {
        match &mut self.trapframe {
            Some(page) => &mut page.regs,
            None => panic!("process has no trap frame"),
        }
    }

    /// Address space of a live process.
    pub fn space(&self) -> &AddressSpace {
        match &self.pagetable {
            Some(space) => space,
            None => panic!("process has no address space"),
        }
    }

    pub fn space_mut(&mut self) -> &mut AddressSpace {
        match &mut self.pagetable {
            Some(space) => space,
            None => panic!("process has no address space"),
        }
    }
}

const NO_CPU: usize = usize::MAX;

/// One process slot.
pub struct Proc {
    index: usize,
    pub(crate) context: SpinLock<SwitchContext>,
    pub(crate) inner: SpinLock<ProcInner>,
    pub(crate) data: SpinLock<ProcData>,
    cpu: AtomicUsize,
}

impl Proc {
    fn new(index: usize) -> Self {
        Self {
            index,
            context: SpinLock::new(SwitchContext::zero(), "proc.context"),
            inner: SpinLock::new(ProcInner::new(), "proc"),
            data: SpinLock::new(ProcData::new(), "proc.data"),
            cpu: AtomicUsize::new(NO_CPU),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// CPU the process was last dispatched on.
    pub(crate) fn cpu(&self) -> Option<usize> {
        match self.cpu.load(Ordering::SeqCst) {
            NO_CPU => None,
            id => Some(id),
        }
    }

    pub(crate) fn set_cpu(&self, id: Option<usize>) {
        self.cpu.store(id.unwrap_or(NO_CPU), Ordering::SeqCst);
    }

    /// Return the slot to Unused, releasing everything it owns.
    ///
    /// The caller holds the slot's context and state locks, which guarantees
    /// no CPU is running it.
    pub(crate) fn free(&self, ctx: &mut SwitchContext, inner: &mut ProcInner) {
        {
            let mut data = self.data.lock();
            data.trapframe = None;
            data.pagetable = None;
            data.sz = 0;
            data.ofile.close_all();
            data.cwd = None;
            data.name.clear();
            data.trace = false;
        }
        *ctx = SwitchContext::zero();
        let generation = inner.generation.wrapping_add(1);
        *inner = ProcInner::new();
        inner.generation = generation;
        self.set_cpu(None);
    }
}

/// Parent link of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link {
    pub parent: SlotId,
    /// Generation of the child slot the link was made for.
    pub child_generation: u32,
}

/// The process arena.
pub struct ProcTable {
    procs: Box<[Proc]>,
    pub(crate) family: SpinLock<Vec<Option<Link>>>,
    next_pid: AtomicU64,
}

impl ProcTable {
    pub fn new(nproc: usize) -> Self {
        Self {
            procs: (0..nproc).map(Proc::new).collect(),
            family: SpinLock::new(alloc::vec![None; nproc], "wait_lock"),
            next_pid: AtomicU64::new(Pid::INIT.0),
        }
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    pub fn get(&self, index: usize) -> &Proc {
        &self.procs[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Proc> {
        self.procs.iter()
    }

    fn alloc_pid(&self) -> Pid {
        Pid(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }

    /// Claim the first Unused slot.
    ///
    /// The slot comes back in state Used with a fresh pid, a trap-frame page,
    /// an address space holding only the trampoline and trap-frame mappings,
    /// and a context that starts at the fork-return path. Its state lock is
    /// still held.
    pub fn allocate(
        &self,
        frames: &Arc<FramePool>,
    ) -> KResult<(&Proc, SpinLockGuard<'_, ProcInner>)> {
        for p in self.procs.iter() {
            let mut inner = p.inner.lock();
            if inner.state != ProcState::Unused {
                continue;
            }
            // Context before state is the lock order; a slot whose context is
            // busy is still being torn down.
            let Some(mut ctx) = p.context.try_lock() else {
                continue;
            };
            let frame = frames.alloc()?;
            inner.pid = self.alloc_pid();
            inner.state = ProcState::Used;
            {
                let mut data = p.data.lock();
                data.trapframe = Some(TrapFramePage::new(frame));
                data.pagetable = Some(AddressSpace::for_process(frames));
            }
            *ctx = SwitchContext::fork_ret(p.index);
            drop(ctx);
            return Ok((p, inner));
        }
        Err(crate::error::KernelError::ResourceExhausted)
    }

    /// Slot of the live process with global id `pid`.
    pub fn find(&self, pid: Pid) -> Option<SlotId> {
        self.procs.iter().find_map(|p| {
            let inner = p.inner.lock();
            (inner.state != ProcState::Unused && inner.pid == pid).then_some(SlotId {
                index: p.index,
                generation: inner.generation,
            })
        })
    }

    /// Number of slots in use.
    pub fn live(&self) -> usize {
        self.procs
            .iter()
            .filter(|p| p.inner.lock().state != ProcState::Unused)
            .count()
    }
}
