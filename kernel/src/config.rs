//! Kernel configuration.
//!
//! Compile-time defaults for table sizes and memory layout, plus the
//! runtime [`KernelConfig`] handed to [`crate::Kernel::boot`].

/// Default number of process slots.
pub const NPROC: usize = 64;

/// Default number of container slots. Slot 0 is the root container.
pub const NCONTS: usize = 5;

/// Default number of CPUs, each running its own scheduler.
pub const NCPU: usize = 8;

/// Open files per process.
pub const NOFILE: usize = 16;

/// Page size (4 KB).
pub const PGSIZE: usize = 4096;

/// Fixed width of process and container names.
pub const NAME_LEN: usize = 16;

/// Kernel stack pages per process.
pub const KSTACK_PAGES: usize = 1;

/// One past the highest user virtual address.
pub const MAXVA: usize = 1 << 38;

/// Trampoline page, mapped at the top of every address space.
pub const TRAMPOLINE: usize = MAXVA - PGSIZE;

/// Trap-frame page, just below the trampoline.
pub const TRAPFRAME: usize = TRAMPOLINE - PGSIZE;

/// Base of the per-process kernel stack area.
pub const KSTACK_BASE: usize = TRAMPOLINE - 0x1000_0000;

/// Kernel stack of process slot `index`, each followed by a guard page.
pub const fn kstack(index: usize) -> usize {
    KSTACK_BASE - (index + 1) * (KSTACK_PAGES + 1) * PGSIZE
}

/// Name of the always-present root container.
pub const ROOT_CONTAINER: &str = "root";

/// Runtime configuration of a kernel instance.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Number of process slots.
    pub nproc: usize,
    /// Number of container slots.
    pub nconts: usize,
    /// Number of CPUs.
    pub ncpu: usize,
    /// Physical frames available to address spaces and trap frames.
    pub max_frames: usize,
    /// Memory quota (pages) recorded for the root container.
    pub root_mem_limit: usize,
    /// Disk quota (blocks) recorded for the root container.
    pub root_disk_limit: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            nproc: NPROC,
            nconts: NCONTS,
            ncpu: NCPU,
            max_frames: 4096,
            root_mem_limit: 256,
            root_disk_limit: 256,
        }
    }
}

impl KernelConfig {
    /// Set the number of process slots.
    pub fn with_nproc(mut self, nproc: usize) -> Self {
        self.nproc = nproc;
        self
    }

    /// Set the number of container slots.
    pub fn with_nconts(mut self, nconts: usize) -> Self {
        self.nconts = nconts;
        self
    }

    /// Set the number of CPUs.
    pub fn with_ncpu(mut self, ncpu: usize) -> Self {
        self.ncpu = ncpu;
        self
    }

    /// Set the size of the physical frame pool.
    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }
}

/// Round `sz` up to a page boundary.
pub const fn pg_round_up(sz: usize) -> usize {
    (sz + PGSIZE - 1) & !(PGSIZE - 1)
}

/// Round `addr` down to a page boundary.
pub const fn pg_round_down(addr: usize) -> usize {
    addr & !(PGSIZE - 1)
}
