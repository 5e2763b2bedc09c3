//! Per-process syscall tracing.
//!
//! A process that called `traceon` has every subsequent system call logged
//! as `[pid] sys_name(args)`. The flag is per process and survives a
//! checkpoint; children do not inherit it.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::boot::Kernel;
use crate::process::SlotId;

/// Traced calls logged since boot, across all kernels in this address space.
static TRACED_CALLS: AtomicU64 = AtomicU64::new(0);

/// Number of traced calls logged so far.
pub fn traced_calls() -> u64 {
    TRACED_CALLS.load(Ordering::Relaxed)
}

/// Log a call made by `slot` if it has tracing enabled.
pub(crate) fn trace(kernel: &Kernel, slot: SlotId, name: &str, args: fmt::Arguments<'_>) {
    let p = kernel.procs.get(slot.index);
    if !p.data.lock().trace {
        return;
    }
    let pid = p.inner.lock().pid;
    TRACED_CALLS.fetch_add(1, Ordering::Relaxed);
    log::info!("[{}] sys_{}({})", pid, name, args);
}
