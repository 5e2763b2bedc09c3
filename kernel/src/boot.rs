//! Kernel instance and boot.
//!
//! A [`Kernel`] owns every table: processes, containers, CPUs, the frame
//! pool and the filesystem. Booting creates the first process and the root
//! container around it; after that the kernel runs by handing one
//! [`Scheduler`] to each CPU.

use alloc::sync::Arc;
use core::future::Future;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::KernelConfig;
use crate::container::ContainerRegistry;
use crate::cpu::Cpus;
use crate::error::KResult;
use crate::memory::FramePool;
use crate::process::{program, Pid, ProcTable, SlotId};
use crate::scheduler::Scheduler;
use crate::syscall::UserProc;
use crate::vfs::FileSystem;

/// A running kernel.
pub struct Kernel {
    config: KernelConfig,
    pub(crate) procs: ProcTable,
    pub(crate) containers: ContainerRegistry,
    pub(crate) cpus: Cpus,
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) frames: Arc<FramePool>,
    pub(crate) init: spin::Once<SlotId>,
    pub(crate) context_switches: AtomicU64,
}

impl Kernel {
    fn new(config: KernelConfig, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            procs: ProcTable::new(config.nproc),
            containers: ContainerRegistry::new(config.nconts),
            cpus: Cpus::new(config.ncpu),
            frames: FramePool::new(config.max_frames),
            fs,
            init: spin::Once::new(),
            context_switches: AtomicU64::new(0),
            config,
        }
    }

    /// Boot a kernel whose first process runs `init`.
    ///
    /// On return init is Runnable in the root container, which owns the
    /// filesystem root; nothing has been scheduled yet.
    pub fn boot<F, Fut>(config: KernelConfig, fs: Arc<dyn FileSystem>, init: F) -> KResult<Arc<Self>>
    where
        F: FnOnce(UserProc) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        log::info!(
            "[CORRAL] booting: {} procs, {} containers, {} cpus",
            config.nproc,
            config.nconts,
            config.ncpu
        );
        let kernel = Arc::new(Self::new(config, fs));
        kernel.user_init(program(init))?;
        Ok(kernel)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn frames(&self) -> &Arc<FramePool> {
        &self.frames
    }

    pub fn procs(&self) -> &ProcTable {
        &self.procs
    }

    pub fn containers(&self) -> &ContainerRegistry {
        &self.containers
    }

    /// Dispatches performed by all schedulers.
    pub fn context_switches(&self) -> u64 {
        self.context_switches.load(Ordering::Relaxed)
    }

    /// Scheduler for CPU `cpu`.
    pub fn scheduler(self: &Arc<Self>, cpu: usize) -> Scheduler {
        Scheduler::new(Arc::clone(self), cpu)
    }

    /// Handle on the live process `pid`, as that process would see it.
    pub fn user_proc(self: &Arc<Self>, pid: Pid) -> Option<UserProc> {
        self.procs
            .find(pid)
            .map(|slot| UserProc::new(Arc::clone(self), slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::ContainerState;
    use crate::process::ProcState;
    use crate::vfs::RamFs;

    #[test]
    fn test_boot_creates_init_in_root() {
        let kernel = Kernel::boot(KernelConfig::default(), RamFs::new(), |_| async {}).unwrap();
        let init = kernel.init_slot();
        assert_eq!(init.index, 0);
        let inner = kernel.procs.get(0).inner.lock();
        assert_eq!(inner.pid, Pid::INIT);
        assert_eq!(inner.state, ProcState::Runnable);
        let root = inner.container.unwrap();
        assert!(root.is_root());
        drop(inner);
        assert_eq!(kernel.containers.state(root), ContainerState::Running);
        assert_eq!(kernel.procs.get(0).data.lock().name, "initcode");
        assert_eq!(kernel.numproc(root), 1);
    }
}
