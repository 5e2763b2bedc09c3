//! Kernel Scenario Tests
//!
//! Whole-kernel tests: boot a kernel on a RAM filesystem, drive user
//! programs through the scheduler and check the resulting process and
//! container state.

mod scheduler_tests;
mod syscall_tests;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::future::Future;

use crate::boot::Kernel;
use crate::config::KernelConfig;
use crate::sync::{Channel, SpinLock};
use crate::syscall::UserProc;
use crate::vfs::RamFs;

/// Labels pushed by user programs as they run.
pub(crate) type Trail = Arc<SpinLock<Vec<&'static str>>>;

pub(crate) fn trail() -> Trail {
    Arc::new(SpinLock::new(Vec::new(), "trail"))
}

/// Single-CPU configuration used by most scenarios.
pub(crate) fn config() -> KernelConfig {
    KernelConfig::default().with_ncpu(1)
}

/// Boot a kernel whose init runs `init`; `/build` and `/web` exist.
pub(crate) fn boot<F, Fut>(config: KernelConfig, init: F) -> (Arc<Kernel>, Arc<RamFs>)
where
    F: FnOnce(UserProc) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let fs = RamFs::new();
    fs.mkdir("/build").unwrap();
    fs.mkdir("/web").unwrap();
    let kernel = Kernel::boot(config, fs.clone(), init).unwrap();
    (kernel, fs)
}

/// Sleep forever on a channel nobody wakes.
pub(crate) async fn park(p: &UserProc) {
    let lock = SpinLock::new((), "park");
    loop {
        let guard = lock.lock();
        drop(p.sleep(Channel::Custom(u64::MAX), guard).await);
    }
}

/// Program that parks as soon as it runs.
pub(crate) async fn idle(p: UserProc) {
    park(&p).await
}
