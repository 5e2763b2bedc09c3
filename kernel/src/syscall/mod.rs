//! System call interface.
//!
//! A user program runs with a [`UserProc`] handle to the process it runs in
//! and makes its system calls through it. Calls that block (`wait`,
//! `yield_now`, `sleep`, `exit`) are `async` and give up the CPU when
//! awaited; the rest complete immediately.

pub mod trace;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::convert::Infallible;
use core::future::Future;

use crate::boot::Kernel;
use crate::container::{ContainerId, Quota};
use crate::error::{KResult, KernelError};
use crate::introspect::{self, ContainerInfo, ProcInfo};
use crate::process::{program, Pid, SlotId, Vpid};
use crate::sync::{Channel, Sleep, SpinLockGuard};
use crate::vfs::{File, InodeKind, OpenFlags, Operation};

use self::trace::trace;

/// Handle through which a user program makes system calls.
#[derive(Clone)]
pub struct UserProc {
    kernel: Arc<Kernel>,
    slot: SlotId,
}

impl core::fmt::Debug for UserProc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UserProc").field("slot", &self.slot).finish()
    }
}

impl UserProc {
    pub(crate) fn new(kernel: Arc<Kernel>, slot: SlotId) -> Self {
        Self { kernel, slot }
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    // ==========================================
    // Process lifecycle
    // ==========================================

    pub fn getpid(&self) -> Pid {
        trace(&self.kernel, self.slot, "getpid", format_args!(""));
        self.kernel.procs.get(self.slot.index).inner.lock().pid
    }

    /// Id of this process inside its container.
    pub fn getvpid(&self) -> Vpid {
        self.kernel.procs.get(self.slot.index).inner.lock().vpid
    }

    /// Fork a child that runs `child` once scheduled.
    pub fn fork<F, Fut>(&self, child: F) -> KResult<Pid>
    where
        F: FnOnce(UserProc) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        trace(&self.kernel, self.slot, "fork", format_args!(""));
        self.kernel.fork(self.slot, program(child))
    }

    pub async fn exit(&self, status: i32) -> Infallible {
        trace(&self.kernel, self.slot, "exit", format_args!("{}", status));
        self.kernel.exit(self.slot, status).await
    }

    /// Wait for a child to exit; returns its pid and exit status.
    pub async fn wait(&self) -> KResult<(Pid, i32)> {
        trace(&self.kernel, self.slot, "wait", format_args!(""));
        self.kernel.wait(self.slot, None).await
    }

    /// `wait` that also stores the child's exit status at user address
    /// `va`. A bad address fails the call and leaves the child unreaped.
    pub async fn wait_to_user(&self, va: usize) -> KResult<Pid> {
        trace(&self.kernel, self.slot, "wait", format_args!("{:#x}", va));
        self.kernel
            .wait(self.slot, Some(va))
            .await
            .map(|(pid, _)| pid)
    }

    pub fn kill(&self, pid: u64) -> KResult<()> {
        trace(&self.kernel, self.slot, "kill", format_args!("{}", pid));
        self.kernel.kill(self.slot, pid)
    }

    pub fn killed(&self) -> bool {
        self.kernel.killed(self.slot)
    }

    pub async fn yield_now(&self) {
        self.kernel.yield_cpu(self.slot).await
    }

    /// Sleep on `chan`, releasing `guard` until woken.
    pub fn sleep<'a, T: ?Sized>(&'a self, chan: Channel, guard: SpinLockGuard<'a, T>) -> Sleep<'a, T> {
        self.kernel.sleep(self.slot, chan, guard)
    }

    pub fn wakeup(&self, chan: Channel) -> usize {
        self.kernel.wakeup(chan)
    }

    /// Grow (or shrink) user memory by `n` bytes; returns the old size.
    pub fn sbrk(&self, n: isize) -> KResult<usize> {
        trace(&self.kernel, self.slot, "sbrk", format_args!("{}", n));
        self.kernel.grow(self.slot, n)
    }

    /// Log every later system call of this process.
    pub fn traceon(&self) {
        self.kernel.procs.get(self.slot.index).data.lock().trace = true;
    }

    // ==========================================
    // Files and user memory
    // ==========================================

    pub fn open(&self, path: &str, flags: OpenFlags) -> KResult<usize> {
        trace(&self.kernel, self.slot, "open", format_args!("{}, {:#x}", path, flags.bits()));
        let fs = &*self.kernel.fs;
        let ip = {
            let _op = Operation::begin(fs);
            if flags.contains(OpenFlags::CREATE) {
                fs.create(path, InodeKind::File)?
            } else {
                fs.namei(path).ok_or(KernelError::NotFound)?
            }
        };
        if ip.is_dir() && flags.writable() {
            return Err(KernelError::InvalidState);
        }
        let file = File::open(ip, flags);
        self.kernel.procs.get(self.slot.index).data.lock().ofile.alloc(file)
    }

    pub fn close(&self, fd: usize) -> KResult<()> {
        trace(&self.kernel, self.slot, "close", format_args!("{}", fd));
        self.kernel.procs.get(self.slot.index).data.lock().ofile.close(fd)
    }

    pub fn dup(&self, fd: usize) -> KResult<usize> {
        trace(&self.kernel, self.slot, "dup", format_args!("{}", fd));
        let mut data = self.kernel.procs.get(self.slot.index).data.lock();
        let file = data.ofile.get(fd)?.clone();
        data.ofile.alloc(file)
    }

    pub fn read(&self, fd: usize, buf: &mut [u8]) -> KResult<usize> {
        trace(&self.kernel, self.slot, "read", format_args!("{}, {}", fd, buf.len()));
        let file = self.file(fd)?;
        file.read(buf)
    }

    pub fn write(&self, fd: usize, data: &[u8]) -> KResult<usize> {
        trace(&self.kernel, self.slot, "write", format_args!("{}, {}", fd, data.len()));
        let file = self.file(fd)?;
        let _op = Operation::begin(&*self.kernel.fs);
        file.write(data)
    }

    fn file(&self, fd: usize) -> KResult<File> {
        self.kernel
            .procs
            .get(self.slot.index)
            .data
            .lock()
            .ofile
            .get(fd)
            .cloned()
    }

    /// Copy `data` to user address `va`.
    pub fn copy_out(&self, va: usize, data: &[u8]) -> KResult<()> {
        self.kernel.copy_out(self.slot, va, data)
    }

    /// Copy `buf.len()` bytes from user address `va`.
    pub fn copy_in(&self, va: usize, buf: &mut [u8]) -> KResult<()> {
        self.kernel.copy_in(self.slot, va, buf)
    }

    // ==========================================
    // Checkpoint / restore
    // ==========================================

    /// Checkpoint process `pid` into open file `fd`.
    pub fn suspend(&self, pid: u64, fd: usize) -> KResult<()> {
        trace(&self.kernel, self.slot, "suspend", format_args!("{}, {}", pid, fd));
        self.kernel.suspend(self.slot, Pid(pid), fd)
    }

    /// Replace this process's image with the checkpoint at `path`.
    /// Returns 1.
    pub fn resume(&self, path: &str) -> KResult<i64> {
        trace(&self.kernel, self.slot, "resume", format_args!("{}", path));
        self.kernel.resume(self.slot, path).map(|()| 1)
    }

    // ==========================================
    // Containers
    // ==========================================

    /// Create a container rooted at `root_path` and move into it.
    pub fn cinit(&self, name: &str, root_path: &str, quota: Quota) -> KResult<ContainerId> {
        trace(&self.kernel, self.slot, "cinit", format_args!("{}, {}", name, root_path));
        self.kernel.container_create(self.slot, name, root_path, quota)
    }

    pub fn cpause(&self, name: &str) -> KResult<()> {
        trace(&self.kernel, self.slot, "cpause", format_args!("{}", name));
        self.kernel.container_pause(self.slot, name)
    }

    pub fn cresume(&self, name: &str) -> KResult<()> {
        trace(&self.kernel, self.slot, "cresume", format_args!("{}", name));
        self.kernel.container_resume(self.slot, name)
    }

    /// Stop a container; returns the number of processes freed.
    pub fn cstop(&self, name: &str) -> KResult<usize> {
        trace(&self.kernel, self.slot, "cstop", format_args!("{}", name));
        self.kernel.container_stop(self.slot, name)
    }

    pub fn psinfo(&self) -> KResult<Vec<ProcInfo>> {
        trace(&self.kernel, self.slot, "psinfo", format_args!(""));
        self.kernel.psinfo(self.slot)
    }

    pub fn cinfo(&self) -> KResult<Vec<ContainerInfo>> {
        trace(&self.kernel, self.slot, "cinfo", format_args!(""));
        self.kernel.cinfo(self.slot)
    }

    /// Marshal `psinfo` into user memory at `va`; returns the byte count.
    pub fn psinfo_to_user(&self, va: usize) -> KResult<usize> {
        let rows = self.psinfo()?;
        let mut data = self.kernel.procs.get(self.slot.index).data.lock();
        introspect::to_user(data.space_mut(), va, &rows)
    }

    /// Marshal `cinfo` into user memory at `va`; returns the byte count.
    pub fn cinfo_to_user(&self, va: usize) -> KResult<usize> {
        let rows = self.cinfo()?;
        let mut data = self.kernel.procs.get(self.slot.index).data.lock();
        introspect::to_user(data.space_mut(), va, &rows)
    }
}
