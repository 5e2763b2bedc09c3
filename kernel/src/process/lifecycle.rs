//! Process lifecycle: first process, fork, exit, wait, kill.

use alloc::string::String;
use alloc::sync::Arc;
use core::convert::Infallible;
use futures_util::future::{BoxFuture, FutureExt};

use super::context::{Continuation, Program};
use super::table::{Link, Pid, Proc, ProcState, SlotId};
use crate::boot::Kernel;
use crate::config::{PGSIZE, ROOT_CONTAINER};
use crate::container::{ContainerState, Quota};
use crate::error::{KResult, KernelError};
use crate::sync::{Channel, Sleep, Switch};
use crate::syscall::UserProc;
use crate::vfs::Operation;

/// Image of the first process: a user program that runs `exec("/init")`.
pub const INITCODE: [u8; 51] = [
    0x17, 0x05, 0x00, 0x00, 0x13, 0x05, 0x05, 0x02, 0x97, 0x05, 0x00, 0x00, 0x93, 0x85, 0x05, 0x02,
    0x9d, 0x48, 0x73, 0x00, 0x00, 0x00, 0x89, 0x48, 0x73, 0x00, 0x00, 0x00, 0xef, 0xf0, 0xbf, 0xff,
    0x2f, 0x69, 0x6e, 0x69, 0x74, 0x00, 0x00, 0x01, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00,
];

/// Outcome of one scan for exited children.
enum Reap<'a, T> {
    Child(Pid, i32),
    Sleep(Sleep<'a, T>),
}

impl Kernel {
    /// Create the first process and the root container around it.
    pub(crate) fn user_init(&self, program: Program) -> KResult<SlotId> {
        let (p, inner) = self.procs.allocate(&self.frames)?;
        let slot = SlotId {
            index: p.index(),
            generation: inner.generation,
        };
        drop(inner);
        {
            let mut data = p.data.lock();
            data.space_mut().init_code(&INITCODE)?;
            data.sz = PGSIZE;
            let tf = data.tf_mut();
            tf.epc = 0;
            tf.sp = PGSIZE as u64;
            data.name = String::from("initcode");
        }
        p.context.lock().continuation = Continuation::Fresh(program);
        self.init.call_once(|| slot);

        let quota = Quota {
            max_proc: self.config().nproc,
            max_mem: self.config().root_mem_limit,
            max_disk: self.config().root_disk_limit,
        };
        self.container_create(slot, ROOT_CONTAINER, "/", quota)?;
        p.inner.lock().state = ProcState::Runnable;
        log::info!("[CORRAL proc] init is pid {}", Pid::INIT);
        Ok(slot)
    }

    /// Kernel continuation of a process that has never run: enter the user
    /// program, and exit with status 0 if it returns.
    pub(crate) fn fork_ret(self: &Arc<Self>, slot: SlotId, program: Program) -> BoxFuture<'static, ()> {
        let user = UserProc::new(Arc::clone(self), slot);
        async move {
            program(user.clone()).await;
            match user.exit(0).await {}
        }
        .boxed()
    }

    fn discard(&self, p: &Proc) {
        let mut ctx = p.context.lock();
        let mut inner = p.inner.lock();
        p.free(&mut ctx, &mut inner);
    }

    fn copy_image(&self, parent: &Proc, child: &Proc) -> KResult<()> {
        let pdata = parent.data.lock();
        let mut cdata = child.data.lock();
        pdata.space().copy_to(cdata.space_mut(), pdata.sz)?;
        cdata.sz = pdata.sz;
        *cdata.tf_mut() = pdata.tf().clone();
        cdata.tf_mut().a0 = 0;
        cdata.ofile = pdata.ofile.clone();
        cdata.cwd = pdata.cwd.clone();
        cdata.name = pdata.name.clone();
        Ok(())
    }

    /// Create a child of `caller` running `program`. Returns the child's pid.
    ///
    /// The child gets a copy of the caller's memory, trap frame (with `a0`
    /// cleared), open files, working directory and name. It joins the
    /// caller's container, subject to the container's process quota.
    pub fn fork(&self, caller: SlotId, program: Program) -> KResult<Pid> {
        let container = self.container_of(caller)?;
        let parent = self.procs.get(caller.index);
        let (np, inner) = self.procs.allocate(&self.frames)?;
        let pid = inner.pid;
        let child_generation = inner.generation;
        drop(inner);

        if let Err(e) = self.copy_image(parent, np) {
            self.discard(np);
            return Err(e);
        }
        np.context.lock().continuation = Continuation::Fresh(program);
        self.procs.family.lock()[np.index()] = Some(Link {
            parent: caller,
            child_generation,
        });

        let c = self.containers.get(container.index());
        let cinner = c.inner.lock();
        let live =
            cinner.generation == container.generation() && cinner.state != ContainerState::Unused;
        let count = if live { self.numproc(container) } else { 0 };
        if !live || count >= cinner.max_proc {
            let name = cinner.name.clone();
            drop(cinner);
            self.procs.family.lock()[np.index()] = None;
            self.discard(np);
            if !live {
                return Err(KernelError::InvalidState);
            }
            log::warn!("[CORRAL proc] hit max proc for container {}", name);
            return Err(KernelError::ResourceExhausted);
        }
        let vpid = c.alloc_vpid();
        {
            let mut inner = np.inner.lock();
            inner.container = Some(container);
            inner.vpid = vpid;
            inner.state = ProcState::Runnable;
        }
        drop(cinner);
        log::debug!("[CORRAL proc] fork: pid {} (vpid {})", pid, vpid.0);
        Ok(pid)
    }

    /// Slot of the first process.
    pub fn init_slot(&self) -> SlotId {
        match self.init.get() {
            Some(slot) => *slot,
            None => panic!("no init process"),
        }
    }

    fn exit_prepare(&self, me: SlotId, status: i32) {
        let init = self.init_slot();
        if me == init {
            panic!("init exiting");
        }
        let p = self.procs.get(me.index);

        let cwd = {
            let mut data = p.data.lock();
            data.ofile.close_all();
            data.cwd.take()
        };
        {
            let _op = Operation::begin(&*self.fs);
            drop(cwd);
        }

        let mut family = self.procs.family.lock();
        for link in family.iter_mut().flatten() {
            if link.parent == me {
                link.parent = init;
            }
        }
        // Init may have inherited a zombie.
        self.wakeup(Channel::Proc(init.index));
        if let Some(link) = family[me.index] {
            self.wakeup(Channel::Proc(link.parent.index));
        }

        let cpu = self.running_cpu(p);
        let _intr = self.cpus.push_off(cpu);
        let mut inner = p.inner.lock();
        inner.xstate = status;
        inner.state = ProcState::Zombie;
        drop(family);
        log::debug!("[CORRAL proc] pid {} exited with {}", inner.pid, status);
        self.sched(cpu, &inner);
    }

    /// Terminate process `me`. It stays a zombie until its parent waits.
    pub async fn exit(&self, me: SlotId, status: i32) -> Infallible {
        self.exit_prepare(me, status);
        Switch::new().await;
        panic!("zombie exit");
    }

    fn reap(
        &self,
        me: SlotId,
        status_va: Option<usize>,
    ) -> KResult<Reap<'_, alloc::vec::Vec<Option<Link>>>> {
        let mut family = self.procs.family.lock();
        let mut have_kids = false;
        for index in 0..family.len() {
            let Some(link) = family[index] else {
                continue;
            };
            if link.parent != me {
                continue;
            }
            let np = self.procs.get(index);
            let inner = np.inner.lock();
            if inner.generation != link.child_generation || inner.state == ProcState::Unused {
                // Freed behind our back by a container stop.
                drop(inner);
                family[index] = None;
                continue;
            }
            have_kids = true;
            if inner.state != ProcState::Zombie {
                continue;
            }
            let status = inner.xstate;
            drop(inner);
            // The child stays a zombie if the status cannot be delivered.
            if let Some(va) = status_va {
                self.copy_out(me, va, &status.to_le_bytes())?;
            }
            let mut ctx = np.context.lock();
            let mut inner = np.inner.lock();
            if inner.generation != link.child_generation {
                family[index] = None;
                continue;
            }
            let reaped = Reap::Child(inner.pid, inner.xstate);
            np.free(&mut ctx, &mut inner);
            family[index] = None;
            return Ok(reaped);
        }

        let killed = self.procs.get(me.index).inner.lock().killed;
        if !have_kids || killed {
            return Err(KernelError::NoChildren);
        }
        Ok(Reap::Sleep(self.sleep(me, Channel::Proc(me.index), family)))
    }

    /// Wait for a child of `me` to exit and free it. Returns the child's pid
    /// and exit status; with `status_va` the status is also copied to that
    /// user address of `me` before the child is freed.
    pub async fn wait(&self, me: SlotId, status_va: Option<usize>) -> KResult<(Pid, i32)> {
        loop {
            match self.reap(me, status_va)? {
                Reap::Child(pid, status) => return Ok((pid, status)),
                Reap::Sleep(sleep) => drop(sleep.await),
            }
        }
    }

    /// Mark a process killed. Root callers name a global pid; others name a
    /// vpid in their own container.
    pub fn kill(&self, caller: SlotId, id: u64) -> KResult<()> {
        let mine = self.container_of(caller)?;
        let mut foreign = false;
        for p in self.procs.iter() {
            let mut inner = p.inner.lock();
            if inner.state == ProcState::Unused {
                continue;
            }
            let matched = if mine.is_root() {
                inner.pid.0 == id
            } else if inner.vpid.0 == id {
                if inner.container != Some(mine) {
                    foreign = true;
                    continue;
                }
                true
            } else {
                false
            };
            if !matched {
                continue;
            }
            inner.killed = true;
            if matches!(inner.state, ProcState::Sleeping | ProcState::Suspended) {
                inner.state = ProcState::Runnable;
            }
            log::debug!("[CORRAL proc] killed pid {}", inner.pid);
            return Ok(());
        }
        Err(if foreign {
            KernelError::PermissionDenied
        } else {
            KernelError::NotFound
        })
    }

    /// Whether `me` has been killed.
    pub fn killed(&self, me: SlotId) -> bool {
        self.procs.get(me.index).inner.lock().killed
    }

    /// Copy `data` to user address `va` of `me`.
    pub fn copy_out(&self, me: SlotId, va: usize, data: &[u8]) -> KResult<()> {
        let mut pdata = self.procs.get(me.index).data.lock();
        if va.checked_add(data.len()).map_or(true, |end| end > pdata.sz) {
            return Err(KernelError::BadAddress);
        }
        pdata.space_mut().write(va, data)
    }

    /// Copy `buf.len()` bytes from user address `va` of `me`.
    pub fn copy_in(&self, me: SlotId, va: usize, buf: &mut [u8]) -> KResult<()> {
        let pdata = self.procs.get(me.index).data.lock();
        if va.checked_add(buf.len()).map_or(true, |end| end > pdata.sz) {
            return Err(KernelError::BadAddress);
        }
        pdata.space().read(va, buf)
    }

    /// Grow or shrink the user memory of `me` by `n` bytes. Returns the old
    /// size.
    pub fn grow(&self, me: SlotId, n: isize) -> KResult<usize> {
        let mut data = self.procs.get(me.index).data.lock();
        let old = data.sz;
        let new = old
            .checked_add_signed(n)
            .ok_or(KernelError::BadAddress)?;
        data.sz = if n > 0 {
            data.space_mut().alloc(old, new)?
        } else {
            data.space_mut().dealloc(old, new)
        };
        Ok(old)
    }
}
