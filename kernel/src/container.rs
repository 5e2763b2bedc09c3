//! Containers
//!
//! A container groups processes under a shared process quota, a private vpid
//! namespace and a private filesystem root. Slot 0 is the root container: it
//! is created at boot, holds init, and can be neither paused nor stopped.
//! Only processes in the root container may manage containers.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::ops::Range;
use core::sync::atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};

use crate::boot::Kernel;
use crate::config::NAME_LEN;
use crate::error::{KResult, KernelError};
use crate::process::{ProcState, SlotId, Vpid};
use crate::sync::SpinLock;
use crate::vfs::{normalize, InodeRef, Operation};

/// Reference to a container slot that detects reuse of the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerId {
    index: usize,
    generation: u32,
}

impl ContainerId {
    pub(crate) const fn new(index: usize, generation: u32) -> Self {
        Self { index, generation }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Whether this is the root container.
    pub fn is_root(&self) -> bool {
        self.index == 0
    }
}

/// Container state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    Unused,
    Running,
    /// Paused; its processes are not scheduled.
    Suspended,
}

impl ContainerState {
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerState::Unused => "unused",
            ContainerState::Running => "running",
            ContainerState::Suspended => "suspended",
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Quotas requested for a new container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub max_proc: usize,
    pub max_mem: usize,
    pub max_disk: usize,
}

/// Mutable state of a container slot.
#[derive(Debug)]
pub struct ContainerInner {
    pub state: ContainerState,
    /// Bumped every time the slot is stopped.
    pub generation: u32,
    pub name: String,
    pub root: Option<InodeRef>,
    /// Path the root inode was resolved from.
    pub root_dir: String,
    pub max_proc: usize,
    pub mem_limit: usize,
    pub mem_used: usize,
    pub disk_limit: usize,
    pub disk_used: usize,
}

impl ContainerInner {
    const fn new() -> Self {
        Self {
            state: ContainerState::Unused,
            generation: 0,
            name: String::new(),
            root: None,
            root_dir: String::new(),
            max_proc: 0,
            mem_limit: 0,
            mem_used: 0,
            disk_limit: 0,
            disk_used: 0,
        }
    }

    fn reset(&mut self) {
        let generation = self.generation.wrapping_add(1);
        *self = Self::new();
        self.generation = generation;
    }
}

/// One container slot.
pub struct Container {
    index: usize,
    pub(crate) inner: SpinLock<ContainerInner>,
    next_vpid: AtomicU64,
}

impl Container {
    fn new(index: usize) -> Self {
        Self {
            index,
            inner: SpinLock::new(ContainerInner::new(), "container"),
            next_vpid: AtomicU64::new(1),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Next process id in this container's namespace.
    pub fn alloc_vpid(&self) -> Vpid {
        Vpid(self.next_vpid.fetch_add(1, Ordering::SeqCst))
    }
}

/// The container arena.
pub struct ContainerRegistry {
    slots: Box<[Container]>,
    /// Serializes name checks with slot claims.
    claim: SpinLock<()>,
}

impl ContainerRegistry {
    pub fn new(nconts: usize) -> Self {
        assert!(nconts > 0, "no room for the root container");
        Self {
            slots: (0..nconts).map(Container::new).collect(),
            claim: SpinLock::new((), "cclaim"),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, index: usize) -> &Container {
        &self.slots[index]
    }

    /// Current state of the container `id` refers to; a stale id is Unused.
    pub fn state(&self, id: ContainerId) -> ContainerState {
        let inner = self.slots[id.index].inner.lock();
        if inner.generation == id.generation {
            inner.state
        } else {
            ContainerState::Unused
        }
    }

    /// Name of a live container.
    pub fn name(&self, id: ContainerId) -> Option<String> {
        let inner = self.slots[id.index].inner.lock();
        (inner.generation == id.generation && inner.state != ContainerState::Unused)
            .then(|| inner.name.clone())
    }

    /// Live container called `name`.
    pub fn find(&self, name: &str) -> Option<ContainerId> {
        self.slots.iter().find_map(|c| {
            let inner = c.inner.lock();
            (inner.state != ContainerState::Unused && inner.name == name).then_some(ContainerId {
                index: c.index,
                generation: inner.generation,
            })
        })
    }

    /// Take the first Unused slot in `range` for a container called `name`
    /// and set it up with `setup`. Fails with `InvalidState` if a live
    /// container already has that name.
    pub(crate) fn claim(
        &self,
        range: Range<usize>,
        name: &str,
        setup: impl Fn(&mut ContainerInner),
    ) -> KResult<ContainerId> {
        let _claim = self.claim.lock();
        if self.find(name).is_some() {
            return Err(KernelError::InvalidState);
        }
        range
            .map(|i| &self.slots[i])
            .find_map(|c| {
                let mut inner = c.inner.lock();
                if inner.state != ContainerState::Unused {
                    return None;
                }
                inner.state = ContainerState::Running;
                inner.name = String::from(name);
                setup(&mut *inner);
                c.next_vpid.store(1, Ordering::SeqCst);
                Some(ContainerId {
                    index: c.index,
                    generation: inner.generation,
                })
            })
            .ok_or(KernelError::ResourceExhausted)
    }

    /// The first Running container after `index`, wrapping around.
    pub fn next_active(&self, index: usize) -> usize {
        let n = self.slots.len();
        (1..=n)
            .map(|step| (index + step) % n)
            .find(|&i| self.slots[i].inner.lock().state == ContainerState::Running)
            .unwrap_or_else(|| panic!("next_active: no running container"))
    }
}

/// Truncate a name to the fixed on-table width.
pub(crate) fn fixed_name(name: &str) -> String {
    let mut end = core::cmp::min(name.len(), NAME_LEN - 1);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    String::from(&name[..end])
}

// ═══════════════════════════════════════════════════════════════════════
// Container management
// ═══════════════════════════════════════════════════════════════════════

impl Kernel {
    /// Container of a live process.
    pub(crate) fn container_of(&self, slot: SlotId) -> KResult<ContainerId> {
        let inner = self.procs.get(slot.index).inner.lock();
        if inner.generation != slot.generation || inner.state == ProcState::Unused {
            return Err(KernelError::InvalidState);
        }
        inner.container.ok_or(KernelError::InvalidState)
    }

    fn require_root(&self, caller: SlotId) -> KResult<()> {
        if self.container_of(caller)?.is_root() {
            Ok(())
        } else {
            Err(KernelError::PermissionDenied)
        }
    }

    /// Live processes in `id`, counting every slot that is not Unused.
    pub fn numproc(&self, id: ContainerId) -> usize {
        self.procs
            .iter()
            .filter(|p| {
                let inner = p.inner.lock();
                inner.state != ProcState::Unused && inner.container == Some(id)
            })
            .count()
    }

    /// Create a container and move `caller` into it.
    ///
    /// The caller becomes the container's first member: it gets a fresh
    /// vpid and its working directory moves to the container root. Before
    /// boot completes `caller` has no container and this creates the root
    /// container on the filesystem root.
    pub fn container_create(
        &self,
        caller: SlotId,
        name: &str,
        root_path: &str,
        quota: Quota,
    ) -> KResult<ContainerId> {
        let bootstrap = {
            let inner = self.procs.get(caller.index).inner.lock();
            if inner.generation != caller.generation || inner.state == ProcState::Unused {
                return Err(KernelError::InvalidState);
            }
            match inner.container {
                None => true,
                Some(c) if c.is_root() => false,
                Some(_) => return Err(KernelError::PermissionDenied),
            }
        };
        let name = fixed_name(name);
        if self.containers.find(&name).is_some() {
            return Err(KernelError::InvalidState);
        }

        let (root, root_dir) = {
            let _op = Operation::begin(&*self.fs);
            if bootstrap {
                (self.fs.root(), String::from("/"))
            } else {
                let path = normalize(root_path);
                match self.fs.namei(&path) {
                    Some(ip) if ip.is_dir() => (ip, path),
                    _ => return Err(KernelError::NotFound),
                }
            }
        };

        let range = if bootstrap { 0..1 } else { 1..self.containers.len() };
        let id = self.containers.claim(range, &name, |inner| {
            inner.root = Some(root.clone());
            inner.root_dir = root_dir.clone();
            inner.max_proc = quota.max_proc;
            inner.mem_limit = quota.max_mem;
            inner.mem_used = 0;
            inner.disk_limit = quota.max_disk;
            inner.disk_used = 0;
        })?;

        let vpid = self.containers.get(id.index).alloc_vpid();
        let p = self.procs.get(caller.index);
        {
            let mut inner = p.inner.lock();
            inner.container = Some(id);
            inner.vpid = vpid;
        }
        p.data.lock().cwd = Some(root);
        log::info!(
            "[CORRAL container] created '{}' at {} (slot {}, maxproc {})",
            name,
            root_dir,
            id.index,
            quota.max_proc
        );
        Ok(id)
    }

    fn managed_container(&self, caller: SlotId, name: &str) -> KResult<ContainerId> {
        self.require_root(caller)?;
        let id = self
            .containers
            .find(&fixed_name(name))
            .ok_or(KernelError::NotFound)?;
        if id.is_root() {
            return Err(KernelError::InvalidState);
        }
        Ok(id)
    }

    fn set_container_state(
        &self,
        id: ContainerId,
        from: ContainerState,
        to: ContainerState,
    ) -> KResult<()> {
        let mut inner = self.containers.get(id.index).inner.lock();
        if inner.generation != id.generation || inner.state == ContainerState::Unused {
            return Err(KernelError::NotFound);
        }
        if inner.state == from {
            inner.state = to;
        }
        Ok(())
    }

    /// Stop scheduling the processes of container `name`.
    pub fn container_pause(&self, caller: SlotId, name: &str) -> KResult<()> {
        let id = self.managed_container(caller, name)?;
        self.set_container_state(id, ContainerState::Running, ContainerState::Suspended)?;
        log::info!("[CORRAL container] paused '{}'", name);
        Ok(())
    }

    /// Schedule the processes of a paused container again.
    pub fn container_resume(&self, caller: SlotId, name: &str) -> KResult<()> {
        let id = self.managed_container(caller, name)?;
        self.set_container_state(id, ContainerState::Suspended, ContainerState::Running)?;
        log::info!("[CORRAL container] resumed '{}'", name);
        Ok(())
    }

    /// Tear down container `name`, freeing every member process outright.
    ///
    /// Members do not run the exit protocol: nothing is reparented and no
    /// parent is woken. Returns the number of slots freed.
    pub fn container_stop(&self, caller: SlotId, name: &str) -> KResult<usize> {
        let id = self.managed_container(caller, name)?;
        let members: Vec<usize> = {
            let mut inner = self.containers.get(id.index).inner.lock();
            if inner.generation != id.generation || inner.state == ContainerState::Unused {
                return Err(KernelError::NotFound);
            }
            inner.reset();
            self.procs
                .iter()
                .filter(|p| p.inner.lock().container == Some(id))
                .map(|p| p.index())
                .collect()
        };

        let mut freed = 0;
        for index in members {
            let p = self.procs.get(index);
            let mut ctx = p.context.lock();
            let mut inner = p.inner.lock();
            if inner.state != ProcState::Unused && inner.container == Some(id) {
                p.free(&mut ctx, &mut inner);
                freed += 1;
            }
        }
        log::info!("[CORRAL container] stopped '{}', freed {} processes", name, freed);
        Ok(freed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NCONTS;

    fn running(reg: &ContainerRegistry, index: usize, name: &str) {
        let mut inner = reg.get(index).inner.lock();
        inner.state = ContainerState::Running;
        inner.name = String::from(name);
    }

    #[test]
    fn test_next_active_starts_after_index() {
        let reg = ContainerRegistry::new(5);
        running(&reg, 0, "root");
        assert_eq!(reg.next_active(0), 0);
        running(&reg, 3, "c3");
        assert_eq!(reg.next_active(0), 3);
        assert_eq!(reg.next_active(3), 0);
        reg.get(3).inner.lock().state = ContainerState::Suspended;
        assert_eq!(reg.next_active(0), 0);
    }

    #[test]
    #[should_panic(expected = "no running container")]
    fn test_next_active_without_running_container_panics() {
        ContainerRegistry::new(2).next_active(0);
    }

    #[test]
    fn test_find_matches_live_names_exactly() {
        let reg = ContainerRegistry::new(3);
        running(&reg, 0, "root");
        running(&reg, 2, "build");
        assert_eq!(reg.find("build").map(|c| c.index()), Some(2));
        assert!(reg.find("bui").is_none());
        assert!(reg.find("root").unwrap().is_root());
    }

    #[test]
    fn test_reset_invalidates_ids() {
        let reg = ContainerRegistry::new(2);
        running(&reg, 1, "a");
        let id = reg.find("a").unwrap();
        reg.get(1).inner.lock().reset();
        assert_eq!(reg.state(id), ContainerState::Unused);
        assert!(reg.name(id).is_none());
        running(&reg, 1, "a");
        assert_eq!(reg.state(id), ContainerState::Unused);
    }

    #[test]
    fn test_claim_rechecks_name() {
        let reg = ContainerRegistry::new(3);
        let id = reg.claim(1..3, "build", |inner| inner.max_proc = 4).unwrap();
        assert_eq!(reg.claim(1..3, "build", |_| {}), Err(KernelError::InvalidState));
        assert_eq!(reg.get(id.index()).inner.lock().max_proc, 4);
        assert!(reg.claim(1..3, "web", |_| {}).is_ok());
        assert_eq!(reg.claim(1..3, "docs", |_| {}), Err(KernelError::ResourceExhausted));
    }

    #[test]
    fn test_concurrent_claims_keep_names_unique() {
        let reg = ContainerRegistry::new(NCONTS);
        let results: Vec<_> = std::thread::scope(|s| {
            let workers: Vec<_> = (0..NCONTS - 1)
                .map(|_| s.spawn(|| reg.claim(1..NCONTS, "build", |_| {})))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| *e == KernelError::InvalidState));
    }

    #[test]
    fn test_vpids_are_per_container() {
        let reg = ContainerRegistry::new(2);
        assert_eq!(reg.get(0).alloc_vpid(), Vpid(1));
        assert_eq!(reg.get(0).alloc_vpid(), Vpid(2));
        assert_eq!(reg.get(1).alloc_vpid(), Vpid(1));
    }

    #[test]
    fn test_fixed_name_truncates() {
        assert_eq!(fixed_name("averyveryverylongname"), "averyveryverylo");
        assert_eq!(fixed_name("ok"), "ok");
    }
}
