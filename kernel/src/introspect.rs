//! Process and container listings.
//!
//! `psinfo` and `cinfo` collect their rows in two steps: slot state is copied
//! out one slot at a time, then parent and container names are resolved from
//! the copies. No container lock is ever taken while a process lock is held.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::boot::Kernel;
use crate::container::{ContainerId, ContainerState};
use crate::error::{KResult, KernelError};
use crate::memory::AddressSpace;
use crate::process::{Pid, ProcState, SlotId, Vpid};

/// One row of `psinfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcInfo {
    pub pid: Pid,
    pub vpid: Vpid,
    /// User memory size in bytes.
    pub mem: usize,
    pub state: ProcState,
    pub name: String,
    /// Name of the parent; empty for init and orphans of stopped containers.
    pub parent: String,
    pub container: String,
}

/// One row of `cinfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub state: ContainerState,
    /// Whether the caller runs in this container.
    pub current: bool,
    pub numproc: usize,
    pub maxproc: usize,
    pub mem_used: usize,
    pub mem_limit: usize,
    pub disk_used: usize,
    pub disk_limit: usize,
    pub root: String,
    pub procs: Vec<ProcInfo>,
}

struct Row {
    slot: SlotId,
    container: Option<ContainerId>,
    info: ProcInfo,
}

impl Kernel {
    fn proc_rows(&self) -> Vec<Row> {
        let links = self.procs.family.lock().clone();
        let mut rows: Vec<Row> = self
            .procs
            .iter()
            .filter_map(|p| {
                let inner = p.inner.lock();
                if inner.state == ProcState::Unused {
                    return None;
                }
                let (name, mem) = {
                    let data = p.data.lock();
                    (data.name.clone(), data.sz)
                };
                Some(Row {
                    slot: SlotId {
                        index: p.index(),
                        generation: inner.generation,
                    },
                    container: inner.container,
                    info: ProcInfo {
                        pid: inner.pid,
                        vpid: inner.vpid,
                        mem,
                        state: inner.state,
                        name,
                        parent: String::new(),
                        container: String::new(),
                    },
                })
            })
            .collect();

        let names: Vec<(SlotId, String)> =
            rows.iter().map(|r| (r.slot, r.info.name.clone())).collect();
        for row in rows.iter_mut() {
            let link = links[row.slot.index].filter(|l| l.child_generation == row.slot.generation);
            if let Some(link) = link {
                if let Some((_, name)) = names.iter().find(|(slot, _)| *slot == link.parent) {
                    row.info.parent = name.clone();
                }
            }
            if let Some(c) = row.container {
                row.info.container = self.containers.name(c).unwrap_or_default();
            }
        }
        rows
    }

    /// Processes visible to `caller`: every process for the root
    /// container, the members of its own container otherwise.
    pub fn psinfo(&self, caller: SlotId) -> KResult<Vec<ProcInfo>> {
        let mine = self.container_of(caller)?;
        Ok(self
            .proc_rows()
            .into_iter()
            .filter(|r| mine.is_root() || r.container == Some(mine))
            .map(|r| r.info)
            .collect())
    }

    /// Every live container with its members. Root container only.
    pub fn cinfo(&self, caller: SlotId) -> KResult<Vec<ContainerInfo>> {
        let mine = self.container_of(caller)?;
        if !mine.is_root() {
            return Err(KernelError::PermissionDenied);
        }
        let rows = self.proc_rows();
        let mut out = Vec::new();
        for index in 0..self.containers.len() {
            let (id, mut info) = {
                let inner = self.containers.get(index).inner.lock();
                if inner.state == ContainerState::Unused {
                    continue;
                }
                let id = ContainerId::new(index, inner.generation);
                let info = ContainerInfo {
                    name: inner.name.clone(),
                    state: inner.state,
                    current: false,
                    numproc: 0,
                    maxproc: inner.max_proc,
                    mem_used: inner.mem_used,
                    mem_limit: inner.mem_limit,
                    disk_used: inner.disk_used,
                    disk_limit: inner.disk_limit,
                    root: inner.root_dir.clone(),
                    procs: Vec::new(),
                };
                (id, info)
            };
            info.current = id == mine;
            info.numproc = self.numproc(id);
            info.procs = rows
                .iter()
                .filter(|r| r.container == Some(id))
                .map(|r| r.info.clone())
                .collect();
            out.push(info);
        }
        Ok(out)
    }

    /// Log one line per process, `pid state name`, for a console debug key.
    ///
    /// Uses `try_lock` throughout so that a wedged lock cannot hang the dump.
    pub fn procdump(&self) -> Vec<String> {
        let mut lines = Vec::new();
        for p in self.procs.iter() {
            let Some(inner) = p.inner.try_lock() else {
                lines.push(format!("? slot {} locked", p.index()));
                continue;
            };
            if inner.state == ProcState::Unused {
                continue;
            }
            let name = p
                .data
                .try_lock()
                .map(|d| d.name.clone())
                .unwrap_or_else(|| String::from("?"));
            lines.push(format!("{} {} {}", inner.pid, inner.state, name));
        }
        for line in lines.iter() {
            log::info!("{}", line);
        }
        lines
    }
}

/// Marshal `value` into user memory at `va`. Returns the encoded length.
pub fn to_user<T: Serialize>(space: &mut AddressSpace, va: usize, value: &T) -> KResult<usize> {
    let bytes = postcard::to_allocvec(value).map_err(|_| KernelError::IoFailure)?;
    space.write(va, &bytes)?;
    Ok(bytes.len())
}

/// Decode a table marshalled by [`to_user`].
pub fn from_user<T: DeserializeOwned>(space: &AddressSpace, va: usize, len: usize) -> KResult<T> {
    let mut bytes = alloc::vec![0u8; len];
    space.read(va, &mut bytes)?;
    postcard::from_bytes(&bytes).map_err(|_| KernelError::IoFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PGSIZE;
    use crate::memory::FramePool;

    #[test]
    fn test_marshal_rows_through_user_memory() {
        let pool = FramePool::new(2);
        let mut space = AddressSpace::new(&pool);
        space.alloc(0, PGSIZE).unwrap();
        let rows = alloc::vec![ProcInfo {
            pid: Pid(4),
            vpid: Vpid(2),
            mem: PGSIZE,
            state: ProcState::Sleeping,
            name: String::from("sh"),
            parent: String::from("init"),
            container: String::from("build"),
        }];
        let len = to_user(&mut space, 16, &rows).unwrap();
        let back: Vec<ProcInfo> = from_user(&space, 16, len).unwrap();
        assert_eq!(back, rows);
    }

    #[test]
    fn test_marshal_outside_image_fails() {
        let pool = FramePool::new(1);
        let mut space = AddressSpace::new(&pool);
        assert_eq!(
            to_user(&mut space, 0, &1u32).unwrap_err(),
            KernelError::BadAddress
        );
    }
}
