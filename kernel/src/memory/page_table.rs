//! Per-process address spaces.
//!
//! An [`AddressSpace`] maps page-aligned virtual addresses to frames taken
//! from a [`FramePool`]. User memory is the contiguous range `[0, sz)`; the
//! trampoline and trap-frame pages sit at the top of every space and carry no
//! user permission.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use bitflags::bitflags;
use core::cmp;

use super::frame::{Frame, FramePool};
use crate::config::{pg_round_down, pg_round_up, PGSIZE, TRAMPOLINE, TRAPFRAME};
use crate::error::{KResult, KernelError};

bitflags! {
    /// Page table entry permissions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u16 {
        /// Entry is valid.
        const V = 1 << 0;
        /// Readable.
        const R = 1 << 1;
        /// Writable.
        const W = 1 << 2;
        /// Executable.
        const X = 1 << 3;
        /// Accessible from user mode.
        const U = 1 << 4;
    }
}

/// Permissions given to ordinary user pages.
const USER_RWX: PteFlags = PteFlags::V
    .union(PteFlags::R)
    .union(PteFlags::W)
    .union(PteFlags::X)
    .union(PteFlags::U);

enum Backing {
    /// Shared trampoline code; no per-space frame.
    Trampoline,
    /// The owning process's trap-frame page, held by the process itself.
    TrapFrame,
    Frame(Frame),
}

struct Entry {
    flags: PteFlags,
    backing: Backing,
}

/// A process address space.
pub struct AddressSpace {
    pool: Arc<FramePool>,
    pages: BTreeMap<usize, Entry>,
}

impl AddressSpace {
    /// An empty address space.
    pub fn new(pool: &Arc<FramePool>) -> Self {
        Self {
            pool: Arc::clone(pool),
            pages: BTreeMap::new(),
        }
    }

    /// An address space holding only the trampoline and trap-frame mappings.
    pub fn for_process(pool: &Arc<FramePool>) -> Self {
        let mut space = Self::new(pool);
        space.pages.insert(
            TRAMPOLINE,
            Entry {
                flags: PteFlags::V | PteFlags::R | PteFlags::X,
                backing: Backing::Trampoline,
            },
        );
        space.pages.insert(
            TRAPFRAME,
            Entry {
                flags: PteFlags::V | PteFlags::R | PteFlags::W,
                backing: Backing::TrapFrame,
            },
        );
        space
    }

    fn map_frame(&mut self, va: usize, frame: Frame, flags: PteFlags) {
        let old = self.pages.insert(
            va,
            Entry {
                flags: flags | PteFlags::V,
                backing: Backing::Frame(frame),
            },
        );
        assert!(old.is_none(), "mappages: remap at {:#x}", va);
    }

    /// Load `code` into a fresh first page. Used for the first process only.
    pub fn init_code(&mut self, code: &[u8]) -> KResult<()> {
        assert!(code.len() <= PGSIZE, "init_code: more than a page");
        let mut frame = self.pool.alloc()?;
        frame.bytes_mut()[..code.len()].copy_from_slice(code);
        self.map_frame(0, frame, USER_RWX);
        Ok(())
    }

    /// Grow user memory from `old_sz` to `new_sz` with zeroed pages.
    ///
    /// Returns the new size. On failure every page mapped by this call is
    /// released again.
    pub fn alloc(&mut self, old_sz: usize, new_sz: usize) -> KResult<usize> {
        if new_sz < old_sz {
            return Ok(old_sz);
        }
        let mut va = pg_round_up(old_sz);
        while va < new_sz {
            match self.pool.alloc() {
                Ok(frame) => self.map_frame(va, frame, USER_RWX),
                Err(e) => {
                    self.dealloc(va, old_sz);
                    return Err(e);
                }
            }
            va += PGSIZE;
        }
        Ok(new_sz)
    }

    /// Shrink user memory from `old_sz` to `new_sz`, returning the new size.
    pub fn dealloc(&mut self, old_sz: usize, new_sz: usize) -> usize {
        if new_sz >= old_sz {
            return old_sz;
        }
        let start = pg_round_up(new_sz);
        let end = pg_round_up(old_sz);
        let doomed: alloc::vec::Vec<usize> =
            self.pages.range(start..end).map(|(&va, _)| va).collect();
        for va in doomed {
            self.pages.remove(&va);
        }
        new_sz
    }

    /// Copy user memory `[0, sz)` into `child`, page contents and permissions
    /// both. On failure `child` is left without any of the copied pages.
    pub fn copy_to(&self, child: &mut AddressSpace, sz: usize) -> KResult<()> {
        let mut va = 0;
        while va < sz {
            let entry = self
                .pages
                .get(&va)
                .unwrap_or_else(|| panic!("uvmcopy: page {:#x} not present", va));
            let Backing::Frame(src) = &entry.backing else {
                panic!("uvmcopy: {:#x} is not a user page", va);
            };
            let mut frame = match child.pool.alloc() {
                Ok(frame) => frame,
                Err(e) => {
                    child.dealloc(va, 0);
                    return Err(e);
                }
            };
            frame.bytes_mut().copy_from_slice(src.bytes());
            child.map_frame(va, frame, entry.flags);
            va += PGSIZE;
        }
        Ok(())
    }

    /// Remove user access from the page at `va`; used for stack guard pages.
    pub fn clear_user(&mut self, va: usize) {
        let entry = self
            .pages
            .get_mut(&pg_round_down(va))
            .unwrap_or_else(|| panic!("uvmclear: {:#x} not mapped", va));
        entry.flags.remove(PteFlags::U);
    }

    /// Permissions of the page containing `va`, if mapped.
    pub fn flags(&self, va: usize) -> Option<PteFlags> {
        self.pages.get(&pg_round_down(va)).map(|e| e.flags)
    }

    /// Number of pages backed by frames from the pool.
    pub fn resident_pages(&self) -> usize {
        self.pages
            .values()
            .filter(|e| matches!(e.backing, Backing::Frame(_)))
            .count()
    }

    fn user_frame(&self, base: usize) -> KResult<&Frame> {
        match self.pages.get(&base) {
            Some(Entry {
                flags,
                backing: Backing::Frame(frame),
            }) if flags.contains(PteFlags::U) => Ok(frame),
            _ => Err(KernelError::BadAddress),
        }
    }

    fn user_frame_mut(&mut self, base: usize) -> KResult<&mut Frame> {
        match self.pages.get_mut(&base) {
            Some(Entry {
                flags,
                backing: Backing::Frame(frame),
            }) if flags.contains(PteFlags::U) => Ok(frame),
            _ => Err(KernelError::BadAddress),
        }
    }

    /// Copy `buf.len()` bytes of user memory starting at `va` into `buf`.
    pub fn read(&self, mut va: usize, buf: &mut [u8]) -> KResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let base = pg_round_down(va);
            let off = va - base;
            let n = cmp::min(PGSIZE - off, buf.len() - done);
            let frame = self.user_frame(base)?;
            buf[done..done + n].copy_from_slice(&frame.bytes()[off..off + n]);
            done += n;
            va += n;
        }
        Ok(())
    }

    /// Copy `data` into user memory starting at `va`.
    pub fn write(&mut self, mut va: usize, data: &[u8]) -> KResult<()> {
        let mut done = 0;
        while done < data.len() {
            let base = pg_round_down(va);
            let off = va - base;
            let n = cmp::min(PGSIZE - off, data.len() - done);
            let frame = self.user_frame_mut(base)?;
            frame.bytes_mut()[off..off + n].copy_from_slice(&data[done..done + n]);
            done += n;
            va += n;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_process_maps_only_kernel_pages() {
        let pool = FramePool::new(8);
        let space = AddressSpace::for_process(&pool);
        assert_eq!(space.resident_pages(), 0);
        assert!(!space.flags(TRAMPOLINE).unwrap().contains(PteFlags::U));
        assert!(space.flags(TRAPFRAME).unwrap().contains(PteFlags::W));
        assert!(space.flags(0).is_none());
    }

    #[test]
    fn test_alloc_rolls_back_when_pool_runs_dry() {
        let pool = FramePool::new(2);
        let mut space = AddressSpace::new(&pool);
        assert_eq!(
            space.alloc(0, 3 * PGSIZE).unwrap_err(),
            KernelError::ResourceExhausted
        );
        assert_eq!(pool.in_use(), 0);
        assert_eq!(space.alloc(0, 2 * PGSIZE).unwrap(), 2 * PGSIZE);
        assert_eq!(space.dealloc(2 * PGSIZE, PGSIZE), PGSIZE);
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn test_read_write_across_pages() {
        let pool = FramePool::new(4);
        let mut space = AddressSpace::new(&pool);
        space.alloc(0, 2 * PGSIZE).unwrap();
        space.write(PGSIZE - 2, b"abcd").unwrap();
        let mut buf = [0u8; 4];
        space.read(PGSIZE - 2, &mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
        assert_eq!(
            space.read(2 * PGSIZE - 1, &mut buf).unwrap_err(),
            KernelError::BadAddress
        );
    }

    #[test]
    fn test_guard_page_is_not_user_accessible() {
        let pool = FramePool::new(4);
        let mut space = AddressSpace::new(&pool);
        space.alloc(0, 2 * PGSIZE).unwrap();
        space.clear_user(0);
        let mut buf = [0u8; 1];
        assert_eq!(space.read(0, &mut buf).unwrap_err(), KernelError::BadAddress);
        assert!(space.read(PGSIZE, &mut buf).is_ok());
    }

    #[test]
    fn test_copy_to_duplicates_contents() {
        let pool = FramePool::new(4);
        let mut parent = AddressSpace::new(&pool);
        parent.alloc(0, PGSIZE).unwrap();
        parent.write(10, b"xv").unwrap();
        let mut child = AddressSpace::new(&pool);
        parent.copy_to(&mut child, PGSIZE).unwrap();
        parent.write(10, b"zz").unwrap();
        let mut buf = [0u8; 2];
        child.read(10, &mut buf).unwrap();
        assert_eq!(&buf, b"xv");
        drop(child);
        assert_eq!(pool.in_use(), 1);
    }
}
