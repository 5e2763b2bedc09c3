//! Process checkpoint and restore.
//!
//! A checkpoint file holds, back to back:
//!
//! | Part       | Size              | Contents                              |
//! |------------|-------------------|---------------------------------------|
//! | header     | 48 bytes          | [`CheckpointHeader`], little-endian   |
//! | trap frame | 288 bytes         | [`TrapFrame`] registers               |
//! | code       | `code_size` bytes | user memory from address 0            |
//! | stack      | `stack_size`      | the page above the stack guard page   |
//!
//! The image layout assumed is the one `exec` builds: code, one guard page,
//! one stack page.

use alloc::string::String;
use alloc::vec;

use crate::boot::Kernel;
use crate::config::{pg_round_up, NAME_LEN, PGSIZE};
use crate::error::{KResult, KernelError};
use crate::memory::AddressSpace;
use crate::process::{Pid, ProcState, SlotId, TrapFrame};
use crate::vfs::{File, Operation};

/// Size of an encoded [`CheckpointHeader`].
pub const HEADER_LEN: usize = NAME_LEN + 4 * 8;

/// Fixed-size header at the start of a checkpoint file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointHeader {
    pub name: String,
    /// Size of user memory.
    pub total_size: u64,
    pub code_size: u64,
    pub stack_size: u64,
    pub trace: bool,
}

impl CheckpointHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        let name = self.name.as_bytes();
        let n = core::cmp::min(name.len(), NAME_LEN - 1);
        out[..n].copy_from_slice(&name[..n]);
        let words = [
            self.total_size,
            self.code_size,
            self.stack_size,
            u64::from(self.trace),
        ];
        for (i, word) in words.iter().enumerate() {
            let at = NAME_LEN + i * 8;
            out[at..at + 8].copy_from_slice(&word.to_le_bytes());
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_LEN {
            return None;
        }
        let name_len = bytes[..NAME_LEN]
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(NAME_LEN);
        let name = core::str::from_utf8(&bytes[..name_len]).ok()?;
        let word = |i: usize| {
            let at = NAME_LEN + i * 8;
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(raw)
        };
        Some(Self {
            name: String::from(name),
            total_size: word(0),
            code_size: word(1),
            stack_size: word(2),
            trace: word(3) != 0,
        })
    }

    /// Code size and total size of the image, if the header describes the
    /// code, guard page, stack page layout that `resume` rebuilds.
    fn layout(&self) -> KResult<(usize, usize)> {
        let total = usize::try_from(self.total_size).map_err(|_| KernelError::IoFailure)?;
        let code = usize::try_from(self.code_size).map_err(|_| KernelError::IoFailure)?;
        if self.stack_size != PGSIZE as u64 {
            return Err(KernelError::IoFailure);
        }
        let least = code.checked_add(2 * PGSIZE).ok_or(KernelError::IoFailure)?;
        if total < least || total > pg_round_up(code) + 2 * PGSIZE {
            return Err(KernelError::IoFailure);
        }
        Ok((code, total))
    }
}

fn write_all(file: &File, bytes: &[u8]) -> KResult<()> {
    match file.write(bytes) {
        Ok(n) if n == bytes.len() => Ok(()),
        _ => Err(KernelError::IoFailure),
    }
}

fn take<'a>(contents: &'a [u8], off: &mut usize, len: usize) -> KResult<&'a [u8]> {
    let end = off.checked_add(len).ok_or(KernelError::IoFailure)?;
    let bytes = contents.get(*off..end).ok_or(KernelError::IoFailure)?;
    *off = end;
    Ok(bytes)
}

impl Kernel {
    /// Checkpoint process `pid` into open file `fd` of `caller`.
    ///
    /// The target is marked Suspended first and stays that way; it is not
    /// scheduled again until killed.
    pub fn suspend(&self, caller: SlotId, pid: Pid, fd: usize) -> KResult<()> {
        let file = self
            .procs
            .get(caller.index)
            .data
            .lock()
            .ofile
            .get(fd)?
            .clone();

        let mut target = None;
        for p in self.procs.iter() {
            let mut inner = p.inner.lock();
            if inner.state == ProcState::Unused || inner.pid != pid {
                continue;
            }
            if matches!(inner.state, ProcState::Zombie | ProcState::Used) {
                return Err(KernelError::InvalidState);
            }
            if p.data.lock().sz < 2 * PGSIZE {
                return Err(KernelError::InvalidState);
            }
            inner.state = ProcState::Suspended;
            target = Some(p);
            break;
        }
        let p = target.ok_or(KernelError::NotFound)?;

        let (header, regs, code, stack) = {
            let data = p.data.lock();
            let code_size = data.sz - 2 * PGSIZE;
            let header = CheckpointHeader {
                name: data.name.clone(),
                total_size: data.sz as u64,
                code_size: code_size as u64,
                stack_size: PGSIZE as u64,
                trace: data.trace,
            };
            let mut code = vec![0u8; code_size];
            let mut stack = vec![0u8; PGSIZE];
            data.space()
                .read(0, &mut code)
                .and_then(|_| data.space().read(code_size + PGSIZE, &mut stack))
                .map_err(|_| KernelError::IoFailure)?;
            (header, data.tf().to_bytes(), code, stack)
        };

        let _op = Operation::begin(&*self.fs);
        write_all(&file, &header.encode())?;
        write_all(&file, &regs)?;
        write_all(&file, &code)?;
        write_all(&file, &stack)?;
        log::info!(
            "[CORRAL checkpoint] suspended pid {} ({} code bytes)",
            pid,
            header.code_size
        );
        Ok(())
    }

    /// Replace the image of `me` with the checkpoint at `path`.
    ///
    /// A header that does not describe a code, guard, stack image is
    /// rejected before anything changes. Past that, the trap frame is
    /// overwritten as soon as it is read; a later failure leaves the old
    /// memory in place but not the old registers.
    pub fn resume(&self, me: SlotId, path: &str) -> KResult<()> {
        let _op = Operation::begin(&*self.fs);
        let ip = self.fs.namei(path).ok_or(KernelError::NotFound)?;
        let contents = ip.lock();
        let mut off = 0;

        let header = CheckpointHeader::decode(take(&contents, &mut off, HEADER_LEN)?)
            .ok_or(KernelError::IoFailure)?;
        let (code_size, total_size) = header.layout()?;

        let p = self.procs.get(me.index);
        let mut data = p.data.lock();
        let regs = take(&contents, &mut off, TrapFrame::LEN)?;
        *data.tf_mut() = TrapFrame::from_bytes(regs).ok_or(KernelError::IoFailure)?;

        let mut space = AddressSpace::for_process(&self.frames);
        let mut sz = space.alloc(0, code_size)?;
        space.write(0, take(&contents, &mut off, code_size)?)?;

        sz = pg_round_up(sz);
        let guard = sz;
        space.alloc(sz, sz + 2 * PGSIZE)?;
        space.clear_user(guard);
        space.write(guard + PGSIZE, take(&contents, &mut off, PGSIZE)?)?;

        data.name = header.name;
        data.trace = header.trace;
        data.sz = total_size;
        data.pagetable = Some(space);
        log::info!("[CORRAL checkpoint] resumed '{}' from {}", data.name, path);
        Ok(())
    }
}
