//! File Descriptor Table
//!
//! Maps small integer descriptors to shared open files (inode + offset).
//! Each process owns one table; `fork` duplicates it, sharing every open file.

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::{InodeRef, OpenFlags};
use crate::config::NOFILE;
use crate::error::{KResult, KernelError};
use crate::sync::SpinLock;

struct OpenFile {
    inode: InodeRef,
    readable: bool,
    writable: bool,
    offset: SpinLock<usize>,
}

/// An open file. Clones share the offset, like descriptors after `dup`.
#[derive(Clone)]
pub struct File {
    inner: Arc<OpenFile>,
}

impl File {
    /// Open `inode` with `flags`; truncation is applied here.
    pub fn open(inode: InodeRef, flags: OpenFlags) -> Self {
        if flags.contains(OpenFlags::TRUNC) && !inode.is_dir() {
            inode.lock().clear();
        }
        Self {
            inner: Arc::new(OpenFile {
                inode,
                readable: flags.readable(),
                writable: flags.writable(),
                offset: SpinLock::new(0, "file"),
            }),
        }
    }

    /// Read at the current offset, advancing it.
    pub fn read(&self, buf: &mut [u8]) -> KResult<usize> {
        if !self.inner.readable {
            return Err(KernelError::BadDescriptor);
        }
        let mut off = self.inner.offset.lock();
        let n = self.inner.inode.read_at(*off, buf);
        *off += n;
        Ok(n)
    }

    /// Write at the current offset, advancing it.
    pub fn write(&self, data: &[u8]) -> KResult<usize> {
        if !self.inner.writable || self.inner.inode.is_dir() {
            return Err(KernelError::BadDescriptor);
        }
        let mut off = self.inner.offset.lock();
        let n = self.inner.inode.write_at(*off, data);
        *off += n;
        Ok(n)
    }

    pub fn inode(&self) -> &InodeRef {
        &self.inner.inode
    }

    /// Number of descriptors (in any table) referring to this open file.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

/// Per-process descriptor table.
#[derive(Clone)]
pub struct FdTable {
    files: Vec<Option<File>>,
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            files: (0..NOFILE).map(|_| None).collect(),
        }
    }

    /// Install `file` in the lowest free descriptor.
    pub fn alloc(&mut self, file: File) -> KResult<usize> {
        let fd = self
            .files
            .iter()
            .position(Option::is_none)
            .ok_or(KernelError::BadDescriptor)?;
        self.files[fd] = Some(file);
        Ok(fd)
    }

    pub fn get(&self, fd: usize) -> KResult<&File> {
        self.files
            .get(fd)
            .and_then(Option::as_ref)
            .ok_or(KernelError::BadDescriptor)
    }

    pub fn close(&mut self, fd: usize) -> KResult<()> {
        self.files
            .get_mut(fd)
            .and_then(Option::take)
            .map(drop)
            .ok_or(KernelError::BadDescriptor)
    }

    /// Close every descriptor.
    pub fn close_all(&mut self) {
        for slot in self.files.iter_mut() {
            slot.take();
        }
    }

    /// Number of open descriptors.
    pub fn open_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_some()).count()
    }
}
