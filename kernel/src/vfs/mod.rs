//! Virtual File System
//!
//! The filesystem is a collaborator of the process core: processes hold a
//! working-directory inode and open files, containers hold a root inode, and
//! checkpoints are written to and read from files. [`FileSystem`] is the seam;
//! [`RamFs`] is the in-memory implementation the kernel ships with.

pub mod fd;
mod ramfs;

pub use fd::{FdTable, File};
pub use ramfs::RamFs;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;

use crate::error::KResult;
use crate::sync::{SpinLock, SpinLockGuard};

bitflags! {
    /// File open flags. Without `WRONLY` or `RDWR` a file opens read-only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const WRONLY = 0x001;
        const RDWR = 0x002;
        const CREATE = 0x200;
        const TRUNC = 0x400;
    }
}

impl OpenFlags {
    pub const RDONLY: OpenFlags = OpenFlags::empty();

    pub fn readable(self) -> bool {
        !self.contains(OpenFlags::WRONLY)
    }

    pub fn writable(self) -> bool {
        self.intersects(OpenFlags::WRONLY | OpenFlags::RDWR)
    }
}

/// Kind of an inode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InodeKind {
    Dir,
    File,
}

/// An in-memory inode. File contents live behind the inode lock.
#[derive(Debug)]
pub struct Inode {
    inum: u32,
    kind: InodeKind,
    data: SpinLock<Vec<u8>>,
}

/// Shared reference to an inode; cloning is `idup`, dropping is `iput`.
pub type InodeRef = Arc<Inode>;

impl Inode {
    pub fn new(inum: u32, kind: InodeKind) -> InodeRef {
        Arc::new(Self {
            inum,
            kind,
            data: SpinLock::new(Vec::new(), "inode"),
        })
    }

    pub fn inum(&self) -> u32 {
        self.inum
    }

    pub fn kind(&self) -> InodeKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == InodeKind::Dir
    }

    /// Lock the inode for a sequence of reads or writes.
    pub fn lock(&self) -> SpinLockGuard<'_, Vec<u8>> {
        self.data.lock()
    }

    pub fn size(&self) -> usize {
        self.data.lock().len()
    }

    /// Read at most `buf.len()` bytes at `off`; returns the count read.
    pub fn read_at(&self, off: usize, buf: &mut [u8]) -> usize {
        readi(&self.data.lock(), off, buf)
    }

    /// Write `data` at `off`, extending the file as needed.
    pub fn write_at(&self, off: usize, data: &[u8]) -> usize {
        writei(&mut self.data.lock(), off, data)
    }
}

/// Read from locked inode contents.
pub fn readi(contents: &[u8], off: usize, buf: &mut [u8]) -> usize {
    if off >= contents.len() {
        return 0;
    }
    let n = core::cmp::min(buf.len(), contents.len() - off);
    buf[..n].copy_from_slice(&contents[off..off + n]);
    n
}

/// Write into locked inode contents.
pub fn writei(contents: &mut Vec<u8>, off: usize, data: &[u8]) -> usize {
    if contents.len() < off + data.len() {
        contents.resize(off + data.len(), 0);
    }
    contents[off..off + data.len()].copy_from_slice(data);
    data.len()
}

/// Filesystem used by the process core.
pub trait FileSystem: Send + Sync {
    /// Start a filesystem transaction.
    fn begin_op(&self);
    /// Finish a filesystem transaction.
    fn end_op(&self);
    /// The filesystem root directory.
    fn root(&self) -> InodeRef;
    /// Resolve an absolute path.
    fn namei(&self, path: &str) -> Option<InodeRef>;
    /// Create `path`; creating an existing file returns it.
    fn create(&self, path: &str, kind: InodeKind) -> KResult<InodeRef>;
}

/// A filesystem transaction; `end_op` runs when it is dropped.
#[must_use]
pub struct Operation<'a> {
    fs: &'a dyn FileSystem,
}

impl<'a> Operation<'a> {
    pub fn begin(fs: &'a dyn FileSystem) -> Self {
        fs.begin_op();
        Self { fs }
    }
}

impl Drop for Operation<'_> {
    fn drop(&mut self) {
        self.fs.end_op();
    }
}

/// Normalize `path` into an absolute path without `.`, `..` or empty
/// components.
pub fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    let mut out = String::from("/");
    out.push_str(&parts.join("/"));
    out
}

/// Split "/a/b/c" into ("/a/b", "c").
pub fn split_path(path: &str) -> (&str, &str) {
    if let Some(pos) = path.rfind('/') {
        let parent = if pos == 0 { "/" } else { &path[..pos] };
        let name = &path[pos + 1..];
        (parent, name)
    } else {
        ("/", path)
    }
}
