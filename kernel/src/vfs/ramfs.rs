//! In-memory filesystem.

use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use hashbrown::HashMap;

use super::{normalize, split_path, FileSystem, Inode, InodeKind, InodeRef};
use crate::error::{KResult, KernelError};
use crate::sync::SpinLock;

/// Root inode number, as on disk-backed filesystems.
const ROOT_INUM: u32 = 1;

/// A flat namespace of absolute paths to inodes.
pub struct RamFs {
    names: SpinLock<HashMap<String, InodeRef>>,
    next_inum: AtomicU32,
    outstanding: AtomicUsize,
    committed: AtomicUsize,
}

impl RamFs {
    /// A filesystem holding only `/`.
    pub fn new() -> Arc<Self> {
        let mut names = HashMap::new();
        names.insert(String::from("/"), Inode::new(ROOT_INUM, InodeKind::Dir));
        Arc::new(Self {
            names: SpinLock::new(names, "ramfs"),
            next_inum: AtomicU32::new(ROOT_INUM + 1),
            outstanding: AtomicUsize::new(0),
            committed: AtomicUsize::new(0),
        })
    }

    /// Create a directory, for setting up container roots.
    pub fn mkdir(&self, path: &str) -> KResult<InodeRef> {
        self.create(path, InodeKind::Dir)
    }

    /// Transactions begun but not yet ended.
    pub fn outstanding_ops(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Transactions completed since creation.
    pub fn committed_ops(&self) -> usize {
        self.committed.load(Ordering::SeqCst)
    }
}

impl FileSystem for RamFs {
    fn begin_op(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    fn end_op(&self) {
        let prev = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "end_op without begin_op");
        self.committed.fetch_add(1, Ordering::SeqCst);
    }

    fn root(&self) -> InodeRef {
        let names = self.names.lock();
        Arc::clone(&names["/"])
    }

    fn namei(&self, path: &str) -> Option<InodeRef> {
        self.names.lock().get(&normalize(path)).cloned()
    }

    fn create(&self, path: &str, kind: InodeKind) -> KResult<InodeRef> {
        let path = normalize(path);
        let mut names = self.names.lock();
        if let Some(existing) = names.get(&path) {
            return match (existing.kind(), kind) {
                (InodeKind::File, InodeKind::File) => Ok(Arc::clone(existing)),
                _ => Err(KernelError::InvalidState),
            };
        }
        let (parent, _) = split_path(&path);
        match names.get(parent) {
            Some(dir) if dir.is_dir() => {}
            _ => return Err(KernelError::NotFound),
        }
        let inum = self.next_inum.fetch_add(1, Ordering::SeqCst);
        let ip = Inode::new(inum, kind);
        names.insert(path, Arc::clone(&ip));
        log::debug!("[CORRAL fs] created inode {} ({:?})", inum, kind);
        Ok(ip)
    }
}
