//! Physical frame pool.
//!
//! A bounded pool of zeroed 4 KB frames. Frames return to the pool when
//! dropped, so an address space that is torn down (or a half-built one that
//! is abandoned on error) gives its memory back without bookkeeping.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::config::PGSIZE;
use crate::error::{KResult, KernelError};

/// Bounded source of physical frames.
pub struct FramePool {
    capacity: usize,
    in_use: AtomicUsize,
}

impl FramePool {
    /// Create a pool of `capacity` frames.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            in_use: AtomicUsize::new(0),
        })
    }

    /// Take one zeroed frame, or `ResourceExhausted` if the pool is empty.
    pub fn alloc(self: &Arc<Self>) -> KResult<Frame> {
        self.in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .map_err(|_| KernelError::ResourceExhausted)?;
        Ok(Frame {
            pool: Arc::clone(self),
            bytes: vec![0u8; PGSIZE].into_boxed_slice(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently handed out.
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    pub fn available(&self) -> usize {
        self.capacity - self.in_use()
    }
}

impl fmt::Debug for FramePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramePool")
            .field("capacity", &self.capacity)
            .field("in_use", &self.in_use())
            .finish()
    }
}

/// One page of memory owned by whoever holds it.
pub struct Frame {
    pool: Arc<FramePool>,
    bytes: Box<[u8]>,
}

impl Frame {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Frame")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_is_bounded() {
        let pool = FramePool::new(2);
        let a = pool.alloc().unwrap();
        let _b = pool.alloc().unwrap();
        assert_eq!(pool.alloc().unwrap_err(), KernelError::ResourceExhausted);
        drop(a);
        assert_eq!(pool.available(), 1);
        assert!(pool.alloc().is_ok());
    }

    #[test]
    fn test_frames_are_zeroed() {
        let pool = FramePool::new(1);
        let frame = pool.alloc().unwrap();
        assert_eq!(frame.bytes().len(), PGSIZE);
        assert!(frame.bytes().iter().all(|&b| b == 0));
    }
}
