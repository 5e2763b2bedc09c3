//! Named spin locks.
//!
//! A thin wrapper over `spin::Mutex` that carries a name for diagnostics and
//! lets a guard be released while keeping a handle to its lock, which is what
//! `sleep` needs to re-acquire the condition lock after waking. Every guard
//! is counted against the hart holding it (see [`crate::cpu::locks_held`]).

use core::fmt;
use core::ops::{Deref, DerefMut};

use crate::cpu;

/// Mutual-exclusion spin lock with a diagnostic name.
pub struct SpinLock<T: ?Sized> {
    name: &'static str,
    inner: spin::Mutex<T>,
}

/// RAII guard for a [`SpinLock`].
pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
    guard: spin::MutexGuard<'a, T>,
}

impl<T> SpinLock<T> {
    /// Create a new lock named `name`.
    pub const fn new(value: T, name: &'static str) -> Self {
        Self {
            name,
            inner: spin::Mutex::new(value),
        }
    }

    /// Consume the lock and return the protected value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Spin until the lock is acquired.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let guard = self.inner.lock();
        cpu::lock_acquired();
        SpinLockGuard { lock: self, guard }
    }

    /// Acquire the lock only if it is free.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.inner.try_lock().map(|guard| {
            cpu::lock_acquired();
            SpinLockGuard { lock: self, guard }
        })
    }

    /// Whether some guard currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    /// Lock name given at construction.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Mutable access without locking; requires exclusive ownership.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Release `guard` and return the lock it was holding.
    pub fn unlock(guard: SpinLockGuard<'_, T>) -> &SpinLock<T> {
        let lock = guard.lock;
        drop(guard);
        lock
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_lock() {
            Some(guard) => f
                .debug_struct("SpinLock")
                .field("name", &self.name)
                .field("data", &&*guard)
                .finish(),
            None => f
                .debug_struct("SpinLock")
                .field("name", &self.name)
                .field("data", &"<locked>")
                .finish(),
        }
    }
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        cpu::lock_released();
    }
}
