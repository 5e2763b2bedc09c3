//! Kernel error types.

use core::fmt;

/// Recoverable errors returned to callers of the process and container
/// interfaces.
///
/// Internal consistency violations (lock discipline, scheduler invariants)
/// are not represented here; they panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// No free process or container slot, quota exceeded, or out of frames.
    ResourceExhausted,
    /// No process or container matches the given id, name or path.
    NotFound,
    /// Caller is not allowed to act on the target.
    PermissionDenied,
    /// Target is in a state that does not allow the operation.
    InvalidState,
    /// Truncated or failed checkpoint read/write.
    IoFailure,
    /// `wait` called with no children (or by a killed process).
    NoChildren,
    /// User address outside the process image.
    BadAddress,
    /// File descriptor not open, or descriptor table full.
    BadDescriptor,
}

impl KernelError {
    /// Value returned to user space for this error.
    pub const fn errno(self) -> i64 {
        -1
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::ResourceExhausted => write!(f, "resource exhausted"),
            KernelError::NotFound => write!(f, "not found"),
            KernelError::PermissionDenied => write!(f, "permission denied"),
            KernelError::InvalidState => write!(f, "invalid state"),
            KernelError::IoFailure => write!(f, "I/O failure"),
            KernelError::NoChildren => write!(f, "no children"),
            KernelError::BadAddress => write!(f, "bad address"),
            KernelError::BadDescriptor => write!(f, "bad file descriptor"),
        }
    }
}

/// Result alias used throughout the kernel.
pub type KResult<T> = Result<T, KernelError>;

/// Convert a kernel result into the raw syscall return value.
pub fn to_syscall_ret<T: Into<i64>>(result: KResult<T>) -> i64 {
    match result {
        Ok(v) => v.into(),
        Err(e) => e.errno(),
    }
}
