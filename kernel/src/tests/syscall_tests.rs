//! Syscall Unit Tests
//!
//! Files, user memory, sbrk and tracing through the `UserProc` handle.

#[cfg(test)]
mod tests {
    use super::super::{boot, config, idle};
    use crate::config::PGSIZE;
    use crate::error::{to_syscall_ret, KernelError};
    use crate::process::Pid;
    use crate::syscall::trace::traced_calls;
    use crate::vfs::{FileSystem, OpenFlags};

    // ========================================
    // Files
    // ========================================

    #[test]
    fn test_open_write_read() {
        let (kernel, _) = boot(config(), |_| async {});
        let init = kernel.user_proc(Pid::INIT).unwrap();

        let fd = init.open("/notes", OpenFlags::CREATE | OpenFlags::WRONLY).unwrap();
        assert_eq!(init.write(fd, b"corral"), Ok(6));
        let mut buf = [0u8; 8];
        assert_eq!(init.read(fd, &mut buf), Err(KernelError::BadDescriptor));
        init.close(fd).unwrap();
        assert_eq!(init.close(fd), Err(KernelError::BadDescriptor));

        let fd = init.open("/notes", OpenFlags::RDONLY).unwrap();
        assert_eq!(init.read(fd, &mut buf), Ok(6));
        assert_eq!(&buf[..6], b"corral");
        assert_eq!(init.read(fd, &mut buf), Ok(0));
        assert_eq!(init.write(fd, b"x"), Err(KernelError::BadDescriptor));
    }

    #[test]
    fn test_open_errors() {
        let (kernel, _) = boot(config(), |_| async {});
        let init = kernel.user_proc(Pid::INIT).unwrap();
        assert_eq!(init.open("/missing", OpenFlags::RDONLY), Err(KernelError::NotFound));
        assert_eq!(init.open("/build", OpenFlags::RDWR), Err(KernelError::InvalidState));
        assert!(init.open("/build", OpenFlags::RDONLY).is_ok());
    }

    #[test]
    fn test_fork_shares_open_files() {
        let (kernel, fs) = boot(config(), |_| async {});
        let init = kernel.user_proc(Pid::INIT).unwrap();
        let fd = init.open("/log", OpenFlags::CREATE | OpenFlags::RDWR).unwrap();
        init.write(fd, b"ab").unwrap();

        let child = kernel.user_proc(init.fork(idle).unwrap()).unwrap();
        child.write(fd, b"cd").unwrap();
        let dup = init.dup(fd).unwrap();
        assert_ne!(dup, fd);
        init.write(dup, b"ef").unwrap();

        let ip = fs.namei("/log").unwrap();
        assert_eq!(&*ip.lock(), b"abcdef");
    }

    #[test]
    fn test_truncate_on_open() {
        let (kernel, fs) = boot(config(), |_| async {});
        let init = kernel.user_proc(Pid::INIT).unwrap();
        let fd = init.open("/t", OpenFlags::CREATE | OpenFlags::WRONLY).unwrap();
        init.write(fd, b"old contents").unwrap();
        init.open("/t", OpenFlags::WRONLY | OpenFlags::TRUNC).unwrap();
        assert_eq!(fs.namei("/t").unwrap().size(), 0);
    }

    // ========================================
    // User memory
    // ========================================

    #[test]
    fn test_sbrk_grow_and_shrink() {
        let (kernel, _) = boot(config(), |_| async {});
        let init = kernel.user_proc(Pid::INIT).unwrap();
        let frames = kernel.frames().in_use();

        assert_eq!(init.sbrk(2 * PGSIZE as isize), Ok(PGSIZE));
        assert_eq!(kernel.frames().in_use(), frames + 2);
        init.copy_out(2 * PGSIZE, b"top").unwrap();
        assert_eq!(init.sbrk(-(PGSIZE as isize)), Ok(3 * PGSIZE));
        assert_eq!(kernel.frames().in_use(), frames + 1);
        assert_eq!(init.copy_out(2 * PGSIZE, b"top"), Err(KernelError::BadAddress));
        assert_eq!(init.sbrk(-(8 * PGSIZE as isize)), Err(KernelError::BadAddress));
    }

    #[test]
    fn test_copy_bounds() {
        let (kernel, _) = boot(config(), |_| async {});
        let init = kernel.user_proc(Pid::INIT).unwrap();
        let mut buf = [0u8; 8];
        assert!(init.copy_in(PGSIZE - 8, &mut buf).is_ok());
        assert_eq!(init.copy_in(PGSIZE - 4, &mut buf), Err(KernelError::BadAddress));
        assert_eq!(init.copy_out(usize::MAX, b"x"), Err(KernelError::BadAddress));
    }

    // ========================================
    // Tracing and return values
    // ========================================

    #[test]
    fn test_traceon_logs_later_calls() {
        let (kernel, _) = boot(config(), |_| async {});
        let init = kernel.user_proc(Pid::INIT).unwrap();
        init.traceon();
        let before = traced_calls();
        init.getpid();
        init.sbrk(0).unwrap();
        assert!(traced_calls() >= before + 2);

        // Children do not inherit tracing.
        let child = kernel.user_proc(init.fork(idle).unwrap()).unwrap();
        assert!(!kernel.procs().get(child.slot().index).data.lock().trace);
    }

    #[test]
    fn test_syscall_return_values() {
        let (kernel, _) = boot(config(), |_| async {});
        let init = kernel.user_proc(Pid::INIT).unwrap();
        assert_eq!(to_syscall_ret(init.kill(42).map(|()| 0i64)), -1);
        assert_eq!(to_syscall_ret(init.cstop("nope").map(|n| n as i64)), -1);
        assert_eq!(to_syscall_ret(init.sbrk(0).map(|n| n as i64)), PGSIZE as i64);
    }

    #[test]
    fn test_procdump_lists_live_processes() {
        let (kernel, _) = boot(config(), |_| async {});
        let init = kernel.user_proc(Pid::INIT).unwrap();
        init.fork(idle).unwrap();
        let lines = kernel.procdump();
        assert_eq!(lines, ["1 runble initcode", "2 runble initcode"]);
    }
}
