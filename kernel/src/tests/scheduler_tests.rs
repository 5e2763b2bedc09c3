//! Scheduler Unit Tests
//!
//! Container round-robin, pausing, and multiple CPUs sharing one table.

#[cfg(test)]
mod tests {
    use alloc::boxed::Box;
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};

    use super::super::{boot, config, park, trail, Trail};
    use crate::process::{Pid, ProcState};
    use crate::sync::Channel;
    use crate::syscall::UserProc;
    use crate::Quota;

    const QUOTA: Quota = Quota {
        max_proc: 4,
        max_mem: 0,
        max_disk: 0,
    };

    fn labelled(
        log: &Trail,
        label: &'static str,
    ) -> impl FnOnce(UserProc) -> futures_util::future::BoxFuture<'static, ()> + Send + 'static {
        let log = log.clone();
        move |p| {
            Box::pin(async move {
                log.lock().push(label);
                park(&p).await;
            })
        }
    }

    // ========================================
    // Container round-robin
    // ========================================

    #[test]
    fn test_containers_take_turns() {
        let log = trail();
        let (kernel, _) = boot(config(), labelled(&log, "init"));
        let init = kernel.user_proc(Pid::INIT).unwrap();

        // slot 1, 2: container "build"; slot 3, 4: root.
        let p1 = kernel.user_proc(init.fork(labelled(&log, "p1")).unwrap()).unwrap();
        p1.cinit("build", "/build", QUOTA).unwrap();
        p1.fork(labelled(&log, "p2")).unwrap();
        init.fork(labelled(&log, "p3")).unwrap();
        init.fork(labelled(&log, "p4")).unwrap();

        let mut sched = kernel.scheduler(0);
        assert_eq!(sched.cursor(), 1);
        assert_eq!(sched.run_pass(), 2);
        assert_eq!(*log.lock(), ["p1", "p3"]);
        assert_eq!(sched.run_pass(), 3);
        assert_eq!(*log.lock(), ["p1", "p3", "init", "p2", "p4"]);
        assert_eq!(sched.run_pass(), 0);
        assert_eq!(kernel.context_switches(), 5);
    }

    #[test]
    fn test_single_container_runs_everything_in_one_pass() {
        let log = trail();
        let (kernel, _) = boot(config(), labelled(&log, "init"));
        let init = kernel.user_proc(Pid::INIT).unwrap();
        init.fork(labelled(&log, "a")).unwrap();
        init.fork(labelled(&log, "b")).unwrap();

        let mut sched = kernel.scheduler(0);
        assert_eq!(sched.cursor(), 0);
        assert_eq!(sched.run_pass(), 3);
        assert_eq!(*log.lock(), ["init", "a", "b"]);
    }

    #[test]
    fn test_paused_container_is_skipped() {
        let log = trail();
        let (kernel, _) = boot(config(), labelled(&log, "init"));
        let init = kernel.user_proc(Pid::INIT).unwrap();
        let member = kernel.user_proc(init.fork(labelled(&log, "member")).unwrap()).unwrap();
        member.cinit("build", "/build", QUOTA).unwrap();

        init.cpause("build").unwrap();
        kernel.scheduler(0).run_until_idle(8);
        assert_eq!(*log.lock(), ["init"]);
        assert_eq!(
            kernel.procs().get(member.slot().index).inner.lock().state,
            ProcState::Runnable
        );

        init.cresume("build").unwrap();
        kernel.scheduler(0).run_until_idle(8);
        assert_eq!(*log.lock(), ["init", "member"]);
    }

    // ========================================
    // Yield and wakeup
    // ========================================

    #[test]
    fn test_yield_interleaves() {
        let log = trail();
        let out = log.clone();
        let (kernel, _) = boot(config(), move |p| async move {
            let child_log = out.clone();
            p.fork(move |c| async move {
                for _ in 0..2 {
                    child_log.lock().push("child");
                    c.yield_now().await;
                }
                park(&c).await;
            })
            .unwrap();
            for _ in 0..2 {
                out.lock().push("init");
                p.yield_now().await;
            }
            park(&p).await;
        });
        kernel.scheduler(0).run_until_idle(16);
        assert_eq!(*log.lock(), ["init", "child", "init", "child"]);
    }

    #[test]
    fn test_wakeup_after_condition_set() {
        let log = trail();
        let out = log.clone();
        let ready = Arc::new(crate::sync::SpinLock::new(false, "ready"));
        let flag = ready.clone();
        let (kernel, _) = boot(config(), move |p| async move {
            let cond = flag.clone();
            let consumer_log = out.clone();
            p.fork(move |c| async move {
                let mut guard = cond.lock();
                while !*guard {
                    guard = c.sleep(Channel::Custom(7), guard).await;
                }
                drop(guard);
                consumer_log.lock().push("consumed");
                park(&c).await;
            })
            .unwrap();
            p.yield_now().await;
            *flag.lock() = true;
            assert_eq!(p.wakeup(Channel::Custom(7)), 1);
            out.lock().push("produced");
            park(&p).await;
        });
        kernel.scheduler(0).run_until_idle(16);
        assert_eq!(*log.lock(), ["produced", "consumed"]);
        assert!(*ready.lock());
    }

    // ========================================
    // Switch checks
    // ========================================

    #[test]
    #[should_panic(expected = "sched locks")]
    fn test_yield_holding_a_lock_is_fatal() {
        let (kernel, _) = boot(config(), |p| async move {
            let held = crate::sync::SpinLock::new(0u32, "held");
            let _guard = held.lock();
            p.yield_now().await;
        });
        kernel.scheduler(0).run_pass();
    }

    #[test]
    #[should_panic(expected = "sched running")]
    fn test_switch_while_running_is_fatal() {
        let (kernel, _) = boot(config(), |p| async move {
            let kernel = p.kernel().clone();
            let _intr = kernel.cpus.push_off(0);
            let inner = kernel.procs().get(p.slot().index).inner.lock();
            kernel.sched(0, &inner);
        });
        kernel.scheduler(0).run_pass();
    }

    #[test]
    #[should_panic(expected = "sched interruptible")]
    fn test_switch_with_interrupts_on_is_fatal() {
        let (kernel, _) = boot(config(), |p| async move {
            let kernel = p.kernel().clone();
            kernel.cpus.lock(0).push_off();
            kernel.cpus.lock(0).intr_on();
            let mut inner = kernel.procs().get(p.slot().index).inner.lock();
            inner.state = ProcState::Runnable;
            kernel.sched(0, &inner);
        });
        kernel.scheduler(0).run_pass();
    }

    #[test]
    fn test_locks_released_before_switch_are_fine() {
        let log = trail();
        let out = log.clone();
        let (kernel, _) = boot(config(), move |p| async move {
            let held = crate::sync::SpinLock::new(0u32, "held");
            *held.lock() += 1;
            p.yield_now().await;
            out.lock().push("resumed");
            park(&p).await;
        });
        kernel.scheduler(0).run_until_idle(4);
        assert_eq!(*log.lock(), ["resumed"]);
        assert_eq!(crate::cpu::locks_held(), 0);
    }

    // ========================================
    // Multiple CPUs
    // ========================================

    #[test]
    fn test_two_cpus_share_the_table() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let (kernel, _) = boot(config().with_ncpu(2), move |p| async move {
            for _ in 0..3 {
                let counter = counter.clone();
                p.fork(move |c| async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    c.yield_now().await;
                    match c.exit(0).await {}
                })
                .unwrap();
            }
            for _ in 0..3 {
                p.wait().await.unwrap();
            }
            park(&p).await;
        });
        let mut cpu0 = kernel.scheduler(0);
        let mut cpu1 = kernel.scheduler(1);
        for _ in 0..8 {
            cpu0.run_pass();
            cpu1.run_pass();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(kernel.procs().live(), 1);
        assert!(!kernel.has_runnable());
        for cpu in 0..2 {
            assert_eq!(kernel.cpus.lock(cpu).current, None);
            assert_eq!(kernel.cpus.lock(cpu).noff(), 0);
        }
    }
}
