//! Program-break tracking.
//!
//! `brk` is the one hooked function with no resolver path: glibc's `brk`
//! cannot be reached through `dlsym` without also moving its private
//! bookkeeping, so the break is always changed through the raw syscall and
//! the user-space shadow (`__curbrk` on glibc) is kept in step by hand.
//!
//! Platforms without a break call number get an always-failing channel.
//!
//! The shadow is best-effort: it reflects breaks set through this tracker
//! only. Those are serialized with each other, so racing callers cannot
//! leave an older break in the shadow. Code that moves the break by other means (an unhooked raw syscall,
//! a direct write to the shadow) is not observed.

use crate::registry::HookId;
use crate::sync::{Entry, ResolutionGuard};
use libc::{c_int, c_void};
use std::sync::atomic::{AtomicPtr, Ordering};

/// How a new break is requested from the kernel.
pub trait BreakChannel: Sync {
    /// The kernel's break after asking for `addr`, or `None` if this
    /// platform offers no way to move it.
    unsafe fn set_break(&self, addr: *mut c_void) -> Option<*mut c_void>;
}

/// The `brk` syscall, when the build has its number.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyscallBreak;

impl BreakChannel for SyscallBreak {
    unsafe fn set_break(&self, addr: *mut c_void) -> Option<*mut c_void> {
        let nr = HookId::Brk.descriptor().syscall?;
        Some(crate::syscall::brk(nr, addr))
    }
}

/// User-space copy of the current break that other code reads directly.
pub trait BreakShadow: Sync {
    fn load(&self) -> Option<*mut c_void>;
    unsafe fn store(&self, brk: *mut c_void);
}

/// glibc's `__curbrk`, read by its own `sbrk`.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct CurbrkShadow;

#[cfg(all(target_os = "linux", target_env = "gnu"))]
extern "C" {
    static mut __curbrk: *mut c_void;
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
impl BreakShadow for CurbrkShadow {
    fn load(&self) -> Option<*mut c_void> {
        Some(unsafe { std::ptr::read_volatile(std::ptr::addr_of!(__curbrk)) })
    }

    unsafe fn store(&self, brk: *mut c_void) {
        std::ptr::write_volatile(std::ptr::addr_of_mut!(__curbrk), brk);
    }
}

/// For libcs that keep no shadow.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoShadow;

impl BreakShadow for NoShadow {
    fn load(&self) -> Option<*mut c_void> {
        None
    }

    unsafe fn store(&self, _brk: *mut c_void) {}
}

/// A shadow owned by this process image rather than by libc.
#[derive(Debug, Default)]
pub struct ShadowCell(AtomicPtr<c_void>);

impl ShadowCell {
    pub const fn new(initial: *mut c_void) -> Self {
        Self(AtomicPtr::new(initial))
    }
}

impl BreakShadow for ShadowCell {
    fn load(&self) -> Option<*mut c_void> {
        Some(self.0.load(Ordering::Acquire))
    }

    unsafe fn store(&self, brk: *mut c_void) {
        self.0.store(brk, Ordering::Release);
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub type PlatformShadow = CurbrkShadow;
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub type PlatformShadow = NoShadow;

pub struct BreakTracker<C: BreakChannel, S: BreakShadow> {
    channel: C,
    shadow: S,
}

impl<C: BreakChannel, S: BreakShadow> BreakTracker<C, S> {
    pub const fn new(channel: C, shadow: S) -> Self {
        Self { channel, shadow }
    }

    pub fn shadow(&self) -> &S {
        &self.shadow
    }

    /// `brk(2)` with libc's contract: 0 on success, -1 with `ENOMEM` when
    /// the kernel did not reach `addr` or the platform cannot move the break.
    ///
    /// The kernel request and the shadow write happen under `guard`, so
    /// concurrent callers leave the shadow holding the break the kernel
    /// granted last. The shadow is written only on success.
    pub unsafe fn set_break(&self, guard: &ResolutionGuard, addr: *mut c_void) -> c_int {
        // Reentrant means a resolution further up this thread's stack already
        // holds the guard, so the section is still exclusive.
        let _owner = match guard.enter() {
            Entry::Acquired(token) => Some(token),
            Entry::Reentrant => None,
        };

        let Some(new_break) = self.channel.set_break(addr) else {
            hook_debug!("brk unsupported on this platform");
            crate::set_errno(libc::ENOMEM);
            return -1;
        };

        if (new_break as usize) < (addr as usize) {
            crate::set_errno(libc::ENOMEM);
            return -1;
        }

        self.shadow.store(new_break);
        0
    }
}

pub static BREAK: BreakTracker<SyscallBreak, PlatformShadow> =
    BreakTracker::new(SyscallBreak, PlatformShadow {});

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;
    use std::sync::atomic::AtomicUsize;

    /// Kernel stand-in that grants breaks up to `limit`.
    struct FakeKernel {
        current: AtomicUsize,
        limit: usize,
    }

    impl FakeKernel {
        fn new(current: usize, limit: usize) -> Self {
            Self {
                current: AtomicUsize::new(current),
                limit,
            }
        }
    }

    impl BreakChannel for FakeKernel {
        unsafe fn set_break(&self, addr: *mut c_void) -> Option<*mut c_void> {
            let want = addr as usize;
            if want != 0 && want <= self.limit {
                self.current.store(want, Ordering::SeqCst);
            }
            Some(self.current.load(Ordering::SeqCst) as *mut c_void)
        }
    }

    struct Unsupported;

    impl BreakChannel for Unsupported {
        unsafe fn set_break(&self, _addr: *mut c_void) -> Option<*mut c_void> {
            None
        }
    }

    const START: usize = 0x5555_0000;

    #[test]
    fn growing_the_break_updates_the_shadow() {
        let tracker = BreakTracker::new(
            FakeKernel::new(START, START + 0x10_0000),
            ShadowCell::new(START as *mut c_void),
        );
        let guard = ResolutionGuard::new();
        let target = (START + 0x2000) as *mut c_void;

        assert_eq!(unsafe { tracker.set_break(&guard, target) }, 0);
        assert_eq!(tracker.shadow().load(), Some(target));
        assert_eq!(guard.owner(), None);
    }

    #[test]
    fn refused_break_leaves_the_shadow_alone() {
        let tracker = BreakTracker::new(
            FakeKernel::new(START, START + 0x1000),
            ShadowCell::new(START as *mut c_void),
        );
        let guard = ResolutionGuard::new();

        crate::set_errno(0);
        let r = unsafe { tracker.set_break(&guard, (START + 0x10_0000) as *mut c_void) };
        assert_eq!(r, -1);
        assert_eq!(crate::errno(), libc::ENOMEM);
        assert_eq!(tracker.shadow().load(), Some(START as *mut c_void));
    }

    #[test]
    fn unsupported_platform_always_fails() {
        let tracker = BreakTracker::new(Unsupported, ShadowCell::new(START as *mut c_void));
        let guard = ResolutionGuard::new();

        for addr in [0usize, START, START + 0x1000] {
            crate::set_errno(0);
            assert_eq!(unsafe { tracker.set_break(&guard, addr as *mut c_void) }, -1);
            assert_eq!(crate::errno(), libc::ENOMEM);
        }
        assert_eq!(tracker.shadow().load(), Some(START as *mut c_void));
    }

    #[test]
    fn shadow_is_written_while_resolution_is_in_progress() {
        let tracker = BreakTracker::new(
            FakeKernel::new(START, START + 0x10_0000),
            ShadowCell::new(START as *mut c_void),
        );
        let guard = ResolutionGuard::new();
        let _resolving = guard.enter();
        let target = (START + 0x1000) as *mut c_void;

        assert_eq!(unsafe { tracker.set_break(&guard, target) }, 0);
        assert_eq!(tracker.shadow().load(), Some(target));
    }

    /// Grants every request, yielding between the kernel update and the
    /// reply so that racing callers interleave.
    struct SlowKernel {
        current: AtomicUsize,
    }

    impl BreakChannel for SlowKernel {
        unsafe fn set_break(&self, addr: *mut c_void) -> Option<*mut c_void> {
            self.current.store(addr as usize, Ordering::SeqCst);
            for _ in 0..8 {
                std::thread::yield_now();
            }
            Some(addr)
        }
    }

    #[test]
    fn racing_callers_leave_the_latest_break_in_the_shadow() {
        let tracker = BreakTracker::new(
            SlowKernel {
                current: AtomicUsize::new(START),
            },
            ShadowCell::new(START as *mut c_void),
        );
        let guard = ResolutionGuard::new();

        std::thread::scope(|s| {
            for t in 0..8usize {
                let tracker = &tracker;
                let guard = &guard;
                s.spawn(move || {
                    for round in 0..100usize {
                        let target = START + (t * 100 + round + 1) * 0x1000;
                        assert_eq!(unsafe { tracker.set_break(guard, target as *mut c_void) }, 0);
                    }
                });
            }
        });

        let kernel = tracker.channel.current.load(Ordering::SeqCst);
        assert_eq!(tracker.shadow().load(), Some(kernel as *mut c_void));
        assert_eq!(guard.owner(), None);
    }

    #[cfg(all(
        feature = "raw-syscalls",
        target_os = "linux",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ))]
    #[test]
    fn kernel_refuses_an_impossible_break() {
        let tracker = BreakTracker::new(SyscallBreak, ShadowCell::new(ptr::null_mut()));
        let guard = ResolutionGuard::new();

        crate::set_errno(0);
        let r = unsafe { tracker.set_break(&guard, (1usize << 62) as *mut c_void) };
        assert_eq!(r, -1);
        assert_eq!(crate::errno(), libc::ENOMEM);
        assert_eq!(tracker.shadow().load(), Some(ptr::null_mut()));
    }

    #[cfg(all(
        feature = "raw-syscalls",
        target_os = "linux",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ))]
    #[test]
    fn setting_the_current_break_succeeds() {
        // Asking for the break the process already has never moves it.
        let nr = HookId::Brk.descriptor().syscall.unwrap();
        let current = unsafe { crate::syscall::brk(nr, ptr::null_mut()) };
        let tracker = BreakTracker::new(SyscallBreak, ShadowCell::new(ptr::null_mut()));
        let guard = ResolutionGuard::new();

        assert_eq!(unsafe { tracker.set_break(&guard, current) }, 0);
        assert_eq!(tracker.shadow().load(), Some(current));
    }
}
