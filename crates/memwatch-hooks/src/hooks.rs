//! Memory-mapping hooks.

use crate::brk::{BreakChannel, BreakShadow, BreakTracker};
use crate::context::HookContext;
use crate::event::MemEvent;
use crate::resolver::SymbolLookup;
use libc::{c_int, c_void, off_t, size_t};

define_hooks! {
    mmap: Mmap => memwatch_orig_mmap, memwatch_override_mmap;
    fn(addr: *mut c_void, length: size_t, prot: c_int, flags: c_int, fd: c_int, offset: off_t) -> *mut c_void;
    real: unsafe extern "C" fn(*mut c_void, size_t, c_int, c_int, c_int, off_t) -> *mut c_void;
    event: |res| MemEvent::Mmap {
        addr: addr as usize,
        length,
        prot,
        flags,
        fd,
        offset: offset as i64,
        result: res as usize,
    };

    munmap: Munmap => memwatch_orig_munmap, memwatch_override_munmap;
    fn(addr: *mut c_void, length: size_t) -> c_int;
    real: unsafe extern "C" fn(*mut c_void, size_t) -> c_int;
    event: |res| MemEvent::Munmap {
        addr: addr as usize,
        length,
        result: res,
    };

    /// `new_address` is only read by the kernel with `MREMAP_FIXED`.
    mremap: Mremap => memwatch_orig_mremap, memwatch_override_mremap;
    fn(old_address: *mut c_void, old_size: size_t, new_size: size_t, flags: c_int, new_address: *mut c_void) -> *mut c_void;
    real: unsafe extern "C" fn(*mut c_void, size_t, size_t, c_int, ...) -> *mut c_void;
    event: |res| MemEvent::Mremap {
        old_address: old_address as usize,
        old_size,
        new_size,
        flags,
        new_address: new_address as usize,
        result: res as usize,
    };

    shmat: Shmat => memwatch_orig_shmat, memwatch_override_shmat;
    fn(shmid: c_int, shmaddr: *const c_void, shmflg: c_int) -> *mut c_void;
    real: unsafe extern "C" fn(c_int, *const c_void, c_int) -> *mut c_void;
    event: |res| MemEvent::Shmat {
        shmid,
        shmaddr: shmaddr as usize,
        shmflg,
        result: res as usize,
    };

    shmdt: Shmdt => memwatch_orig_shmdt, memwatch_override_shmdt;
    fn(shmaddr: *const c_void) -> c_int;
    real: unsafe extern "C" fn(*const c_void) -> c_int;
    event: |res| MemEvent::Shmdt {
        shmaddr: shmaddr as usize,
        result: res,
    };

    sbrk: Sbrk => memwatch_orig_sbrk, memwatch_override_sbrk;
    fn(increment: libc::intptr_t) -> *mut c_void;
    real: unsafe extern "C" fn(libc::intptr_t) -> *mut c_void;
    event: |res| MemEvent::Sbrk {
        increment,
        result: res as usize,
    };

    madvise: Madvise => memwatch_orig_madvise, memwatch_override_madvise;
    fn(addr: *mut c_void, length: size_t, advice: c_int) -> c_int;
    real: unsafe extern "C" fn(*mut c_void, size_t, c_int) -> c_int;
    event: |res| MemEvent::Madvise {
        addr: addr as usize,
        length,
        advice,
        result: res,
    };
}

/// `brk` goes through the [`BreakTracker`] instead of the resolver.
pub mod brk {
    use super::*;
    use crate::registry::HookId;

    pub const ID: HookId = HookId::Brk;

    pub const PATCH: crate::publish::Patch =
        crate::publish::Patch::new(ID, super::memwatch_override_brk as *const c_void);

    pub unsafe fn intercept<L, C, S>(
        ctx: &HookContext<L>,
        tracker: &BreakTracker<C, S>,
        addr: *mut c_void,
    ) -> c_int
    where
        L: SymbolLookup,
        C: BreakChannel,
        S: BreakShadow,
    {
        ctx.intercept(
            ID,
            || tracker.set_break(ctx.guard(), addr),
            |result| MemEvent::Brk {
                addr: addr as usize,
                result,
            },
        )
    }
}

#[no_mangle]
pub unsafe extern "C" fn memwatch_orig_brk(addr: *mut c_void) -> c_int {
    crate::brk::BREAK.set_break(crate::context::CONTEXT.guard(), addr)
}

#[no_mangle]
pub unsafe extern "C" fn memwatch_override_brk(addr: *mut c_void) -> c_int {
    brk::intercept(&crate::context::CONTEXT, &crate::brk::BREAK, addr)
}

#[cfg(feature = "symbol-override")]
#[no_mangle]
pub unsafe extern "C" fn brk(addr: *mut c_void) -> c_int {
    memwatch_override_brk(addr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::HookId;
    use std::ffi::CStr;
    use std::sync::Mutex;

    struct NoLookup;

    impl SymbolLookup for NoLookup {
        unsafe fn lookup_next(&self, _symbol: &CStr) -> *mut c_void {
            std::ptr::null_mut()
        }
    }

    static EVENTS: Mutex<Vec<MemEvent>> = Mutex::new(Vec::new());

    fn record(event: &MemEvent) {
        EVENTS.lock().unwrap().push(*event);
    }

    fn events_for(id: HookId) -> Vec<MemEvent> {
        EVENTS
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.hook() == id)
            .copied()
            .collect()
    }

    #[test]
    fn unresolvable_sbrk_returns_sentinel_with_enomem() {
        let ctx = HookContext::new(NoLookup);
        crate::set_errno(0);
        let r = unsafe { sbrk::intercept(&ctx, 0) };
        assert_eq!(r, libc::MAP_FAILED);
        assert_eq!(crate::errno(), libc::ENOMEM);
        assert_eq!(ctx.stats().fallbacks(), 1);
    }

    #[cfg(all(
        feature = "raw-syscalls",
        target_os = "linux",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ))]
    #[test]
    fn mmap_round_trip_is_reported() {
        let ctx = HookContext::new(NoLookup);
        ctx.set_sink(&record).unwrap();
        unsafe {
            let p = mmap::intercept(
                &ctx,
                std::ptr::null_mut(),
                8192,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            assert_ne!(p, libc::MAP_FAILED);
            *(p as *mut u8) = 1;
            assert_eq!(madvise::intercept(&ctx, p, 8192, libc::MADV_DONTNEED), 0);
            assert_eq!(*(p as *const u8), 0);
            assert_eq!(munmap::intercept(&ctx, p, 8192), 0);

            let mapped = events_for(HookId::Mmap);
            assert!(mapped.iter().any(|e| matches!(
                e,
                MemEvent::Mmap { length: 8192, result, .. } if *result == p as usize
            )));
            let unmapped = events_for(HookId::Munmap);
            assert!(unmapped.iter().any(|e| matches!(
                e,
                MemEvent::Munmap { addr, length: 8192, result: 0 } if *addr == p as usize
            )));
        }
        assert_eq!(ctx.stats().notifications(), 3);
        assert_eq!(ctx.stats().lookups(), 0);
    }

    #[cfg(all(
        feature = "raw-syscalls",
        target_os = "linux",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ))]
    #[test]
    fn mremap_grows_a_mapping() {
        let ctx = HookContext::new(NoLookup);
        unsafe {
            let p = mmap::original(
                &ctx,
                std::ptr::null_mut(),
                4096,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            );
            assert_ne!(p, libc::MAP_FAILED);
            *(p as *mut u8) = 9;
            let q = mremap::intercept(&ctx, p, 4096, 16384, libc::MREMAP_MAYMOVE, std::ptr::null_mut());
            assert_ne!(q, libc::MAP_FAILED);
            assert_eq!(*(q as *const u8), 9);
            assert_eq!(munmap::original(&ctx, q, 16384), 0);
        }
    }

    #[cfg(all(
        feature = "raw-syscalls",
        target_os = "linux",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ))]
    #[test]
    fn fixed_mremap_reports_its_target() {
        let ctx = HookContext::new(NoLookup);
        ctx.set_sink(&record).unwrap();
        let anon = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;
        let rw = libc::PROT_READ | libc::PROT_WRITE;
        unsafe {
            let p = mmap::original(&ctx, std::ptr::null_mut(), 4096, rw, anon, -1, 0);
            let target = mmap::original(&ctx, std::ptr::null_mut(), 8192, rw, anon, -1, 0);
            assert_ne!(p, libc::MAP_FAILED);
            assert_ne!(target, libc::MAP_FAILED);

            let q = mremap::intercept(
                &ctx,
                p,
                4096,
                8192,
                libc::MREMAP_MAYMOVE | libc::MREMAP_FIXED,
                target,
            );
            assert_eq!(q, target);

            let remapped = events_for(HookId::Mremap);
            assert!(remapped.iter().any(|e| matches!(
                e,
                MemEvent::Mremap { old_address, new_address, new_size: 8192, result, .. }
                    if *old_address == p as usize
                        && *new_address == target as usize
                        && *result == target as usize
            )));
            assert_eq!(munmap::original(&ctx, target, 8192), 0);
        }
    }

    #[test]
    fn brk_failure_is_reported_to_the_sink() {
        use crate::brk::ShadowCell;

        struct Refuse;
        impl BreakChannel for Refuse {
            unsafe fn set_break(&self, _addr: *mut c_void) -> Option<*mut c_void> {
                Some(0x1000 as *mut c_void)
            }
        }

        let ctx = HookContext::new(NoLookup);
        ctx.set_sink(&record).unwrap();
        let tracker = BreakTracker::new(Refuse, ShadowCell::new(0x1000 as *mut c_void));
        let r = unsafe { brk::intercept(&ctx, &tracker, 0x9000 as *mut c_void) };
        assert_eq!(r, -1);
        assert_eq!(crate::errno(), libc::ENOMEM);
        assert!(events_for(HookId::Brk).contains(&MemEvent::Brk {
            addr: 0x9000,
            result: -1
        }));
    }
}
