//! Original-function resolution.
//!
//! Each hooked function gets a write-once slot holding the address of its
//! genuine implementation. The first caller resolves it under the
//! [`ResolutionGuard`](crate::sync::ResolutionGuard); every later call is a
//! single acquire load.
//!
//! `dlsym` can itself call `mmap`/`malloc`, which lands back in a wrapper on
//! the resolving thread. That re-entry is detected by the guard's owner
//! marker and answered with the raw syscall (when the function has one) or
//! the function's failure sentinel, never by a second lookup.

use crate::context::HookContext;
use crate::registry::HookId;
use crate::sync::Entry;
use libc::{c_long, c_void};
use std::ffi::CStr;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

/// "Find the next definition of this name after the current module."
pub trait SymbolLookup: Sync {
    /// Address of the next definition of `symbol`, or null if none exists.
    unsafe fn lookup_next(&self, symbol: &CStr) -> *mut c_void;
}

/// `dlsym(RTLD_NEXT, ..)`
#[derive(Debug, Default, Clone, Copy)]
pub struct DlsymNext;

impl SymbolLookup for DlsymNext {
    unsafe fn lookup_next(&self, symbol: &CStr) -> *mut c_void {
        libc::dlsym(libc::RTLD_NEXT, symbol.as_ptr())
    }
}

/// Cached address of one genuine implementation. Null means unresolved.
pub struct OrigSlot {
    ptr: AtomicPtr<c_void>,
}

impl Default for OrigSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl OrigSlot {
    pub const fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[inline(always)]
    pub fn get(&self) -> Option<NonNull<c_void>> {
        NonNull::new(self.ptr.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, f: NonNull<c_void>) {
        self.ptr.store(f.as_ptr(), Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("symbol resolution re-entered on the resolving thread")]
    Reentrant,
    #[error("no next definition of the symbol")]
    NotFound,
}

/// How a wrapper should reach the genuine implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Original {
    /// Call this address with the function's C signature.
    Symbol(NonNull<c_void>),
    /// Issue this syscall directly.
    Syscall(c_long),
    /// Nothing safe is available; return the sentinel with `ENOMEM`.
    Unavailable(ResolveError),
}

impl<L: SymbolLookup> HookContext<L> {
    /// Address of the genuine implementation of `id`, resolving it on the
    /// first call.
    #[inline]
    pub fn resolve(&self, id: HookId) -> Result<NonNull<c_void>, ResolveError> {
        if let Some(f) = self.slots[id.index()].get() {
            return Ok(f);
        }
        self.resolve_slow(id)
    }

    #[cold]
    #[inline(never)]
    fn resolve_slow(&self, id: HookId) -> Result<NonNull<c_void>, ResolveError> {
        let slot = &self.slots[id.index()];
        let _owner = match self.guard.enter() {
            Entry::Acquired(token) => token,
            Entry::Reentrant => {
                hook_debug!("re-entered resolution of {}", id.name());
                return Err(ResolveError::Reentrant);
            }
        };

        // Another thread may have finished while we were blocked.
        if let Some(f) = slot.get() {
            return Ok(f);
        }

        self.stats.record_lookup();
        let found = unsafe { self.lookup.lookup_next(id.descriptor().symbol) };
        match NonNull::new(found) {
            Some(f) => {
                slot.store(f);
                hook_debug!("resolved {} at {:p}", id.name(), f.as_ptr());
                Ok(f)
            }
            None => {
                hook_warn!("no next definition of {}", id.name());
                Err(ResolveError::NotFound)
            }
        }
    }

    /// Pick the path to the genuine implementation of `id`.
    ///
    /// Functions with a native call number use it directly unless the
    /// context prefers symbol resolution; then the syscall is still the
    /// fallback when resolution fails or re-enters.
    pub fn original(&self, id: HookId) -> Original {
        let syscall = id.descriptor().syscall;
        if let Some(nr) = syscall {
            if self.prefers_syscall() {
                return Original::Syscall(nr);
            }
        }

        match self.resolve(id) {
            Ok(f) => Original::Symbol(f),
            Err(err) => {
                self.stats.record_fallback();
                match syscall {
                    Some(nr) => {
                        hook_trace!("{}: {}, using syscall {}", id.name(), err, nr);
                        Original::Syscall(nr)
                    }
                    None => {
                        hook_error!("{}: {}, no original to call", id.name(), err);
                        Original::Unavailable(err)
                    }
                }
            }
        }
    }

    pub fn is_resolved(&self, id: HookId) -> bool {
        self.slots[id.index()].get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
        target: usize,
    }

    impl SymbolLookup for Counting {
        unsafe fn lookup_next(&self, _symbol: &CStr) -> *mut c_void {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.target as *mut c_void
        }
    }

    fn counting(target: usize) -> HookContext<Counting> {
        HookContext::new(Counting {
            calls: AtomicUsize::new(0),
            target,
        })
    }

    #[test]
    fn resolves_once_then_uses_cache() {
        let ctx = counting(0x1000);
        for _ in 0..100 {
            assert_eq!(ctx.resolve(HookId::Sbrk).unwrap().as_ptr() as usize, 0x1000);
        }
        assert_eq!(ctx.lookup.calls.load(Ordering::SeqCst), 1);
        assert!(ctx.is_resolved(HookId::Sbrk));
        assert!(!ctx.is_resolved(HookId::Mmap));
    }

    #[test]
    fn missing_symbol_is_reported_and_not_cached() {
        let ctx = counting(0);
        assert_eq!(ctx.resolve(HookId::Sbrk), Err(ResolveError::NotFound));
        assert!(!ctx.is_resolved(HookId::Sbrk));
        assert_eq!(
            ctx.original(HookId::Sbrk),
            Original::Unavailable(ResolveError::NotFound)
        );
    }

    #[test]
    fn reentry_on_the_resolving_thread_is_refused() {
        let ctx = counting(0x2000);
        let _held = ctx.guard.enter();
        assert_eq!(ctx.resolve(HookId::Sbrk), Err(ResolveError::Reentrant));
        assert_eq!(ctx.lookup.calls.load(Ordering::SeqCst), 0);
    }

    #[cfg(all(
        feature = "raw-syscalls",
        target_os = "linux",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ))]
    #[test]
    fn syscall_capable_hooks_bypass_lookup_by_default() {
        let ctx = counting(0x3000);
        assert_eq!(ctx.original(HookId::Mmap), Original::Syscall(libc::SYS_mmap));
        assert_eq!(ctx.lookup.calls.load(Ordering::SeqCst), 0);

        ctx.set_prefer_syscall(false);
        assert!(matches!(ctx.original(HookId::Mmap), Original::Symbol(_)));
        assert_eq!(ctx.lookup.calls.load(Ordering::SeqCst), 1);
    }

    #[cfg(all(
        feature = "raw-syscalls",
        target_os = "linux",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ))]
    #[test]
    fn failed_resolution_falls_back_to_syscall() {
        crate::log::configure(crate::log::LogLevel::Trace, false);
        let ctx = counting(0);
        ctx.set_prefer_syscall(false);
        assert_eq!(ctx.original(HookId::Munmap), Original::Syscall(libc::SYS_munmap));
        assert_eq!(ctx.stats().fallbacks(), 1);
        assert!(ring_contains("munmap: no next definition of the symbol, using syscall"));
    }

    fn ring_contains(needle: &str) -> bool {
        let mut recent = vec![0u8; crate::log::LOG_BUF_SIZE];
        let n = crate::log::LOGGER.copy_recent(&mut recent);
        String::from_utf8_lossy(&recent[..n]).contains(needle)
    }

    #[test]
    fn unavailable_original_is_logged() {
        crate::log::configure(crate::log::LogLevel::Trace, false);
        let ctx = counting(0);
        assert!(matches!(ctx.original(HookId::Sbrk), Original::Unavailable(_)));
        assert!(ring_contains("sbrk: no next definition of the symbol, no original to call"));
    }

    #[test]
    fn dlsym_next_finds_libc() {
        // The test binary has no definition of getpid, so the next one is libc's.
        let f = unsafe { DlsymNext.lookup_next(c"getpid") };
        assert!(!f.is_null());
    }
}
