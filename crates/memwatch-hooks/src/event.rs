//! Notifications handed to the event subsystem.

use crate::registry::HookId;
use libc::{c_int, c_void};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Which kind of GPU memory operation a [`MemEvent::Gpu`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuOp {
    Alloc,
    Free,
    HostRegister,
    HostUnregister,
    DevicePointer,
}

/// One completed intercepted call: its arguments and the genuine result.
///
/// Addresses are carried as `usize` so events are `Send` and can be queued
/// by a sink without unsafe code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemEvent {
    Mmap {
        addr: usize,
        length: usize,
        prot: c_int,
        flags: c_int,
        fd: c_int,
        offset: i64,
        result: usize,
    },
    Munmap {
        addr: usize,
        length: usize,
        result: c_int,
    },
    Mremap {
        old_address: usize,
        old_size: usize,
        new_size: usize,
        flags: c_int,
        /// Requested target; meaningful only with `MREMAP_FIXED`.
        new_address: usize,
        result: usize,
    },
    Shmat {
        shmid: c_int,
        shmaddr: usize,
        shmflg: c_int,
        result: usize,
    },
    Shmdt {
        shmaddr: usize,
        result: c_int,
    },
    Sbrk {
        increment: isize,
        result: usize,
    },
    Brk {
        addr: usize,
        result: c_int,
    },
    Madvise {
        addr: usize,
        length: usize,
        advice: c_int,
        result: c_int,
    },
    Gpu {
        hook: HookId,
        op: GpuOp,
        /// Device or host address involved; zero when the call produced none.
        address: u64,
        /// Bytes involved when the API reports them, otherwise zero.
        length: usize,
        /// The API's status code; zero is success.
        result: c_int,
    },
}

const MAP_FAILED: usize = usize::MAX;

impl MemEvent {
    pub fn hook(&self) -> HookId {
        match self {
            MemEvent::Mmap { .. } => HookId::Mmap,
            MemEvent::Munmap { .. } => HookId::Munmap,
            MemEvent::Mremap { .. } => HookId::Mremap,
            MemEvent::Shmat { .. } => HookId::Shmat,
            MemEvent::Shmdt { .. } => HookId::Shmdt,
            MemEvent::Sbrk { .. } => HookId::Sbrk,
            MemEvent::Brk { .. } => HookId::Brk,
            MemEvent::Madvise { .. } => HookId::Madvise,
            MemEvent::Gpu { hook, .. } => *hook,
        }
    }

    /// Whether the genuine call reported success.
    pub fn succeeded(&self) -> bool {
        match *self {
            MemEvent::Mmap { result, .. }
            | MemEvent::Mremap { result, .. }
            | MemEvent::Shmat { result, .. }
            | MemEvent::Sbrk { result, .. } => result != MAP_FAILED,
            MemEvent::Munmap { result, .. }
            | MemEvent::Shmdt { result, .. }
            | MemEvent::Brk { result, .. }
            | MemEvent::Madvise { result, .. } => result == 0,
            MemEvent::Gpu { result, .. } => result == 0,
        }
    }
}

/// Receiver of [`MemEvent`]s.
///
/// `notify` runs synchronously on the calling thread after the genuine call
/// returned and before the wrapper returns to its caller. Memory calls made
/// from inside `notify` are forwarded but not reported again.
pub trait EventSink: Sync {
    fn notify(&self, event: &MemEvent);
}

impl<F> EventSink for F
where
    F: Fn(&MemEvent) + Sync,
{
    fn notify(&self, event: &MemEvent) {
        self(event)
    }
}

// Stored as key + 1 so zero can mean "not created yet"; 0 is a valid key.
static DISPATCH_KEY: AtomicUsize = AtomicUsize::new(0);
static DISPATCH_KEY_LOCK: AtomicBool = AtomicBool::new(false);

fn dispatch_key() -> Option<libc::pthread_key_t> {
    let stored = DISPATCH_KEY.load(Ordering::Acquire);
    if stored != 0 {
        return Some((stored - 1) as libc::pthread_key_t);
    }

    if DISPATCH_KEY_LOCK.swap(true, Ordering::SeqCst) {
        // Another thread is creating the key
        for _ in 0..1000 {
            std::hint::spin_loop();
            let stored = DISPATCH_KEY.load(Ordering::Acquire);
            if stored != 0 {
                return Some((stored - 1) as libc::pthread_key_t);
            }
        }
        return None;
    }

    let mut key: libc::pthread_key_t = 0;
    let ret = unsafe { libc::pthread_key_create(&mut key, None) };
    if ret != 0 {
        DISPATCH_KEY_LOCK.store(false, Ordering::SeqCst);
        return None;
    }
    DISPATCH_KEY.store(key as usize + 1, Ordering::Release);
    DISPATCH_KEY_LOCK.store(false, Ordering::SeqCst);
    Some(key)
}

/// Marks the current thread as "inside a sink" for the guard's lifetime.
pub(crate) struct DispatchGuard(Option<libc::pthread_key_t>);

impl DispatchGuard {
    /// `None` if this thread is already dispatching.
    ///
    /// If no key can be created, dispatch proceeds without the guard.
    pub(crate) fn enter() -> Option<Self> {
        let Some(key) = dispatch_key() else {
            return Some(DispatchGuard(None));
        };
        let val = unsafe { libc::pthread_getspecific(key) };
        if !val.is_null() {
            return None;
        }
        unsafe { libc::pthread_setspecific(key, std::ptr::dangling::<c_void>()) };
        Some(DispatchGuard(Some(key)))
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        if let Some(key) = self.0 {
            unsafe { libc::pthread_setspecific(key, std::ptr::null()) };
        }
    }
}
