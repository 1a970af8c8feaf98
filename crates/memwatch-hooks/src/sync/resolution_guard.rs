use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Owner marker meaning "nobody is resolving". Never a valid `pthread_t`.
const NO_OWNER: usize = usize::MAX;

/// Identity of the calling thread as stored in the owner marker.
#[inline(always)]
pub fn current_thread() -> usize {
    unsafe { libc::pthread_self() as usize }
}

/// A plain pthread mutex plus an explicit owner marker.
///
/// Unlike a recursive mutex, a second `enter()` from the owning thread does
/// not lock again: it returns [`Entry::Reentrant`] so the caller can take a
/// fallback path instead of recursing into the symbol lookup. Other threads
/// block until the owner leaves.
pub struct ResolutionGuard {
    mutex: UnsafeCell<libc::pthread_mutex_t>,
    owner: AtomicUsize,
}

unsafe impl Send for ResolutionGuard {}
unsafe impl Sync for ResolutionGuard {}

pub enum Entry<'a> {
    /// This thread now owns the guard until the token is dropped.
    Acquired(OwnerToken<'a>),
    /// This thread already owns the guard further up its stack.
    Reentrant,
}

impl Default for ResolutionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolutionGuard {
    pub const fn new() -> Self {
        Self {
            mutex: UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER),
            owner: AtomicUsize::new(NO_OWNER),
        }
    }

    pub fn enter(&self) -> Entry<'_> {
        let me = current_thread();
        // Only this thread ever stores `me`, so an unlocked read is exact here.
        if self.owner.load(Ordering::Acquire) == me {
            return Entry::Reentrant;
        }
        unsafe {
            libc::pthread_mutex_lock(self.mutex.get());
        }
        self.owner.store(me, Ordering::Release);
        Entry::Acquired(OwnerToken { guard: self })
    }

    /// Thread currently inside the critical section, if any.
    pub fn owner(&self) -> Option<usize> {
        match self.owner.load(Ordering::Acquire) {
            NO_OWNER => None,
            id => Some(id),
        }
    }

    pub fn held_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Acquire) == current_thread()
    }
}

impl Drop for ResolutionGuard {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_destroy(self.mutex.get());
        }
    }
}

pub struct OwnerToken<'a> {
    guard: &'a ResolutionGuard,
}

impl<'a> Drop for OwnerToken<'a> {
    fn drop(&mut self) {
        self.guard.owner.store(NO_OWNER, Ordering::Release);
        unsafe {
            libc::pthread_mutex_unlock(self.guard.mutex.get());
        }
    }
}
