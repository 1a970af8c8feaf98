//! Symbol override publishing.
//!
//! With the `symbol-override` feature each wrapper is exported under its
//! public name and the dynamic linker does the routing. Without it the
//! wrappers are still exported as `memwatch_override_*`, and this table
//! hands `(symbol, wrapper)` pairs to an external relocation patcher.

use crate::registry::HookId;
use libc::{c_char, c_void};
use std::ffi::CStr;

/// One published override: calls to `symbol` should reach `wrapper`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Patch {
    pub symbol: *const c_char,
    pub wrapper: *const c_void,
    pub hook: HookId,
}

// Both pointers refer to immutable data in this image.
unsafe impl Sync for Patch {}
unsafe impl Send for Patch {}

impl Patch {
    pub const fn new(hook: HookId, wrapper: *const c_void) -> Self {
        Self {
            symbol: hook.descriptor().symbol.as_ptr(),
            wrapper,
            hook,
        }
    }

    pub fn symbol(&self) -> &'static CStr {
        self.hook.descriptor().symbol
    }
}

/// Whether wrappers are exported under the public names in this build.
pub const SYMBOL_OVERRIDE: bool = cfg!(feature = "symbol-override");

pub const MEMORY_PATCHES: [Patch; 8] = [
    crate::hooks::mmap::PATCH,
    crate::hooks::munmap::PATCH,
    crate::hooks::mremap::PATCH,
    crate::hooks::shmat::PATCH,
    crate::hooks::shmdt::PATCH,
    crate::hooks::sbrk::PATCH,
    crate::hooks::brk::PATCH,
    crate::hooks::madvise::PATCH,
];

#[cfg(feature = "gpu")]
const fn join<const A: usize, const B: usize, const N: usize>(
    a: [Patch; A],
    b: [Patch; B],
) -> [Patch; N] {
    assert!(A + B == N);
    let empty = Patch {
        symbol: std::ptr::null(),
        wrapper: std::ptr::null(),
        hook: HookId::Mmap,
    };
    let mut out = [empty; N];
    let mut i = 0;
    while i < A {
        out[i] = a[i];
        i += 1;
    }
    let mut j = 0;
    while j < B {
        out[A + j] = b[j];
        j += 1;
    }
    out
}

#[cfg(not(feature = "gpu"))]
static PATCHES: [Patch; 8] = MEMORY_PATCHES;

#[cfg(feature = "gpu")]
static PATCHES: [Patch; 24] = join(MEMORY_PATCHES, crate::gpu::GPU_PATCHES);

/// Every override in this build, memory hooks first.
pub fn patches() -> &'static [Patch] {
    &PATCHES
}

/// C view of [`patches`]: writes the entry count to `count` (if non-null)
/// and returns the first entry.
#[no_mangle]
pub unsafe extern "C" fn memwatch_patches(count: *mut usize) -> *const Patch {
    let all = patches();
    if !count.is_null() {
        *count = all.len();
    }
    all.as_ptr()
}
